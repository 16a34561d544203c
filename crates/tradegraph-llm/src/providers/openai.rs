use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tradegraph_core::config::ModelConfig;
use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::ModelClient;
use tradegraph_core::types::*;

use crate::providers::presets::{build_extra_headers, get_preset};
use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat-completions client. Works with OpenAI, Ollama,
/// Groq, OpenRouter and the other presets.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        let preset = get_preset(&config.provider);
        let endpoint = config
            .base_url
            .clone()
            .or_else(|| preset.as_ref().map(|p| p.default_base_url.to_string()))
            .unwrap_or_else(|| OPENAI_API_URL.to_string());
        let headers = match &preset {
            Some(p) => build_extra_headers(p, &config.extra_headers),
            None => config
                .extra_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        if preset.is_some_and(|p| p.needs_api_key) && config.api_key.is_none() {
            warn!(provider = %config.provider, "No API key configured; requests will likely be rejected");
        }

        Self {
            http: Client::new(),
            config,
            endpoint,
            headers,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Debug)]
pub(crate) struct OaiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiToolCall {
    #[serde(default)]
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<OaiFunction>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function",
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
                msg.tool_calls
                    .iter()
                    .enumerate()
                    .map(|(i, call)| OaiToolCall {
                        index: i,
                        id: Some(call.id.clone()),
                        r#type: Some("function".to_string()),
                        function: Some(OaiFunction {
                            name: Some(call.name.clone()),
                            arguments: Some(call.arguments.clone()),
                        }),
                    })
                    .collect()
            });
            // Assistant turns that only call tools may carry no text.
            let content = if msg.content.is_empty() && tool_calls.is_some() {
                None
            } else {
                Some(msg.content)
            };
            OaiMessage {
                role: msg.role.as_str(),
                content,
                name: msg.name.filter(|_| msg.role == Role::Assistant),
                tool_calls,
                tool_call_id: msg.tool_call_id,
            }
        })
        .collect()
}

/// Turns provider chunks into [`Delta`]s for one response stream.
///
/// Providers send the call id only on the first fragment of each tool call
/// and identify later fragments by index; the id is recovered here so every
/// fragment that leaves this converter carries one.
#[derive(Default)]
pub(crate) struct ChunkConverter {
    ids: HashMap<usize, String>,
}

impl ChunkConverter {
    pub(crate) fn convert(&mut self, event: SseEvent) -> Vec<Result<Delta>> {
        let data = event.data.trim();
        if data == "[DONE]" || data.is_empty() {
            return vec![];
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                warn!(data = %data, error = %e, "Failed to parse chat-completions chunk");
                return vec![Err(TradegraphError::LlmParse(format!("{}: {}", e, data)))];
            }
        };
        if let Some(err) = chunk.error {
            return vec![Err(TradegraphError::LlmStream(err.to_string()))];
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return vec![];
        };

        let (content, calls) = match choice.delta {
            Some(d) => (d.content, d.tool_calls.unwrap_or_default()),
            None => (None, vec![]),
        };
        let fragments: Vec<ToolCallFragment> = calls
            .into_iter()
            .map(|tc| self.fragment(tc))
            .collect();

        let delta = Delta {
            role: Role::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls: fragments,
            tool_call_id: None,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_provider),
        };
        if delta.content.is_none() && delta.tool_calls.is_empty() && delta.finish_reason.is_none() {
            return vec![];
        }
        vec![Ok(delta)]
    }

    fn fragment(&mut self, tc: OaiToolCall) -> ToolCallFragment {
        let id = match tc.id.filter(|id| !id.is_empty()) {
            Some(id) => {
                self.ids.insert(tc.index, id.clone());
                id
            }
            None => self
                .ids
                .entry(tc.index)
                .or_insert_with(|| format!("call_{}", tc.index))
                .clone(),
        };
        let (name, arguments) = match tc.function {
            Some(f) => (f.name, f.arguments.unwrap_or_default()),
            None => (None, String::new()),
        };
        ToolCallFragment {
            id: Some(id),
            name,
            arguments,
        }
    }
}

impl ModelClient for OpenAiClient {
    fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<Delta>>>> {
        let oai_tools = convert_tools(tools);

        Box::pin(async move {
            let body = ChatRequest {
                model: self.config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: self.config.max_tokens,
                temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
                stream: true,
                tools: oai_tools,
            };

            let mut req = self.http.post(&self.endpoint).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            for (k, v) in &self.headers {
                req = req.header(k.as_str(), v.as_str());
            }

            debug!(
                model = %self.config.model_id,
                messages = body.messages.len(),
                tools = body.tools.len(),
                "Sending chat-completions request"
            );
            let response = req
                .send()
                .await
                .map_err(|e| TradegraphError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(TradegraphError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let mut converter = ChunkConverter::default();
            let delta_stream = SseStream::new(response.bytes_stream())
                .map(move |event| {
                    let deltas = match event {
                        Ok(event) => converter.convert(event),
                        Err(e) => vec![Err(e)],
                    };
                    stream::iter(deltas)
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<Delta>>)
        })
    }
}
