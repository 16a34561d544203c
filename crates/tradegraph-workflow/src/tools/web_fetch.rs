use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::Tool;
use tradegraph_core::types::{ToolContext, ToolResult};

const TOOL_NAME: &str = "web_fetch";

/// Fetches a news article, filing, or quote page as plain text.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .user_agent("tradegraph/0.1")
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct WebFetchInput {
    url: String,
    #[serde(default)]
    max_length: Option<usize>,
}

impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn timeout_secs(&self) -> u64 {
        60
    }

    fn description(&self) -> &str {
        "Fetch a news article, company filing, or market data page. Strips HTML tags \
         and returns plain text, truncated to max_length."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch content from"
                },
                "max_length": {
                    "type": "integer",
                    "description": "Maximum characters to return (default: 20000)"
                }
            },
            "required": ["url"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: WebFetchInput =
                serde_json::from_value(input).map_err(|e| exec_error(format!("Invalid input: {}", e)))?;

            let max_length = params.max_length.unwrap_or(20_000);

            debug!(url = %params.url, subject = %ctx.subject_id, "Fetching URL");

            let resp = self
                .client
                .get(&params.url)
                .send()
                .await
                .map_err(|e| exec_error(format!("Request failed: {}", e)))?;

            let status = resp.status();
            if !status.is_success() {
                return Ok(ToolResult::error(format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )));
            }

            let content_type = resp
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let body = resp
                .text()
                .await
                .map_err(|e| exec_error(format!("Failed to read response body: {}", e)))?;

            let text = if content_type.contains("html") {
                strip_html_tags(&body)?
            } else {
                body
            };

            Ok(ToolResult::success(truncate(text, max_length)))
        })
    }
}

fn exec_error(message: String) -> TradegraphError {
    TradegraphError::ToolExecution {
        tool: TOOL_NAME.to_string(),
        message,
    }
}

fn truncate(text: String, max_length: usize) -> String {
    if text.len() <= max_length {
        return text;
    }
    let mut cut = max_length;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n\n[truncated at {} chars]", &text[..cut], max_length)
}

/// Basic HTML tag stripping using regex.
fn strip_html_tags(html: &str) -> Result<String> {
    let compile = |pattern: &str| {
        Regex::new(pattern).map_err(|e| exec_error(format!("Bad pattern: {}", e)))
    };

    // Remove script and style blocks entirely
    let cleaned = compile(r"(?is)<script[^>]*>.*?</script>")?.replace_all(html, "");
    let cleaned = compile(r"(?is)<style[^>]*>.*?</style>")?.replace_all(&cleaned, "");
    let text = compile(r"<[^>]+>")?.replace_all(&cleaned, "");

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let text = compile(r"\n{3,}")?.replace_all(&text, "\n\n");
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html() {
        let html = "<html><head><style>p{}</style><script>x()</script></head>\
                    <body><h1>Earnings</h1><p>Revenue &amp; margin up</p></body></html>";
        assert_eq!(strip_html_tags(html).unwrap(), "EarningsRevenue & margin up");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let out = truncate("héllo wörld".to_string(), 2);
        assert!(out.starts_with('h'));
        assert!(out.contains("[truncated at 2 chars]"));
        assert_eq!(truncate("short".into(), 100), "short");
    }

    #[tokio::test]
    async fn test_invalid_input_is_execution_error() {
        let tool = WebFetchTool::default();
        let ctx = ToolContext {
            subject_id: "AAPL".into(),
            as_of: "2024-06-03".into(),
        };
        let err = tool
            .execute(serde_json::json!({ "link": "x" }), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TradegraphError::ToolExecution { .. }));
    }
}
