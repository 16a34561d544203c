use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::warn;

use tradegraph_core::config::RetryConfig;
use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::ModelClient;
use tradegraph_core::types::*;

/// A model client that retries failed requests with exponential backoff.
///
/// Only opening the stream is retried; once deltas flow, errors pass through
/// to the caller untouched.
pub struct RetryingClient {
    inner: Arc<dyn ModelClient>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn ModelClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &TradegraphError) -> bool {
    match e {
        TradegraphError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        TradegraphError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelClient for RetryingClient {
    fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<Delta>>>> {
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.invoke(messages.clone(), &tools).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying model request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}
