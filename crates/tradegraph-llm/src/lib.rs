pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use tradegraph_core::config::ModelConfig;
use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::ModelClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create a model client for the configured provider, wrapped in a
/// [`RetryingClient`] when `[model.retry]` is set.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn ModelClient>> {
    let client: Arc<dyn ModelClient> = match config.provider.as_str() {
        name if providers::presets::get_preset(name).is_some() => {
            Arc::new(OpenAiClient::new(config.clone()))
        }
        other => return Err(TradegraphError::UnsupportedProvider(other.to_string())),
    };

    Ok(match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(client, retry.clone())),
        None => client,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> ModelConfig {
        toml::from_str(&format!("provider = \"{provider}\"\nmodel_id = \"m\"")).unwrap()
    }

    #[test]
    fn test_known_providers() {
        assert!(create_client(&config("openai")).is_ok());
        assert!(create_client(&config("ollama")).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        assert!(matches!(
            create_client(&config("carrier-pigeon")),
            Err(TradegraphError::UnsupportedProvider(_))
        ));
    }
}
