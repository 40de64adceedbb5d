pub mod model;
pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use sleuth_core::config::{ModelConfig, Provider};
use sleuth_core::traits::LlmClient;

pub use model::ChatModel;
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client for the provider.
pub fn create_client(provider: Provider) -> Box<dyn LlmClient> {
    match provider {
        Provider::Anthropic => Box::new(AnthropicClient::new()),
        // Everything else uses the OpenAI-compatible client
        _ => Box::new(OpenAiClient::new()),
    }
}

/// Fill the endpoint and preset headers for providers served through the
/// OpenAI-compatible client. Explicit config values win.
pub fn apply_preset(config: &mut ModelConfig) {
    if let Some(preset) = providers::presets::get_preset(config.provider) {
        if config.base_url.is_none() {
            config.base_url = Some(preset.default_base_url.to_string());
        }
        config.extra_headers =
            providers::presets::build_extra_headers(&preset, &config.extra_headers)
                .into_iter()
                .collect();
    }
}

/// Build a chat model with retry and the configured fallbacks.
pub fn build_model(config: &ModelConfig, fallbacks: &[ModelConfig]) -> ChatModel {
    let mut primary = config.clone();
    apply_preset(&mut primary);

    let fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)> = fallbacks
        .iter()
        .map(|fb| {
            let mut fb = fb.clone();
            apply_preset(&mut fb);
            let client = create_client(fb.provider);
            (fb, client)
        })
        .collect();

    let client = RetryingClient::new(
        create_client(primary.provider),
        fallbacks,
        primary.retry.clone().unwrap_or_default(),
    );
    ChatModel::new(Arc::new(client), primary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_preset_fills_base_url() {
        let mut config = ModelConfig::new(Provider::Gemini, "gemini-2.5-flash");
        apply_preset(&mut config);
        assert!(config
            .base_url
            .as_deref()
            .unwrap()
            .starts_with("https://generativelanguage.googleapis.com"));
    }

    #[test]
    fn test_apply_preset_keeps_explicit_url() {
        let mut config = ModelConfig::new(Provider::Groq, "m");
        config.base_url = Some("http://localhost:9999/v1/chat/completions".into());
        apply_preset(&mut config);
        assert_eq!(
            config.base_url.as_deref(),
            Some("http://localhost:9999/v1/chat/completions")
        );
    }

    #[test]
    fn test_anthropic_has_no_preset() {
        let mut config = ModelConfig::new(Provider::Anthropic, "claude");
        apply_preset(&mut config);
        assert!(config.base_url.is_none());
    }
}
