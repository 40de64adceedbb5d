use std::collections::HashMap;

use sleuth_core::config::Provider;

/// Endpoint preset for a provider served through the OpenAI-compatible client.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

/// Look up the preset for a provider. Anthropic has its own client and no preset.
pub fn get_preset(provider: Provider) -> Option<ProviderPreset> {
    match provider {
        Provider::OpenAi => Some(ProviderPreset {
            default_base_url: "https://api.openai.com/v1/chat/completions",
            extra_headers: &[],
        }),
        Provider::Groq => Some(ProviderPreset {
            default_base_url: "https://api.groq.com/openai/v1/chat/completions",
            extra_headers: &[],
        }),
        Provider::Mistral => Some(ProviderPreset {
            default_base_url: "https://api.mistral.ai/v1/chat/completions",
            extra_headers: &[],
        }),
        Provider::Gemini => Some(ProviderPreset {
            default_base_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
            extra_headers: &[],
        }),
        Provider::Aiml => Some(ProviderPreset {
            default_base_url: "https://api.aimlapi.com/v1/chat/completions",
            extra_headers: &[("X-Title", "Sleuth")],
        }),
        Provider::Anthropic => None,
    }
}

/// Build extra headers from a preset + user config overrides.
pub fn build_extra_headers(
    preset: &ProviderPreset,
    user_headers: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = preset
        .extra_headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (k, v) in user_headers {
        // User overrides take precedence
        if let Some(pos) = headers.iter().position(|(hk, _)| hk == k) {
            headers[pos].1 = v.clone();
        } else {
            headers.push((k.clone(), v.clone()));
        }
    }

    headers
}
