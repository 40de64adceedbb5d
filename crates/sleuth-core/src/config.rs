use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SleuthError};

/// Top-level Sleuth configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    /// Model used to compress researcher transcripts (default: `model`).
    #[serde(default)]
    pub compression_model: Option<ModelConfig>,
    /// Model used to write the final report (default: `model`).
    #[serde(default)]
    pub report_model: Option<ModelConfig>,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub mcp: Option<McpConfig>,
}

/// The closed set of chat model providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Groq,
    OpenAi,
    Anthropic,
    Gemini,
    Mistral,
    Aiml,
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::Groq,
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Gemini,
        Provider::Mistral,
        Provider::Aiml,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Mistral => "mistral",
            Self::Aiml => "aiml",
        }
    }

    /// Provider-qualified model string, e.g. `groq:llama-3.3-70b-versatile`.
    ///
    /// Gemini is addressed through the `google` namespace and AIML through
    /// `openai`, since it serves an OpenAI-compatible API.
    pub fn model_string(&self, model_id: &str) -> String {
        let prefix = match self {
            Self::Gemini => "google",
            Self::Aiml => "openai",
            other => other.as_str(),
        };
        format!("{}:{}", prefix, model_id)
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GOOGLE_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
            Self::Aiml => "AIML_API_KEY",
        }
    }

    /// Model used when none is given on the command line.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenAi => "gpt-4.1",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Gemini => "gemini-2.5-flash",
            Self::Mistral => "mistral-large-latest",
            Self::Aiml => "gpt-4o",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = SleuthError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .or(match lower.as_str() {
                "google" => Some(Self::Gemini),
                "claude" => Some(Self::Anthropic),
                _ => None,
            })
            .ok_or_else(|| SleuthError::UnsupportedProvider(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: Provider,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Deadline in seconds for one complete model reply, retries included.
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

impl ModelConfig {
    pub fn new(provider: Provider, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
            timeout_secs: default_model_timeout(),
            extra_headers: HashMap::new(),
        }
    }

    pub fn model_string(&self) -> String {
        self.provider.model_string(&self.model_id)
    }

    fn has_api_key(&self) -> bool {
        usable_key(self.api_key.as_deref())
    }

    /// Fill a missing API key from the provider's environment variable.
    fn resolve_api_key(&mut self) {
        if !self.has_api_key() {
            self.api_key = std::env::var(self.provider.api_key_env())
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
    }
}

/// A key counts only if it is non-blank and not a `${VAR}` reference left
/// unexpanded because the variable was unset.
fn usable_key(key: Option<&str>) -> bool {
    key.map(str::trim)
        .is_some_and(|k| !k.is_empty() && !(k.starts_with("${") && k.ends_with('}')))
}

fn default_max_tokens() -> u32 { 8192 }
fn default_temperature() -> f32 { 0.0 }
fn default_model_timeout() -> u64 { 300 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Bounds and tool policy for the research loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Upper bound on research tasks dispatched in one supervisor round.
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_research_units: usize,
    /// Upper bound on supervisor planning rounds.
    #[serde(default = "default_max_supervisor_rounds")]
    pub max_supervisor_rounds: usize,
    /// Upper bound on think cycles per research task.
    #[serde(default = "default_max_researcher_cycles")]
    pub max_researcher_cycles: usize,
    /// External tools that may be bound to the researcher model.
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    /// Upper bound on node visits for any single graph run.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_research_units: default_max_concurrent_units(),
            max_supervisor_rounds: default_max_supervisor_rounds(),
            max_researcher_cycles: default_max_researcher_cycles(),
            allowed_tools: default_allowed_tools(),
            recursion_limit: default_recursion_limit(),
        }
    }
}

impl ResearchConfig {
    /// Check that every bound is usable. The recursion limit must leave room
    /// for the longest loop the caps allow, so the caps always trip first.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_research_units == 0 {
            return Err(SleuthError::Config(
                "research.max_concurrent_research_units must be at least 1".into(),
            ));
        }
        if self.max_supervisor_rounds == 0 || self.max_researcher_cycles == 0 {
            return Err(SleuthError::Config(
                "research round and cycle caps must be at least 1".into(),
            ));
        }
        let needed = self.min_recursion_limit();
        if self.recursion_limit < needed {
            return Err(SleuthError::Config(format!(
                "research.recursion_limit ({}) must be at least {} for the configured caps",
                self.recursion_limit, needed
            )));
        }
        Ok(())
    }

    /// Node visits needed by the longest loop: two nodes per cycle plus the
    /// exit node.
    pub fn min_recursion_limit(&self) -> usize {
        2 * self.max_supervisor_rounds.max(self.max_researcher_cycles) + 1
    }
}

fn default_max_concurrent_units() -> usize { 3 }
fn default_max_supervisor_rounds() -> usize { 6 }
fn default_max_researcher_cycles() -> usize { 5 }
fn default_recursion_limit() -> usize { 50 }

fn default_allowed_tools() -> Vec<String> {
    [
        "list_allowed_directories",
        "directory_tree",
        "list_directory",
        "read_text_file",
        "read_file",
        "get_file_info",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Register the web search tool and require its credential.
    #[serde(default = "default_search_enabled")]
    pub enabled: bool,
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_search_max_results")]
    pub max_results: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: default_search_enabled(),
            provider: default_search_provider(),
            api_key: None,
            max_results: default_search_max_results(),
        }
    }
}

impl SearchConfig {
    pub fn has_api_key(&self) -> bool {
        usable_key(self.api_key.as_deref())
    }
}

pub const SEARCH_API_KEY_ENV: &str = "TAVILY_API_KEY";

fn default_search_enabled() -> bool { true }
fn default_search_provider() -> String { "tavily".to_string() }
fn default_search_max_results() -> u64 { 5 }

/// MCP (Model Context Protocol) configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub transport: McpTransport,
    /// Per-tool-call timeout in seconds. Default: 120.
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
}

fn default_mcp_timeout() -> u64 { 120 }

/// MCP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
    },
}

impl McpServerConfig {
    /// The filesystem server over a local document root, launched with npx.
    pub fn filesystem(root: impl Into<String>) -> Self {
        Self {
            transport: McpTransport::Stdio {
                command: "npx".to_string(),
                args: vec![
                    "-y".to_string(),
                    "@modelcontextprotocol/server-filesystem".to_string(),
                    root.into(),
                ],
                env: HashMap::new(),
            },
            timeout_secs: default_mcp_timeout(),
        }
    }
}

impl AppConfig {
    /// Minimal config for one provider/model pair; everything else defaults.
    pub fn for_model(provider: Provider, model_id: impl Into<String>) -> Self {
        Self {
            model: ModelConfig::new(provider, model_id),
            compression_model: None,
            report_model: None,
            fallback_models: vec![],
            research: ResearchConfig::default(),
            search: SearchConfig::default(),
            mcp: None,
        }
    }

    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SleuthError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| SleuthError::Config(e.to_string()))?;
        config.research.validate()?;
        Ok(config)
    }

    pub fn compression_model(&self) -> &ModelConfig {
        self.compression_model.as_ref().unwrap_or(&self.model)
    }

    pub fn report_model(&self) -> &ModelConfig {
        self.report_model.as_ref().unwrap_or(&self.model)
    }

    /// Fill absent API keys from the environment.
    pub fn resolve_credentials(&mut self) {
        self.model.resolve_api_key();
        for mc in self
            .compression_model
            .iter_mut()
            .chain(self.report_model.iter_mut())
            .chain(self.fallback_models.iter_mut())
        {
            mc.resolve_api_key();
        }
        if self.search.enabled && !self.search.has_api_key() {
            self.search.api_key = std::env::var(SEARCH_API_KEY_ENV)
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
    }

    /// Names of required credentials that are still absent, in a stable order.
    pub fn missing_credentials(&self) -> Vec<String> {
        let mut missing: Vec<String> = Vec::new();
        let models = std::iter::once(&self.model)
            .chain(self.compression_model.iter())
            .chain(self.report_model.iter());
        for mc in models {
            let var = mc.provider.api_key_env().to_string();
            if !mc.has_api_key() && !missing.contains(&var) {
                missing.push(var);
            }
        }
        if self.search.enabled && !self.search.has_api_key() {
            missing.push(SEARCH_API_KEY_ENV.to_string());
        }
        missing
    }

    /// Resolve credentials and fail with the full list of missing ones.
    pub fn preflight(&mut self) -> Result<()> {
        self.resolve_credentials();
        let missing = self.missing_credentials();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SleuthError::CredentialMissing(missing))
        }
    }
}

/// Default config file locations, in lookup order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("sleuth.toml")];
    if let Some(home) = dirs_home() {
        paths.push(home.join(".sleuth").join("config.toml"));
    }
    paths
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_SLEUTH_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_SLEUTH_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_SLEUTH_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_SLEUTH_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_SLEUTH_VAR}\"");
    }

    #[test]
    fn test_model_string_rules() {
        assert_eq!(
            Provider::Groq.model_string("llama-3.3-70b-versatile"),
            "groq:llama-3.3-70b-versatile"
        );
        assert_eq!(Provider::Gemini.model_string("gemini-2.5-flash"), "google:gemini-2.5-flash");
        assert_eq!(Provider::Aiml.model_string("gpt-4o"), "openai:gpt-4o");
        assert_eq!(Provider::Anthropic.model_string("claude"), "anthropic:claude");
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("GROQ".parse::<Provider>().unwrap(), Provider::Groq);
        assert_eq!("google".parse::<Provider>().unwrap(), Provider::Gemini);
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert!(matches!(
            "cohere".parse::<Provider>(),
            Err(SleuthError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "llama-3.3-70b-versatile"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, Provider::Groq);
        assert_eq!(config.model.timeout_secs, 300);
        assert_eq!(config.research.max_concurrent_research_units, 3);
        assert_eq!(config.research.max_supervisor_rounds, 6);
        assert_eq!(config.research.max_researcher_cycles, 5);
        assert!(config.research.allowed_tools.contains(&"read_text_file".to_string()));
        assert!(config.search.enabled);
        assert!(config.mcp.is_none());
        assert!(config.research.validate().is_ok());
    }

    #[test]
    fn test_recursion_limit_must_cover_caps() {
        let research = ResearchConfig {
            max_researcher_cycles: 30,
            recursion_limit: 20,
            ..Default::default()
        };
        assert!(matches!(research.validate(), Err(SleuthError::Config(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let research = ResearchConfig {
            max_concurrent_research_units: 0,
            ..Default::default()
        };
        assert!(research.validate().is_err());
    }

    #[test]
    fn test_missing_credentials_listed_in_order() {
        let mut config = AppConfig::for_model(Provider::Mistral, "mistral-large-latest");
        config.model.api_key = None;
        config.search.api_key = None;
        let missing = config.missing_credentials();
        assert_eq!(missing, vec!["MISTRAL_API_KEY", SEARCH_API_KEY_ENV]);
    }

    #[test]
    fn test_unexpanded_placeholder_is_not_a_key() {
        assert!(!usable_key(Some("${SLEUTH_UNSET_KEY}")));
        assert!(!usable_key(Some("  ")));
        assert!(!usable_key(None));
        assert!(usable_key(Some("gsk-live")));

        let mut config = AppConfig::for_model(Provider::Groq, "m");
        config.model.api_key = Some("${SLEUTH_UNSET_KEY}".into());
        config.search.enabled = false;
        assert_eq!(config.missing_credentials(), vec!["GROQ_API_KEY"]);
    }

    #[test]
    fn test_search_disabled_drops_credential() {
        let mut config = AppConfig::for_model(Provider::Groq, "m");
        config.model.api_key = Some("gsk-test".into());
        config.search.enabled = false;
        assert!(config.missing_credentials().is_empty());
    }

    #[test]
    fn test_mcp_transport_toml() {
        let toml_str = r#"
[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"

[mcp.servers.filesystem]
timeout_secs = 30

[mcp.servers.filesystem.transport]
type = "stdio"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "./files"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let server = &config.mcp.unwrap().servers["filesystem"];
        assert_eq!(server.timeout_secs, 30);
        match &server.transport {
            McpTransport::Stdio { command, args, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args.len(), 3);
            }
            other => panic!("unexpected transport: {:?}", other),
        }
    }
}
