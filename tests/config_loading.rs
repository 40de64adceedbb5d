use sleuth_core::config::{AppConfig, McpTransport, Provider};
use sleuth_core::error::SleuthError;
use sleuth_test_utils::write_config;

fn load(toml_content: &str) -> Result<AppConfig, SleuthError> {
    let (_dir, path) = write_config(toml_content);
    AppConfig::load(&path)
}

#[test]
fn test_load_full_config_from_file() {
    let config = load(
        r#"
[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"
max_tokens = 4096
temperature = 0.5

[model.retry]
max_retries = 5

[compression_model]
provider = "openai"
model_id = "gpt-4.1-mini"

[[fallback_models]]
provider = "groq"
model_id = "llama-3.3-70b-versatile"

[research]
max_concurrent_research_units = 4
max_supervisor_rounds = 2
max_researcher_cycles = 3
allowed_tools = ["read_file", "list_directory"]

[search]
api_key = "tvly-test"
max_results = 8

[mcp.servers.filesystem]
timeout_secs = 30

[mcp.servers.filesystem.transport]
type = "stdio"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "./files"]
"#,
    )
    .expect("load config");

    assert_eq!(config.model.provider, Provider::Anthropic);
    assert_eq!(config.model.model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 4096);
    assert_eq!(config.model.retry.as_ref().map(|r| r.max_retries), Some(5));

    assert_eq!(config.compression_model().model_string(), "openai:gpt-4.1-mini");
    assert_eq!(config.report_model().model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.fallback_models.len(), 1);

    assert_eq!(config.research.max_concurrent_research_units, 4);
    assert_eq!(config.research.max_supervisor_rounds, 2);
    assert_eq!(config.research.allowed_tools, vec!["read_file", "list_directory"]);
    assert_eq!(config.search.max_results, 8);

    let mcp = config.mcp.expect("mcp present");
    let fs = &mcp.servers["filesystem"];
    assert_eq!(fs.timeout_secs, 30);
    match &fs.transport {
        McpTransport::Stdio { command, args, .. } => {
            assert_eq!(command, "npx");
            assert_eq!(args.last().map(String::as_str), Some("./files"));
        }
        other => panic!("expected stdio transport, got {:?}", other),
    }
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("SLEUTH_TEST_API_KEY", "expanded-key-value");

    let config = load(
        r#"
[model]
model_id = "test-model"
api_key = "${SLEUTH_TEST_API_KEY}"
"#,
    )
    .expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("SLEUTH_TEST_API_KEY");
}

#[test]
fn test_unset_env_placeholder_fails_preflight() {
    std::env::remove_var("SLEUTH_TEST_UNSET_KEY");
    std::env::remove_var("GROQ_API_KEY");
    std::env::remove_var("TAVILY_API_KEY");

    let mut config = load(
        r#"
[model]
model_id = "llama-3.3-70b-versatile"
api_key = "${SLEUTH_TEST_UNSET_KEY}"
"#,
    )
    .expect("load config");

    let err = config.preflight().unwrap_err();
    match err {
        SleuthError::CredentialMissing(names) => {
            assert_eq!(names, vec!["GROQ_API_KEY", "TAVILY_API_KEY"]);
        }
        other => panic!("expected missing credentials, got {:?}", other),
    }
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = load(
        r#"
[model]
model_id = "llama-3.3-70b-versatile"
"#,
    )
    .expect("load config");

    assert_eq!(config.model.provider, Provider::Groq);
    assert_eq!(config.research.max_concurrent_research_units, 3);
    assert_eq!(config.research.max_supervisor_rounds, 6);
    assert_eq!(config.research.max_researcher_cycles, 5);
    assert!(config.research.allowed_tools.contains(&"read_file".to_string()));
    assert!(config.search.enabled);
    assert!(config.mcp.is_none());
    assert!(config.compression_model.is_none());
}

#[test]
fn test_unknown_provider_rejected() {
    let err = load(
        r#"
[model]
provider = "ollama"
model_id = "llama3.2"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SleuthError::Config(_)));
}

#[test]
fn test_recursion_limit_must_cover_caps() {
    let err = load(
        r#"
[model]
model_id = "m"

[research]
max_supervisor_rounds = 10
recursion_limit = 12
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SleuthError::Config(msg) if msg.contains("recursion_limit")));
}

#[test]
fn test_missing_file_is_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/sleuth.toml")).unwrap_err();
    assert!(matches!(err, SleuthError::ConfigNotFound(_)));
}
