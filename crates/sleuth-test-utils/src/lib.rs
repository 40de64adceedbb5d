//! Mocks and fixtures shared by Sleuth's tests.

mod llm;
mod tools;

pub use llm::{MockLlm, MockReply, MockRequest};
pub use tools::MockToolProvider;

use std::path::PathBuf;

use sleuth_core::config::{AppConfig, Provider};

/// A config for tests: groq with a dummy key, search disabled, small caps.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::for_model(Provider::Groq, "test-model");
    config.model.api_key = Some("test-key".into());
    config.search.enabled = false;
    config.research.max_concurrent_research_units = 3;
    config.research.max_supervisor_rounds = 3;
    config.research.max_researcher_cycles = 3;
    config
}

/// Write `contents` to `sleuth.toml` in a fresh temp dir.
pub fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("sleuth.toml");
    std::fs::write(&path, contents).expect("write config");
    (dir, path)
}
