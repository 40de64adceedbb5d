use thiserror::Error;

#[derive(Debug, Error)]
pub enum SleuthError {
    // Model provider errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool invocation errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    // Workflow errors
    #[error("Graph '{graph}' exceeded its recursion limit ({limit} node visits)")]
    IterationLimitExceeded { graph: String, limit: usize },

    #[error("Router for node '{node}' returned undeclared route '{route}'")]
    InvalidRoute { node: String, route: String },

    #[error("State field '{0}' is not declared in the graph schema")]
    UndeclaredField(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Missing environment variables: {}", .0.join(", "))]
    CredentialMissing(Vec<String>),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SleuthError {
    /// Errors scoped to a single tool batch; they fail the owning research
    /// task but never its siblings.
    pub fn is_tool_invocation(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::ToolExecution { .. }
                | Self::ToolTimeout { .. }
                | Self::ToolValidation(_)
                | Self::Mcp(_)
        )
    }

    /// Failures at the chat model boundary.
    pub fn is_model_provider(&self) -> bool {
        matches!(
            self,
            Self::LlmRequest(_) | Self::LlmStream(_) | Self::LlmParse(_) | Self::UnsupportedProvider(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SleuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SleuthError::ToolNotFound("x".into()).is_tool_invocation());
        assert!(SleuthError::Mcp("closed".into()).is_tool_invocation());
        assert!(!SleuthError::LlmRequest("500".into()).is_tool_invocation());
        assert!(SleuthError::LlmParse("bad json".into()).is_model_provider());
        assert!(!SleuthError::Config("x".into()).is_model_provider());
    }

    #[test]
    fn test_credential_message() {
        let err = SleuthError::CredentialMissing(vec!["GROQ_API_KEY".into(), "TAVILY_API_KEY".into()]);
        assert_eq!(
            err.to_string(),
            "Missing environment variables: GROQ_API_KEY, TAVILY_API_KEY"
        );
    }
}
