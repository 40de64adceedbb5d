use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Streaming chat client for one provider family.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// An in-process tool implementation.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.input_schema())
    }
}

/// An external tool backend (e.g. a subprocess speaking MCP).
///
/// Tools are only reachable through a session. Callers open one session per
/// batch of work and close it when the batch ends, so no connection outlives
/// the step that needed it.
pub trait ToolProvider: Send + Sync + 'static {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Start a fresh, self-contained session.
    fn open_session(&self) -> BoxFuture<'_, Result<Box<dyn ToolSession>>>;
}

/// A live session with an external tool backend.
pub trait ToolSession: Send + Sync {
    /// Tools the backend currently offers.
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDefinition>>>;

    /// Invoke one tool. `Ok` with `is_error` means the backend answered with
    /// an error result; `Err` means the invocation itself failed.
    fn invoke(&self, name: &str, arguments: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Tear the session down.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}
