use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use sleuth_core::config::ModelConfig;
use sleuth_core::error::{Result, SleuthError};
use sleuth_core::traits::LlmClient;
use sleuth_core::types::*;

/// What the model was asked.
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// Concatenated system message text.
    pub system: String,
    /// Non-system messages, in order.
    pub messages: Vec<ChatMessage>,
    /// Names of the bound tools.
    pub tools: Vec<String>,
}

impl MockRequest {
    /// Text of the first user message.
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default()
    }

    /// Every message's text joined, for substring routing.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}

/// A scripted reply.
#[derive(Debug, Clone, Default)]
pub struct MockReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub delay: Option<Duration>,
    pub error: Option<String>,
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn call(name: &str, arguments: serde_json::Value) -> Self {
        Self::default().with_call(name, arguments)
    }

    pub fn with_call(mut self, name: &str, arguments: serde_json::Value) -> Self {
        self.tool_calls.push(ToolCall::new(name, arguments));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The request fails at the provider boundary.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

type Script = dyn Fn(&MockRequest) -> MockReply + Send + Sync;

/// An `LlmClient` whose replies come from a closure over the request.
pub struct MockLlm {
    script: Box<Script>,
    calls: Arc<AtomicUsize>,
}

impl MockLlm {
    pub fn new(script: impl Fn(&MockRequest) -> MockReply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of requests served.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl LlmClient for MockLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (system, rest): (Vec<_>, Vec<_>) =
            messages.into_iter().partition(|m| m.role == Role::System);
        let request = MockRequest {
            system: system.iter().map(|m| m.text()).collect::<Vec<_>>().join("\n"),
            messages: rest,
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        };
        let reply = (self.script)(&request);

        Box::pin(async move {
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = reply.error {
                return Err(SleuthError::LlmRequest(error));
            }

            let mut deltas: Vec<Result<StreamDelta>> = Vec::new();
            if !reply.text.is_empty() {
                deltas.push(Ok(StreamDelta::TextDelta(reply.text)));
            }
            let stop = if reply.tool_calls.is_empty() {
                StopReason::EndTurn
            } else {
                StopReason::ToolUse
            };
            for (index, call) in reply.tool_calls.into_iter().enumerate() {
                deltas.push(Ok(StreamDelta::ToolUseStart {
                    index,
                    id: call.id,
                    name: call.name,
                }));
                deltas.push(Ok(StreamDelta::ToolInputDelta {
                    index,
                    delta: call.arguments.to_string(),
                }));
            }
            deltas.push(Ok(StreamDelta::Stop(stop)));
            Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}
