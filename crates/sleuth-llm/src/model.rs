use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, warn};

use sleuth_core::config::ModelConfig;
use sleuth_core::error::{Result, SleuthError};
use sleuth_core::traits::LlmClient;
use sleuth_core::types::*;

/// Highest number of tool calls accepted from one reply.
const MAX_TOOL_CALLS: usize = 64;

/// Accumulator for streaming tool call deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

impl ToolCallAccumulator {
    fn finish(self) -> ToolCall {
        let arguments = if self.input_json.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.input_json).unwrap_or_else(|e| {
                warn!(tool = %self.name, error = %e, "Tool arguments are not valid JSON");
                serde_json::Value::Null
            })
        };
        ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

/// A configured chat model: one client bound to one provider/model pair.
///
/// Cheap to clone; every stage of a run shares the same underlying client.
#[derive(Clone)]
pub struct ChatModel {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl ChatModel {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Send `messages` with `tools` bound and collect the full reply.
    ///
    /// Tool calls naming a tool outside the bound set are dropped and logged;
    /// they never reach dispatch. A reply that takes longer than the
    /// configured `timeout_secs` fails with `LlmRequest`.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage> {
        let timeout_secs = self.config.timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.collect(messages, tools),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => {
                warn!(model = %self.config.model_string(), timeout_secs, "Model reply timed out");
                Err(SleuthError::LlmRequest(format!(
                    "{} did not finish within {}s",
                    self.config.model_string(),
                    timeout_secs
                )))
            }
        }
    }

    async fn collect(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage> {
        let mut stream = self.client.chat_stream(&self.config, messages, tools).await?;

        let mut text_content = String::new();
        let mut tool_calls: Vec<ToolCallAccumulator> = Vec::new();
        let mut stop_reason = None;

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(text) => text_content.push_str(&text),
                StreamDelta::ToolUseStart { index, id, name } => {
                    if index >= MAX_TOOL_CALLS {
                        warn!(index, tool = %name, "Tool call index out of range; dropping call");
                        continue;
                    }
                    while tool_calls.len() <= index {
                        tool_calls.push(ToolCallAccumulator::default());
                    }
                    tool_calls[index].id = id;
                    tool_calls[index].name = name;
                }
                StreamDelta::ToolInputDelta { index, delta } => {
                    if let Some(tc) = tool_calls.get_mut(index) {
                        tc.input_json.push_str(&delta);
                    }
                }
                StreamDelta::Stop(reason) => stop_reason = Some(reason),
            }
        }

        if stop_reason == Some(StopReason::MaxTokens) {
            warn!(model = %self.config.model_string(), "LLM hit max tokens");
        }

        let calls: Vec<ToolCall> = tool_calls
            .into_iter()
            // Anthropic streams sparse indices; skip the padding
            .filter(|tc| !tc.name.is_empty())
            .map(|mut tc| {
                if tc.id.is_empty() {
                    tc.id = ToolCall::new("", serde_json::Value::Null).id;
                }
                tc.finish()
            })
            .filter(|call| {
                let bound = tools.iter().any(|t| t.name == call.name);
                if !bound {
                    error!(tool = %call.name, "Model requested a tool that is not bound; dropping call");
                }
                bound
            })
            .collect();

        debug!(
            model = %self.config.model_string(),
            chars = text_content.len(),
            tool_calls = calls.len(),
            "Model reply collected"
        );
        Ok(ChatMessage::assistant_with_calls(text_content, calls))
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use futures::stream::BoxStream;
    use sleuth_core::config::Provider;

    use super::*;

    struct Scripted(Vec<StreamDelta>);

    impl LlmClient for Scripted {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let items: Vec<Result<StreamDelta>> = self.0.iter().cloned().map(Ok).collect();
            Box::pin(async move {
                Ok(Box::pin(futures::stream::iter(items)) as BoxStream<'_, Result<StreamDelta>>)
            })
        }
    }

    /// Opens a stream that never yields.
    struct Stalled;

    impl LlmClient for Stalled {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            Box::pin(async move {
                Ok(Box::pin(futures::stream::pending()) as BoxStream<'_, Result<StreamDelta>>)
            })
        }
    }

    fn model(deltas: Vec<StreamDelta>) -> ChatModel {
        ChatModel::new(Arc::new(Scripted(deltas)), ModelConfig::new(Provider::Groq, "m"))
    }

    fn think_def() -> ToolDefinition {
        ToolDefinition::new("think", "reflect", serde_json::json!({"type": "object"}))
    }

    #[tokio::test]
    async fn test_collects_text_and_tool_calls() {
        let m = model(vec![
            StreamDelta::TextDelta("Let me ".into()),
            StreamDelta::TextDelta("reflect.".into()),
            StreamDelta::ToolUseStart { index: 0, id: "c1".into(), name: "think".into() },
            StreamDelta::ToolInputDelta { index: 0, delta: "{\"reflection\":".into() },
            StreamDelta::ToolInputDelta { index: 0, delta: "\"gaps\"}".into() },
            StreamDelta::Stop(StopReason::ToolUse),
        ]);
        let reply = m.complete(vec![ChatMessage::user("q")], &[think_def()]).await.unwrap();
        assert_eq!(reply.text(), "Let me reflect.");
        let calls = reply.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].arguments["reflection"], "gaps");
    }

    #[tokio::test]
    async fn test_unbound_tool_calls_are_dropped() {
        let m = model(vec![
            StreamDelta::ToolUseStart { index: 0, id: "c1".into(), name: "delete_file".into() },
            StreamDelta::ToolInputDelta { index: 0, delta: "{}".into() },
            StreamDelta::ToolUseStart { index: 1, id: "c2".into(), name: "think".into() },
            StreamDelta::Stop(StopReason::ToolUse),
        ]);
        let reply = m.complete(vec![], &[think_def()]).await.unwrap();
        let calls = reply.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "think");
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let mut config = ModelConfig::new(Provider::Groq, "m");
        config.timeout_secs = 30;
        let m = ChatModel::new(Arc::new(Stalled), config);

        let started = tokio::time::Instant::now();
        let err = m.complete(vec![ChatMessage::user("q")], &[]).await.unwrap_err();
        assert!(matches!(err, SleuthError::LlmRequest(msg) if msg.contains("30s")));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_out_of_range_tool_index_is_dropped() {
        let m = model(vec![
            StreamDelta::ToolUseStart { index: usize::MAX, id: "c0".into(), name: "think".into() },
            StreamDelta::ToolInputDelta { index: usize::MAX, delta: "{}".into() },
            StreamDelta::ToolUseStart { index: 0, id: "c1".into(), name: "think".into() },
            StreamDelta::Stop(StopReason::ToolUse),
        ]);
        let reply = m.complete(vec![], &[think_def()]).await.unwrap();
        let calls = reply.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
    }
}
