//! Compression of a researcher transcript into one note.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use sleuth_core::error::Result;
use sleuth_core::types::{ChatMessage, ContentBlock, Role};
use sleuth_tools::THINK_TOOL;

use crate::context::ResearchContext;
use crate::fields::{COMPRESSED_RESEARCH, RAW_NOTES, RESEARCHER_MESSAGES, RESEARCH_TOPIC};
use crate::graph::{Node, StateUpdate, WorkflowState};
use crate::prompts;

/// Every tool-result and assistant text, unfiltered, in transcript order.
pub fn raw_notes(transcript: &[ChatMessage]) -> String {
    transcript
        .iter()
        .filter(|m| matches!(m.role, Role::Tool | Role::Assistant))
        .map(|m| m.text())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop `think` calls and their results. Assistant turns left with nothing
/// in them are dropped too.
pub fn without_reflections(transcript: &[ChatMessage]) -> Vec<ChatMessage> {
    let think_ids: HashSet<String> = transcript
        .iter()
        .flat_map(|m| m.tool_calls())
        .filter(|c| c.name == THINK_TOOL)
        .map(|c| c.id)
        .collect();

    transcript
        .iter()
        .filter(|m| !m.tool_result_id().is_some_and(|id| think_ids.contains(id)))
        .filter_map(|m| {
            let mut kept = m.clone();
            kept.content.retain(|b| {
                !matches!(b, ContentBlock::ToolUse { name, .. } if name == THINK_TOOL)
            });
            (!kept.content.is_empty()).then_some(kept)
        })
        .collect()
}

/// Render a transcript as plain text for the compression model. Tool calls
/// and results become labelled lines, so a transcript cut off mid-batch is
/// still a valid prompt.
pub fn render_transcript(transcript: &[ChatMessage]) -> String {
    let mut out = Vec::new();
    for message in transcript {
        for block in &message.content {
            let line = match (message.role, block) {
                (Role::User, ContentBlock::Text { text }) => format!("[user] {}", text),
                (_, ContentBlock::Text { text }) => format!("[assistant] {}", text),
                (_, ContentBlock::ToolUse { name, input, .. }) => {
                    format!("[tool call] {} {}", name, input)
                }
                (_, ContentBlock::ToolResult { content, is_error, .. }) => {
                    if *is_error {
                        format!("[tool error] {}", content)
                    } else {
                        format!("[tool result] {}", content)
                    }
                }
            };
            out.push(line);
        }
    }
    out.join("\n\n")
}

/// The researcher's terminal step.
pub struct CompressNode {
    ctx: Arc<ResearchContext>,
}

impl CompressNode {
    pub fn new(ctx: Arc<ResearchContext>) -> Self {
        Self { ctx }
    }
}

impl Node for CompressNode {
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let transcript = state.messages(RESEARCHER_MESSAGES);
            let topic = state.get_str(RESEARCH_TOPIC).unwrap_or_default();

            let raw = raw_notes(&transcript);
            if !transcript
                .iter()
                .any(|m| matches!(m.role, Role::Tool | Role::Assistant))
            {
                debug!(topic, "Nothing to compress");
                return Ok(StateUpdate::new().text(COMPRESSED_RESEARCH, ""));
            }

            let rendered = render_transcript(&without_reflections(&transcript));
            let date = prompts::today();
            let messages = vec![
                ChatMessage::system(prompts::compress_system_prompt(&date)),
                ChatMessage::user(prompts::compress_human_message(topic, &rendered)),
            ];
            let note = self.ctx.compression_model.complete(messages, &[]).await?.text();
            info!(topic, note_len = note.len(), raw_len = raw.len(), "Compressed research");

            let mut update = StateUpdate::new().text(COMPRESSED_RESEARCH, note);
            if !raw.is_empty() {
                update = update.text(RAW_NOTES, raw);
            }
            Ok(update)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::researcher_schema;
    use serde_json::json;
    use sleuth_core::types::ToolCall;
    use sleuth_llm::ChatModel;
    use sleuth_test_utils::{test_config, MockLlm, MockReply};
    use sleuth_tools::ToolCatalog;
    use std::sync::atomic::Ordering;

    fn transcript() -> Vec<ChatMessage> {
        let think = ToolCall::new(THINK_TOOL, json!({"reflection": "look at README"}));
        let read = ToolCall::new("read_file", json!({"path": "README.md"}));
        vec![
            ChatMessage::user("What does the project do?"),
            ChatMessage::assistant_with_calls("", vec![think.clone()]),
            ChatMessage::tool_result(&think.id, "Reflection recorded: look at README", false),
            ChatMessage::assistant_with_calls("Reading it.", vec![read.clone()]),
            ChatMessage::tool_result(&read.id, "Sleuth writes research reports.", false),
            ChatMessage::assistant_text("It writes research reports."),
        ]
    }

    #[test]
    fn test_reflections_filtered() {
        let filtered = without_reflections(&transcript());
        assert_eq!(filtered.len(), 4);
        let rendered = render_transcript(&filtered);
        assert!(!rendered.contains("Reflection recorded"));
        assert!(!rendered.contains(THINK_TOOL));
        assert!(rendered.contains("[tool call] read_file"));
        assert!(rendered.contains("[tool result] Sleuth writes research reports."));
    }

    #[test]
    fn test_raw_notes_keep_everything() {
        let raw = raw_notes(&transcript());
        assert_eq!(
            raw,
            "Reflection recorded: look at README\nReading it.\nSleuth writes research reports.\nIt writes research reports."
        );
    }

    #[tokio::test]
    async fn test_compress_calls_model_with_filtered_transcript() {
        let llm = MockLlm::new(|req| {
            assert!(req.system.starts_with(prompts::COMPRESS_ROLE));
            assert!(!req.transcript().contains("Reflection recorded"));
            MockReply::text("Sleuth writes research reports. [1] README.md")
        });
        let model = ChatModel::new(Arc::new(llm), test_config().model);
        let node = CompressNode::new(Arc::new(ResearchContext::with_model(
            test_config(),
            model,
            ToolCatalog::new(vec![]),
        )));

        let state = WorkflowState::from_update(
            &researcher_schema(),
            StateUpdate::new()
                .text(RESEARCH_TOPIC, "project purpose")
                .messages(RESEARCHER_MESSAGES, &transcript()),
        )
        .unwrap();
        let mut merged = state.clone();
        researcher_schema()
            .merge(&mut merged, node.run(&state).await.unwrap())
            .unwrap();

        assert_eq!(
            merged.get_str(COMPRESSED_RESEARCH),
            Some("Sleuth writes research reports. [1] README.md")
        );
        assert_eq!(merged.strings(RAW_NOTES).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_transcript_skips_model() {
        let llm = MockLlm::new(|_| MockReply::failure("should not be called"));
        let calls = llm.call_counter();
        let model = ChatModel::new(Arc::new(llm), test_config().model);
        let node = CompressNode::new(Arc::new(ResearchContext::with_model(
            test_config(),
            model,
            ToolCatalog::new(vec![]),
        )));

        let state = WorkflowState::from_update(
            &researcher_schema(),
            StateUpdate::new().message(RESEARCHER_MESSAGES, &ChatMessage::user("topic")),
        )
        .unwrap();
        let mut merged = state.clone();
        researcher_schema()
            .merge(&mut merged, node.run(&state).await.unwrap())
            .unwrap();

        assert_eq!(merged.get_str(COMPRESSED_RESEARCH), Some(""));
        assert!(merged.strings(RAW_NOTES).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
