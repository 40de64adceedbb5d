//! The researcher loop: think, run the requested tools, think again, and
//! finally compress the transcript into a note.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use sleuth_core::error::{Result, SleuthError};
use sleuth_core::event::EventBus;
use sleuth_core::types::{ChatMessage, ResearchEvent, ToolCall, ToolResult};
use sleuth_tools::ToolSet;

use crate::compress::CompressNode;
use crate::context::ResearchContext;
use crate::fields::{
    researcher_schema, RESEARCHER_MESSAGES, RESEARCH_CYCLES, RESEARCH_TOPIC,
};
use crate::graph::{missing_field, Graph, GraphBuilder, Node, StateUpdate, WorkflowState};
use crate::prompts;

pub const THINK_NODE: &str = "llm_call";
pub const TOOLS_NODE: &str = "tool_node";
pub const COMPRESS_NODE: &str = "compress";

/// Initial state of one research task.
pub fn task_input(topic: &str) -> StateUpdate {
    StateUpdate::new()
        .message(RESEARCHER_MESSAGES, &ChatMessage::user(topic))
        .text(RESEARCH_TOPIC, topic)
        .counter(RESEARCH_CYCLES, 0)
}

/// One model call with the current tool set bound.
pub struct ThinkNode {
    ctx: Arc<ResearchContext>,
}

impl Node for ThinkNode {
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let cycle = state.count(RESEARCH_CYCLES) + 1;

            // Only the definitions are needed here; the session is released
            // before the model call.
            let toolset = self.ctx.tools.acquire().await?;
            let definitions = toolset.definitions().to_vec();
            toolset.close().await;

            let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
            let mut messages = vec![ChatMessage::system(prompts::researcher_prompt(
                &prompts::today(),
                &names,
            ))];
            messages.extend(state.messages(RESEARCHER_MESSAGES));

            let reply = self.ctx.research_model.complete(messages, &definitions).await?;
            debug!(
                topic = state.get_str(RESEARCH_TOPIC).unwrap_or_default(),
                cycle,
                tool_calls = reply.tool_calls().len(),
                "Researcher step"
            );
            Ok(StateUpdate::new()
                .message(RESEARCHER_MESSAGES, &reply)
                .counter(RESEARCH_CYCLES, cycle))
        })
    }
}

/// Runs the latest message's tool calls against a freshly acquired tool set.
pub struct ToolsNode {
    ctx: Arc<ResearchContext>,
}

impl Node for ToolsNode {
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let last = state
                .last_message(RESEARCHER_MESSAGES)
                .ok_or_else(|| missing_field(RESEARCHER_MESSAGES))?;
            let calls = last.tool_calls();

            let toolset = self.ctx.tools.acquire().await?;
            let outcome = execute_batch(&toolset, &calls, &self.ctx.events).await;
            toolset.close().await;

            Ok(StateUpdate::new().messages(RESEARCHER_MESSAGES, &outcome?))
        })
    }
}

/// Invoke `calls` one after another and pair each result with its call id.
///
/// A malformed argument set is reported back to the model as an error
/// result. Any other failure ends the batch.
pub async fn execute_batch(
    toolset: &ToolSet,
    calls: &[ToolCall],
    events: &EventBus,
) -> Result<Vec<ChatMessage>> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        let result = match toolset.invoke(call).await {
            Ok(result) => result,
            Err(SleuthError::ToolValidation(msg)) => {
                warn!(tool = %call.name, error = %msg, "Invalid tool input");
                ToolResult::error(msg)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool invocation failed");
                return Err(e);
            }
        };
        events.publish(ResearchEvent::ToolInvoked {
            name: call.name.clone(),
            is_error: result.is_error,
        });
        results.push(ChatMessage::tool_result(
            call.id.clone(),
            result.content,
            result.is_error,
        ));
    }
    Ok(results)
}

/// Keep calling tools while the model asks for them and cycles remain.
pub fn route_after_think(max_cycles: usize) -> impl Fn(&WorkflowState) -> String + Send + Sync {
    move |state| {
        let wants_tools = state
            .last_message(RESEARCHER_MESSAGES)
            .is_some_and(|m| m.has_tool_calls());
        if !wants_tools {
            COMPRESS_NODE.to_string()
        } else if state.count(RESEARCH_CYCLES) >= max_cycles {
            info!(
                topic = state.get_str(RESEARCH_TOPIC).unwrap_or_default(),
                max_cycles, "Researcher cycle cap reached; compressing"
            );
            COMPRESS_NODE.to_string()
        } else {
            TOOLS_NODE.to_string()
        }
    }
}

/// Compile the researcher loop for one deployment.
pub fn build_researcher_graph(ctx: Arc<ResearchContext>) -> Result<Graph> {
    let research = &ctx.config.research;
    GraphBuilder::new("researcher", researcher_schema())
        .add_node(THINK_NODE, ThinkNode { ctx: ctx.clone() })
        .add_node(TOOLS_NODE, ToolsNode { ctx: ctx.clone() })
        .add_node(COMPRESS_NODE, CompressNode::new(ctx.clone()))
        .set_entry(THINK_NODE)
        .add_conditional_edges(
            THINK_NODE,
            route_after_think(research.max_researcher_cycles),
            &[TOOLS_NODE, COMPRESS_NODE],
        )
        .add_edge(TOOLS_NODE, THINK_NODE)
        .add_edge(COMPRESS_NODE, crate::graph::END)
        .with_recursion_limit(research.recursion_limit)
        .with_events(ctx.events.clone())
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{COMPRESSED_RESEARCH, RAW_NOTES};
    use serde_json::json;
    use sleuth_core::types::Role;
    use sleuth_llm::ChatModel;
    use sleuth_test_utils::{test_config, MockLlm, MockReply, MockToolProvider};
    use sleuth_tools::ToolCatalog;
    use std::sync::atomic::Ordering;

    fn context(llm: MockLlm, provider: &MockToolProvider) -> Arc<ResearchContext> {
        let config = test_config();
        let catalog = ToolCatalog::new(config.research.allowed_tools.clone())
            .with_provider(Arc::new(provider.clone()));
        let model = ChatModel::new(Arc::new(llm), config.model.clone());
        Arc::new(ResearchContext::with_model(config, model, catalog))
    }

    fn start(topic: &str) -> WorkflowState {
        WorkflowState::from_update(&researcher_schema(), task_input(topic)).unwrap()
    }

    #[tokio::test]
    async fn test_tool_results_follow_their_calls() {
        let provider = MockToolProvider::new()
            .with_tool("read_file", |args| {
                Ok(ToolResult::success(format!("contents of {}", args["path"].as_str().unwrap())))
            })
            .with_tool("list_directory", |_| Ok(ToolResult::error("permission denied")));

        let llm = MockLlm::new(|req| {
            if !req.system.starts_with(prompts::RESEARCHER_ROLE) {
                MockReply::text("compressed")
            } else if req.transcript().contains("contents of notes.md") {
                MockReply::text("The notes describe the plan.")
            } else {
                MockReply::call("list_directory", json!({"path": "."}))
                    .with_call("read_file", json!({"path": "notes.md"}))
            }
        });
        let ctx = context(llm, &provider);
        let graph = build_researcher_graph(ctx).unwrap();
        let result = graph.execute(start("the plan")).await.unwrap();

        let messages = result.state.messages(RESEARCHER_MESSAGES);
        let calls = messages[1].tool_calls();
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_result_id(), Some(calls[0].id.as_str()));
        assert_eq!(messages[3].tool_result_id(), Some(calls[1].id.as_str()));
        assert_eq!(messages[3].text(), "contents of notes.md");
        assert_eq!(result.state.get_str(COMPRESSED_RESEARCH), Some("compressed"));
        assert_eq!(result.state.strings(RAW_NOTES).len(), 1);

        let visited: Vec<&str> = result.trace.iter().map(|v| v.node_id.as_str()).collect();
        assert_eq!(visited, vec![THINK_NODE, TOOLS_NODE, THINK_NODE, COMPRESS_NODE]);
        assert_eq!(provider.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_cycle_cap_forces_compression() {
        let provider = MockToolProvider::new()
            .with_tool("read_file", |_| Ok(ToolResult::success("more text")));
        let llm = MockLlm::new(|req| {
            if req.system.starts_with(prompts::RESEARCHER_ROLE) {
                MockReply::call("read_file", json!({"path": "a.md"}))
            } else {
                MockReply::text("partial findings")
            }
        });
        let mut config = test_config();
        config.research.max_researcher_cycles = 2;
        let catalog = ToolCatalog::new(config.research.allowed_tools.clone())
            .with_provider(Arc::new(provider.clone()));
        let model = ChatModel::new(Arc::new(llm), config.model.clone());
        let ctx = Arc::new(ResearchContext::with_model(config, model, catalog));

        let result = build_researcher_graph(ctx).unwrap().execute(start("loop")).await.unwrap();

        let thinks = result.trace.iter().filter(|v| v.node_id == THINK_NODE).count();
        assert_eq!(thinks, 2);
        assert_eq!(result.state.count(RESEARCH_CYCLES), 2);
        // user, (call, result), call: the last batch is never executed
        assert_eq!(result.state.messages(RESEARCHER_MESSAGES).len(), 4);
        assert_eq!(result.state.get_str(COMPRESSED_RESEARCH), Some("partial findings"));
        assert_eq!(provider.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_the_task() {
        let provider = MockToolProvider::new();
        let llm = MockLlm::new(|_| MockReply::text("unused"));
        let ctx = context(llm, &provider);

        let call = ToolCall::new("delete_everything", json!({}));
        let mut state = start("anything");
        researcher_schema()
            .merge(
                &mut state,
                StateUpdate::new().message(
                    RESEARCHER_MESSAGES,
                    &ChatMessage::assistant_with_calls("", vec![call]),
                ),
            )
            .unwrap();

        let node = ToolsNode { ctx };
        let err = node.run(&state).await.unwrap_err();
        assert!(matches!(err, SleuthError::ToolNotFound(name) if name == "delete_everything"));
        assert_eq!(provider.opened.load(Ordering::SeqCst), 1);
        assert_eq!(provider.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_invalid_think_input_is_reported_to_model() {
        let provider = MockToolProvider::new();
        let llm = MockLlm::new(|_| MockReply::text("unused"));
        let ctx = context(llm, &provider);

        let toolset = ctx.tools.acquire().await.unwrap();
        let bad = ToolCall::new("think", json!({"note": 1}));
        let results = execute_batch(&toolset, &[bad.clone()], &ctx.events).await.unwrap();
        toolset.close().await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool_result_id(), Some(bad.id.as_str()));
        assert!(matches!(
            &results[0].content[0],
            sleuth_core::types::ContentBlock::ToolResult { is_error: true, .. }
        ));
    }
}
