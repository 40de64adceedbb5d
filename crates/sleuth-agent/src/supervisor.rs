//! The supervisor loop: plan, fan research tasks out to researcher loops,
//! fold their notes back in, and repeat until done or out of rounds.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info, warn};

use sleuth_core::error::Result;
use sleuth_core::types::{ChatMessage, ResearchEvent, ToolDefinition};
use sleuth_tools::{builtin::think, THINK_TOOL};

use crate::context::ResearchContext;
use crate::fields::{
    supervisor_schema, COMPRESSED_RESEARCH, NOTES, RAW_NOTES, RESEARCH_BRIEF, RESEARCH_ITERATIONS,
    SUPERVISOR_MESSAGES,
};
use crate::graph::{
    missing_field, Branch, BranchFailure, Dispatch, FanOut, Graph, GraphBuilder, Node, StateUpdate,
    WorkflowState, END,
};
use crate::prompts;
use crate::researcher;

pub const PLAN_NODE: &str = "supervisor";
pub const DISPATCH_NODE: &str = "supervisor_tools";

pub const CONDUCT_RESEARCH: &str = "conduct_research";
pub const RESEARCH_COMPLETE: &str = "research_complete";

/// Tools bound to the planning call.
pub fn supervisor_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            CONDUCT_RESEARCH,
            "Delegate one research topic to a research assistant. Describe the topic in full; \
             the assistant sees nothing else.",
            json!({
                "type": "object",
                "properties": {
                    "research_topic": {
                        "type": "string",
                        "description": "The topic to research, described in at least a paragraph"
                    }
                },
                "required": ["research_topic"]
            }),
        ),
        ToolDefinition::new(
            RESEARCH_COMPLETE,
            "Signal that the findings are sufficient and research is done.",
            json!({"type": "object", "properties": {}}),
        ),
        think::definition(),
    ]
}

/// Initial supervisor state for a brief.
pub fn supervisor_input(brief: &str) -> StateUpdate {
    StateUpdate::new()
        .text(RESEARCH_BRIEF, brief)
        .message(SUPERVISOR_MESSAGES, &ChatMessage::user(brief))
        .counter(RESEARCH_ITERATIONS, 0)
}

/// PLANNING: one model call over the brief and the notes returned so far.
pub struct PlanNode {
    ctx: Arc<ResearchContext>,
}

impl Node for PlanNode {
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let round = state.count(RESEARCH_ITERATIONS);
            if round > 0 {
                let notes = state.strings(NOTES).len();
                info!(round, notes, "Supervisor round complete");
                self.ctx.events.publish(ResearchEvent::RoundComplete { round, notes });
            }

            let research = &self.ctx.config.research;
            let mut messages = vec![ChatMessage::system(prompts::supervisor_prompt(
                &prompts::today(),
                research.max_concurrent_research_units,
                research.max_supervisor_rounds,
            ))];
            messages.extend(state.messages(SUPERVISOR_MESSAGES));

            let reply = self
                .ctx
                .research_model
                .complete(messages, &supervisor_tools())
                .await?;
            Ok(StateUpdate::new()
                .message(SUPERVISOR_MESSAGES, &reply)
                .counter(RESEARCH_ITERATIONS, round + 1))
        })
    }
}

/// Stop when the model asks for nothing or declares research complete.
pub fn route_after_plan(state: &WorkflowState) -> String {
    let calls = state
        .last_message(SUPERVISOR_MESSAGES)
        .map(|m| m.tool_calls())
        .unwrap_or_default();
    if calls.is_empty() || calls.iter().any(|c| c.name == RESEARCH_COMPLETE) {
        END.to_string()
    } else {
        DISPATCH_NODE.to_string()
    }
}

/// Stop once the round cap is reached, keeping whatever notes exist.
pub fn route_after_dispatch(max_rounds: usize) -> impl Fn(&WorkflowState) -> String + Send + Sync {
    move |state| {
        if state.count(RESEARCH_ITERATIONS) >= max_rounds {
            info!(max_rounds, "Supervisor round cap reached; finishing with current notes");
            END.to_string()
        } else {
            PLAN_NODE.to_string()
        }
    }
}

/// DISPATCHING/AWAITING/DECIDING: one researcher loop per `conduct_research`
/// call, joined and merged in call order.
pub struct ResearchFanOut {
    ctx: Arc<ResearchContext>,
    researcher: Arc<Graph>,
}

impl ResearchFanOut {
    pub fn new(ctx: Arc<ResearchContext>, researcher: Arc<Graph>) -> Self {
        Self { ctx, researcher }
    }
}

impl FanOut for ResearchFanOut {
    fn dispatch(&self, state: &WorkflowState) -> Result<Dispatch> {
        let last = state
            .last_message(SUPERVISOR_MESSAGES)
            .ok_or_else(|| missing_field(SUPERVISOR_MESSAGES))?;
        let limit = self.ctx.config.research.max_concurrent_research_units;

        let mut dispatch = Dispatch::default();
        for call in last.tool_calls() {
            let reply = match call.name.as_str() {
                CONDUCT_RESEARCH => match call.arguments["research_topic"].as_str() {
                    Some(topic) if dispatch.branches.len() < limit => {
                        let child = WorkflowState::from_update(
                            self.researcher.schema(),
                            researcher::task_input(topic),
                        )?;
                        dispatch.branches.push(Branch {
                            key: call.id.clone(),
                            label: topic.to_string(),
                            state: child,
                        });
                        continue;
                    }
                    Some(_) => {
                        warn!(limit, "Research call over the concurrency limit; not dispatched");
                        ChatMessage::tool_result(
                            call.id,
                            format!(
                                "Error: exceeded maximum concurrency of {} research units. \
                                 Try again with fewer topics.",
                                limit
                            ),
                            true,
                        )
                    }
                    None => ChatMessage::tool_result(
                        call.id,
                        "Error: 'research_topic' must be a string",
                        true,
                    ),
                },
                THINK_TOOL => match think::record(&call.arguments) {
                    Ok(result) => ChatMessage::tool_result(call.id, result.content, false),
                    Err(e) => ChatMessage::tool_result(call.id, e.to_string(), true),
                },
                other => {
                    debug!(tool = other, "Ignoring supervisor tool call");
                    ChatMessage::tool_result(call.id, format!("Unknown tool '{}'", other), true)
                }
            };
            dispatch.immediate.extend(StateUpdate::new().message(SUPERVISOR_MESSAGES, &reply));
        }
        Ok(dispatch)
    }

    fn branch(&self, branch: Branch) -> BoxFuture<'_, Result<StateUpdate>> {
        Box::pin(async move {
            let finished = self.researcher.run(branch.state).await?;
            let note = finished.get_str(COMPRESSED_RESEARCH).unwrap_or_default().to_string();
            let raw = finished.strings(RAW_NOTES).join("\n");

            let answer = if note.is_empty() {
                "No findings were produced for this topic.".to_string()
            } else {
                note.clone()
            };
            let mut update = StateUpdate::new()
                .message(SUPERVISOR_MESSAGES, &ChatMessage::tool_result(branch.key, answer, false));
            if !note.is_empty() {
                update = update.text(NOTES, note);
            }
            if !raw.is_empty() {
                update = update.text(RAW_NOTES, raw);
            }
            Ok(update)
        })
    }

    fn on_branch_failure(&self, failure: &BranchFailure) -> StateUpdate {
        StateUpdate::new().message(
            SUPERVISOR_MESSAGES,
            &ChatMessage::tool_result(
                failure.key.clone(),
                format!("Research on '{}' failed: {}", failure.label, failure.error),
                true,
            ),
        )
    }
}

/// Compile the supervisor loop, with `researcher` as its branch body.
pub fn build_supervisor_graph(ctx: Arc<ResearchContext>, researcher: Arc<Graph>) -> Result<Graph> {
    let research = &ctx.config.research;
    GraphBuilder::new("supervisor", supervisor_schema())
        .add_node(PLAN_NODE, PlanNode { ctx: ctx.clone() })
        .add_fan_out(DISPATCH_NODE, ResearchFanOut::new(ctx.clone(), researcher))
        .set_entry(PLAN_NODE)
        .add_conditional_edges(PLAN_NODE, route_after_plan, &[DISPATCH_NODE, END])
        .add_conditional_edges(
            DISPATCH_NODE,
            route_after_dispatch(research.max_supervisor_rounds),
            &[PLAN_NODE, END],
        )
        .with_recursion_limit(research.recursion_limit)
        .with_events(ctx.events.clone())
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::types::ToolCall;
    use sleuth_llm::ChatModel;
    use sleuth_test_utils::{test_config, MockLlm, MockReply};
    use sleuth_tools::ToolCatalog;

    fn fan_out() -> ResearchFanOut {
        let config = test_config();
        let model = ChatModel::new(
            Arc::new(MockLlm::new(|_| MockReply::text("n/a"))),
            config.model.clone(),
        );
        let ctx = Arc::new(ResearchContext::with_model(config, model, ToolCatalog::new(vec![])));
        let researcher = Arc::new(researcher::build_researcher_graph(ctx.clone()).unwrap());
        ResearchFanOut::new(ctx, researcher)
    }

    fn planned(calls: Vec<ToolCall>) -> WorkflowState {
        let mut state =
            WorkflowState::from_update(&supervisor_schema(), supervisor_input("brief")).unwrap();
        supervisor_schema()
            .merge(
                &mut state,
                StateUpdate::new()
                    .message(SUPERVISOR_MESSAGES, &ChatMessage::assistant_with_calls("", calls)),
            )
            .unwrap();
        state
    }

    fn conduct(topic: &str) -> ToolCall {
        ToolCall::new(CONDUCT_RESEARCH, json!({ "research_topic": topic }))
    }

    #[test]
    fn test_dispatch_respects_concurrency_limit() {
        let calls = vec![conduct("a"), conduct("b"), conduct("c"), conduct("d")];
        let overflow_id = calls[3].id.clone();
        let dispatch = fan_out().dispatch(&planned(calls)).unwrap();

        let labels: Vec<&str> = dispatch.branches.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);

        let mut state = WorkflowState::new();
        supervisor_schema().merge(&mut state, dispatch.immediate).unwrap();
        let replies = state.messages(SUPERVISOR_MESSAGES);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].tool_result_id(), Some(overflow_id.as_str()));
        assert!(replies[0].text().contains("exceeded maximum concurrency"));
    }

    #[test]
    fn test_think_answered_immediately() {
        let think_call = ToolCall::new(THINK_TOOL, json!({"reflection": "split by country"}));
        let dispatch = fan_out()
            .dispatch(&planned(vec![think_call, conduct("france")]))
            .unwrap();
        assert_eq!(dispatch.branches.len(), 1);

        let mut state = WorkflowState::new();
        supervisor_schema().merge(&mut state, dispatch.immediate).unwrap();
        assert_eq!(
            state.messages(SUPERVISOR_MESSAGES)[0].text(),
            "Reflection recorded: split by country"
        );
    }

    #[test]
    fn test_child_state_is_isolated() {
        let dispatch = fan_out().dispatch(&planned(vec![conduct("topic one")])).unwrap();
        let child = &dispatch.branches[0].state;
        assert_eq!(child.get_str(crate::fields::RESEARCH_TOPIC), Some("topic one"));
        assert!(child.get(SUPERVISOR_MESSAGES).is_none());
        assert!(child.get(NOTES).is_none());
    }

    #[test]
    fn test_routing() {
        assert_eq!(route_after_plan(&planned(vec![])), END);
        assert_eq!(
            route_after_plan(&planned(vec![
                conduct("x"),
                ToolCall::new(RESEARCH_COMPLETE, json!({}))
            ])),
            END
        );
        assert_eq!(route_after_plan(&planned(vec![conduct("x")])), DISPATCH_NODE);

        let route = route_after_dispatch(2);
        let mut state = WorkflowState::new();
        supervisor_schema()
            .merge(&mut state, StateUpdate::new().counter(RESEARCH_ITERATIONS, 1))
            .unwrap();
        assert_eq!(route(&state), PLAN_NODE);
        supervisor_schema()
            .merge(&mut state, StateUpdate::new().counter(RESEARCH_ITERATIONS, 2))
            .unwrap();
        assert_eq!(route(&state), END);
    }

    #[test]
    fn test_failure_answers_the_call() {
        let update = fan_out().on_branch_failure(&BranchFailure {
            node: DISPATCH_NODE.into(),
            index: 0,
            key: "call_1".into(),
            label: "topic".into(),
            error: "Tool not found: nope".into(),
        });
        let mut state = WorkflowState::new();
        supervisor_schema().merge(&mut state, update).unwrap();
        let msg = state.last_message(SUPERVISOR_MESSAGES).unwrap();
        assert_eq!(msg.tool_result_id(), Some("call_1"));
        assert!(msg.text().contains("Tool not found"));
    }
}
