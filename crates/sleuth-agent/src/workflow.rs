use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use sleuth_core::error::Result;
use sleuth_core::types::{ChatMessage, ResearchEvent, Role};

use crate::context::ResearchContext;
use crate::fields::{
    workflow_schema, FINAL_REPORT, MESSAGES, NEEDS_CLARIFICATION, NOTES, RAW_NOTES, RESEARCH_BRIEF,
};
use crate::graph::{
    BranchFailure, Graph, GraphBuilder, NodeVisit, StateUpdate, Subgraph, WorkflowState, END,
};
use crate::report::ReportNode;
use crate::researcher::build_researcher_graph;
use crate::scope::{route_after_scope, ScopeNode};
use crate::supervisor::{build_supervisor_graph, supervisor_input};

pub const SCOPE_NODE: &str = "scope";
pub const SUPERVISOR_NODE: &str = "supervisor";
pub const REPORT_NODE: &str = "report";

/// What a run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResearchOutcome {
    pub final_report: String,
    pub research_brief: String,
    pub notes: Vec<String>,
    pub raw_notes: Vec<String>,
    /// Set when the run stopped to ask the user a question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarifying_question: Option<String>,
    #[serde(skip)]
    pub trace: Vec<NodeVisit>,
    #[serde(skip)]
    pub branch_failures: Vec<BranchFailure>,
}

impl ResearchOutcome {
    fn from_state(state: &WorkflowState) -> Self {
        let clarifying_question = if state.get_bool(NEEDS_CLARIFICATION) {
            state
                .last_message(MESSAGES)
                .filter(|m| m.role == Role::Assistant)
                .map(|m| m.text())
        } else {
            None
        };
        Self {
            final_report: state.get_str(FINAL_REPORT).unwrap_or_default().to_string(),
            research_brief: state.get_str(RESEARCH_BRIEF).unwrap_or_default().to_string(),
            notes: state.strings(NOTES),
            raw_notes: state.strings(RAW_NOTES),
            clarifying_question,
            trace: Vec::new(),
            branch_failures: Vec::new(),
        }
    }

    pub fn needs_clarification(&self) -> bool {
        self.clarifying_question.is_some()
    }
}

/// The full research workflow: scope, supervise researchers, report.
///
/// Graphs are compiled once; each `research` call runs them against a fresh
/// state.
pub struct DeepResearcher {
    ctx: Arc<ResearchContext>,
    graph: Graph,
}

impl DeepResearcher {
    pub fn new(ctx: Arc<ResearchContext>) -> Result<Self> {
        let research = &ctx.config.research;
        research.validate()?;

        let researcher = Arc::new(build_researcher_graph(ctx.clone())?);
        let supervisor = Arc::new(build_supervisor_graph(ctx.clone(), researcher)?);

        let supervise = Subgraph::new(
            supervisor,
            |parent| {
                let brief = parent.get_str(RESEARCH_BRIEF).unwrap_or_default();
                Ok(supervisor_input(brief))
            },
            |child| {
                Ok(StateUpdate::new()
                    .set(NOTES, json!(child.strings(NOTES)))
                    .set(RAW_NOTES, json!(child.strings(RAW_NOTES))))
            },
        );

        let graph = GraphBuilder::new("deep_researcher", workflow_schema())
            .add_node(SCOPE_NODE, ScopeNode::new(ctx.clone()))
            .add_node(SUPERVISOR_NODE, supervise)
            .add_node(REPORT_NODE, ReportNode::new(ctx.clone()))
            .set_entry(SCOPE_NODE)
            .add_conditional_edges(
                SCOPE_NODE,
                route_after_scope(SUPERVISOR_NODE),
                &[SUPERVISOR_NODE, END],
            )
            .add_edge(SUPERVISOR_NODE, REPORT_NODE)
            .add_edge(REPORT_NODE, END)
            .with_recursion_limit(research.recursion_limit)
            .with_events(ctx.events.clone())
            .compile()?;

        Ok(Self { ctx, graph })
    }

    pub fn context(&self) -> &ResearchContext {
        &self.ctx
    }

    /// Research a single query.
    pub async fn research(&self, query: &str) -> Result<ResearchOutcome> {
        self.run(vec![ChatMessage::user(query)]).await
    }

    /// Run over a conversation, e.g. a query, the clarifying question and
    /// the user's answer.
    pub async fn run(&self, conversation: Vec<ChatMessage>) -> Result<ResearchOutcome> {
        let initial = WorkflowState::from_update(
            self.graph.schema(),
            StateUpdate::new().messages(MESSAGES, &conversation),
        )?;
        let result = self.graph.execute(initial).await?;

        let mut outcome = ResearchOutcome::from_state(&result.state);
        outcome.trace = result.trace;
        outcome.branch_failures = result.branch_failures;

        info!(
            clarification = outcome.needs_clarification(),
            notes = outcome.notes.len(),
            elapsed_ms = result.total_elapsed_ms,
            "Research run complete"
        );
        self.ctx.events.publish(ResearchEvent::RunComplete {
            clarification: outcome.needs_clarification(),
            notes: outcome.notes.len(),
        });
        Ok(outcome)
    }
}
