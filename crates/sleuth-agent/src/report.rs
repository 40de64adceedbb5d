use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use sleuth_core::error::Result;
use sleuth_core::types::ChatMessage;

use crate::context::ResearchContext;
use crate::fields::{FINAL_REPORT, MESSAGES, NOTES, RESEARCH_BRIEF};
use crate::graph::{missing_field, Node, StateUpdate, WorkflowState};
use crate::prompts;

/// Writes the final report from the brief and every note, in order.
pub struct ReportNode {
    ctx: Arc<ResearchContext>,
}

impl ReportNode {
    pub fn new(ctx: Arc<ResearchContext>) -> Self {
        Self { ctx }
    }
}

impl Node for ReportNode {
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let brief = state
                .get_str(RESEARCH_BRIEF)
                .ok_or_else(|| missing_field(RESEARCH_BRIEF))?;
            let notes = state.strings(NOTES);

            let prompt = prompts::report_prompt(&prompts::today(), brief, &notes);
            let report = self
                .ctx
                .report_model
                .complete(vec![ChatMessage::user(prompt)], &[])
                .await?
                .text();
            info!(notes = notes.len(), report_len = report.len(), "Report written");

            Ok(StateUpdate::new()
                .text(FINAL_REPORT, report.clone())
                .message(MESSAGES, &ChatMessage::assistant_text(report)))
        })
    }
}
