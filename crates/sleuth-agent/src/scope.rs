//! Scoping: decide whether to ask the user a question or turn the
//! conversation into a research brief.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use sleuth_core::error::{Result, SleuthError};
use sleuth_core::types::ChatMessage;

use crate::context::ResearchContext;
use crate::fields::{MESSAGES, NEEDS_CLARIFICATION, RESEARCH_BRIEF};
use crate::graph::{Node, StateUpdate, WorkflowState, END};
use crate::parsing::parse_model_json;
use crate::prompts;

/// The scope model's structured answer.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScopeDecision {
    pub needs_clarification: bool,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub research_brief: String,
}

impl ScopeDecision {
    /// Parse the model's reply. A decision missing the text it promises is
    /// treated as unparseable.
    pub fn parse(text: &str) -> Result<Self> {
        let decision: Self = parse_model_json(text)?;
        if decision.needs_clarification && decision.question.trim().is_empty() {
            return Err(SleuthError::LlmParse(
                "scope asked for clarification without a question".into(),
            ));
        }
        if !decision.needs_clarification && decision.research_brief.trim().is_empty() {
            return Err(SleuthError::LlmParse("scope returned an empty research brief".into()));
        }
        Ok(decision)
    }

    fn into_update(self) -> StateUpdate {
        if self.needs_clarification {
            StateUpdate::new()
                .flag(NEEDS_CLARIFICATION, true)
                .message(MESSAGES, &ChatMessage::assistant_text(self.question))
        } else {
            StateUpdate::new()
                .flag(NEEDS_CLARIFICATION, false)
                .text(RESEARCH_BRIEF, self.research_brief)
        }
    }
}

pub struct ScopeNode {
    ctx: Arc<ResearchContext>,
}

impl ScopeNode {
    pub fn new(ctx: Arc<ResearchContext>) -> Self {
        Self { ctx }
    }
}

impl Node for ScopeNode {
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let mut messages = vec![ChatMessage::system(prompts::scope_prompt(&prompts::today()))];
            messages.extend(state.messages(MESSAGES));

            let reply = self.ctx.research_model.complete(messages, &[]).await?;
            let decision = ScopeDecision::parse(&reply.text())?;
            info!(
                needs_clarification = decision.needs_clarification,
                "Scoped research request"
            );
            Ok(decision.into_update())
        })
    }
}

/// Halt with the question, or hand the brief to `next`.
pub fn route_after_scope(next: &'static str) -> impl Fn(&WorkflowState) -> String + Send + Sync {
    move |state| {
        if state.get_bool(NEEDS_CLARIFICATION) {
            END.to_string()
        } else {
            next.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::workflow_schema;
    use sleuth_core::types::Role;
    use sleuth_llm::ChatModel;
    use sleuth_test_utils::{test_config, MockLlm, MockReply};
    use sleuth_tools::ToolCatalog;

    fn context(reply: &'static str) -> Arc<ResearchContext> {
        let model = ChatModel::new(
            Arc::new(MockLlm::new(move |_| MockReply::text(reply))),
            test_config().model,
        );
        Arc::new(ResearchContext::with_model(test_config(), model, ToolCatalog::new(vec![])))
    }

    fn query(text: &str) -> WorkflowState {
        WorkflowState::from_update(
            &workflow_schema(),
            StateUpdate::new().message(MESSAGES, &ChatMessage::user(text)),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_requires_question_when_clarifying() {
        let err = ScopeDecision::parse(r#"{"needs_clarification": true}"#).unwrap_err();
        assert!(matches!(err, SleuthError::LlmParse(_)));
    }

    #[test]
    fn test_parse_requires_brief_when_proceeding() {
        let err = ScopeDecision::parse(r#"{"needs_clarification": false, "research_brief": " "}"#)
            .unwrap_err();
        assert!(matches!(err, SleuthError::LlmParse(_)));
    }

    #[tokio::test]
    async fn test_brief_is_written() {
        let node = ScopeNode::new(context(
            r#"```json
{"needs_clarification": false, "question": "", "research_brief": "Find the capital of France."}
```"#,
        ));
        let state = query("What is the capital of France?");
        let update = node.run(&state).await.unwrap();

        let mut merged = state.clone();
        workflow_schema().merge(&mut merged, update).unwrap();
        assert_eq!(merged.get_str(RESEARCH_BRIEF), Some("Find the capital of France."));
        assert_eq!(route_after_scope("supervisor")(&merged), "supervisor");
        assert_eq!(merged.messages(MESSAGES).len(), 1);
    }

    #[tokio::test]
    async fn test_clarification_halts() {
        let node = ScopeNode::new(context(
            r#"{"needs_clarification": true, "question": "What should I research?", "research_brief": ""}"#,
        ));
        let state = query("research this");
        let update = node.run(&state).await.unwrap();

        let mut merged = state.clone();
        workflow_schema().merge(&mut merged, update).unwrap();
        assert_eq!(route_after_scope("supervisor")(&merged), END);
        assert!(merged.get_str(RESEARCH_BRIEF).is_none());
        let last = merged.last_message(MESSAGES).unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text(), "What should I research?");
    }

    #[tokio::test]
    async fn test_prose_reply_is_parse_error() {
        let node = ScopeNode::new(context("I'd be happy to help with that!"));
        let err = node.run(&query("anything")).await.unwrap_err();
        assert!(err.is_model_provider());
    }
}
