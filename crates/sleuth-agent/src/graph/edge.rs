use std::sync::Arc;

use sleuth_core::error::{Result, SleuthError};

use super::state::WorkflowState;

/// Name of the terminal node. Reaching it ends the run.
pub const END: &str = "__end__";

/// A routing function over the current state.
pub type Router = Arc<dyn Fn(&WorkflowState) -> String + Send + Sync>;

/// The outgoing edge of a node.
#[derive(Clone)]
pub enum Edge {
    /// Always traverse to `to`.
    Static { to: String },
    /// Traverse to whatever the router returns; it must be one of `targets`.
    Conditional { router: Router, targets: Vec<String> },
}

impl Edge {
    pub fn always(to: impl Into<String>) -> Self {
        Self::Static { to: to.into() }
    }

    pub fn conditional(
        router: impl Fn(&WorkflowState) -> String + Send + Sync + 'static,
        targets: &[&str],
    ) -> Self {
        Self::Conditional {
            router: Arc::new(router),
            targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Every node this edge can lead to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Static { to } => vec![to.as_str()],
            Self::Conditional { targets, .. } => targets.iter().map(String::as_str).collect(),
        }
    }

    /// Pick the successor of `from` for the given state.
    pub fn resolve(&self, from: &str, state: &WorkflowState) -> Result<String> {
        match self {
            Self::Static { to } => Ok(to.clone()),
            Self::Conditional { router, targets } => {
                let route = router(state);
                if targets.iter().any(|t| *t == route) {
                    Ok(route)
                } else {
                    Err(SleuthError::InvalidRoute {
                        node: from.to_string(),
                        route,
                    })
                }
            }
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static { to } => f.debug_struct("Static").field("to", to).finish(),
            Self::Conditional { targets, .. } => f
                .debug_struct("Conditional")
                .field("targets", targets)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::{StateSchema, StateUpdate};

    fn state_with(flag: bool) -> WorkflowState {
        let schema = StateSchema::new().overwrite("go");
        WorkflowState::from_update(&schema, StateUpdate::new().flag("go", flag)).unwrap()
    }

    #[test]
    fn test_static_edge() {
        let e = Edge::always("report");
        assert_eq!(e.resolve("scope", &WorkflowState::new()).unwrap(), "report");
        assert_eq!(e.targets(), vec!["report"]);
    }

    #[test]
    fn test_conditional_edge_routes() {
        let e = Edge::conditional(
            |s| if s.get_bool("go") { "next".into() } else { END.into() },
            &["next", END],
        );
        assert_eq!(e.resolve("a", &state_with(true)).unwrap(), "next");
        assert_eq!(e.resolve("a", &state_with(false)).unwrap(), END);
    }

    #[test]
    fn test_undeclared_route_is_fatal() {
        let e = Edge::conditional(|_| "elsewhere".into(), &["next", END]);
        match e.resolve("a", &WorkflowState::new()) {
            Err(SleuthError::InvalidRoute { node, route }) => {
                assert_eq!(node, "a");
                assert_eq!(route, "elsewhere");
            }
            other => panic!("expected InvalidRoute, got {:?}", other),
        }
    }
}
