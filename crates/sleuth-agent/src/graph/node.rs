use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use sleuth_core::error::{Result, SleuthError};

use super::executor::Graph;
use super::state::{StateUpdate, WorkflowState};

/// A unit of work in a graph: reads the current state, returns the fields
/// it changed.
pub trait Node: Send + Sync {
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>>;
}

/// One independently scoped unit of a fan-out.
#[derive(Debug, Clone)]
pub struct Branch {
    /// Correlates the branch with whatever requested it (e.g. a tool call id).
    pub key: String,
    /// Human-readable description for logs.
    pub label: String,
    /// The child state the branch starts from.
    pub state: WorkflowState,
}

/// What a fan-out node wants to run this step.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub branches: Vec<Branch>,
    /// Merged before any branch result.
    pub immediate: StateUpdate,
}

/// A failed branch, kept in place of its result.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchFailure {
    pub node: String,
    pub index: usize,
    pub key: String,
    pub label: String,
    pub error: String,
}

/// A node evaluated once per branch, concurrently, against isolated child
/// states. The executor waits for every branch and merges their updates in
/// dispatch order.
pub trait FanOut: Send + Sync {
    fn dispatch(&self, state: &WorkflowState) -> Result<Dispatch>;

    fn branch(&self, branch: Branch) -> BoxFuture<'_, Result<StateUpdate>>;

    /// Update merged in place of a failed branch's result.
    fn on_branch_failure(&self, _failure: &BranchFailure) -> StateUpdate {
        StateUpdate::new()
    }
}

/// A node built from an async closure over an owned copy of the state.
pub struct FnNode<F> {
    f: F,
}

pub fn from_fn<F, Fut>(f: F) -> FnNode<F>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate>> + Send + 'static,
{
    FnNode { f }
}

impl<F, Fut> Node for FnNode<F>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate>> + Send + 'static,
{
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin((self.f)(state.clone()))
    }
}

type InputMap = Box<dyn Fn(&WorkflowState) -> Result<StateUpdate> + Send + Sync>;
type OutputMap = Box<dyn Fn(WorkflowState) -> Result<StateUpdate> + Send + Sync>;

/// A compiled graph mounted as a node of another graph.
///
/// `input` builds the child's initial state (as an update against the
/// child's schema) from the parent state; `output` turns the child's final
/// state into an update for the parent.
pub struct Subgraph {
    graph: Arc<Graph>,
    input: InputMap,
    output: OutputMap,
}

impl Subgraph {
    pub fn new(
        graph: Arc<Graph>,
        input: impl Fn(&WorkflowState) -> Result<StateUpdate> + Send + Sync + 'static,
        output: impl Fn(WorkflowState) -> Result<StateUpdate> + Send + Sync + 'static,
    ) -> Self {
        Self {
            graph,
            input: Box::new(input),
            output: Box::new(output),
        }
    }
}

impl Node for Subgraph {
    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let initial = WorkflowState::from_update(self.graph.schema(), (self.input)(state)?)?;
            let finished = self.graph.run(initial).await?;
            (self.output)(finished)
        })
    }
}

/// Error for a state field that a node requires but finds absent.
pub fn missing_field(field: &str) -> SleuthError {
    SleuthError::Config(format!("state field '{}' is missing or has the wrong type", field))
}
