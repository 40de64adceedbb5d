pub mod compress;
pub mod context;
pub mod fields;
pub mod graph;
pub mod parsing;
pub mod prompts;
pub mod report;
pub mod researcher;
pub mod scope;
pub mod supervisor;
pub mod workflow;

pub use context::ResearchContext;
pub use graph::{
    Edge, ExecutionResult, FanOut, Graph, GraphBuilder, Node, StateSchema, StateUpdate,
    WorkflowState, END,
};
pub use scope::ScopeDecision;
pub use workflow::{DeepResearcher, ResearchOutcome};
