//! Graph execution engine for research workflows.
//!
//! A workflow is a directed graph of nodes over a shared `WorkflowState`.
//! Nodes return partial updates that the executor merges field by field
//! according to the graph's `StateSchema`. Edges are static or conditional;
//! a conditional edge must route to one of its declared targets.
//!
//! Fan-out nodes run several branches concurrently against isolated child
//! states, wait for all of them, and merge their updates in dispatch order.

pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use edge::{Edge, END};
pub use executor::{ExecutionResult, Graph, GraphBuilder, NodeVisit};
pub use node::{
    from_fn, missing_field, Branch, BranchFailure, Dispatch, FanOut, Node, Subgraph,
};
pub use state::{MergePolicy, StateSchema, StateUpdate, WorkflowState};
