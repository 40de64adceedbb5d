use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use sleuth_core::error::{Result, SleuthError};
use sleuth_core::event::EventBus;
use sleuth_core::types::ResearchEvent;

use super::edge::{Edge, END};
use super::node::{BranchFailure, Dispatch, FanOut, Node};
use super::state::{StateSchema, StateUpdate, WorkflowState};

const DEFAULT_RECURSION_LIMIT: usize = 25;

/// One node visit, in execution order.
#[derive(Debug, Clone)]
pub struct NodeVisit {
    pub node_id: String,
    pub elapsed_ms: u64,
    /// Branches run by a fan-out node; zero for plain nodes.
    pub branches: usize,
}

/// Result of executing an entire graph.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The final state with all merged updates.
    pub state: WorkflowState,
    /// Per-node visits in execution order.
    pub trace: Vec<NodeVisit>,
    /// Fan-out branches that failed and were replaced by their recovery update.
    pub branch_failures: Vec<BranchFailure>,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

enum NodeKind {
    Step(Arc<dyn Node>),
    FanOut(Arc<dyn FanOut>),
}

/// Collects nodes and edges; `compile` validates them into a `Graph`.
pub struct GraphBuilder {
    name: String,
    schema: StateSchema,
    nodes: Vec<(String, NodeKind)>,
    edges: Vec<(String, Edge)>,
    entry: Option<String>,
    recursion_limit: usize,
    events: Option<Arc<EventBus>>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>, schema: StateSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            events: None,
        }
    }

    pub fn add_node(mut self, id: &str, node: impl Node + 'static) -> Self {
        self.nodes.push((id.to_string(), NodeKind::Step(Arc::new(node))));
        self
    }

    pub fn add_fan_out(mut self, id: &str, node: impl FanOut + 'static) -> Self {
        self.nodes.push((id.to_string(), NodeKind::FanOut(Arc::new(node))));
        self
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push((from.to_string(), Edge::always(to)));
        self
    }

    /// Route from `from` with `router`, which must return one of `targets`.
    pub fn add_conditional_edges(
        mut self,
        from: &str,
        router: impl Fn(&WorkflowState) -> String + Send + Sync + 'static,
        targets: &[&str],
    ) -> Self {
        self.edges.push((from.to_string(), Edge::conditional(router, targets)));
        self
    }

    pub fn set_entry(mut self, id: &str) -> Self {
        self.entry = Some(id.to_string());
        self
    }

    /// Upper bound on node visits per run.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn compile(self) -> Result<Graph> {
        let invalid = |msg: String| SleuthError::Config(format!("graph '{}': {}", self.name, msg));

        let mut nodes: HashMap<String, NodeKind> = HashMap::new();
        for (id, kind) in self.nodes {
            if id == END {
                return Err(invalid(format!("'{}' is reserved", END)));
            }
            if nodes.insert(id.clone(), kind).is_some() {
                return Err(invalid(format!("node '{}' declared twice", id)));
            }
        }

        let entry = self.entry.clone().ok_or_else(|| invalid("no entry node".into()))?;
        if !nodes.contains_key(&entry) {
            return Err(invalid(format!("entry node '{}' does not exist", entry)));
        }

        let mut edges: HashMap<String, Edge> = HashMap::new();
        for (from, edge) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(invalid(format!("edge from unknown node '{}'", from)));
            }
            let targets = edge.targets();
            if targets.is_empty() {
                return Err(invalid(format!("conditional edge from '{}' has no targets", from)));
            }
            if let Some(unknown) = targets.iter().find(|t| **t != END && !nodes.contains_key(**t)) {
                return Err(invalid(format!("edge '{}' -> unknown node '{}'", from, unknown)));
            }
            if edges.insert(from.clone(), edge).is_some() {
                return Err(invalid(format!("node '{}' has more than one outgoing edge", from)));
            }
        }

        let mut ids: Vec<&String> = nodes.keys().collect();
        ids.sort();
        if let Some(dangling) = ids.into_iter().find(|id| !edges.contains_key(*id)) {
            return Err(invalid(format!("node '{}' has no outgoing edge", dangling)));
        }

        Ok(Graph {
            name: self.name,
            schema: self.schema,
            nodes,
            edges,
            entry,
            recursion_limit: self.recursion_limit,
            events: self.events,
        })
    }
}

/// A validated workflow graph.
///
/// Starting from the entry node, the executor runs one node at a time,
/// merges its update into the state and follows its outgoing edge until it
/// reaches `END`.
pub struct Graph {
    name: String,
    schema: StateSchema,
    nodes: HashMap<String, NodeKind>,
    edges: HashMap<String, Edge>,
    entry: String,
    recursion_limit: usize,
    events: Option<Arc<EventBus>>,
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Run to completion and return only the final state.
    pub async fn run(&self, initial: WorkflowState) -> Result<WorkflowState> {
        Ok(self.execute(initial).await?.state)
    }

    /// Run to completion, keeping the trace and any branch failures.
    pub async fn execute(&self, initial: WorkflowState) -> Result<ExecutionResult> {
        let start = Instant::now();
        let mut state = initial;
        let mut trace = Vec::new();
        let mut branch_failures = Vec::new();
        let mut current = self.entry.clone();

        while current != END {
            if trace.len() >= self.recursion_limit {
                warn!(graph = %self.name, limit = self.recursion_limit, "Recursion limit reached");
                return Err(SleuthError::IterationLimitExceeded {
                    graph: self.name.clone(),
                    limit: self.recursion_limit,
                });
            }

            let kind = self.nodes.get(&current).ok_or_else(|| {
                SleuthError::Config(format!("Node '{}' not found in graph '{}'", current, self.name))
            })?;

            debug!(graph = %self.name, node = %current, "Executing graph node");
            self.publish(ResearchEvent::NodeStarted {
                graph: self.name.clone(),
                node: current.clone(),
            });

            let node_start = Instant::now();
            let (update, branches) = match kind {
                NodeKind::Step(node) => (node.run(&state).await?, 0),
                NodeKind::FanOut(fan) => {
                    self.run_fan_out(&current, fan.as_ref(), &state, &mut branch_failures)
                        .await?
                }
            };
            self.schema.merge(&mut state, update)?;

            let elapsed_ms = node_start.elapsed().as_millis() as u64;
            debug!(graph = %self.name, node = %current, elapsed_ms, branches, "Node execution complete");
            self.publish(ResearchEvent::NodeFinished {
                graph: self.name.clone(),
                node: current.clone(),
                elapsed_ms,
            });
            trace.push(NodeVisit {
                node_id: current.clone(),
                elapsed_ms,
                branches,
            });

            let edge = self.edges.get(&current).ok_or_else(|| {
                SleuthError::Config(format!("Node '{}' has no outgoing edge", current))
            })?;
            current = edge.resolve(&current, &state)?;
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            graph = %self.name,
            visits = trace.len(),
            failed_branches = branch_failures.len(),
            total_elapsed_ms,
            "Graph complete"
        );

        Ok(ExecutionResult {
            state,
            trace,
            branch_failures,
            total_elapsed_ms,
        })
    }

    /// Run every branch concurrently, wait for all of them, then combine the
    /// immediate update and each branch's update in dispatch order.
    async fn run_fan_out(
        &self,
        node_id: &str,
        fan: &dyn FanOut,
        state: &WorkflowState,
        failures: &mut Vec<BranchFailure>,
    ) -> Result<(StateUpdate, usize)> {
        let Dispatch {
            branches,
            immediate,
        } = fan.dispatch(state)?;
        let count = branches.len();

        info!(graph = %self.name, node = %node_id, branches = count, "Dispatching branches");
        self.publish(ResearchEvent::BranchDispatched {
            graph: self.name.clone(),
            node: node_id.to_string(),
            branches: count,
        });

        let labels: Vec<(String, String)> = branches
            .iter()
            .map(|b| (b.key.clone(), b.label.clone()))
            .collect();
        let results = join_all(branches.into_iter().map(|b| fan.branch(b))).await;

        let mut update = immediate;
        for (index, (result, (key, label))) in results.into_iter().zip(labels).enumerate() {
            match result {
                Ok(branch_update) => update.extend(branch_update),
                Err(e) => {
                    warn!(
                        graph = %self.name,
                        node = %node_id,
                        index,
                        label = %label,
                        error = %e,
                        "Branch failed"
                    );
                    let failure = BranchFailure {
                        node: node_id.to_string(),
                        index,
                        key,
                        label,
                        error: e.to_string(),
                    };
                    self.publish(ResearchEvent::BranchFailed {
                        graph: self.name.clone(),
                        node: failure.node.clone(),
                        index,
                        label: failure.label.clone(),
                        error: failure.error.clone(),
                    });
                    update.extend(fan.on_branch_failure(&failure));
                    failures.push(failure);
                }
            }
        }
        Ok((update, count))
    }

    fn publish(&self, event: ResearchEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}
