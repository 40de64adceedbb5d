use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use sleuth_core::error::{Result, SleuthError};
use sleuth_core::traits::{ToolProvider, ToolSession};
use sleuth_core::types::{ToolDefinition, ToolResult};

type Handler = Arc<dyn Fn(&serde_json::Value) -> Result<ToolResult> + Send + Sync>;

/// In-memory tool backend. Counts sessions so tests can check that every
/// opened session is closed.
#[derive(Clone, Default)]
pub struct MockToolProvider {
    tools: HashMap<String, Handler>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub invocations: Arc<AtomicUsize>,
}

impl MockToolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(
        mut self,
        name: &str,
        handler: impl Fn(&serde_json::Value) -> Result<ToolResult> + Send + Sync + 'static,
    ) -> Self {
        self.tools.insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Sessions currently open.
    pub fn live_sessions(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

impl ToolProvider for MockToolProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn open_session(&self) -> BoxFuture<'_, Result<Box<dyn ToolSession>>> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                tools: self.tools.clone(),
                closed: self.closed.clone(),
                invocations: self.invocations.clone(),
            }) as Box<dyn ToolSession>)
        })
    }
}

struct MockSession {
    tools: HashMap<String, Handler>,
    closed: Arc<AtomicUsize>,
    invocations: Arc<AtomicUsize>,
}

impl ToolSession for MockSession {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDefinition>>> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        let defs = names
            .into_iter()
            .map(|name| {
                ToolDefinition::new(name.as_str(), format!("mock {}", name), json!({"type": "object"}))
            })
            .collect();
        Box::pin(async move { Ok(defs) })
    }

    fn invoke(&self, name: &str, arguments: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let result = match self.tools.get(name) {
            Some(handler) => handler(&arguments),
            None => Err(SleuthError::Mcp(format!("unknown tool '{}'", name))),
        };
        Box::pin(async move { result })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        let closed = self.closed.clone();
        Box::pin(async move {
            closed.fetch_add(1, Ordering::SeqCst);
        })
    }
}
