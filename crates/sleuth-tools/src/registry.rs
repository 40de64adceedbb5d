use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use sleuth_core::error::{Result, SleuthError};
use sleuth_core::traits::{Tool, ToolProvider, ToolSession};
use sleuth_core::types::{ToolCall, ToolDefinition, ToolResult};

use crate::builtin::think;

/// How a bound tool name is served.
#[derive(Clone)]
pub enum ToolHandler {
    /// The note-taking tool, answered in-process.
    Think,
    /// An in-process tool such as web search.
    Local(Arc<dyn Tool>),
    /// A tool served by the external backend session.
    Remote,
}

/// Source of tool sets. Holds the local tools, the optional external backend
/// and the allow-list applied to that backend's tools.
#[derive(Clone)]
pub struct ToolCatalog {
    locals: Vec<Arc<dyn Tool>>,
    provider: Option<Arc<dyn ToolProvider>>,
    allow_list: Vec<String>,
}

impl ToolCatalog {
    pub fn new(allow_list: Vec<String>) -> Self {
        Self {
            locals: Vec::new(),
            provider: None,
            allow_list,
        }
    }

    /// Register an in-process tool.
    pub fn register(&mut self, tool: impl Tool) {
        self.locals.push(Arc::new(tool));
    }

    pub fn with_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Open a fresh backend session, re-fetch its tools and build the lookup
    /// table for one batch of calls. The caller must `close` the returned set.
    pub async fn acquire(&self) -> Result<ToolSet> {
        let mut handlers: HashMap<String, ToolHandler> = HashMap::new();
        let mut definitions: Vec<ToolDefinition> = Vec::new();
        let mut session = None;

        if let Some(provider) = &self.provider {
            let opened = provider.open_session().await?;
            let listed = match opened.list_tools().await {
                Ok(listed) => listed,
                Err(e) => {
                    opened.close().await;
                    return Err(e);
                }
            };
            for def in listed {
                if self.allow_list.iter().any(|a| a == &def.name) {
                    handlers.insert(def.name.clone(), ToolHandler::Remote);
                    definitions.push(def);
                } else {
                    debug!(provider = provider.name(), tool = %def.name, "Tool not in allow-list");
                }
            }
            session = Some(opened);
        }

        for tool in &self.locals {
            if handlers.contains_key(tool.name()) {
                warn!(tool = tool.name(), "Local tool shadows a backend tool");
                definitions.retain(|d| d.name != tool.name());
            }
            handlers.insert(tool.name().to_string(), ToolHandler::Local(tool.clone()));
            definitions.push(tool.definition());
        }

        // Always bound, regardless of the allow-list
        definitions.retain(|d| d.name != think::THINK_TOOL);
        handlers.insert(think::THINK_TOOL.to_string(), ToolHandler::Think);
        definitions.push(think::definition());

        Ok(ToolSet {
            handlers,
            definitions,
            session,
        })
    }
}

/// The tools bound for one batch, plus the backend session serving them.
pub struct ToolSet {
    handlers: HashMap<String, ToolHandler>,
    definitions: Vec<ToolDefinition>,
    session: Option<Box<dyn ToolSession>>,
}

impl ToolSet {
    /// Definitions to bind to the model, in a stable order.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn handler(&self, name: &str) -> Option<&ToolHandler> {
        self.handlers.get(name)
    }

    /// Resolve and invoke one call. An unknown name is an error, never a no-op.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult> {
        let handler = self
            .handlers
            .get(&call.name)
            .ok_or_else(|| SleuthError::ToolNotFound(call.name.clone()))?;

        match handler {
            ToolHandler::Think => think::record(&call.arguments),
            ToolHandler::Local(tool) => {
                let timeout = std::time::Duration::from_secs(tool.timeout_secs());
                match tokio::time::timeout(timeout, tool.execute(call.arguments.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(SleuthError::ToolTimeout {
                        tool: call.name.clone(),
                        timeout_secs: tool.timeout_secs(),
                    }),
                }
            }
            ToolHandler::Remote => match &self.session {
                Some(session) => session.invoke(&call.name, call.arguments.clone()).await,
                None => Err(SleuthError::Mcp(format!(
                    "no backend session for '{}'",
                    call.name
                ))),
            },
        }
    }

    /// Release the backend session.
    pub async fn close(self) {
        if let Some(session) = self.session {
            session.close().await;
        }
    }
}
