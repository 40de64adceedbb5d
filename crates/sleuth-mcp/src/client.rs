use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rmcp::model::{CallToolRequestParams, RawContent, Tool as McpTool};
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};

use sleuth_core::config::{McpServerConfig, McpTransport};
use sleuth_core::error::{Result, SleuthError};
use sleuth_core::traits::{ToolProvider, ToolSession};
use sleuth_core::types::{ToolDefinition, ToolResult};

type McpConnection = RunningService<RoleClient, ()>;

/// An MCP server used as a tool backend. Each `open_session` launches (or
/// connects to) the server afresh; nothing is kept between sessions.
pub struct McpToolProvider {
    name: String,
    config: McpServerConfig,
}

impl McpToolProvider {
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    async fn connect(&self) -> Result<McpConnection> {
        let client = match &self.config.transport {
            McpTransport::Stdio { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }

                let transport = rmcp::transport::TokioChildProcess::new(cmd).map_err(|e| {
                    SleuthError::Mcp(format!("Failed to spawn {}: {}", command, e))
                })?;

                ().serve(transport).await.map_err(|e| {
                    SleuthError::Mcp(format!(
                        "Failed to initialize MCP client for {}: {}",
                        self.name, e
                    ))
                })?
            }
            McpTransport::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());

                <() as ServiceExt<RoleClient>>::serve((), transport)
                    .await
                    .map_err(|e| {
                        SleuthError::Mcp(format!("MCP init for '{}' failed: {}", self.name, e))
                    })?
            }
        };
        Ok(client)
    }
}

impl ToolProvider for McpToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_session(&self) -> BoxFuture<'_, Result<Box<dyn ToolSession>>> {
        Box::pin(async move {
            let client = self.connect().await?;
            debug!(server = %self.name, "MCP session opened");
            Ok(Box::new(McpSession {
                server: self.name.clone(),
                timeout_secs: self.config.timeout_secs,
                client: Mutex::new(client),
            }) as Box<dyn ToolSession>)
        })
    }
}

/// One live connection to an MCP server.
pub struct McpSession {
    server: String,
    timeout_secs: u64,
    client: Mutex<McpConnection>,
}

pub(crate) fn to_definition(tool: &McpTool) -> ToolDefinition {
    let description = tool
        .description
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_else(|| format!("MCP tool: {}", tool.name));

    let schema = serde_json::to_value(&*tool.input_schema)
        .unwrap_or(serde_json::json!({"type": "object"}));

    ToolDefinition::new(tool.name.to_string(), description, schema)
}

impl ToolSession for McpSession {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDefinition>>> {
        Box::pin(async move {
            let client = self.client.lock().await;
            let tools = client.list_all_tools().await.map_err(|e| {
                SleuthError::Mcp(format!("Failed to list tools from '{}': {}", self.server, e))
            })?;
            debug!(server = %self.server, count = tools.len(), "Listed MCP tools");
            Ok(tools.iter().map(to_definition).collect())
        })
    }

    fn invoke(&self, name: &str, arguments: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        let tool_name = name.to_string();
        Box::pin(async move {
            let params = CallToolRequestParams {
                name: tool_name.clone().into(),
                arguments: arguments.as_object().cloned(),
                meta: None,
                task: None,
            };

            let client = self.client.lock().await;
            let call = client.call_tool(params);
            let result = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
                .await
                .map_err(|_| SleuthError::ToolTimeout {
                    tool: tool_name.clone(),
                    timeout_secs: self.timeout_secs,
                })?
                .map_err(|e| {
                    SleuthError::Mcp(format!(
                        "Tool call '{}.{}' failed: {}",
                        self.server, tool_name, e
                    ))
                })?;

            // Convert result content to string
            let content: Vec<String> = result
                .content
                .iter()
                .map(|c| match c.raw {
                    RawContent::Text(ref t) => t.text.to_string(),
                    _ => format!("{:?}", c.raw),
                })
                .collect();
            let text = content.join("\n");

            if result.is_error.unwrap_or(false) {
                Ok(ToolResult::error(text))
            } else {
                Ok(ToolResult::success(text))
            }
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        let server = self.server;
        let mut client = self.client.into_inner();
        Box::pin(async move {
            match client.close().await {
                Ok(_) => info!(server = %server, "MCP session closed"),
                Err(e) => warn!(server = %server, error = %e, "MCP session did not shut down cleanly"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[tokio::test]
    async fn test_spawn_failure_is_mcp_error() {
        let provider = McpToolProvider::new(
            "filesystem",
            McpServerConfig {
                transport: McpTransport::Stdio {
                    command: "sleuth-no-such-binary-for-tests".into(),
                    args: vec![],
                    env: HashMap::new(),
                },
                timeout_secs: 5,
            },
        );
        let err = provider.open_session().await.err().unwrap();
        assert!(matches!(err, SleuthError::Mcp(_)));
        assert!(err.is_tool_invocation());
    }

    #[test]
    fn test_to_definition_keeps_schema() {
        let schema: serde_json::Map<String, serde_json::Value> = serde_json::from_value(
            serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}}
            }),
        )
        .unwrap();
        let tool = McpTool::new("read_text_file", "Read a file as text", schema);
        let def = to_definition(&tool);
        assert_eq!(def.name, "read_text_file");
        assert_eq!(def.description, "Read a file as text");
        assert_eq!(def.input_schema["properties"]["path"]["type"], "string");
    }
}
