use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use sleuth_core::config::ModelConfig;
use sleuth_core::error::{Result, SleuthError};
use sleuth_core::traits::LlmClient;
use sleuth_core::types::*;

use super::{http_client, open_stream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat Completions client. Serves OpenAI, Groq, Mistral, Gemini and AIML,
/// which differ only in endpoint and headers.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self { http: http_client() }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

/// One message on the wire, tagged by role.
#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
enum WireMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize, Debug, PartialEq)]
struct WireCall {
    id: String,
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    r#type: &'static str,
    function: WireToolSpec<'a>,
}

#[derive(Serialize)]
struct WireToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkCall>>,
}

#[derive(Deserialize)]
struct ChunkCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: String,
}

/// Flatten a transcript into Chat Completions messages. Every tool result
/// becomes its own `tool` message keyed by the call it answers.
fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            Role::System => out.push(WireMessage::System { content: msg.text() }),
            Role::User => out.push(WireMessage::User { content: msg.text() }),
            Role::Assistant => {
                let text = msg.text();
                let tool_calls: Vec<WireCall> = msg
                    .tool_calls()
                    .into_iter()
                    .map(|call| WireCall {
                        id: call.id,
                        r#type: "function",
                        function: WireFunction {
                            name: call.name,
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect();
                let content = if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text)
                };
                out.push(WireMessage::Assistant { content, tool_calls });
            }
            Role::Tool => out.extend(msg.content.iter().filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, content, .. } => Some(WireMessage::Tool {
                    tool_call_id: tool_use_id.clone(),
                    content: content.clone(),
                }),
                _ => None,
            })),
        }
    }
    out
}

fn wire_tools(tools: &[ToolDefinition]) -> Vec<WireTool<'_>> {
    tools
        .iter()
        .map(|t| WireTool {
            r#type: "function",
            function: WireToolSpec {
                name: &t.name,
                description: &t.description,
                parameters: &t.input_schema,
            },
        })
        .collect()
}

fn stop_reason(finish: &str) -> StopReason {
    match finish {
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

/// Deltas carried by one `data:` payload, content before the stop marker.
///
/// Compatible gateways often send a call's name and its full arguments in
/// the same chunk, so both deltas may come out of one entry.
fn chunk_deltas(data: &str) -> Result<Vec<StreamDelta>> {
    let chunk: Chunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data, error = %e, "Skipping unreadable completion chunk");
            return Ok(Vec::new());
        }
    };
    if let Some(err) = chunk.error {
        return Err(SleuthError::LlmStream(err.message));
    }

    let mut deltas = Vec::new();
    for choice in chunk.choices.into_iter().take(1) {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            deltas.push(StreamDelta::TextDelta(text));
        }
        for call in choice.delta.tool_calls.into_iter().flatten() {
            let Some(function) = call.function else { continue };
            if let Some(name) = function.name {
                deltas.push(StreamDelta::ToolUseStart {
                    index: call.index,
                    id: call.id.unwrap_or_default(),
                    name,
                });
            }
            if let Some(args) = function.arguments.filter(|a| !a.is_empty()) {
                deltas.push(StreamDelta::ToolInputDelta { index: call.index, delta: args });
            }
        }
        if let Some(finish) = choice.finish_reason {
            deltas.push(StreamDelta::Stop(stop_reason(&finish)));
        }
    }
    Ok(deltas)
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let body = CompletionRequest {
                model: &config.model_id,
                messages: wire_messages(&messages),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                stream: true,
                tools: wire_tools(&tools),
            };

            let mut req = self
                .http
                .post(config.base_url.as_deref().unwrap_or(OPENAI_API_URL))
                .json(&body);
            if let Some(key) = &config.api_key {
                req = req.bearer_auth(key);
            }
            let events = open_stream(req, &config).await?;

            let deltas = events
                .take_while(|event| {
                    let done = matches!(event, Ok(e) if e.is_done());
                    async move { !done }
                })
                .flat_map(|event| {
                    let batch = match event.and_then(|e| chunk_deltas(&e.data)) {
                        Ok(deltas) => deltas.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    };
                    stream::iter(batch)
                });
            Ok(deltas.boxed())
        })
    }
}
