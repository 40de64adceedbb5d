use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use sleuth_core::config::{ModelConfig, Provider};
use sleuth_core::error::{Result, SleuthError};
use sleuth_core::traits::LlmClient;
use sleuth_core::types::*;

use super::{http_client, open_stream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API client.
pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self { http: http_client() }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
}

/// A user or assistant turn. Content blocks already serialize in the
/// Messages API shape.
#[derive(Serialize, Debug)]
struct Turn<'a> {
    role: &'static str,
    content: Vec<&'a ContentBlock>,
}

#[derive(Serialize)]
struct ToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

/// The stream events that carry content; everything else is ignored.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    ContentBlockStart { index: usize, content_block: BlockStart },
    ContentBlockDelta { index: usize, delta: BlockDelta },
    MessageDelta { delta: MessageDelta },
    Error { error: EventError },
    #[serde(other)]
    Ignored,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct EventError {
    message: String,
}

/// Pull the system prompt out and map the rest onto user/assistant turns.
/// Tool results ride in user turns; a run of them shares one turn so each
/// batch answers its assistant turn in a single message.
fn split_transcript(messages: &[ChatMessage]) -> (Option<String>, Vec<Turn<'_>>) {
    let system: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.text())
        .collect();

    let mut turns: Vec<Turn<'_>> = Vec::new();
    let mut prev = None;
    for msg in messages.iter().filter(|m| m.role != Role::System) {
        let blocks = msg.content.iter();
        match (msg.role, prev) {
            (Role::Tool, Some(Role::Tool)) => {
                if let Some(turn) = turns.last_mut() {
                    turn.content.extend(blocks);
                }
            }
            (role, _) => turns.push(Turn {
                role: if role == Role::Assistant { "assistant" } else { "user" },
                content: blocks.collect(),
            }),
        }
        prev = Some(msg.role);
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, turns)
}

fn stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "end_turn" => Some(StopReason::EndTurn),
        "tool_use" => Some(StopReason::ToolUse),
        "max_tokens" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        _ => None,
    }
}

fn event_delta(data: &str) -> Option<Result<StreamDelta>> {
    let event: Event = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            warn!(data, error = %e, "Skipping unreadable message event");
            return None;
        }
    };
    match event {
        Event::ContentBlockStart {
            index,
            content_block: BlockStart::ToolUse { id, name },
        } => Some(Ok(StreamDelta::ToolUseStart { index, id, name })),
        Event::ContentBlockDelta { index, delta } => match delta {
            BlockDelta::TextDelta { text } => Some(Ok(StreamDelta::TextDelta(text))),
            BlockDelta::InputJsonDelta { partial_json } => Some(Ok(StreamDelta::ToolInputDelta {
                index,
                delta: partial_json,
            })),
            BlockDelta::Other => None,
        },
        Event::MessageDelta { delta } => delta
            .stop_reason
            .as_deref()
            .and_then(stop_reason)
            .map(|s| Ok(StreamDelta::Stop(s))),
        Event::Error { error } => Some(Err(SleuthError::LlmStream(error.message))),
        Event::ContentBlockStart { .. } | Event::Ignored => None,
    }
}

impl LlmClient for AnthropicClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let api_key = config.api_key.clone().ok_or_else(|| {
                SleuthError::CredentialMissing(vec![Provider::Anthropic.api_key_env().to_string()])
            })?;

            let (system, turns) = split_transcript(&messages);
            let body = MessagesRequest {
                model: &config.model_id,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                system,
                messages: turns,
                stream: true,
                tools: tools
                    .iter()
                    .map(|t| ToolSpec {
                        name: &t.name,
                        description: &t.description,
                        input_schema: &t.input_schema,
                    })
                    .collect(),
            };

            let req = self
                .http
                .post(config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL))
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body);
            let events = open_stream(req, &config).await?;

            let deltas = events.filter_map(|event| async move {
                match event {
                    Ok(event) => event_delta(&event.data),
                    Err(e) => Some(Err(e)),
                }
            });
            Ok(deltas.boxed())
        })
    }
}
