//! The introspective note-taking tool. It performs no I/O; calling it only
//! records the model's reflection in the transcript.

use serde_json::json;

use sleuth_core::error::{Result, SleuthError};
use sleuth_core::types::{ToolDefinition, ToolResult};

pub const THINK_TOOL: &str = "think";

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        THINK_TOOL,
        "Strategic reflection on research progress. Use it after each search to \
         note what was found, what is missing, and whether to continue.",
        json!({
            "type": "object",
            "properties": {
                "reflection": {
                    "type": "string",
                    "description": "Your reflection on progress, gaps and next steps"
                }
            },
            "required": ["reflection"]
        }),
    )
}

pub fn record(input: &serde_json::Value) -> Result<ToolResult> {
    let reflection = input["reflection"]
        .as_str()
        .ok_or_else(|| SleuthError::ToolValidation("'reflection' must be a string".into()))?;
    Ok(ToolResult::success(format!("Reflection recorded: {}", reflection)))
}
