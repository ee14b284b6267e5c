// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Tool registry and execution
//
// Responsibilities:
// - Tool definitions grouped by class (built-in and remote)
// - ToolExecutor trait: name + params -> textual result, never a failure
// - Built-in getCurrentTime
// - Rendering of the tool-instructions block injected into prompts

mod builtin;
mod instructions;
mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub use builtin::CurrentTime;
pub use instructions::{render_instructions, INSTRUCTIONS_END, INSTRUCTIONS_START};
pub use registry::ToolRegistry;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Grouping used when rendering instructions. Built-ins use `default`,
    /// remote tools use their server name.
    pub class_name: String,
    pub parameters: Vec<ToolParameter>,
}

/// Output of one tool execution, embedded into the follow-up request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_name: String,
    pub result: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One callable tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: &Map<String, Value>) -> Result<String, ToolError>;
}

/// Runs tools by name.
///
/// Unknown names and handler failures come back as error strings inside the
/// result; the caller always needs text to embed in the follow-up message.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, params: &Map<String, Value>) -> ToolResult;

    /// Instructions block describing every available tool.
    fn instructions(&self) -> String;
}

/// Parse the raw argument text of a marker. Anything that is not a JSON
/// object becomes an empty parameter map.
pub fn parse_params(raw: &str) -> Map<String, Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::debug!(raw_params = raw, "tool arguments are not a JSON object, ignoring");
            Map::new()
        }
    }
}
