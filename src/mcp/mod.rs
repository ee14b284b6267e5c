// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Remote tool servers (MCP)
//
// Responsibilities:
// - Connector/session traits the bridge talks through
// - rmcp streamable-HTTP implementation of those traits
// - McpBridge: one task owning every live session, with request timeouts
// - Registering remote tools in the ToolRegistry as `<server>-<tool>`

mod bridge;
mod pending;
mod rmcp_client;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::ToolParameter;

pub use bridge::{register_servers, McpBridge, McpToolHandler};
pub use pending::PendingRequests;
pub use rmcp_client::RmcpConnector;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum McpError {
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Tool name is required")]
    ToolNameRequired,

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: f64 },

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("tool call failed: {0}")]
    Call(String),

    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("MCP bridge is shut down")]
    Closed,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A tool as listed by a remote server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Vec<ToolParameter>,
}

/// Opens sessions to tool servers.
#[async_trait]
pub trait ToolServerConnector: Send + Sync {
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<Box<dyn ToolServerSession>, McpError>;
}

/// One live connection to a tool server.
#[async_trait]
pub trait ToolServerSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError>;

    /// Call a tool and return its output as text.
    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<String, McpError>;

    async fn disconnect(&self) -> Result<(), McpError>;
}

/// Parameters described by a JSON Schema `object`: its properties, with
/// `required` marking the mandatory ones.
pub fn parameters_from_schema(schema: &Map<String, Value>) -> Vec<ToolParameter> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, prop)| ToolParameter {
            name: name.clone(),
            description: prop
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            required: required.contains(&name.as_str()),
        })
        .collect()
}
