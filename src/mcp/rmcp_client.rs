// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Streamable-HTTP tool server client built on rmcp.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation, InitializeRequestParam},
    service::RunningService,
    transport::{streamable_http_client::StreamableHttpClientTransportConfig, StreamableHttpClientTransport},
    RoleClient, ServiceExt as _,
};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{parameters_from_schema, McpError, RemoteTool, ToolServerConnector, ToolServerSession};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct RmcpConnector {
    http: reqwest::Client,
}

impl RmcpConnector {
    pub fn new() -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| McpError::Transport(e.to_string()))?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ToolServerConnector for RmcpConnector {
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<Box<dyn ToolServerSession>, McpError> {
        // rmcp sends the token as a bearer credential.
        let transport_config = StreamableHttpClientTransportConfig {
            uri: Arc::from(url),
            auth_header: token.filter(|t| !t.trim().is_empty()).map(String::from),
            ..Default::default()
        };
        let transport = StreamableHttpClientTransport::with_client(self.http.clone(), transport_config);

        let client_info = ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "toolbridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Toolbridge".to_string()),
                website_url: None,
                icons: None,
            },
        };

        let service = client_info.serve(transport).await.map_err(|e| McpError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(url, "tool server connected");

        Ok(Box::new(RmcpSession {
            service: RwLock::new(Some(service)),
        }))
    }
}

struct RmcpSession {
    service: RwLock<Option<RunningService<RoleClient, InitializeRequestParam>>>,
}

#[async_trait]
impl ToolServerSession for RmcpSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or(McpError::Closed)?;
        let listed = service
            .list_tools(Default::default())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        Ok(listed
            .tools
            .iter()
            .map(|tool| RemoteTool {
                name: tool.name.to_string(),
                description: tool.description.as_ref().map(|d| d.to_string()),
                parameters: parameters_from_schema(&tool.input_schema),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<String, McpError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or(McpError::Closed)?;
        let result = service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(args),
            })
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        let content = serde_json::to_value(&result.content).map_err(|e| McpError::Call(e.to_string()))?;
        let text = content_text(&content);
        if result.is_error.unwrap_or(false) {
            return Err(McpError::Call(text));
        }
        Ok(text)
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        let service = self.service.write().await.take();
        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

/// Text parts joined by newlines; other parts as compact JSON.
fn content_text(content: &Value) -> String {
    let Some(parts) = content.as_array() else {
        return content.to_string();
    };
    parts
        .iter()
        .map(|part| match (part.get("type").and_then(Value::as_str), part.get("text")) {
            (Some("text"), Some(Value::String(text))) => text.clone(),
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
