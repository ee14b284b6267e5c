// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// MCP bridge
//
// Responsibilities:
// - One task owns every live session, keyed by client id
// - Callers send commands over a channel and wait on a pending reply
// - Every request is bounded by the configured timeout
// - Remote tools are exposed to the ToolRegistry as `<server>-<tool>`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{McpError, PendingRequests, RemoteTool, ToolServerConnector, ToolServerSession};
use crate::config::McpServerConfig;
use crate::tools::{ToolDefinition, ToolError, ToolHandler, ToolRegistry};

const COMMAND_CAPACITY: usize = 32;

type Reply = Result<Response, McpError>;

enum Response {
    Connected(String),
    Tools(Vec<RemoteTool>),
    Called(String),
    Disconnected,
}

enum Command {
    Connect {
        id: u64,
        url: String,
        token: Option<String>,
    },
    /// A connect finished; hand the session to the owner.
    Attach {
        id: u64,
        session: Box<dyn ToolServerSession>,
    },
    ListTools {
        id: u64,
        client_id: String,
    },
    CallTool {
        id: u64,
        client_id: String,
        name: String,
        args: Map<String, Value>,
    },
    Disconnect {
        id: u64,
        client_id: String,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap-to-clone handle to the bridge task.
#[derive(Clone)]
pub struct McpBridge {
    tx: mpsc::Sender<Command>,
    pending: Arc<PendingRequests<Reply>>,
    timeout: Duration,
}

impl McpBridge {
    /// Start the bridge task. It stops, disconnecting every session, once
    /// all handles are dropped.
    pub fn spawn(connector: Arc<dyn ToolServerConnector>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let pending = Arc::new(PendingRequests::new());

        let owner = SessionOwner {
            connector,
            sessions: HashMap::new(),
            pending: pending.clone(),
            loopback: tx.downgrade(),
        };
        tokio::spawn(owner.run(rx));

        Self { tx, pending, timeout }
    }

    /// Connect to a server. Returns the client id for later calls.
    pub async fn connect(&self, url: &str, token: Option<&str>) -> Result<String, McpError> {
        let url = url.to_string();
        let token = token.map(String::from);
        match self.request(|id| Command::Connect { id, url, token }).await? {
            Response::Connected(client_id) => Ok(client_id),
            _ => Err(unexpected()),
        }
    }

    pub async fn list_tools(&self, client_id: &str) -> Result<Vec<RemoteTool>, McpError> {
        let client_id = client_id.to_string();
        match self.request(|id| Command::ListTools { id, client_id }).await? {
            Response::Tools(tools) => Ok(tools),
            _ => Err(unexpected()),
        }
    }

    pub async fn call_tool(
        &self,
        client_id: &str,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<String, McpError> {
        if name.trim().is_empty() {
            return Err(McpError::ToolNameRequired);
        }
        let client_id = client_id.to_string();
        let name = name.to_string();
        match self
            .request(|id| Command::CallTool {
                id,
                client_id,
                name,
                args,
            })
            .await?
        {
            Response::Called(output) => Ok(output),
            _ => Err(unexpected()),
        }
    }

    pub async fn disconnect(&self, client_id: &str) -> Result<(), McpError> {
        let client_id = client_id.to_string();
        match self.request(|id| Command::Disconnect { id, client_id }).await? {
            Response::Disconnected => Ok(()),
            _ => Err(unexpected()),
        }
    }

    /// Requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    async fn request(&self, build: impl FnOnce(u64) -> Command) -> Reply {
        let (id, rx) = self.pending.register();
        if self.tx.send(build(id)).await.is_err() {
            self.pending.cancel(id);
            return Err(McpError::Closed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                self.pending.cancel(id);
                tracing::warn!(request_id = id, timeout_ms = self.timeout.as_millis() as u64, "MCP request timed out");
                Err(McpError::Timeout {
                    seconds: self.timeout.as_secs_f64(),
                })
            }
        }
    }
}

fn unexpected() -> McpError {
    McpError::Transport("unexpected reply from bridge".to_string())
}

// ---------------------------------------------------------------------------
// Owner task
// ---------------------------------------------------------------------------

struct SessionOwner {
    connector: Arc<dyn ToolServerConnector>,
    sessions: HashMap<String, Arc<dyn ToolServerSession>>,
    pending: Arc<PendingRequests<Reply>>,
    loopback: mpsc::WeakSender<Command>,
}

impl SessionOwner {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }

        for (client_id, session) in self.sessions.drain() {
            if let Err(e) = session.disconnect().await {
                tracing::warn!(client_id = %client_id, error = %e, "disconnect on shutdown failed");
            }
        }
        tracing::debug!("MCP bridge stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { id, url, token } => {
                let connector = self.connector.clone();
                let pending = self.pending.clone();
                let loopback = self.loopback.clone();
                tokio::spawn(async move {
                    match connector.connect(&url, token.as_deref()).await {
                        Ok(session) => match loopback.upgrade() {
                            Some(tx) => {
                                let _ = tx.send(Command::Attach { id, session }).await;
                            }
                            None => {
                                pending.complete(id, Err(McpError::Closed));
                            }
                        },
                        Err(e) => {
                            tracing::warn!(url = %url, error = %e, "tool server connect failed");
                            pending.complete(id, Err(e));
                        }
                    }
                });
            }
            Command::Attach { id, session } => {
                let client_id = uuid::Uuid::new_v4().to_string();
                let session: Arc<dyn ToolServerSession> = Arc::from(session);
                if self
                    .pending
                    .complete(id, Ok(Response::Connected(client_id.clone())))
                {
                    tracing::info!(client_id = %client_id, "tool server session attached");
                    self.sessions.insert(client_id, session);
                } else {
                    // Caller gave up (timeout); nobody can address this session.
                    tokio::spawn(async move {
                        let _ = session.disconnect().await;
                    });
                }
            }
            Command::ListTools { id, client_id } => {
                let Some(session) = self.lookup(id, &client_id) else {
                    return;
                };
                let pending = self.pending.clone();
                tokio::spawn(async move {
                    pending.complete(id, session.list_tools().await.map(Response::Tools));
                });
            }
            Command::CallTool {
                id,
                client_id,
                name,
                args,
            } => {
                let Some(session) = self.lookup(id, &client_id) else {
                    return;
                };
                let pending = self.pending.clone();
                tokio::spawn(async move {
                    pending.complete(id, session.call_tool(&name, args).await.map(Response::Called));
                });
            }
            Command::Disconnect { id, client_id } => {
                let Some(session) = self.sessions.remove(&client_id) else {
                    self.pending.complete(id, Err(McpError::ClientNotFound(client_id)));
                    return;
                };
                let pending = self.pending.clone();
                tokio::spawn(async move {
                    let result = session.disconnect().await.map(|()| Response::Disconnected);
                    pending.complete(id, result);
                });
            }
        }
    }

    fn lookup(&self, id: u64, client_id: &str) -> Option<Arc<dyn ToolServerSession>> {
        let session = self.sessions.get(client_id).cloned();
        if session.is_none() {
            self.pending
                .complete(id, Err(McpError::ClientNotFound(client_id.to_string())));
        }
        session
    }
}

// ---------------------------------------------------------------------------
// Registry integration
// ---------------------------------------------------------------------------

/// A remote tool as a registry entry.
pub struct McpToolHandler {
    bridge: McpBridge,
    client_id: String,
    tool_name: String,
}

impl McpToolHandler {
    pub fn new(bridge: McpBridge, client_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            bridge,
            client_id: client_id.into(),
            tool_name: tool_name.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for McpToolHandler {
    async fn call(&self, params: &Map<String, Value>) -> Result<String, ToolError> {
        self.bridge
            .call_tool(&self.client_id, &self.tool_name, params.clone())
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))
    }
}

/// Connect every enabled server and register its tools. Tools left over
/// from an earlier registration of the same server are dropped first, so
/// calling this again refreshes the registry. A server that fails is logged
/// and skipped. Returns the number of tools registered.
pub async fn register_servers(
    bridge: &McpBridge,
    registry: &ToolRegistry,
    servers: &[McpServerConfig],
) -> usize {
    let mut registered = 0;

    for server in servers {
        let stale = registry.unregister_class(&server.name);
        if stale > 0 {
            tracing::debug!(server = %server.name, stale, "dropped previous tools");
        }
        if !server.enabled {
            continue;
        }
        let client_id = match bridge.connect(&server.url, server.token.as_deref()).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(server = %server.name, error = %e, "skipping tool server");
                continue;
            }
        };
        let tools = match bridge.list_tools(&client_id).await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(server = %server.name, error = %e, "could not list tools");
                let _ = bridge.disconnect(&client_id).await;
                continue;
            }
        };

        for tool in &tools {
            let definition = ToolDefinition {
                name: format!("{}-{}", server.name, tool.name),
                description: tool.description.clone().unwrap_or_default(),
                class_name: server.name.clone(),
                parameters: tool.parameters.clone(),
            };
            let handler = McpToolHandler::new(bridge.clone(), client_id.clone(), tool.name.clone());
            registry.register(definition, Arc::new(handler));
        }
        tracing::info!(server = %server.name, tools = tools.len(), "tool server registered");
        registered += tools.len();
    }

    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolExecutor;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Echoes calls back; `slow` never answers.
    struct MockSession {
        calls: Arc<Mutex<Vec<String>>>,
        disconnected: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl ToolServerSession for MockSession {
        async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
            Ok(vec![
                RemoteTool {
                    name: "echo".into(),
                    description: Some("Echo the input".into()),
                    parameters: Vec::new(),
                },
                RemoteTool {
                    name: "slow".into(),
                    description: None,
                    parameters: Vec::new(),
                },
            ])
        }

        async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<String, McpError> {
            self.calls.lock().push(name.to_string());
            match name {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
                "fail" => Err(McpError::Call("boom".into())),
                _ => Ok(Value::Object(args).to_string()),
            }
        }

        async fn disconnect(&self) -> Result<(), McpError> {
            *self.disconnected.lock() = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockConnector {
        calls: Arc<Mutex<Vec<String>>>,
        disconnected: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl ToolServerConnector for MockConnector {
        async fn connect(&self, url: &str, _token: Option<&str>) -> Result<Box<dyn ToolServerSession>, McpError> {
            if url.contains("down") {
                return Err(McpError::Connect {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                });
            }
            Ok(Box::new(MockSession {
                calls: self.calls.clone(),
                disconnected: self.disconnected.clone(),
            }))
        }
    }

    fn bridge_with(timeout: Duration) -> (McpBridge, Arc<MockConnector>) {
        let connector = Arc::new(MockConnector::default());
        (McpBridge::spawn(connector.clone(), timeout), connector)
    }

    #[tokio::test]
    async fn connect_call_disconnect() {
        let (bridge, connector) = bridge_with(Duration::from_secs(5));
        let client = bridge.connect("http://tools.local/mcp", None).await.unwrap();

        let out = bridge
            .call_tool(&client, "echo", json!({"q": 1}).as_object().unwrap().clone())
            .await
            .unwrap();
        assert_eq!(out, r#"{"q":1}"#);

        bridge.disconnect(&client).await.unwrap();
        assert!(*connector.disconnected.lock());
        assert_eq!(
            bridge.call_tool(&client, "echo", Map::new()).await.unwrap_err(),
            McpError::ClientNotFound(client.clone())
        );
        assert!(bridge.in_flight() == 0);
    }

    #[tokio::test]
    async fn unknown_client_is_reported() {
        let (bridge, _) = bridge_with(Duration::from_secs(5));
        let err = bridge.list_tools("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Client not found: nope");
        let err = bridge.disconnect("nope").await.unwrap_err();
        assert_eq!(err, McpError::ClientNotFound("nope".into()));
    }

    #[tokio::test]
    async fn empty_tool_name_is_rejected_before_sending() {
        let (bridge, connector) = bridge_with(Duration::from_secs(5));
        let client = bridge.connect("http://tools.local/mcp", None).await.unwrap();
        let err = bridge.call_tool(&client, "  ", Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool name is required");
        assert!(connector.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn connect_failure_surfaces_reason() {
        let (bridge, _) = bridge_with(Duration::from_secs(5));
        let err = bridge.connect("http://down.local/mcp", None).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_and_is_pruned() {
        let (bridge, _) = bridge_with(Duration::from_secs(30));
        let client = bridge.connect("http://tools.local/mcp", None).await.unwrap();

        let err = bridge.call_tool(&client, "slow", Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Request timed out after 30 seconds");
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test]
    async fn servers_register_prefixed_tools() {
        let (bridge, _) = bridge_with(Duration::from_secs(5));
        let registry = ToolRegistry::with_builtins();
        let servers = vec![
            McpServerConfig {
                name: "search".into(),
                url: "http://tools.local/mcp".into(),
                token: None,
                enabled: true,
            },
            McpServerConfig {
                name: "broken".into(),
                url: "http://down.local/mcp".into(),
                token: None,
                enabled: true,
            },
            McpServerConfig {
                name: "off".into(),
                url: "http://tools.local/mcp".into(),
                token: None,
                enabled: false,
            },
        ];

        let count = register_servers(&bridge, &registry, &servers).await;
        assert_eq!(count, 2);
        assert!(registry.contains("search-echo"));
        assert!(registry.contains("getCurrentTime"));
        assert!(!registry.contains("off-echo"));

        let params = json!({"text": "hi"}).as_object().unwrap().clone();
        let result = registry.execute("search-echo", &params).await;
        assert_eq!(result.result, r#"{"text":"hi"}"#);
        assert!(registry.instructions().contains("search-echo"));
    }

    #[tokio::test]
    async fn reregistering_drops_tools_the_server_no_longer_lists() {
        let (bridge, _) = bridge_with(Duration::from_secs(5));
        let registry = ToolRegistry::with_builtins();
        for (name, class_name) in [("search-retired", "search"), ("off-echo", "off")] {
            registry.register(
                ToolDefinition {
                    name: name.into(),
                    description: String::new(),
                    class_name: class_name.into(),
                    parameters: Vec::new(),
                },
                Arc::new(McpToolHandler::new(bridge.clone(), "old-client".to_string(), "echo")),
            );
        }
        let servers = vec![
            McpServerConfig {
                name: "search".into(),
                url: "http://tools.local/mcp".into(),
                token: None,
                enabled: true,
            },
            McpServerConfig {
                name: "off".into(),
                url: "http://tools.local/mcp".into(),
                token: None,
                enabled: false,
            },
        ];

        assert_eq!(register_servers(&bridge, &registry, &servers).await, 2);
        assert!(!registry.contains("search-retired"));
        assert!(!registry.contains("off-echo"));
        assert!(registry.contains("search-echo"));

        // A second pass replaces rather than accumulates.
        let before = registry.len();
        assert_eq!(register_servers(&bridge, &registry, &servers).await, 2);
        assert_eq!(registry.len(), before);
        assert!(registry.contains("getCurrentTime"));
    }

    #[tokio::test]
    async fn handler_errors_become_tool_errors() {
        let (bridge, _) = bridge_with(Duration::from_secs(5));
        let client = bridge.connect("http://tools.local/mcp", None).await.unwrap();
        let handler = McpToolHandler::new(bridge, client, "fail");
        let err = handler.call(&Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
