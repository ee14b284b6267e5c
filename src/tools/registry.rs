// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{render_instructions, CurrentTime, ToolDefinition, ToolExecutor, ToolHandler, ToolResult};

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Name -> tool table. Registration may happen at any time (servers connect
/// after startup); lookups clone the handler out before awaiting it.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry holding the built-in tools.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(CurrentTime::definition(), Arc::new(CurrentTime));
        registry
    }

    /// Register a tool, replacing any tool of the same name.
    pub fn register(&self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        tracing::info!(
            tool_name = %definition.name,
            class_name = %definition.class_name,
            "tool registered"
        );
        self.tools.write().insert(
            definition.name.clone(),
            RegisteredTool { definition, handler },
        );
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    /// Drop every tool of one class (e.g. after a server disconnects).
    pub fn unregister_class(&self, class_name: &str) -> usize {
        let mut tools = self.tools.write();
        let before = tools.len();
        tools.retain(|_, t| t.definition.class_name != class_name);
        before - tools.len()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .values()
            .map(|t| t.definition.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, tool_name: &str, params: &Map<String, Value>) -> ToolResult {
        let handler = self.tools.read().get(tool_name).map(|t| t.handler.clone());

        let result = match handler {
            None => {
                tracing::warn!(tool_name, "unknown tool requested");
                format!("Error: Unknown tool {tool_name}")
            }
            Some(handler) => match handler.call(params).await {
                Ok(output) => {
                    tracing::info!(tool_name, result_len = output.len(), "tool executed");
                    output
                }
                Err(e) => {
                    tracing::warn!(tool_name, error = %e, "tool execution failed");
                    format!("Error executing tool {tool_name}: {e}")
                }
            },
        };

        ToolResult {
            tool_name: tool_name.to_string(),
            result,
        }
    }

    fn instructions(&self) -> String {
        render_instructions(&self.definitions())
    }
}
