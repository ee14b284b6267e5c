// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Monitor event bus
//
// Responsibilities:
// - Tagged monitor events and the `{type, action, data}` envelope
// - MessageBus trait (publish never blocks, never fails the caller)
// - Broadcast, tracing and fan-out implementations

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::capture::{CapturedRequest, CapturedResponse};
use crate::detector::ToolCallMatch;
use crate::stream::ReconstructedMessage;
use crate::tools::ToolResult;

/// `type` field of every envelope.
pub const ENVELOPE_TYPE: &str = "API_MONITOR";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorEvent {
    Request(CapturedRequest),

    /// The conversation payload of an in-scope request, after rewriting.
    #[serde(rename_all = "camelCase")]
    RequestMessages {
        request_id: String,
        url: String,
        messages: Value,
    },

    Response(CapturedResponse),

    #[serde(rename_all = "camelCase")]
    JsonResponse {
        request_id: String,
        url: String,
        status: u16,
        body: Value,
    },

    #[serde(rename_all = "camelCase")]
    TextResponse {
        request_id: String,
        url: String,
        status: u16,
        preview: String,
        truncated: bool,
    },

    AssistantMessage(AssistantMessage),

    #[serde(rename_all = "camelCase")]
    ToolCallReplaced {
        request_id: String,
        tool_call: ToolCallMatch,
        tool_result: ToolResult,
        original_message: Option<ReconstructedMessage>,
    },

    #[serde(rename_all = "camelCase")]
    ToolResultResponse {
        request_id: String,
        tool_name: String,
        message: Option<ReconstructedMessage>,
    },

    MonitorStarted { version: String },

    Loaded { timestamp: String },
}

/// Final assistant message of a response. Message fields sit next to the
/// request id, so `data.content` is the reconstructed text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub request_id: String,
    #[serde(flatten)]
    pub message: ReconstructedMessage,
}

impl MonitorEvent {
    pub fn action(&self) -> &'static str {
        match self {
            MonitorEvent::Request(_) => "REQUEST",
            MonitorEvent::RequestMessages { .. } => "REQUEST_MESSAGES",
            MonitorEvent::Response(_) => "RESPONSE",
            MonitorEvent::JsonResponse { .. } => "JSON_RESPONSE",
            MonitorEvent::TextResponse { .. } => "TEXT_RESPONSE",
            MonitorEvent::AssistantMessage(_) => "ASSISTANT_MESSAGE",
            MonitorEvent::ToolCallReplaced { .. } => "TOOL_CALL_REPLACED",
            MonitorEvent::ToolResultResponse { .. } => "TOOL_RESULT_RESPONSE",
            MonitorEvent::MonitorStarted { .. } => "MONITOR_STARTED",
            MonitorEvent::Loaded { .. } => "LOADED",
        }
    }

    /// `{ "type": "API_MONITOR", "action": ..., "data": ... }`
    pub fn to_envelope(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.insert("type".to_string(), Value::String(ENVELOPE_TYPE.to_string()));
                Value::Object(map)
            }
            Ok(_) | Err(_) => json!({ "type": ENVELOPE_TYPE, "action": self.action(), "data": null }),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait: MessageBus
// ---------------------------------------------------------------------------

pub trait MessageBus: Send + Sync {
    fn publish(&self, event: MonitorEvent);
}

/// In-process pub/sub. Subscribers that fall behind lose the oldest events.
pub struct BroadcastBus {
    tx: broadcast::Sender<Arc<MonitorEvent>>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<MonitorEvent>> {
        self.tx.subscribe()
    }
}

impl MessageBus for BroadcastBus {
    fn publish(&self, event: MonitorEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(Arc::new(event));
    }
}

/// Writes every envelope to the log.
pub struct TracingBus;

impl MessageBus for TracingBus {
    fn publish(&self, event: MonitorEvent) {
        tracing::info!(
            action = event.action(),
            envelope = %event.to_envelope(),
            "monitor event"
        );
    }
}

pub struct FanoutBus {
    buses: Vec<Arc<dyn MessageBus>>,
}

impl FanoutBus {
    pub fn new(buses: Vec<Arc<dyn MessageBus>>) -> Self {
        Self { buses }
    }
}

impl MessageBus for FanoutBus {
    fn publish(&self, event: MonitorEvent) {
        if let Some((last, rest)) = self.buses.split_last() {
            for bus in rest {
                bus.publish(event.clone());
            }
            last.publish(event);
        }
    }
}
