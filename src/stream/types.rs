// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// SSE frames and the assistant message folded out of them.

use serde::Serialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// SSE frame representation
// ---------------------------------------------------------------------------

/// One server-sent event, delimited by a blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Name from a preceding `event:` line, if any.
    pub event: Option<String>,
    /// The `data:` payload. Multiple data lines are joined with `\n`.
    pub data: String,
}

impl StreamEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

// ---------------------------------------------------------------------------
// Reconstructed message
// ---------------------------------------------------------------------------

/// Assistant message rebuilt from delta/patch frames.
///
/// `content` only grows. Scalar fields are seeded by the initial `add`
/// frame and may be overwritten by later patches.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructedMessage {
    pub message_id: Option<String>,
    pub content: String,
    pub author: Option<Value>,
    pub create_time: Option<Value>,
    pub status: Option<String>,
    pub end_turn: Option<bool>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Conversation title from a `title_generation` event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// JSON pointers the fold understands.
pub(crate) mod pointer {
    pub const ROOT: &str = "";
    pub const CONTENT_PART: &str = "/message/content/parts/0";
    pub const STATUS: &str = "/message/status";
    pub const END_TURN: &str = "/message/end_turn";
    pub const METADATA: &str = "/message/metadata";
}
