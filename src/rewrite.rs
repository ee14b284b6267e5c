// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Outgoing body rewriting
//
// Pure transforms over a parsed conversation body. Every operation takes the
// body by reference and returns a new one; the platform adapter decides
// where the user text lives.

use std::sync::Arc;

use serde_json::Value;

use crate::platform::{PlatformAdapter, EXPLICIT_TOKEN};
use crate::tools::{ToolResult, INSTRUCTIONS_END, INSTRUCTIONS_START};

pub struct RequestBodyRewriter {
    adapter: Arc<dyn PlatformAdapter>,
}

impl RequestBodyRewriter {
    pub fn new(adapter: Arc<dyn PlatformAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn PlatformAdapter> {
        &self.adapter
    }

    /// Append `block` to the first user text.
    ///
    /// Unchanged when there is no user text or when it already carries the
    /// start separator.
    pub fn inject_instructions(&self, body: &Value, block: &str) -> Value {
        let mut out = body.clone();
        match self.adapter.first_user_text(body) {
            Some(text) if !text.contains(INSTRUCTIONS_START) => {
                self.adapter
                    .append_system_prompt(&mut out, block, Some(EXPLICIT_TOKEN));
            }
            _ => {}
        }
        out
    }

    /// Remove every previously injected block and every occurrence of
    /// `token` from the first user text, then trim.
    pub fn strip_token(&self, body: &Value, token: &str) -> Value {
        let mut out = body.clone();
        if let Some(text) = self.adapter.first_user_text_mut(&mut out) {
            let mut cleaned = strip_blocks(text);
            if !token.is_empty() {
                cleaned = cleaned.replace(token, "");
            }
            *text = cleaned.trim().to_string();
        }
        out
    }

    /// Rewrite applied to every in-scope request: the explicit token forces
    /// a fresh block, otherwise inject once.
    pub fn prepare(&self, body: &Value, block: &str) -> Value {
        if self.adapter.has_explicit_token(body) {
            let stripped = self.strip_token(body, EXPLICIT_TOKEN);
            self.inject_instructions(&stripped, block)
        } else {
            self.inject_instructions(body, block)
        }
    }

    /// The user's question with injected material removed.
    pub fn original_query(&self, body: &Value) -> Option<String> {
        let text = self.adapter.first_user_text(body)?;
        Some(strip_blocks(text).replace(EXPLICIT_TOKEN, "").trim().to_string())
    }

    /// Deep copy of `body` whose first user text carries the tool result and
    /// the original question, with a fresh message identity. `None` when the
    /// body has no user text to replace.
    pub fn build_follow_up(&self, body: &Value, tool: &ToolResult) -> Option<Value> {
        let query = self.original_query(body)?;
        let mut out = body.clone();
        let text = self.adapter.first_user_text_mut(&mut out)?;
        *text = follow_up_text(tool, &query);
        self.adapter.refresh_message_identity(&mut out);
        Some(out)
    }
}

/// Prefix of every follow-up user message.
pub const TOOL_RESULT_TAG: &str = "Tool result for ";

pub fn follow_up_text(tool: &ToolResult, query: &str) -> String {
    format!(
        "{TOOL_RESULT_TAG}{}:\n```\n{}\n```\n\nOriginal question: {query}\n\nContinue answering the original question using this result.",
        tool.tool_name, tool.result
    )
}

/// Remove every `START ... END` block. An unterminated block is removed up to
/// the end of the text.
fn strip_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(INSTRUCTIONS_START) {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        rest = match after.find(INSTRUCTIONS_END) {
            Some(end) => &after[end + INSTRUCTIONS_END.len()..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}
