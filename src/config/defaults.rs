// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use super::pattern::CompiledPattern;

pub const DEFAULT_MAX_CHUNKS: usize = 5;
pub const DEFAULT_TEXT_PREVIEW_CHARS: usize = 1000;
pub const DEFAULT_MAX_ENTRIES: usize = 500;
pub const DEFAULT_MCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Paths of the chat backends' JSON APIs, beyond the conversation endpoint.
const DEFAULT_API_PATTERNS: &[&str] = &[
    "/backend-api/",
    "/api/organizations/",
    "/v1/chat/completions",
    "/v1/messages",
];

/// Compile the built-in API patterns. Panics on invalid regex (these are our own patterns).
pub fn default_api_patterns() -> Vec<CompiledPattern> {
    DEFAULT_API_PATTERNS
        .iter()
        .map(|p| {
            CompiledPattern::compile(p)
                .unwrap_or_else(|e| panic!("default API pattern failed to compile: {e}"))
        })
        .collect()
}
