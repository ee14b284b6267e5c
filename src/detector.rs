// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Tool-call marker detection
//
// Recognizes ```tool:<name>(<args>)``` fenced markers in free text.
// Matching is purely syntactic; whether the tool exists is the executor's
// problem. Only the first marker counts.

use regex::Regex;
use serde::Serialize;

/// Marker pattern. Arguments may span lines and contain parentheses as long
/// as the closing fence follows.
const MARKER_PATTERN: &str = r"(?s)```[ \t]*(?:\r?\n)?[ \t]*tool:([A-Za-z0-9_.\-]+)\((.*?)\)\s*```";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMatch {
    pub tool_name: String,
    pub raw_params: String,
}

#[derive(Debug, Clone)]
pub struct ToolCallDetector {
    marker: Regex,
}

impl ToolCallDetector {
    pub fn new() -> Self {
        // Our own pattern; a failure here is a programming error.
        let marker = Regex::new(MARKER_PATTERN).expect("tool marker pattern is invalid");
        Self { marker }
    }

    /// First marker in `text`, if any.
    pub fn detect(&self, text: &str) -> Option<ToolCallMatch> {
        let caps = self.marker.captures(text)?;
        Some(ToolCallMatch {
            tool_name: caps[1].to_string(),
            raw_params: caps[2].trim().to_string(),
        })
    }
}

impl Default for ToolCallDetector {
    fn default() -> Self {
        Self::new()
    }
}
