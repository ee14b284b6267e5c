// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
// Interpolation, validation and regex compilation happen between these and
// the public Config.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub toolbridge: String,
    pub platform: Option<String>,
    pub upstream: Option<String>,
    pub api_patterns: Option<Vec<String>>,
    pub probe: Option<RawProbeConfig>,
    pub capture: Option<RawCaptureConfig>,
    pub mcp: Option<RawMcpConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawProbeConfig {
    pub max_chunks: Option<usize>,
    pub text_preview_chars: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RawCaptureConfig {
    pub max_entries: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RawMcpConfig {
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub servers: Vec<RawMcpServer>,
}

#[derive(Debug, Deserialize)]
pub struct RawMcpServer {
    pub name: String,
    pub url: String,
    pub token: Option<String>,
    pub enabled: Option<bool>,
}
