// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::interceptor::InterceptorSettings;
use crate::platform::{ChatGptAdapter, ClaudeAdapter, PlatformAdapter};

use super::defaults::{
    default_api_patterns, DEFAULT_MAX_CHUNKS, DEFAULT_MAX_ENTRIES, DEFAULT_MCP_TIMEOUT,
    DEFAULT_TEXT_PREVIEW_CHARS,
};
use super::pattern::CompiledPattern;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated toolbridge config.
#[derive(Debug)]
pub struct Config {
    pub platform: Platform,
    /// Origin the proxy forwards to, without a trailing slash.
    pub upstream: String,
    /// In-scope URL patterns besides the platform's conversation endpoint.
    pub api_patterns: Vec<CompiledPattern>,
    pub probe: ProbeConfig,
    pub capture: CaptureConfig,
    pub mcp: McpConfig,
    /// SHA256 of the raw YAML: "sha256:{hex}". Empty for built-in defaults.
    pub config_hash: String,
}

impl Default for Config {
    fn default() -> Self {
        let platform = Platform::ChatGpt;
        Self {
            platform,
            upstream: platform.default_upstream().to_string(),
            api_patterns: default_api_patterns(),
            probe: ProbeConfig::default(),
            capture: CaptureConfig::default(),
            mcp: McpConfig::default(),
            config_hash: String::new(),
        }
    }
}

impl Config {
    pub fn interceptor_settings(&self) -> InterceptorSettings {
        InterceptorSettings {
            max_probe_chunks: self.probe.max_chunks,
            text_preview_chars: self.probe.text_preview_chars,
            max_capture_entries: self.capture.max_entries,
            api_patterns: self.api_patterns.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    ChatGpt,
    Claude,
}

impl Platform {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chatgpt" => Some(Platform::ChatGpt),
            "claude" => Some(Platform::Claude),
            _ => None,
        }
    }

    pub fn default_upstream(self) -> &'static str {
        match self {
            Platform::ChatGpt => "https://chatgpt.com",
            Platform::Claude => "https://claude.ai",
        }
    }

    pub fn adapter(self) -> Arc<dyn PlatformAdapter> {
        match self {
            Platform::ChatGpt => Arc::new(ChatGptAdapter::new()),
            Platform::Claude => Arc::new(ClaudeAdapter::new()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::ChatGpt => "chatgpt",
            Platform::Claude => "claude",
        })
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Chunks inspected before committing to relay. At least 1.
    pub max_chunks: usize,
    pub text_preview_chars: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_chunks: DEFAULT_MAX_CHUNKS,
            text_preview_chars: DEFAULT_TEXT_PREVIEW_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub max_entries: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpConfig {
    pub request_timeout: Duration,
    pub servers: Vec<McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_MCP_TIMEOUT,
            servers: Vec::new(),
        }
    }
}

impl McpConfig {
    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct McpServerConfig {
    pub name: String,
    pub url: String,
    pub token: Option<String>,
    pub enabled: bool,
}

// Tokens stay out of logs.
impl fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServerConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("enabled", &self.enabled)
            .finish()
    }
}
