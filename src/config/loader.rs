// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::defaults::{default_api_patterns, DEFAULT_MAX_CHUNKS, DEFAULT_MAX_ENTRIES, DEFAULT_TEXT_PREVIEW_CHARS};
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::pattern::CompiledPattern;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a toolbridge config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version, platform and numeric bounds
/// 5. Resolve `${VAR}` in upstream and MCP server url/token
/// 6. Compile API patterns
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.toolbridge != "v1" {
        return Err(ConfigError::UnsupportedVersion(raw.toolbridge));
    }

    let platform = match raw.platform.as_deref() {
        None => Platform::ChatGpt,
        Some(name) => Platform::parse(name).ok_or_else(|| ConfigError::UnknownPlatform(name.to_string()))?,
    };

    let upstream = match raw.upstream {
        Some(u) => validate_url("upstream", &resolve_variables(&u)?)?,
        None => platform.default_upstream().to_string(),
    };

    let api_patterns = match raw.api_patterns {
        Some(patterns) => patterns
            .iter()
            .map(|p| CompiledPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?,
        None => default_api_patterns(),
    };

    Ok(Config {
        platform,
        upstream,
        api_patterns,
        probe: build_probe_config(raw.probe)?,
        capture: build_capture_config(raw.capture)?,
        mcp: build_mcp_config(raw.mcp)?,
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn validate_url(field: &str, url: &str) -> Result<String, ConfigError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl {
            field: field.to_string(),
            url: url.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn build_probe_config(raw: Option<raw::RawProbeConfig>) -> Result<ProbeConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(ProbeConfig::default());
    };
    let max_chunks = raw.max_chunks.unwrap_or(DEFAULT_MAX_CHUNKS);
    if max_chunks == 0 {
        return Err(ConfigError::OutOfRange {
            field: "probe.max_chunks",
            requirement: "at least 1",
        });
    }
    Ok(ProbeConfig {
        max_chunks,
        text_preview_chars: raw.text_preview_chars.unwrap_or(DEFAULT_TEXT_PREVIEW_CHARS),
    })
}

fn build_capture_config(raw: Option<raw::RawCaptureConfig>) -> Result<CaptureConfig, ConfigError> {
    let max_entries = raw
        .and_then(|c| c.max_entries)
        .unwrap_or(DEFAULT_MAX_ENTRIES);
    if max_entries == 0 {
        return Err(ConfigError::OutOfRange {
            field: "capture.max_entries",
            requirement: "at least 1",
        });
    }
    Ok(CaptureConfig { max_entries })
}

fn build_mcp_config(raw: Option<raw::RawMcpConfig>) -> Result<McpConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(McpConfig::default());
    };

    let request_timeout = match raw.request_timeout_ms {
        Some(0) => {
            return Err(ConfigError::OutOfRange {
                field: "mcp.request_timeout_ms",
                requirement: "greater than 0",
            })
        }
        Some(ms) => Duration::from_millis(ms),
        None => McpConfig::default().request_timeout,
    };

    let mut seen = HashSet::new();
    let mut servers = Vec::with_capacity(raw.servers.len());
    for server in raw.servers {
        let name = server.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyServerName);
        }
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicateServer(name));
        }
        let enabled = server.enabled.unwrap_or(true);
        // Disabled servers may reference variables that are not set.
        let (url, token) = if enabled {
            let url = validate_url(&format!("mcp server \"{name}\" url"), &resolve_variables(&server.url)?)?;
            let token = server.token.as_deref().map(resolve_variables).transpose()?;
            (url, token)
        } else {
            (server.url, server.token)
        };
        servers.push(McpServerConfig {
            name,
            url,
            token,
            enabled,
        });
    }

    Ok(McpConfig {
        request_timeout,
        servers,
    })
}
