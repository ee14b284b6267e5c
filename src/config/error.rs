// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

/// Why a toolbridge.yaml could not be turned into a `Config`.
///
/// Each rejected key gets its own variant so callers (and tests) can tell
/// a bad upstream from a bad MCP server without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read toolbridge config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("toolbridge config is not valid YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("unsupported config version \"{0}\", expected \"v1\"")]
    UnsupportedVersion(String),

    #[error("unknown platform \"{0}\", expected \"chatgpt\" or \"claude\"")]
    UnknownPlatform(String),

    #[error("{field} must be an http(s) URL, got \"{url}\"")]
    InvalidUrl { field: String, url: String },

    /// A numeric limit that would disable probing, capture or MCP calls.
    #[error("{field} must be {requirement}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
    },

    #[error("mcp server name must not be empty")]
    EmptyServerName,

    #[error("duplicate mcp server name \"{0}\"")]
    DuplicateServer(String),

    #[error("api pattern \"{pattern}\" is not a valid regex: {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("undefined variable ${{{name}}} in config (not set in environment)")]
    UndefinedVariable { name: String },
}
