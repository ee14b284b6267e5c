// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads toolbridge.yaml, validates structure, resolves variable
// interpolation, compiles URL patterns, and computes a config hash.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod pattern;
mod raw;
mod source;
mod types;

pub use defaults::default_api_patterns;
pub use error::ConfigError;
pub use interpolation::resolve_variables;
pub use loader::{compute_hash, load_config};
pub use pattern::CompiledPattern;
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn with_env<F: FnOnce()>(name: &str, value: Option<&str>, f: F) {
        let _guard = ENV_MUTEX.lock().unwrap();
        let previous = std::env::var(name).ok();
        match value {
            Some(v) => std::env::set_var(name, v),
            None => std::env::remove_var(name),
        }
        f();
        match previous {
            Some(v) => std::env::set_var(name, v),
            None => std::env::remove_var(name),
        }
    }

    const EXAMPLE_YAML: &str = r#"toolbridge: v1

platform: chatgpt
upstream: "https://chatgpt.com/"

api_patterns:
  - "/backend-api/"
  - "/v1/chat/completions"

probe:
  max_chunks: 8
  text_preview_chars: 200

capture:
  max_entries: 50

mcp:
  request_timeout_ms: 5000
  servers:
    - name: search
      url: "https://mcp.example.com/mcp"
      token: "${TOOLBRIDGE_TEST_TOKEN}"
    - name: files
      url: "http://localhost:8931/mcp"
      enabled: false
"#;

    fn make_source(yaml: &str) -> StringSource {
        StringSource {
            content: yaml.to_string(),
        }
    }

    // ---------------------------------------------------------------
    // 1. Valid config parses into typed struct
    // ---------------------------------------------------------------

    #[test]
    fn valid_config_parses_all_key_fields() {
        with_env("TOOLBRIDGE_TEST_TOKEN", Some("s3cret"), || {
            let config = load_config(&make_source(EXAMPLE_YAML)).unwrap();

            assert_eq!(config.platform, Platform::ChatGpt);
            assert_eq!(config.upstream, "https://chatgpt.com");
            assert_eq!(config.api_patterns.len(), 2);
            assert!(config.api_patterns[0].is_match("https://chatgpt.com/backend-api/me"));
            assert_eq!(config.probe.max_chunks, 8);
            assert_eq!(config.probe.text_preview_chars, 200);
            assert_eq!(config.capture.max_entries, 50);
            assert_eq!(config.mcp.request_timeout, Duration::from_millis(5000));

            assert_eq!(config.mcp.servers.len(), 2);
            assert_eq!(config.mcp.servers[0].token.as_deref(), Some("s3cret"));
            assert!(!config.mcp.servers[1].enabled);
            let enabled: Vec<_> = config.mcp.enabled_servers().map(|s| s.name.as_str()).collect();
            assert_eq!(enabled, vec!["search"]);
            assert!(config.config_hash.starts_with("sha256:"));
        });
    }

    // ---------------------------------------------------------------
    // 2. Minimal config takes every default
    // ---------------------------------------------------------------

    #[test]
    fn minimal_config_uses_defaults() {
        let config = load_config(&make_source("toolbridge: v1\nplatform: claude\n")).unwrap();

        assert_eq!(config.platform, Platform::Claude);
        assert_eq!(config.upstream, "https://claude.ai");
        assert_eq!(config.api_patterns, default_api_patterns());
        assert_eq!(config.probe, ProbeConfig::default());
        assert_eq!(config.probe.max_chunks, 5);
        assert_eq!(config.capture.max_entries, 500);
        assert_eq!(config.mcp.request_timeout, Duration::from_secs(30));
        assert!(config.mcp.servers.is_empty());

        let settings = config.interceptor_settings();
        assert_eq!(settings.max_probe_chunks, 5);
        assert_eq!(settings.max_capture_entries, 500);
    }

    // ---------------------------------------------------------------
    // 3. Version and platform validation
    // ---------------------------------------------------------------

    #[test]
    fn wrong_version_rejected() {
        let err = load_config(&make_source("toolbridge: v2\n")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unsupported config version"), "got: {msg}");
    }

    #[test]
    fn missing_version_is_a_yaml_error() {
        let err = load_config(&make_source("platform: chatgpt\n")).unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)), "got: {err}");
    }

    #[test]
    fn unknown_platform_rejected() {
        let err = load_config(&make_source("toolbridge: v1\nplatform: bard\n")).unwrap_err();
        assert!(err.to_string().contains("unknown platform \"bard\""));
    }

    // ---------------------------------------------------------------
    // 4. Numeric bounds
    // ---------------------------------------------------------------

    #[test]
    fn zero_bounds_rejected() {
        for (yaml, needle) in [
            ("toolbridge: v1\nprobe:\n  max_chunks: 0\n", "probe.max_chunks"),
            ("toolbridge: v1\ncapture:\n  max_entries: 0\n", "capture.max_entries"),
            ("toolbridge: v1\nmcp:\n  request_timeout_ms: 0\n", "mcp.request_timeout_ms"),
        ] {
            let err = load_config(&make_source(yaml)).unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange { .. }));
            assert!(err.to_string().contains(needle), "got: {err}");
        }
    }

    // ---------------------------------------------------------------
    // 5. MCP servers
    // ---------------------------------------------------------------

    #[test]
    fn duplicate_server_names_rejected() {
        let yaml = r#"toolbridge: v1
mcp:
  servers:
    - { name: a, url: "http://localhost:1/mcp" }
    - { name: a, url: "http://localhost:2/mcp" }
"#;
        let err = load_config(&make_source(yaml)).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateServer(ref name) if name == "a"));
        assert!(err.to_string().contains("duplicate mcp server name \"a\""));
    }

    #[test]
    fn non_http_server_url_rejected() {
        let yaml = "toolbridge: v1\nmcp:\n  servers:\n    - { name: a, url: \"stdio://x\" }\n";
        let err = load_config(&make_source(yaml)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { ref url, .. } if url == "stdio://x"));
        assert!(err.to_string().contains("must be an http(s) URL"));
    }

    #[test]
    fn undefined_variable_fails_with_clear_error() {
        with_env("TOOLBRIDGE_TEST_TOKEN", None, || {
            let err = load_config(&make_source(EXAMPLE_YAML)).unwrap_err();
            assert!(matches!(err, ConfigError::UndefinedVariable { ref name } if name == "TOOLBRIDGE_TEST_TOKEN"));
            assert!(err.to_string().contains("${TOOLBRIDGE_TEST_TOKEN}"));
        });
    }

    #[test]
    fn disabled_server_skips_interpolation() {
        let yaml = r#"toolbridge: v1
mcp:
  servers:
    - name: later
      url: "${TOOLBRIDGE_TEST_UNSET_URL}"
      enabled: false
"#;
        with_env("TOOLBRIDGE_TEST_UNSET_URL", None, || {
            let config = load_config(&make_source(yaml)).unwrap();
            assert_eq!(config.mcp.servers[0].url, "${TOOLBRIDGE_TEST_UNSET_URL}");
            assert_eq!(config.mcp.enabled_servers().count(), 0);
        });
    }

    #[test]
    fn server_token_redacted_in_debug() {
        let server = McpServerConfig {
            name: "a".into(),
            url: "http://localhost/mcp".into(),
            token: Some("Bearer s3cret".into()),
            enabled: true,
        };
        let debug = format!("{server:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    // ---------------------------------------------------------------
    // 6. Patterns and hash
    // ---------------------------------------------------------------

    #[test]
    fn invalid_regex_in_api_patterns_fails_at_load_time() {
        let err = load_config(&make_source("toolbridge: v1\napi_patterns: [\"/api/(\"]\n")).unwrap_err();
        match err {
            ConfigError::InvalidRegex { pattern, .. } => assert_eq!(pattern, "/api/("),
            other => panic!("expected InvalidRegex, got {other}"),
        }
    }

    #[test]
    fn config_hash_is_deterministic() {
        let a = load_config(&make_source("toolbridge: v1\n")).unwrap();
        let b = load_config(&make_source("toolbridge: v1\n")).unwrap();
        let c = load_config(&make_source("toolbridge: v1\nplatform: claude\n")).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
        assert_ne!(a.config_hash, c.config_hash);
        assert_eq!(a.config_hash, compute_hash("toolbridge: v1\n"));
    }

    #[test]
    fn file_source_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolbridge.yaml");
        std::fs::write(&path, "toolbridge: v1\nplatform: claude\n").unwrap();

        let config = load_config(&FileSource { path }).unwrap();
        assert_eq!(config.platform, Platform::Claude);

        let missing = FileSource {
            path: dir.path().join("absent.yaml"),
        };
        assert!(matches!(load_config(&missing), Err(ConfigError::IoError(_))));
    }
}
