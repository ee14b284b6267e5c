// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use super::error::ConfigError;

/// Supplies the raw toolbridge.yaml text. Loading, hashing and validation
/// happen afterwards in `load_config`, whatever the origin.
pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;
}

/// The file named by `--config` / `TOOLBRIDGE_CONFIG`.
pub struct FileSource {
    pub path: PathBuf,
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        let text = std::fs::read_to_string(&self.path)?;
        tracing::debug!(path = %self.path.display(), bytes = text.len(), "config file read");
        Ok(text)
    }
}

/// YAML held in memory: integration tests and hosts that embed their own
/// proxy settings.
pub struct StringSource {
    pub content: String,
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }
}
