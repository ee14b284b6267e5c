// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use regex::Regex;

use super::error::ConfigError;

/// One `api_patterns` entry: a URL regex marking extra in-scope endpoints
/// whose responses are captured. Compiled once at load time; equality and
/// `Debug` use the source text so configs compare and log readably.
#[derive(Clone)]
pub struct CompiledPattern {
    pub pattern: String,
    pub regex: Regex,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Whether a request URL falls under this pattern.
    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

impl fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiPattern({:?})", self.pattern)
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}
