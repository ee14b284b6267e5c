// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::{ToolDefinition, ToolError, ToolHandler};

/// `getCurrentTime`: the current instant as an ISO-8601 UTC string with
/// millisecond precision, e.g. `2026-10-17T09:30:00.123Z`.
pub struct CurrentTime;

impl CurrentTime {
    pub const NAME: &'static str = "getCurrentTime";

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Get the current date and time as an ISO-8601 UTC timestamp.".to_string(),
            class_name: "default".to_string(),
            parameters: Vec::new(),
        }
    }
}

#[async_trait]
impl ToolHandler for CurrentTime {
    async fn call(&self, _params: &Map<String, Value>) -> Result<String, ToolError> {
        Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}
