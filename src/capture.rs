// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Capture log and interceptor context
//
// Responsibilities:
// - CapturedRequest / CapturedResponse records
// - Bounded, append-only capture log (oldest entries evicted)
// - InterceptorContext: owns the log and the bus, read-only snapshot API
// - ResponseFinalizer: publishes a CapturedResponse exactly once

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::bus::{AssistantMessage, MessageBus, MonitorEvent};
use crate::stream::ReconstructedMessage;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub method: String,
    /// Parsed JSON body, `None` when absent or not JSON.
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedResponse {
    pub request_id: String,
    pub request_url: String,
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub status_text: String,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streamed_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ReconstructedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_executed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_with_tool_response: Option<bool>,
}

impl CapturedResponse {
    pub fn new(request: &CapturedRequest, status: u16, status_text: &str, streaming: bool) -> Self {
        Self {
            request_id: request.request_id.clone(),
            request_url: request.url.clone(),
            timestamp: Utc::now(),
            status,
            status_text: status_text.to_string(),
            streaming,
            streamed_text: None,
            message: None,
            tool_executed: None,
            tool_result: None,
            replaced_with_tool_response: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Capture log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub requests: Vec<CapturedRequest>,
    pub responses: Vec<CapturedResponse>,
    pub last_assistant_message: Option<ReconstructedMessage>,
}

struct CaptureLog {
    max_entries: usize,
    requests: VecDeque<CapturedRequest>,
    responses: VecDeque<CapturedResponse>,
    last_assistant_message: Option<ReconstructedMessage>,
}

impl CaptureLog {
    fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            requests: VecDeque::new(),
            responses: VecDeque::new(),
            last_assistant_message: None,
        }
    }

    fn push_bounded<T>(queue: &mut VecDeque<T>, max: usize, item: T) {
        while queue.len() >= max {
            queue.pop_front();
        }
        queue.push_back(item);
    }
}

// ---------------------------------------------------------------------------
// InterceptorContext
// ---------------------------------------------------------------------------

/// State shared by one installed interceptor. All mutation goes through
/// this type; readers get clones.
pub struct InterceptorContext {
    bus: Arc<dyn MessageBus>,
    log: Mutex<CaptureLog>,
}

impl InterceptorContext {
    pub fn new(bus: Arc<dyn MessageBus>, max_entries: usize) -> Self {
        Self {
            bus,
            log: Mutex::new(CaptureLog::new(max_entries)),
        }
    }

    pub fn publish(&self, event: MonitorEvent) {
        self.bus.publish(event);
    }

    pub fn record_request(&self, request: CapturedRequest) {
        {
            let mut log = self.log.lock();
            let max = log.max_entries;
            CaptureLog::push_bounded(&mut log.requests, max, request.clone());
        }
        self.publish(MonitorEvent::Request(request));
    }

    fn record_response(&self, response: CapturedResponse) {
        {
            let mut log = self.log.lock();
            let max = log.max_entries;
            CaptureLog::push_bounded(&mut log.responses, max, response.clone());
        }
        self.publish(MonitorEvent::Response(response));
    }

    pub fn record_assistant_message(&self, request_id: &str, message: ReconstructedMessage) {
        self.log.lock().last_assistant_message = Some(message.clone());
        self.publish(MonitorEvent::AssistantMessage(AssistantMessage {
            request_id: request_id.to_string(),
            message,
        }));
    }

    /// Publish `LOADED` with the current time.
    pub fn announce_loaded(&self) {
        self.publish(MonitorEvent::Loaded {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        let log = self.log.lock();
        CaptureSnapshot {
            requests: log.requests.iter().cloned().collect(),
            responses: log.responses.iter().cloned().collect(),
            last_assistant_message: log.last_assistant_message.clone(),
        }
    }

    pub fn last_request(&self) -> Option<CapturedRequest> {
        self.log.lock().requests.back().cloned()
    }

    pub fn last_response(&self) -> Option<CapturedResponse> {
        self.log.lock().responses.back().cloned()
    }

    pub fn last_assistant_message(&self) -> Option<ReconstructedMessage> {
        self.log.lock().last_assistant_message.clone()
    }
}

// ---------------------------------------------------------------------------
// ResponseFinalizer
// ---------------------------------------------------------------------------

/// Owns a CapturedResponse while its body is in flight.
///
/// `finish` records and publishes it. Dropping an unfinished finalizer (a
/// relay task torn down mid-stream) records what was captured so far, so a
/// response is published exactly once either way.
pub struct ResponseFinalizer {
    context: Arc<InterceptorContext>,
    response: Option<CapturedResponse>,
}

impl ResponseFinalizer {
    pub fn new(context: Arc<InterceptorContext>, response: CapturedResponse) -> Self {
        Self {
            context,
            response: Some(response),
        }
    }

    pub fn context(&self) -> &Arc<InterceptorContext> {
        &self.context
    }

    /// Mutate the pending record. Fields are only ever added.
    pub fn update(&mut self, f: impl FnOnce(&mut CapturedResponse)) {
        if let Some(response) = self.response.as_mut() {
            f(response);
        }
    }

    pub fn request_id(&self) -> &str {
        self.response
            .as_ref()
            .map(|r| r.request_id.as_str())
            .unwrap_or_default()
    }

    pub fn finish(mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        if let Some(response) = self.response.take() {
            self.context.record_response(response);
        }
    }
}

impl Drop for ResponseFinalizer {
    fn drop(&mut self) {
        self.flush();
    }
}
