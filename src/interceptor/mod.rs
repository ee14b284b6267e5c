// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Fetch interceptor
//
// Responsibilities:
// - Wrap a FetchClient; out-of-scope calls pass through untouched
// - Rewrite in-scope conversation bodies with the tool instructions block
// - Capture and publish every in-scope request and response
// - Streaming responses: PROBING -> REPLAYING | RELAYING -> CLOSED
// - JSON and text responses: capture a copy, return the original

mod probe;
mod relay;
mod replay;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;

use crate::bus::{MessageBus, MonitorEvent};
use crate::capture::{CapturedRequest, CapturedResponse, InterceptorContext, ResponseFinalizer};
use crate::config::CompiledPattern;
use crate::detector::ToolCallDetector;
use crate::fetch::{
    decode_captured, BodyKind, ByteStream, FetchClient, FetchError, FetchRequest, FetchResponse,
    ResponseBody,
};
use crate::platform::PlatformAdapter;
use crate::rewrite::RequestBodyRewriter;
use crate::stream::reconstruct;
use crate::tools::ToolExecutor;

pub use probe::StreamState;

use probe::{probe, ProbeOutcome};
use relay::{forward, BodyCapture, TextCapture, TextDecoder};

// ---------------------------------------------------------------------------
// Settings and dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InterceptorSettings {
    /// Chunks inspected for a marker before committing to relay.
    pub max_probe_chunks: usize,
    /// Characters kept from plain-text responses.
    pub text_preview_chars: usize,
    /// Per-kind bound of the capture log.
    pub max_capture_entries: usize,
    /// Extra in-scope URL patterns besides the platform's conversation endpoint.
    pub api_patterns: Vec<CompiledPattern>,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            max_probe_chunks: 5,
            text_preview_chars: 1000,
            max_capture_entries: 500,
            api_patterns: Vec::new(),
        }
    }
}

pub struct InterceptorDeps {
    pub adapter: Arc<dyn PlatformAdapter>,
    pub tools: Arc<dyn ToolExecutor>,
    pub bus: Arc<dyn MessageBus>,
    pub settings: InterceptorSettings,
}

// ---------------------------------------------------------------------------
// Per-call state
// ---------------------------------------------------------------------------

/// What was actually sent for one in-scope call.
pub(crate) struct Call {
    pub request: FetchRequest,
    pub body: Option<Value>,
    pub captured: CapturedRequest,
}

/// Status line and headers of a response whose body is being replaced.
pub(crate) struct ResponseHead {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
}

impl ResponseHead {
    fn into_response(self, body: ResponseBody) -> FetchResponse {
        FetchResponse {
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// FetchInterceptor
// ---------------------------------------------------------------------------

pub struct FetchInterceptor {
    next: Arc<dyn FetchClient>,
    context: Arc<InterceptorContext>,
    rewriter: RequestBodyRewriter,
    detector: ToolCallDetector,
    tools: Arc<dyn ToolExecutor>,
    settings: InterceptorSettings,
}

/// Wrap `next`. Returns the wrapper and the context holding its capture log.
pub fn install(
    next: Arc<dyn FetchClient>,
    deps: InterceptorDeps,
) -> (Arc<FetchInterceptor>, Arc<InterceptorContext>) {
    let context = Arc::new(InterceptorContext::new(
        deps.bus,
        deps.settings.max_capture_entries,
    ));
    let interceptor = Arc::new(FetchInterceptor {
        next,
        context: context.clone(),
        rewriter: RequestBodyRewriter::new(deps.adapter),
        detector: ToolCallDetector::new(),
        tools: deps.tools,
        settings: deps.settings,
    });

    context.publish(MonitorEvent::MonitorStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    tracing::info!(
        platform = interceptor.rewriter.adapter().name(),
        max_probe_chunks = interceptor.settings.max_probe_chunks,
        "fetch interceptor installed"
    );

    (interceptor, context)
}

impl FetchInterceptor {
    pub fn context(&self) -> &Arc<InterceptorContext> {
        &self.context
    }

    /// Conversation endpoint of the active platform, or any configured API pattern.
    pub fn is_in_scope(&self, request: &FetchRequest) -> bool {
        self.rewriter
            .adapter()
            .is_conversation_endpoint(&request.url, &request.method)
            || self
                .settings
                .api_patterns
                .iter()
                .any(|p| p.is_match(&request.url))
    }

    /// Parse, rewrite and record an outgoing in-scope request.
    fn prepare_call(&self, mut request: FetchRequest) -> Call {
        let request_id = uuid::Uuid::new_v4().to_string();
        let is_conversation = self
            .rewriter
            .adapter()
            .is_conversation_endpoint(&request.url, &request.method);

        let parsed = request.body.as_ref().and_then(|raw| {
            serde_json::from_slice::<Value>(raw)
                .inspect_err(|e| {
                    tracing::debug!(request_id = %request_id, error = %e, "request body is not JSON, forwarding as-is");
                })
                .ok()
        });

        let mut body = parsed;
        let rewritten = match (&body, is_conversation) {
            (Some(original), true) => {
                let rewritten = self.rewriter.prepare(original, &self.tools.instructions());
                (rewritten != *original).then_some(rewritten)
            }
            _ => None,
        };
        if let Some(rewritten) = rewritten {
            match serde_json::to_vec(&rewritten) {
                Ok(bytes) => {
                    request.body = Some(Bytes::from(bytes));
                    request.headers.remove(header::CONTENT_LENGTH);
                    tracing::debug!(request_id = %request_id, "tool instructions injected");
                    body = Some(rewritten);
                }
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "failed to serialize rewritten body");
                }
            }
        }

        // The response is inspected, so ask for it uncompressed.
        request
            .headers
            .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let captured = CapturedRequest {
            request_id,
            timestamp: Utc::now(),
            url: request.url.clone(),
            method: request.method.to_string(),
            body: body.clone(),
        };

        Call {
            request,
            body,
            captured,
        }
    }

    fn publish_request(&self, call: &Call) {
        self.context.record_request(call.captured.clone());

        let messages = call
            .body
            .as_ref()
            .and_then(|b| b.get("messages").or_else(|| b.get("prompt")))
            .cloned();
        if let Some(messages) = messages {
            self.context.publish(MonitorEvent::RequestMessages {
                request_id: call.captured.request_id.clone(),
                url: call.captured.url.clone(),
                messages,
            });
        }
    }

    async fn handle_response(&self, call: Call, response: FetchResponse) -> FetchResponse {
        let kind = response.kind();
        let finalizer = ResponseFinalizer::new(
            self.context.clone(),
            CapturedResponse::new(
                &call.captured,
                response.status.as_u16(),
                &response.status_text,
                kind == BodyKind::EventStream,
            ),
        );

        tracing::info!(
            request_id = %call.captured.request_id,
            url = %call.captured.url,
            status = response.status.as_u16(),
            kind = ?kind,
            "response headers received"
        );

        match kind {
            BodyKind::EventStream => self.handle_stream(call, response, finalizer).await,
            BodyKind::Json => self.capture_json(&call, response, finalizer),
            BodyKind::Text => self.capture_text(&call, response, finalizer),
            BodyKind::Other => {
                finalizer.finish();
                response
            }
        }
    }

    // -----------------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------------

    async fn handle_stream(
        &self,
        call: Call,
        response: FetchResponse,
        finalizer: ResponseFinalizer,
    ) -> FetchResponse {
        let FetchResponse {
            status,
            status_text,
            headers,
            body,
        } = response;
        let head = ResponseHead {
            status,
            status_text,
            headers,
        };

        tracing::debug!(
            request_id = %call.captured.request_id,
            state = %StreamState::Probing,
            "probing stream"
        );
        let decoder = TextDecoder::for_headers(&head.headers);
        if decoder.is_compressed() {
            tracing::debug!(request_id = %call.captured.request_id, "stream is compressed, decoding a copy for inspection");
        }
        let mut upstream = body.into_stream();
        let mut outcome = probe(
            &mut upstream,
            &self.detector,
            self.settings.max_probe_chunks,
            decoder,
        )
        .await;

        let has_user_text = call
            .body
            .as_ref()
            .is_some_and(|b| self.rewriter.adapter().first_user_text(b).is_some());

        match outcome.tool_call.take() {
            Some(tool_call) if has_user_text => {
                self.replay(&call, head, upstream, outcome, tool_call, finalizer)
                    .await
            }
            found => {
                if let Some(tool_call) = found {
                    tracing::info!(
                        request_id = %call.captured.request_id,
                        tool_name = %tool_call.tool_name,
                        "marker found but request has no user message to replace"
                    );
                }
                relay_original(&call, head, upstream, outcome, finalizer)
            }
        }
    }

    // -----------------------------------------------------------------------
    // JSON and text
    // -----------------------------------------------------------------------

    fn capture_json(&self, call: &Call, response: FetchResponse, finalizer: ResponseFinalizer) -> FetchResponse {
        let request_id = call.captured.request_id.clone();
        let url = call.captured.url.clone();
        let status = response.status.as_u16();
        let headers = response.headers.clone();

        let on_body = move |raw: Bytes, error: Option<FetchError>| {
            let context = finalizer.context().clone();
            if let Some(e) = error {
                tracing::warn!(request_id = %request_id, error = %e, "JSON body read failed");
                finalizer.finish();
                return;
            }
            let parsed = decode_captured(&headers, &raw).and_then(|bytes| {
                serde_json::from_slice::<Value>(&bytes).map_err(|e| FetchError::Body(e.to_string()))
            });
            match parsed {
                Ok(body) => context.publish(MonitorEvent::JsonResponse {
                    request_id,
                    url,
                    status,
                    body,
                }),
                Err(e) => {
                    tracing::debug!(request_id = %request_id, error = %e, "response claimed JSON but did not parse");
                }
            }
            finalizer.finish();
        };

        tee(response, BodyCapture::new(on_body))
    }

    fn capture_text(&self, call: &Call, response: FetchResponse, finalizer: ResponseFinalizer) -> FetchResponse {
        let request_id = call.captured.request_id.clone();
        let url = call.captured.url.clone();
        let status = response.status.as_u16();
        let headers = response.headers.clone();
        let limit = self.settings.text_preview_chars;

        let on_body = move |raw: Bytes, error: Option<FetchError>| {
            let context = finalizer.context().clone();
            if let Some(e) = error {
                tracing::warn!(request_id = %request_id, error = %e, "text body read failed");
            }
            match decode_captured(&headers, &raw) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let preview: String = text.chars().take(limit).collect();
                    let truncated = preview.len() < text.len();
                    context.publish(MonitorEvent::TextResponse {
                        request_id,
                        url,
                        status,
                        preview,
                        truncated,
                    });
                }
                Err(e) => {
                    tracing::debug!(request_id = %request_id, error = %e, "failed to decode text body");
                }
            }
            finalizer.finish();
        };

        tee(response, BodyCapture::new(on_body))
    }
}

/// Hand the page the original body while a copy goes to `sink`.
fn tee<F>(response: FetchResponse, sink: BodyCapture<F>) -> FetchResponse
where
    F: FnOnce(Bytes, Option<FetchError>) + Send + 'static,
{
    use relay::CaptureSink;

    let FetchResponse {
        status,
        status_text,
        headers,
        body,
    } = response;
    let body = match body {
        ResponseBody::Full(bytes) => {
            let mut sink = sink;
            sink.chunk(&bytes);
            sink.finish(None);
            ResponseBody::Full(bytes)
        }
        ResponseBody::Stream(stream) => ResponseBody::Stream(forward(Vec::new(), Some(stream), sink, true)),
    };
    FetchResponse {
        status,
        status_text,
        headers,
        body,
    }
}

/// RELAYING: probed chunks first, then the rest of the original, captured.
fn relay_original(
    call: &Call,
    head: ResponseHead,
    upstream: ByteStream,
    outcome: ProbeOutcome,
    mut finalizer: ResponseFinalizer,
) -> FetchResponse {
    let request_id = call.captured.request_id.clone();
    tracing::debug!(
        request_id = %request_id,
        state = %StreamState::Relaying,
        probed_chunks = outcome.buffered.len(),
        "no tool call, relaying original stream"
    );
    if let Some(e) = &outcome.error {
        tracing::warn!(request_id = %request_id, error = %e, "upstream failed during probe");
    }

    let ProbeOutcome {
        buffered,
        decoder,
        text,
        exhausted,
        ..
    } = outcome;

    let sink = TextCapture::resume(decoder, text, move |text: String, _error: Option<FetchError>| {
        let context = finalizer.context().clone();
        let message = reconstruct(&text);
        let captured = message.clone();
        finalizer.update(move |r| {
            r.streamed_text = Some(text);
            r.message = captured;
        });
        if let Some(message) = message {
            context.record_assistant_message(&request_id, message);
        }
        tracing::debug!(request_id = %request_id, state = %StreamState::Closed, "relay finished");
        finalizer.finish();
    });

    let rest = (!exhausted).then_some(upstream);
    head.into_response(ResponseBody::Stream(forward(buffered, rest, sink, false)))
}

// ---------------------------------------------------------------------------
// FetchClient impl
// ---------------------------------------------------------------------------

#[async_trait]
impl FetchClient for FetchInterceptor {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        if !self.is_in_scope(&request) {
            return self.next.fetch(request).await;
        }

        let call = self.prepare_call(request);
        self.publish_request(&call);

        // Primary transport failures belong to the page.
        let response = self.next.fetch(call.request.clone()).await.inspect_err(|e| {
            tracing::warn!(request_id = %call.captured.request_id, error = %e, "request failed");
        })?;

        Ok(self.handle_response(call, response).await)
    }
}
