// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// HTTP host for the interceptor
//
// Responsibilities:
// - Turn inbound requests into FetchRequests against the upstream origin
// - Forward through the injected FetchClient (normally the interceptor)
// - Stream the response back without buffering
// - Heartbeat, ping (LOADED), capture snapshot and monitor event endpoints

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, Response, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::bus::BroadcastBus;
use crate::capture::{CaptureSnapshot, InterceptorContext};
use crate::fetch::{Credentials, FetchClient, FetchError, FetchRequest};

/// Prefix of the proxy's own routes; everything else goes upstream.
pub const ROUTE_PREFIX: &str = "/__toolbridge";

/// Largest request body accepted from the page.
const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

/// Headers that describe one hop and must not be forwarded.
const HOP_HEADERS: &[header::HeaderName] = &[
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("failed to read request body: {0}")]
    BodyRead(String),
}

impl From<FetchError> for ProxyError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout(msg) => ProxyError::UpstreamTimeout(msg),
            FetchError::Transport(msg) | FetchError::Body(msg) => ProxyError::UpstreamFailure(msg),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let (status, public_message) = match &self {
            ProxyError::UpstreamFailure(_) => (StatusCode::BAD_GATEWAY, "upstream request failed"),
            ProxyError::UpstreamTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "upstream request timed out"),
            ProxyError::BodyRead(_) => (StatusCode::BAD_REQUEST, "failed to read request body"),
        };
        (status, public_message).into_response()
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub fetch: Arc<dyn FetchClient>,
    pub context: Arc<InterceptorContext>,
    /// Origin requests are forwarded to, without a trailing slash.
    pub upstream: Arc<str>,
    /// Monitor events, re-published to `/__toolbridge/events` subscribers.
    pub events: Arc<BroadcastBus>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

/// The page announces it is ready; answer with and publish `LOADED`.
pub async fn ping(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.context.announce_loaded();
    Json(serde_json::json!({ "status": "LOADED" }))
}

pub async fn captures(State(state): State<AppState>) -> Json<CaptureSnapshot> {
    Json(state.context.snapshot())
}

/// Monitor envelopes as server-sent events, one event per envelope, named
/// after its action. A subscriber that falls behind skips what it missed.
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();
    let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .event(event.action())
                        .data(event.to_envelope().to_string());
                    return Some((Ok::<_, Infallible>(sse), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Everything outside the proxy's own routes.
pub async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "proxy request failed");
            e.into_response()
        }
    }
}

async fn forward(state: &AppState, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream, path_and_query);

    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ProxyError::BodyRead(e.to_string()))?;

    let mut headers = parts.headers;
    strip_hop_headers(&mut headers);
    let credentials = if headers.contains_key(header::COOKIE) {
        Credentials::Include
    } else {
        Credentials::SameOrigin
    };

    let mut fetch_request = FetchRequest::new(parts.method, url);
    fetch_request.headers = headers;
    fetch_request.credentials = credentials;
    if !body.is_empty() {
        fetch_request.body = Some(body);
    }

    let response = state.fetch.fetch(fetch_request).await?;

    let mut headers = response.headers;
    strip_hop_headers(&mut headers);
    let mut builder = Response::builder().status(response.status);
    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }
    builder
        .body(Body::from_stream(response.body.into_stream()))
        .map_err(|e| ProxyError::UpstreamFailure(e.to_string()))
}

/// Remove hop-by-hop headers. Bodies may be replaced, so lengths are recomputed.
pub fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{ROUTE_PREFIX}/heartbeat"), get(heartbeat))
        .route(&format!("{ROUTE_PREFIX}/ping"), get(ping))
        .route(&format!("{ROUTE_PREFIX}/captures"), get(captures))
        .route(&format!("{ROUTE_PREFIX}/events"), get(events))
        .fallback(proxy_handler)
        .with_state(state)
}

/// The address the proxy binds to. Always localhost, never 0.0.0.0.
pub const BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 9800);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BroadcastBus, MessageBus};
    use crate::fetch::{FetchResponse, ResponseBody};
    use axum::http::{HeaderValue, Method};
    use bytes::Bytes;
    use tower::ServiceExt; // for oneshot

    /// Captures the request it was called with and answers with a fixed body.
    struct CapturingFetch {
        seen: tokio::sync::Mutex<Option<FetchRequest>>,
        result: Result<&'static str, FetchError>,
    }

    impl CapturingFetch {
        fn ok(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                seen: tokio::sync::Mutex::new(None),
                result: Ok(body),
            })
        }

        fn failing(error: FetchError) -> Arc<Self> {
            Arc::new(Self {
                seen: tokio::sync::Mutex::new(None),
                result: Err(error),
            })
        }
    }

    #[async_trait::async_trait]
    impl FetchClient for CapturingFetch {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
            *self.seen.lock().await = Some(request);
            let body = self.result.clone()?;
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));
            Ok(FetchResponse::new(
                StatusCode::OK,
                headers,
                ResponseBody::Stream(Box::pin(futures_util::stream::iter(vec![
                    Ok(Bytes::from_static(&body.as_bytes()[..2])),
                    Ok(Bytes::from_static(&body.as_bytes()[2..])),
                ]))),
            ))
        }
    }

    fn state_with(fetch: Arc<dyn FetchClient>, bus: Arc<dyn MessageBus>) -> AppState {
        AppState {
            fetch,
            context: Arc::new(InterceptorContext::new(bus, 10)),
            upstream: Arc::from("https://chatgpt.com"),
            events: Arc::new(BroadcastBus::new(8)),
        }
    }

    async fn body_bytes(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    // -----------------------------------------------------------------------
    // Test 1: heartbeat
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn heartbeat_returns_200() {
        let app = build_router(state_with(CapturingFetch::ok("unused"), Arc::new(BroadcastBus::new(8))));
        let req = Request::builder()
            .uri("/__toolbridge/heartbeat")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    // -----------------------------------------------------------------------
    // Test 2: ping publishes LOADED
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn ping_publishes_loaded() {
        let bus = Arc::new(BroadcastBus::new(8));
        let mut events = bus.subscribe();
        let app = build_router(state_with(CapturingFetch::ok("unused"), bus));

        let req = Request::builder()
            .uri("/__toolbridge/ping")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&body_bytes(resp).await[..], br#"{"status":"LOADED"}"#);
        assert_eq!(events.recv().await.unwrap().action(), "LOADED");
    }

    // -----------------------------------------------------------------------
    // Test 2b: monitor events stream to subscribers
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn events_endpoint_streams_published_envelopes() {
        use futures_util::StreamExt;

        let bus = Arc::new(BroadcastBus::new(8));
        let mut state = state_with(CapturingFetch::ok("unused"), bus.clone());
        state.events = bus;
        let context = state.context.clone();
        let app = build_router(state);

        let req = Request::builder()
            .uri("/__toolbridge/events")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        context.announce_loaded();
        let mut body = resp.into_body().into_data_stream();
        let frame = body.next().await.unwrap().unwrap();
        let frame = String::from_utf8(frame.to_vec()).unwrap();
        assert!(frame.contains("event: LOADED\n"), "frame: {frame}");
        assert!(frame.contains(r#""type":"API_MONITOR""#), "frame: {frame}");
        assert!(frame.ends_with("\n\n"), "frame: {frame}");
    }

    // -----------------------------------------------------------------------
    // Test 3: requests are forwarded to the upstream origin
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn request_forwarded_with_path_query_and_body() {
        let fetch = CapturingFetch::ok("data: hi\n\n");
        let app = build_router(state_with(fetch.clone(), Arc::new(BroadcastBus::new(8))));

        let req = Request::builder()
            .method("POST")
            .uri("/backend-api/conversation?x=1")
            .header("content-type", "application/json")
            .header("cookie", "session=abc")
            .header("host", "localhost:9800")
            .body(Body::from(r#"{"a":1}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(&body_bytes(resp).await[..], b"data: hi\n\n");

        let seen = fetch.seen.lock().await.take().unwrap();
        assert_eq!(seen.url, "https://chatgpt.com/backend-api/conversation?x=1");
        assert_eq!(seen.method, Method::POST);
        assert_eq!(seen.body.unwrap(), Bytes::from_static(br#"{"a":1}"#));
        assert_eq!(seen.credentials, Credentials::Include);
        assert!(seen.headers.get(header::HOST).is_none());
    }

    #[tokio::test]
    async fn empty_body_is_forwarded_as_none() {
        let fetch = CapturingFetch::ok("ok");
        let app = build_router(state_with(fetch.clone(), Arc::new(BroadcastBus::new(8))));

        let req = Request::builder().uri("/backend-api/me").body(Body::empty()).unwrap();
        let _ = app.oneshot(req).await.unwrap();

        let seen = fetch.seen.lock().await.take().unwrap();
        assert!(seen.body.is_none());
        assert_eq!(seen.credentials, Credentials::SameOrigin);
    }

    // -----------------------------------------------------------------------
    // Test 4: upstream errors map to gateway statuses
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn transport_error_is_bad_gateway() {
        let fetch = CapturingFetch::failing(FetchError::Transport("refused".into()));
        let app = build_router(state_with(fetch, Arc::new(BroadcastBus::new(8))));
        let req = Request::builder().uri("/anything").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn timeout_is_gateway_timeout() {
        let fetch = CapturingFetch::failing(FetchError::Timeout("slow".into()));
        let app = build_router(state_with(fetch, Arc::new(BroadcastBus::new(8))));
        let req = Request::builder().uri("/anything").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    // -----------------------------------------------------------------------
    // Test 5: capture snapshot
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn captures_returns_snapshot_json() {
        let app = build_router(state_with(CapturingFetch::ok("unused"), Arc::new(BroadcastBus::new(8))));
        let req = Request::builder()
            .uri("/__toolbridge/captures")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let snapshot: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(snapshot["requests"], serde_json::json!([]));
        assert_eq!(snapshot["lastAssistantMessage"], serde_json::Value::Null);
    }
}
