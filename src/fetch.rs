// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Network entry point
//
// Responsibilities:
// - Transport types for one fetch call (request init + response)
// - FetchClient trait (dependency injection point the interceptor wraps)
// - Reqwest-backed production transport with streaming bodies
// - Response body classification (event stream / JSON / text / other)
// - Content-Encoding decompression for captured copies

use std::fmt;
use std::io::{self, Read, Write};
use std::pin::Pin;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::{Bytes, BytesMut};
use flate2::read::{DeflateDecoder, GzDecoder};
use futures_util::{Stream, StreamExt, TryStreamExt};

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Credentials mode of the page's request init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// One outgoing call made by the hosted page.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: Credentials,
    /// Non-standard init properties attached by the page.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
            credentials: Credentials::default(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Copy of this request carrying only method, headers, body and
    /// credentials. Used for synthesized follow-up calls, whose response is
    /// always read, so it is requested uncompressed.
    pub fn transport_only(&self, body: Bytes) -> Self {
        let mut headers = self.headers.clone();
        headers.remove(header::CONTENT_LENGTH);
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        Self {
            url: self.url.clone(),
            method: self.method.clone(),
            headers,
            body: Some(body),
            credentials: self.credentials,
            extra: serde_json::Map::new(),
        }
    }
}

pub enum ResponseBody {
    Full(Bytes),
    Stream(ByteStream),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    pub fn into_stream(self) -> ByteStream {
        match self {
            ResponseBody::Full(bytes) if bytes.is_empty() => Box::pin(futures_util::stream::empty()),
            ResponseBody::Full(bytes) => Box::pin(futures_util::stream::once(async move { Ok(bytes) })),
            ResponseBody::Stream(stream) => stream,
        }
    }

    /// Read the whole body into memory.
    pub async fn collect(self) -> Result<Bytes, FetchError> {
        match self {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl FetchResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        }
    }

    /// Replace the body, keeping status and headers.
    pub fn with_body(self, body: ResponseBody) -> Self {
        Self { body, ..self }
    }

    pub fn kind(&self) -> BodyKind {
        classify_body(&self.headers)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("network request failed: {0}")]
    Transport(String),
    #[error("network request timed out: {0}")]
    Timeout(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

// ---------------------------------------------------------------------------
// Trait: FetchClient (dependency injection point)
// ---------------------------------------------------------------------------

/// The page's network function. The interceptor both consumes one and is one.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

// ---------------------------------------------------------------------------
// Body classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    EventStream,
    Json,
    Text,
    Other,
}

/// Classify a response by content-type and transfer-encoding.
///
/// Streaming wins over every other kind: an event-stream content type or a
/// chunked transfer encoding both select `EventStream`.
pub fn classify_body(headers: &HeaderMap) -> BodyKind {
    let content_type = header_str(headers, header::CONTENT_TYPE).to_ascii_lowercase();
    let chunked = header_str(headers, header::TRANSFER_ENCODING)
        .to_ascii_lowercase()
        .contains("chunked");

    if content_type.contains("text/event-stream") || chunked {
        BodyKind::EventStream
    } else if content_type.contains("application/json") || content_type.contains("+json") {
        BodyKind::Json
    } else if content_type.starts_with("text/") {
        BodyKind::Text
    } else {
        BodyKind::Other
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Decompression (captured copies only; the page always gets raw bytes)
// ---------------------------------------------------------------------------

fn is_encoded_as(headers: &HeaderMap, encoding: &str) -> bool {
    header_str(headers, header::CONTENT_ENCODING).eq_ignore_ascii_case(encoding)
}

/// Decode a captured body according to its Content-Encoding.
pub fn decode_captured(headers: &HeaderMap, body: &Bytes) -> Result<Bytes, FetchError> {
    let mut decompressed = Vec::new();
    if is_encoded_as(headers, "gzip") {
        GzDecoder::new(&body[..])
            .read_to_end(&mut decompressed)
            .map_err(|e| FetchError::Body(format!("gzip decompression failed: {e}")))?;
    } else if is_encoded_as(headers, "deflate") {
        DeflateDecoder::new(&body[..])
            .read_to_end(&mut decompressed)
            .map_err(|e| FetchError::Body(format!("deflate decompression failed: {e}")))?;
    } else {
        return Ok(body.clone());
    }
    Ok(Bytes::from(decompressed))
}

/// Incremental Content-Encoding decoder for a streamed copy.
///
/// Fed chunk by chunk as they are relayed. Corrupt input stops decoding
/// and keeps whatever was produced before it. Encodings other than gzip and
/// deflate are opaque and decode to nothing.
pub enum ContentDecoder {
    Identity,
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    Deflate(flate2::write::DeflateDecoder<Vec<u8>>),
    Failed,
}

impl ContentDecoder {
    pub fn for_headers(headers: &HeaderMap) -> Self {
        if is_encoded_as(headers, "gzip") {
            Self::Gzip(flate2::write::GzDecoder::new(Vec::new()))
        } else if is_encoded_as(headers, "deflate") {
            Self::Deflate(flate2::write::DeflateDecoder::new(Vec::new()))
        } else if header_str(headers, header::CONTENT_ENCODING).is_empty()
            || is_encoded_as(headers, "identity")
        {
            Self::Identity
        } else {
            Self::Failed
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Decoded bytes available after `chunk`.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<u8> {
        let result = match self {
            Self::Identity => return chunk.to_vec(),
            Self::Failed => return Vec::new(),
            Self::Gzip(d) => d.write_all(chunk).map(|()| std::mem::take(d.get_mut())),
            Self::Deflate(d) => d.write_all(chunk).map(|()| std::mem::take(d.get_mut())),
        };
        self.settle(result)
    }

    /// Flush the decompressor at end of stream.
    pub fn finish(&mut self) -> Vec<u8> {
        let result = match self {
            Self::Identity | Self::Failed => return Vec::new(),
            Self::Gzip(d) => d.try_finish().map(|()| std::mem::take(d.get_mut())),
            Self::Deflate(d) => d.try_finish().map(|()| std::mem::take(d.get_mut())),
        };
        self.settle(result)
    }

    fn settle(&mut self, result: io::Result<Vec<u8>>) -> Vec<u8> {
        match result {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "stream decompression failed, capture stops here");
                *self = Self::Failed;
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reqwest transport
// ---------------------------------------------------------------------------

pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestFetch {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl FetchClient for ReqwestFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(e.to_string())
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let stream = resp
            .bytes_stream()
            .map_err(|e| FetchError::Body(e.to_string()));

        Ok(FetchResponse::new(
            status,
            headers,
            ResponseBody::Stream(Box::pin(stream)),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
