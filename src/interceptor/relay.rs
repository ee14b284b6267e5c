// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Pass-through streams with capture
//
// A spawned task forwards bytes to the page over a bounded channel while
// handing each chunk to a capture sink. If the page stops reading, the task
// keeps draining so the capture still completes.

use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::fetch::{ByteStream, ContentDecoder, FetchError};
use crate::stream::Utf8StreamDecoder;

const CHANNEL_CAPACITY: usize = 64;

/// Content-Encoding first, then UTF-8, one chunk at a time. The page still
/// gets the bytes exactly as they arrived.
pub(crate) struct TextDecoder {
    content: ContentDecoder,
    utf8: Utf8StreamDecoder,
}

impl TextDecoder {
    pub fn for_headers(headers: &HeaderMap) -> Self {
        Self {
            content: ContentDecoder::for_headers(headers),
            utf8: Utf8StreamDecoder::new(),
        }
    }

    pub fn identity() -> Self {
        Self {
            content: ContentDecoder::Identity,
            utf8: Utf8StreamDecoder::new(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        !self.content.is_identity()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let plain = self.content.decode(chunk);
        self.utf8.decode(&plain)
    }

    pub fn finish(&mut self) -> String {
        let tail = self.content.finish();
        let mut text = self.utf8.decode(&tail);
        text.push_str(&self.utf8.finish());
        text
    }
}

/// Receives a copy of every forwarded chunk.
pub(crate) trait CaptureSink: Send + 'static {
    fn chunk(&mut self, bytes: &Bytes);
    fn finish(self, error: Option<FetchError>);
}

/// Decodes chunks as UTF-8 text and hands the full text over at the end.
pub(crate) struct TextCapture<F> {
    decoder: TextDecoder,
    text: String,
    on_end: F,
}

impl<F> TextCapture<F>
where
    F: FnOnce(String, Option<FetchError>) + Send + 'static,
{
    pub fn new(decoder: TextDecoder, on_end: F) -> Self {
        Self::resume(decoder, String::new(), on_end)
    }

    /// Continue from text already decoded elsewhere (the probe).
    pub fn resume(decoder: TextDecoder, text: String, on_end: F) -> Self {
        Self {
            decoder,
            text,
            on_end,
        }
    }
}

impl<F> CaptureSink for TextCapture<F>
where
    F: FnOnce(String, Option<FetchError>) + Send + 'static,
{
    fn chunk(&mut self, bytes: &Bytes) {
        let decoded = self.decoder.decode(bytes);
        self.text.push_str(&decoded);
    }

    fn finish(mut self, error: Option<FetchError>) {
        let tail = self.decoder.finish();
        self.text.push_str(&tail);
        (self.on_end)(self.text, error);
    }
}

/// Collects raw bytes (the body may be compressed).
pub(crate) struct BodyCapture<F> {
    buf: BytesMut,
    on_end: F,
}

impl<F> BodyCapture<F>
where
    F: FnOnce(Bytes, Option<FetchError>) + Send + 'static,
{
    pub fn new(on_end: F) -> Self {
        Self {
            buf: BytesMut::new(),
            on_end,
        }
    }
}

impl<F> CaptureSink for BodyCapture<F>
where
    F: FnOnce(Bytes, Option<FetchError>) + Send + 'static,
{
    fn chunk(&mut self, bytes: &Bytes) {
        self.buf.extend_from_slice(bytes);
    }

    fn finish(self, error: Option<FetchError>) {
        (self.on_end)(self.buf.freeze(), error);
    }
}

/// Emit `prefix` then everything from `rest`, in order, feeding `rest`
/// through `sink`. `prefix` is assumed to be captured already.
///
/// With `pass_errors` a read error reaches the page; otherwise the page
/// just sees the stream end.
pub(crate) fn forward<S: CaptureSink>(
    prefix: Vec<Bytes>,
    rest: Option<ByteStream>,
    mut sink: S,
    pass_errors: bool,
) -> ByteStream {
    let (tx, rx) = mpsc::channel::<Result<Bytes, FetchError>>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut page_open = true;
        for chunk in prefix {
            page_open = page_open && tx.send(Ok(chunk)).await.is_ok();
        }

        let mut failure = None;
        if let Some(mut rest) = rest {
            while let Some(item) = rest.next().await {
                match item {
                    Ok(chunk) => {
                        sink.chunk(&chunk);
                        if page_open && tx.send(Ok(chunk)).await.is_err() {
                            tracing::debug!("page stopped reading, draining for capture");
                            page_open = false;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "upstream read failed mid-stream");
                        if page_open && pass_errors {
                            let _ = tx.send(Err(e.clone())).await;
                        }
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        // Capture completes before the page observes end of stream.
        sink.finish(failure);
        drop(tx);
    });

    Box::pin(ReceiverStream::new(rx))
}
