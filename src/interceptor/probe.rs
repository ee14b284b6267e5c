// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// PROBING: read the first few chunks of a streamed response and look for a
// tool-call marker. Every chunk read is kept so nothing is lost to the page.

use std::fmt;

use bytes::Bytes;
use futures_util::StreamExt;

use crate::detector::{ToolCallDetector, ToolCallMatch};
use crate::fetch::{ByteStream, FetchError};
use super::relay::TextDecoder;
use crate::stream::reconstruct;

/// Lifecycle of one streamed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Probing,
    Replaying,
    Relaying,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamState::Probing => "PROBING",
            StreamState::Replaying => "REPLAYING",
            StreamState::Relaying => "RELAYING",
            StreamState::Closed => "CLOSED",
        })
    }
}

/// Everything the probe consumed, handed to the relay or replay branch.
pub(crate) struct ProbeOutcome {
    /// Raw chunks in arrival order.
    pub buffered: Vec<Bytes>,
    /// Decoder state, possibly holding a split multi-byte sequence or a
    /// partial compressed block.
    pub decoder: TextDecoder,
    pub text: String,
    pub tool_call: Option<ToolCallMatch>,
    /// Upstream ended (or failed) during the probe.
    pub exhausted: bool,
    pub error: Option<FetchError>,
}

/// Read up to `max_chunks` chunks, stopping early on the first marker.
/// `decoder` undoes the response's Content-Encoding before matching.
///
/// The marker is searched in the message content folded from the text and
/// in the raw text itself, so a marker split across delta frames is found
/// as well as one in a stream that is not SSE at all.
pub(crate) async fn probe(
    upstream: &mut ByteStream,
    detector: &ToolCallDetector,
    max_chunks: usize,
    decoder: TextDecoder,
) -> ProbeOutcome {
    let mut outcome = ProbeOutcome {
        buffered: Vec::new(),
        decoder,
        text: String::new(),
        tool_call: None,
        exhausted: false,
        error: None,
    };

    for _ in 0..max_chunks.max(1) {
        match upstream.next().await {
            Some(Ok(chunk)) => {
                outcome.text.push_str(&outcome.decoder.decode(&chunk));
                outcome.buffered.push(chunk);

                // Folded content first: its arguments are unescaped.
                let found = reconstruct(&outcome.text)
                    .and_then(|m| detector.detect(&m.content))
                    .or_else(|| detector.detect(&outcome.text));
                if found.is_some() {
                    outcome.tool_call = found;
                    break;
                }
            }
            Some(Err(e)) => {
                outcome.error = Some(e);
                outcome.exhausted = true;
                break;
            }
            None => {
                outcome.exhausted = true;
                break;
            }
        }
    }

    outcome
}
