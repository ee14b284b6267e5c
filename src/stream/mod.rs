// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// SSE parsing and assistant message reconstruction
//
// Responsibilities:
// - Split event-stream text into ordered `event:`/`data:` frames
// - Fold add/append/patch frames into a ReconstructedMessage
// - Tolerate malformed frames (skip and continue)
// - Decode UTF-8 incrementally across chunk boundaries

mod decoder;
mod parser;
mod types;

pub use decoder::Utf8StreamDecoder;
pub use parser::{fold_message, parse_events};
pub use types::{ReconstructedMessage, StreamEvent};

/// Parse and fold in one step.
pub fn reconstruct(text: &str) -> Option<ReconstructedMessage> {
    fold_message(&parse_events(text))
}

#[cfg(test)]
mod tests;
