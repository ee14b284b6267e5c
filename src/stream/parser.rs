// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Event-stream parsing and message reconstruction
//
// `parse_events` splits concatenated SSE text into frames; `fold_message`
// applies the add/append/patch operations in arrival order. Frames that
// fail to parse are skipped so one corrupt frame never loses the rest.
// When a stream interleaves several response variants only the first
// variant is folded.

use serde_json::{Map, Value};

use super::types::{pointer, ReconstructedMessage, StreamEvent};

// ---------------------------------------------------------------------------
// Frame parsing
// ---------------------------------------------------------------------------

/// Parse event-stream text into an ordered list of events.
///
/// Blank lines terminate an event. A trailing event without a terminator is
/// still emitted. Comment lines and unknown fields are ignored.
pub fn parse_events(text: &str) -> Vec<StreamEvent> {
    let normalized = text.replace("\r\n", "\n");
    let mut events = Vec::new();
    let mut name: Option<String> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in normalized.split('\n') {
        if line.is_empty() {
            flush(&mut events, &mut name, &mut data);
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut events, &mut name, &mut data);

    events
}

fn flush(events: &mut Vec<StreamEvent>, name: &mut Option<String>, data: &mut Vec<&str>) {
    if data.is_empty() {
        *name = None;
        return;
    }
    events.push(StreamEvent {
        event: name.take(),
        data: data.join("\n"),
    });
    data.clear();
}

// ---------------------------------------------------------------------------
// Folding
// ---------------------------------------------------------------------------

/// Fold events into a message.
///
/// Pass one seeds every field from the first `add` at the root pointer.
/// Pass two applies appends and patches in order. Returns `None` when no
/// message id and no content were ever seen.
pub fn fold_message(events: &[StreamEvent]) -> Option<ReconstructedMessage> {
    let frames = select_variant(events.iter().filter_map(decode_frame));

    let mut message = ReconstructedMessage::default();
    let seed = frames.iter().find_map(|frame| {
        let is_root_add = frame.get("p").and_then(Value::as_str) == Some(pointer::ROOT)
            && frame.get("o").and_then(Value::as_str) == Some("add");
        if !is_root_add {
            return None;
        }
        frame.get("v").filter(|v| v.get("message").is_some_and(Value::is_object))
    });
    if let Some(v) = seed {
        seed_message(&mut message, v);
    }

    for frame in &frames {
        apply_frame(&mut message, frame);
    }

    if message.message_id.is_none() && message.content.is_empty() {
        return None;
    }
    Some(message)
}

/// Drop frames of every variant but the first.
///
/// A `num_variants_in_stream` frame above 1 turns filtering on from that
/// point. The first variant index `c` seen is kept; frames tagged with any
/// other index are skipped. Untagged frames are always kept.
fn select_variant(frames: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut multiple = false;
    let mut kept_variant: Option<i64> = None;
    let mut kept = Vec::new();

    for frame in frames {
        if let Some(count) = frame.get("num_variants_in_stream") {
            if count.as_u64().is_some_and(|n| n > 1) {
                tracing::debug!(variants = %count, "stream carries several variants, keeping the first");
                multiple = true;
            }
            continue;
        }
        if let Some(index) = frame.get("c").and_then(variant_index) {
            match kept_variant {
                None => kept_variant = Some(index),
                Some(first) if multiple && first != index => continue,
                Some(_) => {}
            }
        }
        kept.push(frame);
    }

    kept
}

fn variant_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decode_frame(event: &StreamEvent) -> Option<Value> {
    if event.is_done() {
        return None;
    }
    match serde_json::from_str::<Value>(&event.data) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(event = ?event.event, error = %e, "skipping malformed stream frame");
            None
        }
    }
}

fn seed_message(message: &mut ReconstructedMessage, v: &Value) {
    let msg = &v["message"];
    message.message_id = msg.get("id").and_then(Value::as_str).map(String::from);
    message.author = msg.get("author").cloned();
    message.create_time = msg.get("create_time").cloned();
    message.status = msg.get("status").and_then(Value::as_str).map(String::from);
    message.end_turn = msg.get("end_turn").and_then(Value::as_bool);
    if let Some(Value::Object(meta)) = msg.get("metadata") {
        merge_metadata(message, meta);
    }
    if let Some(first) = msg
        .pointer("/content/parts/0")
        .and_then(Value::as_str)
    {
        message.content.push_str(first);
    }
    if let Some(id) = v.get("conversation_id").and_then(Value::as_str) {
        message.conversation_id = Some(id.to_string());
    }
}

fn apply_frame(message: &mut ReconstructedMessage, frame: &Value) {
    // Envelope events carry a `type` instead of an operation.
    if let Some(kind) = frame.get("type").and_then(Value::as_str) {
        apply_envelope(message, kind, frame);
        return;
    }

    let path = frame.get("p").and_then(Value::as_str);
    let op = frame.get("o").and_then(Value::as_str);
    let value = frame.get("v");

    match (path, op, value) {
        (_, Some("patch"), Some(Value::Array(ops))) => {
            for sub in ops {
                let sub_path = sub.get("p").and_then(Value::as_str);
                let sub_op = sub.get("o").and_then(Value::as_str);
                if let (Some(p), Some(v)) = (sub_path, sub.get("v")) {
                    apply_op(message, p, sub_op.unwrap_or("append"), v);
                }
            }
        }
        (Some(pointer::ROOT), Some("add"), _) => {}
        (Some(p), Some(o), Some(v)) => apply_op(message, p, o, v),
        // Bare `{"v": "..."}` continues the last content append.
        (None, None, Some(Value::String(text))) => message.content.push_str(text),
        _ => {}
    }
}

fn apply_op(message: &mut ReconstructedMessage, path: &str, op: &str, value: &Value) {
    match (path, op) {
        (pointer::CONTENT_PART, "append") => {
            if let Some(text) = value.as_str() {
                message.content.push_str(text);
            }
        }
        (pointer::STATUS, _) => {
            if let Some(status) = value.as_str() {
                message.status = Some(status.to_string());
            }
        }
        (pointer::END_TURN, _) => {
            if let Some(end_turn) = value.as_bool() {
                message.end_turn = Some(end_turn);
            }
        }
        (pointer::METADATA, _) => {
            if let Value::Object(meta) = value {
                merge_metadata(message, meta);
            }
        }
        _ => {}
    }
}

fn apply_envelope(message: &mut ReconstructedMessage, kind: &str, frame: &Value) {
    let text = |key: &str| frame.get(key).and_then(Value::as_str).map(String::from);
    match kind {
        "message_stream_complete" => {
            if let Some(id) = text("conversation_id") {
                message.conversation_id = Some(id);
            }
        }
        "conversation_detail_metadata" => {
            if let Some(id) = text("conversation_id") {
                message.conversation_id = Some(id);
            }
            if let Some(model) = text("default_model_slug") {
                message.model = Some(model);
            }
        }
        "title_generation" => {
            if let Some(title) = text("title") {
                message.title = Some(title);
            }
        }
        _ => {}
    }
}

fn merge_metadata(message: &mut ReconstructedMessage, meta: &Map<String, Value>) {
    for (key, value) in meta {
        message.metadata.insert(key.clone(), value.clone());
    }
    if let Some(model) = meta.get("model_slug").and_then(Value::as_str) {
        message.model = Some(model.to_string());
    }
}
