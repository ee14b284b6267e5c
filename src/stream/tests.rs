// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Tests for SSE parsing and message reconstruction
//
// Tests cover:
//  1. Blank-line framing with event names
//  2. Trailing frame flushed at end of input
//  3. CRLF line endings and multi-line data
//  4. Add seeds every field, appends grow content
//  5. Patch frames update content, status, end_turn, metadata
//  6. Malformed frames skipped without losing the rest
//  7. Nothing to report -> None
//  8. Chunk-boundary independence (byte-level splits through the decoder)
//  9. Envelope events set conversation id, model and title
// 10. Interleaved variants: only the first is folded

use super::*;
use serde_json::json;

const ADD_FRAME: &str = r#"data: {"p":"","o":"add","v":{"message":{"id":"m1","author":{"role":"assistant"},"create_time":1700000000.5,"status":"in_progress","end_turn":null,"metadata":{"model_slug":"gpt-4o"},"content":{"content_type":"text","parts":["Hel"]}},"conversation_id":"c1"}}"#;

fn sample_stream() -> String {
    [
        "event: delta_encoding\ndata: \"v1\"\n\n".to_string(),
        format!("event: delta\n{ADD_FRAME}\n\n"),
        "event: delta\ndata: {\"p\":\"/message/content/parts/0\",\"o\":\"append\",\"v\":\"lo\"}\n\n".to_string(),
        "event: delta\ndata: {\"v\":\", wor\"}\n\n".to_string(),
        "event: delta\ndata: {\"p\":\"\",\"o\":\"patch\",\"v\":[{\"p\":\"/message/content/parts/0\",\"o\":\"append\",\"v\":\"ld\"},{\"p\":\"/message/status\",\"o\":\"replace\",\"v\":\"finished_successfully\"},{\"p\":\"/message/end_turn\",\"o\":\"replace\",\"v\":true},{\"p\":\"/message/metadata\",\"o\":\"append\",\"v\":{\"finish_details\":{\"type\":\"stop\"}}}]}\n\n".to_string(),
        "data: {\"type\":\"message_stream_complete\",\"conversation_id\":\"c1\"}\n\n".to_string(),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat()
}

// ---------------------------------------------------------------------------
// 1-3. Framing
// ---------------------------------------------------------------------------

#[test]
fn frames_split_on_blank_lines_with_event_names() {
    let events = parse_events("event: delta\ndata: {\"v\":\"a\"}\n\ndata: plain\n\n");
    assert_eq!(
        events,
        vec![
            StreamEvent {
                event: Some("delta".into()),
                data: "{\"v\":\"a\"}".into(),
            },
            StreamEvent {
                event: None,
                data: "plain".into(),
            },
        ]
    );
}

#[test]
fn trailing_frame_without_terminator_is_emitted() {
    let events = parse_events("data: first\n\ndata: second");
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].data, "second");
}

#[test]
fn crlf_and_multiline_data() {
    let events = parse_events("event: x\r\ndata: line1\r\ndata: line2\r\n\r\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.as_deref(), Some("x"));
    assert_eq!(events[0].data, "line1\nline2");
}

#[test]
fn event_name_without_data_is_dropped() {
    let events = parse_events("event: ping\n\ndata: a\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, None);
}

// ---------------------------------------------------------------------------
// 4-5. Folding
// ---------------------------------------------------------------------------

#[test]
fn fold_applies_add_append_and_patch_in_order() {
    let message = reconstruct(&sample_stream()).expect("message");

    assert_eq!(message.message_id.as_deref(), Some("m1"));
    assert_eq!(message.content, "Hello, world");
    assert_eq!(message.author, Some(json!({"role": "assistant"})));
    assert_eq!(message.create_time, Some(json!(1700000000.5)));
    assert_eq!(message.status.as_deref(), Some("finished_successfully"));
    assert_eq!(message.end_turn, Some(true));
    assert_eq!(message.metadata["model_slug"], json!("gpt-4o"));
    assert_eq!(message.metadata["finish_details"], json!({"type": "stop"}));
    assert_eq!(message.conversation_id.as_deref(), Some("c1"));
    assert_eq!(message.model.as_deref(), Some("gpt-4o"));
}

#[test]
fn appends_before_the_add_still_count() {
    // Seeding happens in its own pass, so order of the add does not matter
    // for fields; content appends still apply in arrival order.
    let text = format!(
        "data: {{\"p\":\"/message/content/parts/0\",\"o\":\"append\",\"v\":\"!\"}}\n\n{ADD_FRAME}\n\n"
    );
    let message = reconstruct(&text).expect("message");
    assert_eq!(message.message_id.as_deref(), Some("m1"));
    assert_eq!(message.content, "Hel!");
}

#[test]
fn serializes_with_camel_case_keys() {
    let message = reconstruct(&sample_stream()).expect("message");
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["messageId"], json!("m1"));
    assert_eq!(value["endTurn"], json!(true));
    assert_eq!(value["conversationId"], json!("c1"));
}

// ---------------------------------------------------------------------------
// 6-7. Error tolerance
// ---------------------------------------------------------------------------

#[test]
fn malformed_frame_is_skipped() {
    let text = format!(
        "{ADD_FRAME}\n\ndata: {{not json\n\ndata: {{\"v\":\"p\"}}\n\n"
    );
    let message = reconstruct(&text).expect("message");
    assert_eq!(message.content, "Help");
}

#[test]
fn no_id_and_no_content_yields_none() {
    assert_eq!(reconstruct(""), None);
    assert_eq!(reconstruct("data: [DONE]\n\n"), None);
    assert_eq!(reconstruct("data: {\"type\":\"title_generation\",\"title\":\"t\"}\n\n"), None);
    assert_eq!(reconstruct("just some prose, not sse"), None);
}

#[test]
fn content_without_add_is_reported() {
    let message = reconstruct("data: {\"v\":\"orphan\"}\n\n").expect("message");
    assert_eq!(message.message_id, None);
    assert_eq!(message.content, "orphan");
}

// ---------------------------------------------------------------------------
// 8. Chunk-boundary independence
// ---------------------------------------------------------------------------

fn decode_in_chunks(bytes: &[u8], sizes: &[usize]) -> String {
    let mut decoder = Utf8StreamDecoder::new();
    let mut text = String::new();
    let mut offset = 0;
    let mut i = 0;
    while offset < bytes.len() {
        let size = sizes[i % sizes.len()].max(1);
        let end = (offset + size).min(bytes.len());
        text.push_str(&decoder.decode(&bytes[offset..end]));
        offset = end;
        i += 1;
    }
    text.push_str(&decoder.finish());
    text
}

#[test]
fn content_is_independent_of_chunking() {
    let mut stream = sample_stream();
    stream.push_str("data: {\"v\":\" ünïcödé ✓\"}\n\n");
    let whole = reconstruct(&stream).expect("message").content;
    assert!(whole.ends_with("ünïcödé ✓"));

    for sizes in [&[1][..], &[2], &[3, 7], &[5, 1, 13], &[64], &[stream.len()]] {
        let text = decode_in_chunks(stream.as_bytes(), sizes);
        let content = reconstruct(&text).expect("message").content;
        assert_eq!(content, whole, "chunk sizes {sizes:?}");
    }
}

// ---------------------------------------------------------------------------
// 9. Envelope events
// ---------------------------------------------------------------------------

#[test]
fn envelope_events_set_conversation_and_model() {
    let text = format!(
        "{ADD_FRAME}\n\ndata: {{\"type\":\"conversation_detail_metadata\",\"conversation_id\":\"c2\",\"default_model_slug\":\"o3\"}}\n\n"
    );
    let message = reconstruct(&text).expect("message");
    assert_eq!(message.conversation_id.as_deref(), Some("c2"));
    assert_eq!(message.model.as_deref(), Some("o3"));
}

#[test]
fn title_generation_sets_title() {
    let text = format!(
        "{ADD_FRAME}\n\ndata: {{\"type\":\"title_generation\",\"title\":\"Greetings\",\"conversation_id\":\"c1\"}}\n\n"
    );
    let message = reconstruct(&text).expect("message");
    assert_eq!(message.title.as_deref(), Some("Greetings"));
    // Model comes from the add frame's metadata, not from the title event.
    assert_eq!(message.model.as_deref(), Some("gpt-4o"));
}

// ---------------------------------------------------------------------------
// 10. Variants
// ---------------------------------------------------------------------------

fn variant_add(index: u64, id: &str) -> String {
    let frame = json!({
        "p": "", "o": "add", "c": index,
        "v": { "message": { "id": id, "content": { "parts": [""] } }, "conversation_id": "c1" }
    });
    format!("event: delta\ndata: {frame}\n\n")
}

fn variant_append(index: u64, text: &str) -> String {
    let frame = json!({"p": "/message/content/parts/0", "o": "append", "v": text, "c": index});
    format!("event: delta\ndata: {frame}\n\n")
}

#[test]
fn interleaved_variants_keep_only_the_first() {
    let text = [
        "data: {\"type\":\"stream_info\",\"num_variants_in_stream\":2}\n\n".to_string(),
        variant_add(0, "m-a"),
        variant_add(1, "m-b"),
        variant_append(0, "Hello "),
        variant_append(1, "Bonjour "),
        variant_append(0, "world"),
        variant_append(1, "monde"),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat();

    let message = reconstruct(&text).expect("message");
    assert_eq!(message.content, "Hello world");
    assert_eq!(message.message_id.as_deref(), Some("m-a"));
}

#[test]
fn single_variant_stream_folds_every_index() {
    // Without a multi-variant announcement the index is informational.
    let text = [variant_add(0, "m-a"), variant_append(0, "one "), variant_append(3, "two")].concat();
    assert_eq!(reconstruct(&text).expect("message").content, "one two");
}
