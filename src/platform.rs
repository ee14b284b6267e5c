// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// Platform adapters
//
// Responsibilities:
// - Conversation endpoint classification per chat platform
// - Locating the first user-authored text in an outgoing body
// - Appending the instructions block (stripping the explicit token)
// - Explicit token detection
// - Fresh message id / create_time for follow-up bodies

use axum::http::Method;
use regex::Regex;
use serde_json::Value;

/// Typing this in a prompt forces tool instructions to be re-injected.
pub const EXPLICIT_TOKEN: &str = "MCPT";

// ---------------------------------------------------------------------------
// Endpoint matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum EndpointPattern {
    Regex(Regex),
    Substring(String),
}

/// URL matcher for `|`-separated endpoint patterns.
///
/// A pattern containing `*` or `.` is a regex; anything else is a substring.
/// A regex that fails to compile degrades to a substring match with `*` and
/// `.` removed.
#[derive(Debug, Clone)]
pub struct EndpointMatcher {
    patterns: Vec<EndpointPattern>,
    method: Method,
}

impl EndpointMatcher {
    pub fn new(pattern_list: &str, method: Method) -> Self {
        let patterns = pattern_list
            .split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                if p.contains('*') || p.contains('.') {
                    match Regex::new(p) {
                        Ok(re) => EndpointPattern::Regex(re),
                        Err(e) => {
                            tracing::warn!(pattern = p, error = %e, "invalid endpoint regex, using substring match");
                            EndpointPattern::Substring(p.replace(['.', '*'], ""))
                        }
                    }
                } else {
                    EndpointPattern::Substring(p.to_string())
                }
            })
            .collect();
        Self { patterns, method }
    }

    pub fn matches(&self, url: &str, method: &Method) -> bool {
        if *method != self.method {
            return false;
        }
        self.patterns.iter().any(|p| match p {
            EndpointPattern::Regex(re) => re.is_match(url),
            EndpointPattern::Substring(s) => url.contains(s.as_str()),
        })
    }
}

// ---------------------------------------------------------------------------
// Trait: PlatformAdapter
// ---------------------------------------------------------------------------

/// Knows the body shape of one chat platform.
pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_conversation_endpoint(&self, url: &str, method: &Method) -> bool;

    fn first_user_text<'a>(&self, body: &'a Value) -> Option<&'a str>;

    fn first_user_text_mut<'a>(&self, body: &'a mut Value) -> Option<&'a mut String>;

    /// Give the first user message a fresh identity so the platform treats
    /// a synthesized body as a new turn. No-op for bodies without one.
    fn refresh_message_identity(&self, _body: &mut Value) {}

    fn has_explicit_token(&self, body: &Value) -> bool {
        self.first_user_text(body)
            .is_some_and(|text| text.contains(EXPLICIT_TOKEN))
    }

    /// Append `text` after the first user text, separated by a blank line.
    /// Removes the first occurrence of `token_to_strip` and trims before
    /// appending. Returns false when the body has no user text.
    fn append_system_prompt(&self, body: &mut Value, text: &str, token_to_strip: Option<&str>) -> bool {
        let Some(user_text) = self.first_user_text_mut(body) else {
            return false;
        };
        let mut content = user_text.clone();
        if let Some(token) = token_to_strip.filter(|t| !t.is_empty()) {
            content = content.replacen(token, "", 1).trim().to_string();
        }
        *user_text = format!("{content}\n\n{text}");
        true
    }
}

// ---------------------------------------------------------------------------
// ChatGPT
// ---------------------------------------------------------------------------

/// `messages[].author.role == "user"`, text at `content.parts[0]`.
pub struct ChatGptAdapter {
    endpoint: EndpointMatcher,
}

impl ChatGptAdapter {
    pub const ENDPOINT: &'static str = "/backend-api/conversation";

    pub fn new() -> Self {
        Self {
            endpoint: EndpointMatcher::new(Self::ENDPOINT, Method::POST),
        }
    }

    fn first_user_index(body: &Value) -> Option<usize> {
        body.get("messages")?.as_array()?.iter().position(|m| {
            m.pointer("/author/role").and_then(Value::as_str) == Some("user")
        })
    }
}

impl Default for ChatGptAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for ChatGptAdapter {
    fn name(&self) -> &'static str {
        "chatgpt"
    }

    fn is_conversation_endpoint(&self, url: &str, method: &Method) -> bool {
        self.endpoint.matches(url, method)
    }

    fn first_user_text<'a>(&self, body: &'a Value) -> Option<&'a str> {
        let index = Self::first_user_index(body)?;
        body["messages"][index]
            .pointer("/content/parts/0")
            .and_then(Value::as_str)
    }

    fn first_user_text_mut<'a>(&self, body: &'a mut Value) -> Option<&'a mut String> {
        let index = Self::first_user_index(body)?;
        match body["messages"][index].pointer_mut("/content/parts/0") {
            Some(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    fn refresh_message_identity(&self, body: &mut Value) {
        let Some(index) = Self::first_user_index(body) else {
            return;
        };
        let Some(message) = body["messages"][index].as_object_mut() else {
            return;
        };

        message.insert(
            "id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );

        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let previous = message
            .get("create_time")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let bumped = if now > previous { now } else { previous + 0.001 };
        if let Some(n) = serde_json::Number::from_f64(bumped) {
            message.insert("create_time".to_string(), Value::Number(n));
        }
    }
}

// ---------------------------------------------------------------------------
// Claude
// ---------------------------------------------------------------------------

/// Single top-level `prompt` string.
pub struct ClaudeAdapter {
    endpoint: EndpointMatcher,
}

impl ClaudeAdapter {
    pub const ENDPOINT: &'static str = "/api/organizations/.*/chat_conversations/.*/completion";

    pub fn new() -> Self {
        Self {
            endpoint: EndpointMatcher::new(Self::ENDPOINT, Method::POST),
        }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn is_conversation_endpoint(&self, url: &str, method: &Method) -> bool {
        self.endpoint.matches(url, method)
    }

    fn first_user_text<'a>(&self, body: &'a Value) -> Option<&'a str> {
        body.get("prompt").and_then(Value::as_str)
    }

    fn first_user_text_mut<'a>(&self, body: &'a mut Value) -> Option<&'a mut String> {
        match body.get_mut("prompt") {
            Some(Value::String(text)) => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
