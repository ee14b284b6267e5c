// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

// REPLAYING: run the detected tool, send a follow-up carrying its result and
// hand the follow-up response to the page. The original response keeps
// draining in the background; if the follow-up cannot be issued, the page
// gets the original after all.

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::probe::{ProbeOutcome, StreamState};
use super::relay::{forward, TextCapture, TextDecoder};
use super::{Call, FetchInterceptor, ResponseHead};
use crate::bus::MonitorEvent;
use crate::capture::ResponseFinalizer;
use crate::detector::ToolCallMatch;
use crate::fetch::{ByteStream, FetchError, FetchResponse, ResponseBody};
use crate::stream::reconstruct;
use crate::tools::{parse_params, ToolResult};

/// Outcome of the replay, sent to the draining task once known.
enum Decision {
    Replaced(ToolResult),
    FellBack(ToolResult),
}

impl FetchInterceptor {
    pub(super) async fn replay(
        &self,
        call: &Call,
        head: ResponseHead,
        upstream: ByteStream,
        probe: ProbeOutcome,
        tool_call: ToolCallMatch,
        finalizer: ResponseFinalizer,
    ) -> FetchResponse {
        let request_id = call.captured.request_id.clone();
        tracing::info!(
            request_id = %request_id,
            tool_name = %tool_call.tool_name,
            state = %StreamState::Replaying,
            "tool call detected"
        );

        let ProbeOutcome {
            buffered,
            decoder,
            text,
            exhausted,
            error,
            ..
        } = probe;
        if let Some(e) = error {
            tracing::warn!(request_id = %request_id, error = %e, "upstream failed during probe");
        }

        let (fallback_tx, fallback_rx) = mpsc::unbounded_channel();
        let (decision_tx, decision_rx) = oneshot::channel();
        spawn_drain(
            (!exhausted).then_some(upstream),
            decoder,
            text,
            fallback_tx,
            decision_rx,
            finalizer,
            tool_call.clone(),
        );

        let params = parse_params(&tool_call.raw_params);
        let tool_result = self.tools.execute(&tool_call.tool_name, &params).await;

        match self.issue_follow_up(call, &tool_result).await {
            Some(follow_up) => {
                let tool_name = tool_result.tool_name.clone();
                let _ = decision_tx.send(Decision::Replaced(tool_result));
                self.capture_follow_up(request_id, tool_name, follow_up)
            }
            None => {
                tracing::info!(
                    request_id = %request_id,
                    state = %StreamState::Relaying,
                    "follow-up unavailable, returning original response"
                );
                let _ = decision_tx.send(Decision::FellBack(tool_result));
                let rest = UnboundedReceiverStream::new(fallback_rx);
                let body = futures_util::stream::iter(buffered.into_iter().map(Ok)).chain(rest);
                head.into_response(ResponseBody::Stream(Box::pin(body)))
            }
        }
    }

    /// Build and send the follow-up request. `None` on any failure.
    async fn issue_follow_up(&self, call: &Call, tool_result: &ToolResult) -> Option<FetchResponse> {
        let request_id = &call.captured.request_id;
        let body = call.body.as_ref()?;
        let Some(follow_up) = self.rewriter.build_follow_up(body, tool_result) else {
            tracing::warn!(request_id = %request_id, "no user message to carry the tool result");
            return None;
        };
        let bytes = match serde_json::to_vec(&follow_up) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "failed to serialize follow-up body");
                return None;
            }
        };

        match self.next.fetch(call.request.transport_only(Bytes::from(bytes))).await {
            Ok(response) if response.status.is_success() => Some(response),
            Ok(response) => {
                tracing::warn!(
                    request_id = %request_id,
                    status = response.status.as_u16(),
                    "follow-up request rejected"
                );
                None
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "follow-up request failed");
                None
            }
        }
    }

    /// Pass the follow-up through to the page, publishing what it contained.
    fn capture_follow_up(&self, request_id: String, tool_name: String, response: FetchResponse) -> FetchResponse {
        let context = self.context.clone();
        let FetchResponse {
            status,
            status_text,
            headers,
            body,
        } = response;

        let decoder = TextDecoder::for_headers(&headers);
        let sink = TextCapture::new(decoder, move |text: String, _error: Option<FetchError>| {
            context.publish(MonitorEvent::ToolResultResponse {
                request_id,
                tool_name,
                message: reconstruct(&text),
            });
        });
        let body = forward(Vec::new(), Some(body.into_stream()), sink, false);

        FetchResponse {
            status,
            status_text,
            headers,
            body: ResponseBody::Stream(body),
        }
    }
}

/// Drain the original response to the end, feeding the fallback channel, then
/// publish according to the decision.
fn spawn_drain(
    rest: Option<ByteStream>,
    mut decoder: TextDecoder,
    mut text: String,
    fallback: mpsc::UnboundedSender<Result<Bytes, FetchError>>,
    decision: oneshot::Receiver<Decision>,
    mut finalizer: ResponseFinalizer,
    tool_call: ToolCallMatch,
) {
    tokio::spawn(async move {
        if let Some(mut rest) = rest {
            while let Some(item) = rest.next().await {
                match item {
                    Ok(chunk) => {
                        text.push_str(&decoder.decode(&chunk));
                        // Receiver is gone once the follow-up replaced us.
                        let _ = fallback.send(Ok(chunk));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "original response failed while draining");
                        break;
                    }
                }
            }
        }
        drop(fallback);
        text.push_str(&decoder.finish());

        let message = reconstruct(&text);
        let request_id = finalizer.request_id().to_string();
        let context = finalizer.context().clone();

        match decision.await {
            Ok(Decision::Replaced(tool_result)) => {
                let result_text = tool_result.result.clone();
                let original = message.clone();
                finalizer.update(move |r| {
                    r.streamed_text = Some(text);
                    r.message = original;
                    r.tool_executed = Some(true);
                    r.tool_result = Some(result_text);
                    r.replaced_with_tool_response = Some(true);
                });
                context.publish(MonitorEvent::ToolCallReplaced {
                    request_id: request_id.clone(),
                    tool_call,
                    tool_result,
                    original_message: message,
                });
            }
            outcome => {
                let tool_result = match outcome {
                    Ok(Decision::FellBack(result)) => Some(result.result),
                    _ => None,
                };
                let captured = message.clone();
                finalizer.update(move |r| {
                    r.streamed_text = Some(text);
                    r.message = captured;
                    r.tool_executed = Some(tool_result.is_some());
                    r.tool_result = tool_result;
                    r.replaced_with_tool_response = Some(false);
                });
                if let Some(message) = message {
                    context.record_assistant_message(&request_id, message);
                }
            }
        }

        tracing::info!(request_id = %request_id, state = %StreamState::Closed, "original response drained");
        finalizer.finish();
    });
}
