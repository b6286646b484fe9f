//! SSE framing helpers shared by every streaming endpoint.
//!
//! Generalizes the teacher's `a2a/server.rs::handle_stream` — a
//! `stream::unfold` over a channel, wrapping each item as
//! `sse::Event::default().data(json)` — into a reusable shape that also
//! carries a monotonic `id:` line for `Last-Event-ID` resumption and a
//! terminal `[DONE]` frame for the OpenAI-compatible chat endpoints.

use axum::response::sse::{Event, KeepAlive};
use std::convert::Infallible;
use std::time::Duration;

/// Builds one SSE frame carrying `data` under `event_name`, stamped with
/// a monotonically increasing `id` for `Last-Event-ID` resumption.
pub fn frame(event_name: &str, id: u64, data: &serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().event(event_name).id(id.to_string()).data(data.to_string()))
}

/// The `data: [DONE]\n\n` terminator OpenAI-compatible streaming chat
/// responses end on.
pub fn done_frame() -> Result<Event, Infallible> {
    Ok(Event::default().data("[DONE]"))
}

/// A mid-stream failure frame (§7 "server sends an `event: error` SSE
/// frame with a JSON payload and then closes").
pub fn error_frame(message: &str, code: &str) -> Result<Event, Infallible> {
    let body = serde_json::json!({"error": {"message": message, "type": code, "code": code}});
    Ok(Event::default().event("error").data(body.to_string()))
}

/// Default keep-alive ping cadence for long-lived SSE connections
/// (debate/task event streams, chat completions).
pub fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive")
}
