//! Outbound Stream Encoder
//!
//! Serializes branch events into Server-Sent Events frames. One event in, one
//! frame out; the encoder keeps no state, so frames leave in exactly the order
//! the merge loop hands them over.
//!
//! # Frame Format
//!
//! ```text
//! data: {"model":"a","token":"H","done":false}\n\n    fragment
//! data: {"model":"a","token":"","done":true}\n\n      branch completed
//! data: {"model":"b","error":"unreachable","done":true}\n\n   branch failed
//! ```

use bytes::Bytes;
use serde::Serialize;

use crate::events::{BranchEvent, BranchEventKind};

/// Media type of the generate response
pub const CONTENT_TYPE: &str = "text/event-stream";

/// JSON payload of one frame
#[derive(Debug, Serialize)]
struct WireEvent<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    done: bool,
}

impl<'a> From<&'a BranchEvent> for WireEvent<'a> {
    fn from(event: &'a BranchEvent) -> Self {
        let model = event.model.as_str();
        match &event.kind {
            BranchEventKind::Fragment { text } => Self {
                model,
                token: Some(text),
                error: None,
                done: false,
            },
            BranchEventKind::Done => Self {
                model,
                token: Some(""),
                error: None,
                done: true,
            },
            BranchEventKind::Error { message } => Self {
                model,
                token: None,
                error: Some(message),
                done: true,
            },
        }
    }
}

/// Encode one event as a `data: <json>\n\n` frame
pub fn encode(event: &BranchEvent) -> Result<Bytes, serde_json::Error> {
    let mut frame = Vec::with_capacity(64 + event.model.len());
    frame.extend_from_slice(b"data: ");
    serde_json::to_writer(&mut frame, &WireEvent::from(event))?;
    frame.extend_from_slice(b"\n\n");
    Ok(Bytes::from(frame))
}
