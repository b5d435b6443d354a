//! Wire codec for inbound and outbound frames.
//!
//! Inbound frames are either an event envelope (`{"type": "...", ...}`) or
//! an error envelope (`{"error": {"code": 40, "message": "...", "StatusCode": 401}}`).

use serde::Deserialize;
use serde_json::{json, Value};

use cl_core::constants::{event_names, MAX_FRAME_BYTES};
use cl_core::error::{ClError, ClResult, ServerErrorCode};

use crate::events::{Event, EventKind};

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A server event to dispatch.
    Event(Event),
    /// A structured server error.
    Error(ServerErrorPayload),
}

/// Error payload carried by an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerErrorPayload {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "StatusCode", alias = "status_code")]
    pub status_code: u16,
}

impl ServerErrorPayload {
    pub fn error_code(&self) -> ServerErrorCode {
        ServerErrorCode::from_code(self.code)
    }

    /// Whether the token behind the connection must be replaced.
    pub fn is_token_error(&self) -> bool {
        self.error_code().is_token_error()
    }
}

impl From<ServerErrorPayload> for ClError {
    fn from(payload: ServerErrorPayload) -> Self {
        ClError::server(payload.code, payload.status_code, payload.message)
    }
}

/// Converts raw text frames into typed frames and builds outbound frames.
pub trait EventCodec: Send + Sync {
    /// Decode one inbound text frame.
    fn decode(&self, raw: &str) -> ClResult<Frame>;

    /// Encode the keep-alive frame sent on every health interval.
    fn encode_health_check(&self, connection_id: Option<&str>) -> String;
}

/// JSON codec used by the chat server.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventCodec;

impl EventCodec for JsonEventCodec {
    fn decode(&self, raw: &str) -> ClResult<Frame> {
        if raw.len() > MAX_FRAME_BYTES {
            return Err(ClError::Decode(format!(
                "frame of {} bytes exceeds limit of {MAX_FRAME_BYTES}",
                raw.len()
            )));
        }

        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ClError::Decode(format!("invalid JSON frame: {e}")))?;

        if let Some(error) = value.get("error") {
            let payload: ServerErrorPayload = serde_json::from_value(error.clone())
                .map_err(|e| ClError::Decode(format!("malformed error frame: {e}")))?;
            return Ok(Frame::Error(payload));
        }

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(EventKind::from_name)
            .ok_or_else(|| ClError::Decode("frame has no event type".into()))?;

        Ok(Frame::Event(Event::from_data(kind, value)?))
    }

    fn encode_health_check(&self, connection_id: Option<&str>) -> String {
        json!([{ "type": event_names::HEALTH_CHECK, "client_id": connection_id }]).to_string()
    }
}
