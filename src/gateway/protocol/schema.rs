//! Gateway protocol schema
//!
//! Defines the wire format for gateway messages: a flat JSON envelope
//! `{"type", "id"?, "payload"?, "error"?}` carried in one text frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Top-level message envelope
///
/// Requests and their replies carry the same `id`; pure events omit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing key (operation name or event name)
    #[serde(rename = "type")]
    pub kind: String,
    /// Correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Operation-specific body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Failure reported by the far end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Uncorrelated event
    pub fn event(kind: impl Into<String>, payload: Option<Value>) -> Self {
        Envelope {
            kind: kind.into(),
            id: None,
            payload,
            error: None,
        }
    }

    /// Correlated request
    pub fn request(kind: impl Into<String>, id: impl Into<String>, payload: Option<Value>) -> Self {
        Envelope {
            kind: kind.into(),
            id: Some(id.into()),
            payload,
            error: None,
        }
    }

    /// Reply to a request, echoing its id
    pub fn reply(kind: impl Into<String>, id: impl Into<String>, payload: Value) -> Self {
        Envelope {
            kind: kind.into(),
            id: Some(id.into()),
            payload: Some(payload),
            error: None,
        }
    }

    /// Error reply to a request
    pub fn failure(kind: impl Into<String>, id: impl Into<String>, error: impl Into<String>) -> Self {
        Envelope {
            kind: kind.into(),
            id: Some(id.into()),
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Payload or `null`
    pub fn payload_or_null(&self) -> Value {
        self.payload.clone().unwrap_or(Value::Null)
    }

    /// String `id` carried inside the payload.
    ///
    /// Some gateways echo a stream's request id here rather than on the
    /// envelope. Only stream frames may be routed by it.
    pub fn payload_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
    }
}

/// Encode an envelope into a text frame
pub fn encode(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode a text frame into an envelope
pub fn decode(text: &str) -> Result<Envelope> {
    serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))
}
