//! JSON text codec for relay messages.
//!
//! Every message is a JSON array whose first element is the type tag.

use serde_json::{json, Value};
use thiserror::Error;

use crate::event::{Event, Filter};
use crate::message::{ClientMessage, RelayMessage};

/// Maximum encoded or decoded message size (512 KiB).
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unrecognized message type tag.
    #[error("Unknown message type: {0}")]
    UnknownMessage(String),

    /// Structurally invalid message.
    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Encode a client message to its JSON text form.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode(message: &ClientMessage) -> Result<String, ProtocolError> {
    let value = match message {
        ClientMessage::Req {
            subscription_id,
            filters,
        } => {
            let mut parts = Vec::with_capacity(filters.len() + 2);
            parts.push(json!("REQ"));
            parts.push(json!(subscription_id));
            for filter in filters {
                parts.push(serde_json::to_value(filter)?);
            }
            Value::Array(parts)
        }
        ClientMessage::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        ClientMessage::Event(event) => json!(["EVENT", serde_json::to_value(event.as_ref())?]),
    };

    let text = serde_json::to_string(&value)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a relay message from its JSON text form.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, or not a known
/// relay message shape.
pub fn decode(text: &str) -> Result<RelayMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }

    let value: Value = serde_json::from_str(text)?;
    let Value::Array(mut parts) = value else {
        return Err(ProtocolError::Invalid("expected a JSON array".into()));
    };
    if parts.is_empty() {
        return Err(ProtocolError::Invalid("empty message".into()));
    }

    let tag = string_at(&parts, 0, "type")?;
    match tag.as_str() {
        "EVENT" => {
            let subscription_id = string_at(&parts, 1, "subscription id")?;
            let raw = take_at(&mut parts, 2, "event")?;
            let event: Event = serde_json::from_value(raw)?;
            Ok(RelayMessage::Event {
                subscription_id,
                event: Box::new(event),
            })
        }
        "EOSE" => Ok(RelayMessage::Eose(string_at(&parts, 1, "subscription id")?)),
        "OK" => {
            let event_id = string_at(&parts, 1, "event id")?;
            let accepted = parts
                .get(2)
                .and_then(Value::as_bool)
                .ok_or_else(|| ProtocolError::Invalid("OK without accepted flag".into()))?;
            let message = parts
                .get(3)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            })
        }
        "NOTICE" => Ok(RelayMessage::Notice(string_at(&parts, 1, "notice")?)),
        "CLOSED" => {
            let subscription_id = string_at(&parts, 1, "subscription id")?;
            let message = parts
                .get(2)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(RelayMessage::Closed {
                subscription_id,
                message,
            })
        }
        other => Err(ProtocolError::UnknownMessage(other.to_string())),
    }
}

/// Encode a relay message to its JSON text form.
///
/// Used by relay-side code and test relays.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode_relay(message: &RelayMessage) -> Result<String, ProtocolError> {
    let value = match message {
        RelayMessage::Event {
            subscription_id,
            event,
        } => json!(["EVENT", subscription_id, serde_json::to_value(event.as_ref())?]),
        RelayMessage::Eose(subscription_id) => json!(["EOSE", subscription_id]),
        RelayMessage::Ok {
            event_id,
            accepted,
            message,
        } => json!(["OK", event_id, accepted, message]),
        RelayMessage::Notice(notice) => json!(["NOTICE", notice]),
        RelayMessage::Closed {
            subscription_id,
            message,
        } => json!(["CLOSED", subscription_id, message]),
    };

    let text = serde_json::to_string(&value)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a client message from its JSON text form.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, or not a known
/// client message shape.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }

    let value: Value = serde_json::from_str(text)?;
    let Value::Array(mut parts) = value else {
        return Err(ProtocolError::Invalid("expected a JSON array".into()));
    };
    if parts.is_empty() {
        return Err(ProtocolError::Invalid("empty message".into()));
    }

    let tag = string_at(&parts, 0, "type")?;
    match tag.as_str() {
        "REQ" => {
            let subscription_id = string_at(&parts, 1, "subscription id")?;
            let filters = parts
                .drain(2..)
                .map(serde_json::from_value)
                .collect::<Result<Vec<Filter>, _>>()?;
            Ok(ClientMessage::Req {
                subscription_id,
                filters,
            })
        }
        "CLOSE" => Ok(ClientMessage::Close(string_at(&parts, 1, "subscription id")?)),
        "EVENT" => {
            let raw = take_at(&mut parts, 1, "event")?;
            let event: Event = serde_json::from_value(raw)?;
            Ok(ClientMessage::Event(Box::new(event)))
        }
        other => Err(ProtocolError::UnknownMessage(other.to_string())),
    }
}

fn string_at(parts: &[Value], index: usize, what: &str) -> Result<String, ProtocolError> {
    parts
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::Invalid(format!("missing {what}")))
}

fn take_at(parts: &mut [Value], index: usize, what: &str) -> Result<Value, ProtocolError> {
    parts
        .get_mut(index)
        .map(Value::take)
        .ok_or_else(|| ProtocolError::Invalid(format!("missing {what}")))
}
