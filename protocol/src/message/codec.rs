//! # JSON Wire Codec
//!
//! Encodes and decodes [`Message`] envelopes as UTF-8 JSON and enforces the
//! JSON-RPC 2.0 shape rules the type system cannot: version tag, id
//! presence per message class, and the exactly-one-of `result`/`error`
//! invariant on responses.

use crate::error::{A2aError, A2aResult};

use super::{Message, MessageType};

/// Serializes a message to its UTF-8 JSON wire form.
///
/// Validation runs first so a malformed envelope never leaves the process.
pub fn encode(message: &Message) -> A2aResult<Vec<u8>> {
    validate(message)?;
    serde_json::to_vec(message).map_err(|e| A2aError::Serialization(e.to_string()))
}

/// Parses and validates a message from its UTF-8 JSON wire form.
pub fn decode(bytes: &[u8]) -> A2aResult<Message> {
    let message: Message =
        serde_json::from_slice(bytes).map_err(|e| A2aError::Protocol(e.to_string()))?;
    validate(&message)?;
    Ok(message)
}

/// Checks the envelope invariants for the message's class.
pub fn validate(message: &Message) -> A2aResult<()> {
    if message.jsonrpc != "2.0" {
        return Err(A2aError::Protocol(format!(
            "unsupported jsonrpc version: {:?}",
            message.jsonrpc
        )));
    }
    if message.from.is_empty() {
        return Err(A2aError::Protocol("missing sender id".to_string()));
    }

    match message.message_type {
        MessageType::Request | MessageType::Discovery | MessageType::Registration
        | MessageType::CapabilityQuery | MessageType::WorkflowCoordination
        | MessageType::ResourceNegotiation | MessageType::SecurityHandshake => {
            if message.id.is_none() {
                return Err(A2aError::Protocol(format!(
                    "{:?} requires an id",
                    message.message_type
                )));
            }
            if message.method.is_none() {
                return Err(A2aError::Protocol(format!(
                    "{:?} requires a method",
                    message.message_type
                )));
            }
        }
        MessageType::Response => {
            if message.id.is_none() {
                return Err(A2aError::Protocol("response requires an id".to_string()));
            }
            match (&message.result, &message.error) {
                (Some(_), None) | (None, Some(_)) => {}
                (Some(_), Some(_)) => {
                    return Err(A2aError::Protocol(
                        "response carries both result and error".to_string(),
                    ))
                }
                (None, None) => {
                    return Err(A2aError::Protocol(
                        "response carries neither result nor error".to_string(),
                    ))
                }
            }
        }
        MessageType::Notification | MessageType::Heartbeat => {
            if message.id.is_some() {
                return Err(A2aError::Protocol(
                    "notification must not carry an id".to_string(),
                ));
            }
        }
    }

    if let Some(route) = &message.route {
        if route.path.len().saturating_sub(1) != route.hops {
            return Err(A2aError::Protocol(format!(
                "route hops {} does not match path length {}",
                route.hops,
                route.path.len()
            )));
        }
    }

    Ok(())
}
