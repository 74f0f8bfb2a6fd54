// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message envelope exchanged between actor ports.
//!
//! Every message travels as a [`RemactMessage`]: a correlation header
//! (request id, client id, destination method, message type) plus a
//! [`Payload`]. The payload keeps its type name next to a JSON value and is
//! decoded by the receiver into the concrete type registered for that name.

use crate::error::{ErrorMessage, RemactError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Prefix shared by all framework-internal methods.
pub const RESERVED_PREFIX: &str = "$Remact.";
/// Connect request sent by a client port after the transport is open.
pub const CONNECT_METHOD: &str = "$Remact.Connect";
/// Graceful disconnect notification.
pub const DISCONNECT_METHOD: &str = "$Remact.Disconnect";
/// Keep-alive notification sent on idle connections.
pub const KEEP_ALIVE_METHOD: &str = "$Remact.KeepAlive";

/// Returns true for method names owned by the framework.
pub fn is_reserved_method(method: &str) -> bool {
    method.starts_with(RESERVED_PREFIX)
}

/// Envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Error,
}

/// A type that can travel as a payload.
///
/// `TYPE_NAME` is written on the wire and must stay stable across versions.
pub trait PayloadType: Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;
}

/// Payload with deferred decoding.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type", default)]
    type_name: String,
    #[serde(default)]
    value: serde_json::Value,
}

impl Payload {
    /// Empty payload (no type).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Encode a typed value.
    ///
    /// A value that does not serialize (e.g. a map with non-string keys) is
    /// logged and sent as `null`; use [`Payload::try_new`] to see the error.
    pub fn new<T: PayloadType>(value: &T) -> Self {
        Self::try_new(value).unwrap_or_else(|e| {
            warn!("payload '{}' not serializable, sending null: {}", T::TYPE_NAME, e);
            Self {
                type_name: T::TYPE_NAME.to_string(),
                value: serde_json::Value::Null,
            }
        })
    }

    /// Encode a typed value, failing when it does not serialize.
    pub fn try_new<T: PayloadType>(value: &T) -> Result<Self> {
        Ok(Self {
            type_name: T::TYPE_NAME.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Build from an already encoded value, e.g. received from a gateway.
    pub fn from_raw(type_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_empty(&self) -> bool {
        self.type_name.is_empty()
    }

    /// Check the type name without decoding.
    pub fn is<T: PayloadType>(&self) -> bool {
        self.type_name == T::TYPE_NAME
    }

    /// Decode into the registered type.
    pub fn decode<T: PayloadType>(&self) -> Result<T> {
        if !self.is::<T>() {
            return Err(RemactError::PayloadMismatch {
                expected: T::TYPE_NAME,
                actual: self.type_name.clone(),
            });
        }
        Ok(T::deserialize(&self.value)?)
    }

    pub fn raw_value(&self) -> &serde_json::Value {
        &self.value
    }
}

/// Acknowledgement without content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadyMessage {}

impl PayloadType for ReadyMessage {
    const TYPE_NAME: &'static str = "ReadyMessage";
}

impl PayloadType for ErrorMessage {
    const TYPE_NAME: &'static str = "ErrorMessage";
}

/// Envelope for every message between ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemactMessage {
    pub message_type: MessageType,
    /// Assigned by the sending client; 0 for notifications.
    pub request_id: i32,
    /// Assigned by the service on connect; 0 before the first connect.
    pub client_id: i32,
    #[serde(default)]
    pub destination_method: String,
    #[serde(default)]
    pub payload: Payload,
}

impl RemactMessage {
    fn with_type(message_type: MessageType, method: &str, payload: Payload) -> Self {
        Self {
            message_type,
            request_id: 0,
            client_id: 0,
            destination_method: method.to_string(),
            payload,
        }
    }

    /// Request; ids are filled in by the client port.
    pub fn request(method: &str, payload: Payload) -> Self {
        Self::with_type(MessageType::Request, method, payload)
    }

    pub fn notification(method: &str, payload: Payload) -> Self {
        Self::with_type(MessageType::Notification, method, payload)
    }

    /// Keep-alive notification for the given client id.
    pub fn keep_alive(client_id: i32) -> Self {
        let mut msg = Self::notification(KEEP_ALIVE_METHOD, Payload::empty());
        msg.client_id = client_id;
        msg
    }

    /// Error not correlated to a specific request.
    pub fn error(request_id: i32, client_id: i32, error: &ErrorMessage) -> Self {
        Self {
            message_type: MessageType::Error,
            request_id,
            client_id,
            destination_method: String::new(),
            payload: Payload::new(error),
        }
    }

    /// Response carrying the correlation header of this request.
    pub fn response_to(&self, payload: Payload) -> Self {
        Self {
            message_type: MessageType::Response,
            request_id: self.request_id,
            client_id: self.client_id,
            destination_method: self.destination_method.clone(),
            payload,
        }
    }

    /// Error response carrying the correlation header of this request.
    pub fn error_to(&self, error: &ErrorMessage) -> Self {
        Self {
            message_type: MessageType::Error,
            request_id: self.request_id,
            client_id: self.client_id,
            destination_method: self.destination_method.clone(),
            payload: Payload::new(error),
        }
    }

    pub fn is_request(&self) -> bool {
        self.message_type == MessageType::Request
    }

    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    pub fn is_reserved(&self) -> bool {
        is_reserved_method(&self.destination_method)
    }

    /// Error content of an Error envelope.
    ///
    /// An Error envelope whose payload is not an [`ErrorMessage`] is
    /// reported as `Undefined`.
    pub fn error_message(&self) -> Option<ErrorMessage> {
        if !self.is_error() {
            return None;
        }
        Some(self.payload.decode::<ErrorMessage>().unwrap_or_else(|_| {
            ErrorMessage::new(
                crate::error::ErrorCode::Undefined,
                format!("error payload '{}'", self.payload.type_name()),
            )
        }))
    }

    /// Turn an Error envelope into `Err(RemactError::Remote)`.
    pub fn into_result(self) -> Result<Self> {
        match self.error_message() {
            Some(err) => Err(RemactError::Remote(err)),
            None => Ok(self),
        }
    }
}
