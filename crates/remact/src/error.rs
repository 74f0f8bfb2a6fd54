// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types.
//!
//! Two layers:
//! - [`ErrorCode`] / [`ErrorMessage`] travel inside Error envelopes between
//!   ports and are visible to both sides of a connection.
//! - [`RemactError`] is the local Rust error returned by port operations.

use crate::transport::PortState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error codes carried by Error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    Undefined,
    /// The client port is not connected.
    NotConnected,
    /// No address of the service could be opened.
    CouldNotConnect,
    /// The connection was lost before a response arrived.
    CouldNotSend,
    /// The service has no slot for the client id in the envelope.
    ClientIdNotFoundOnService,
    /// The identity sent with a disconnect does not match the slot.
    ClientIdentityMismatch,
    /// A message type or reserved method was not expected here.
    UnexpectedMessageType,
    /// A response arrived for a request id that is not outstanding.
    ResponseNotCorrelated,
    /// No handler is registered for the method or payload type.
    MethodNotFoundOnService,
    /// A service handler returned an error or panicked.
    UnhandledExceptionOnService,
    /// The catalog does not know an open service with this name.
    ServiceNameNotRegisteredInCatalog,
    /// Another instance with a longer run time owns the service name.
    ServiceIsBackup,
    /// The service port is closed.
    ServiceNotRunning,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Payload of an Error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    #[serde(default)]
    pub text: String,
}

impl ErrorMessage {
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Wrap an application error raised inside a service handler.
    pub fn unhandled(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::UnhandledExceptionOnService, err.to_string())
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.text)
        }
    }
}

impl std::error::Error for ErrorMessage {}

/// Errors returned by port, catalog and transport operations.
#[derive(Debug, Error)]
pub enum RemactError {
    #[error("port is {0:?}; connect requires Disconnected or Faulted")]
    InvalidState(PortState),

    #[error("not connected to service '{0}'")]
    NotConnected(String),

    #[error("cannot connect to '{service}': {reason}")]
    ConnectFailed { service: String, reason: String },

    #[error("remote error {}", .0)]
    Remote(ErrorMessage),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no execution context bound to the port; pass a context handle or use multithreaded mode")]
    NoExecutionContext,

    #[error("payload type mismatch: expected '{expected}', got '{actual}'")]
    PayloadMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

impl RemactError {
    /// Error code when this error was reported by the remote side.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote(msg) => Some(msg.code),
            _ => None,
        }
    }
}

impl From<ErrorMessage> for RemactError {
    fn from(msg: ErrorMessage) -> Self {
        Self::Remote(msg)
    }
}

/// Result alias for remact operations.
pub type Result<T> = std::result::Result<T, RemactError>;
