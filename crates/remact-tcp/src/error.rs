// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP transport errors.

use remact::RemactError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TcpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("empty frame")]
    EmptyFrame,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("no service '{0}' on this port")]
    UnknownService(String),

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),
}

impl From<TcpError> for RemactError {
    fn from(e: TcpError) -> Self {
        match e {
            TcpError::InvalidUri { uri, reason } => RemactError::InvalidUri { uri, reason },
            other => RemactError::Transport(other.to_string()),
        }
    }
}
