// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver contract between ports and transports.
//!
//! A transport opens outbound connections for client ports
//! ([`Transport::open`]) and accepts inbound connections for service ports
//! ([`Transport::listen`]). Inbound traffic is pushed into the port through
//! [`ClientCallback`] (client side) and [`IncomingHandler`] (service side).
//!
//! Send operations must not block: implementations queue the message and
//! write it from their own task.

pub mod memory;

use crate::error::Result;
use crate::message::RemactMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use memory::MemoryTransport;

/// Connection state of a port or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PortState {
    #[default]
    Disconnected,
    Connecting,
    /// Connected and usable.
    Ok,
    Faulted,
}

impl PortState {
    /// A new connect may start from this state.
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Faulted)
    }
}

/// Inbound events for a client port.
pub trait ClientCallback: Send + Sync {
    fn on_message_to_client(&self, msg: RemactMessage);

    /// The connection to the service is gone.
    fn on_service_disconnect(&self);
}

/// Outbound connection from a client port to a service.
pub trait ServiceChannel: Send + Sync {
    fn message_to_service(&self, msg: RemactMessage) -> Result<()>;

    fn port_state(&self) -> PortState;

    /// Close without notifying the local callback.
    fn close(&self);
}

/// Outbound connection from a service port to one client.
pub trait ClientChannel: Send + Sync {
    fn message_to_client(&self, msg: RemactMessage) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Transport-unique id of this connection.
    fn channel_id(&self) -> u64;

    fn close(&self);
}

/// Inbound events for a service port.
pub trait IncomingHandler: Send + Sync {
    fn on_message_from_client(&self, msg: RemactMessage, channel: Arc<dyn ClientChannel>);

    /// The transport lost the connection with the given id.
    fn on_client_disconnect(&self, channel_id: u64);
}

/// Handle of a listening endpoint.
pub trait Listener: Send + Sync {
    fn uri(&self) -> &str;

    /// Stop accepting connections.
    fn close(&self);
}

/// Pluggable transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to the service at `uri`.
    async fn open(
        &self,
        uri: &str,
        callback: Arc<dyn ClientCallback>,
    ) -> Result<Arc<dyn ServiceChannel>>;

    /// Accept connections for a service at `uri`.
    async fn listen(&self, uri: &str, handler: Arc<dyn IncomingHandler>)
        -> Result<Box<dyn Listener>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_connect() {
        assert!(PortState::Disconnected.can_connect());
        assert!(PortState::Faulted.can_connect());
        assert!(!PortState::Connecting.can_connect());
        assert!(!PortState::Ok.can_connect());
    }
}
