// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service-side stand-in for one connected client.

use crate::message::RemactMessage;
use crate::transport::{ClientChannel, PortState};
use std::sync::Arc;
use tracing::{trace, warn};

/// Outbound path from a service port to one client, plus its liveness
/// timer.
pub struct ServiceUserProxy {
    client_id: i32,
    channel: Option<Arc<dyn ClientChannel>>,
    timeout_ms: u64,
    ms_since_inbound: u64,
    ms_since_sent: u64,
    state: PortState,
}

impl ServiceUserProxy {
    pub fn new(client_id: i32, timeout_secs: u32) -> Self {
        Self {
            client_id,
            channel: None,
            timeout_ms: u64::from(timeout_secs) * 1000,
            ms_since_inbound: 0,
            ms_since_sent: 0,
            state: PortState::Disconnected,
        }
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Id of the attached transport connection.
    pub fn channel_id(&self) -> Option<u64> {
        self.channel.as_ref().map(|c| c.channel_id())
    }

    /// Bind to a transport connection and mark the client connected.
    pub fn attach(&mut self, channel: Arc<dyn ClientChannel>, timeout_secs: u32) {
        self.channel = Some(channel);
        self.timeout_ms = u64::from(timeout_secs) * 1000;
        self.state = PortState::Ok;
        self.ms_since_inbound = 0;
        self.ms_since_sent = 0;
    }

    /// Drop the transport connection and set the new state.
    pub fn detach(&mut self, state: PortState) -> Option<Arc<dyn ClientChannel>> {
        self.state = state;
        self.channel.take()
    }

    /// Inbound traffic from the client.
    pub fn touch(&mut self) {
        self.ms_since_inbound = 0;
    }

    /// Forward a message to the client.
    ///
    /// When the client has gone away the message is dropped with a warning.
    pub fn post_input(&mut self, msg: RemactMessage) -> bool {
        let channel = match &self.channel {
            Some(channel) if channel.is_open() => channel,
            _ => {
                warn!(
                    "client {} is gone; dropping {:?} '{}'",
                    self.client_id, msg.message_type, msg.destination_method
                );
                return false;
            }
        };
        match channel.message_to_client(msg) {
            Ok(()) => {
                self.ms_since_sent = 0;
                true
            }
            Err(e) => {
                warn!("send to client {} failed: {}", self.client_id, e);
                false
            }
        }
    }

    /// Advance the liveness timer.
    ///
    /// Sends a keep-alive after half the timeout window without outbound
    /// traffic. Returns true when the client just timed out; the proxy is
    /// then `Faulted`.
    pub fn test_channel(&mut self, elapsed_ms: u64) -> bool {
        if self.state != PortState::Ok {
            return false;
        }
        self.ms_since_inbound = self.ms_since_inbound.saturating_add(elapsed_ms);
        self.ms_since_sent = self.ms_since_sent.saturating_add(elapsed_ms);

        if self.ms_since_inbound > self.timeout_ms {
            self.state = PortState::Faulted;
            return true;
        }
        if self.ms_since_sent >= self.timeout_ms / 2 {
            trace!("keep-alive to client {}", self.client_id);
            self.post_input(RemactMessage::keep_alive(self.client_id));
        }
        false
    }
}

impl std::fmt::Debug for ServiceUserProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceUserProxy")
            .field("client_id", &self.client_id)
            .field("state", &self.state)
            .field("channel", &self.channel_id())
            .field("ms_since_inbound", &self.ms_since_inbound)
            .finish()
    }
}
