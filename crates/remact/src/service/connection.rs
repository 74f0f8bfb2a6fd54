// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connected-client records of a service port.
//!
//! Slots are index addressed: `client_id = index + first_client_id`. A slot
//! is created on first connect and reused on every reconnect of the same
//! client, so the id stays stable. A slot whose client is identified by a
//! recycled OS process id is retired (marked unusable) once that process is
//! known to be gone.

use super::proxy::ServiceUserProxy;
use crate::actor_info::{ActorInfo, Usage};
use crate::error::{ErrorCode, ErrorMessage};
use crate::message::{
    Payload, RemactMessage, CONNECT_METHOD, DISCONNECT_METHOD, KEEP_ALIVE_METHOD,
};
use crate::transport::{ClientChannel, PortState};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Result of [`ServiceConnection::check_basic_response`].
#[derive(Debug)]
pub enum BasicOutcome {
    /// Handled internally; send this reply on the requesting channel.
    Reply(RemactMessage),
    /// Application message from a known client.
    Forward { client_id: i32, client: ActorInfo },
    /// Handled internally, nothing to send.
    Consumed,
}

/// Record of one client.
#[derive(Debug)]
pub struct ClientSlot {
    identity: ActorInfo,
    proxy: ServiceUserProxy,
    unusable: bool,
    connect_count: u32,
    request_count: u64,
}

/// Snapshot of a slot, for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSlotInfo {
    pub client_id: i32,
    pub name: String,
    pub app_name: String,
    pub state: PortState,
    pub unusable: bool,
    pub connect_count: u32,
    pub request_count: u64,
}

/// Client table of one service port.
#[derive(Debug)]
pub struct ServiceConnection {
    service: ActorInfo,
    first_client_id: i32,
    default_timeout_secs: u32,
    clients: Vec<ClientSlot>,
}

impl ServiceConnection {
    pub fn new(service: ActorInfo, first_client_id: i32, default_timeout_secs: u32) -> Self {
        Self {
            service,
            first_client_id,
            default_timeout_secs,
            clients: Vec::new(),
        }
    }

    pub fn service(&self) -> &ActorInfo {
        &self.service
    }

    pub fn set_open(&mut self, open: bool) {
        self.service.is_open = open;
    }

    /// Address the transport actually bound.
    pub fn set_uri(&mut self, uri: &str) {
        self.service.uri = Some(uri.to_string());
    }

    /// Number of clients currently connected.
    pub fn connected_count(&self) -> usize {
        self.clients
            .iter()
            .filter(|s| s.proxy.state() == PortState::Ok)
            .count()
    }

    pub fn clients(&self) -> Vec<ClientSlotInfo> {
        self.clients
            .iter()
            .map(|s| ClientSlotInfo {
                client_id: s.proxy.client_id(),
                name: s.identity.name.clone(),
                app_name: s.identity.app_name.clone(),
                state: s.proxy.state(),
                unusable: s.unusable,
                connect_count: s.connect_count,
                request_count: s.request_count,
            })
            .collect()
    }

    fn index_of(&self, client_id: i32) -> Option<usize> {
        let index = usize::try_from(client_id.checked_sub(self.first_client_id)?).ok()?;
        (index < self.clients.len()).then_some(index)
    }

    /// Entry point for every inbound message.
    pub fn check_basic_response(
        &mut self,
        msg: &RemactMessage,
        channel: &Arc<dyn ClientChannel>,
    ) -> BasicOutcome {
        match msg.destination_method.as_str() {
            CONNECT_METHOD => return BasicOutcome::Reply(self.connect_partner(msg, channel)),
            DISCONNECT_METHOD => {
                return match self.disconnect_partner(msg) {
                    Some(reply) => BasicOutcome::Reply(reply),
                    None => BasicOutcome::Consumed,
                }
            }
            KEEP_ALIVE_METHOD => {
                if let Some(index) = self.index_of(msg.client_id) {
                    self.clients[index].proxy.touch();
                }
                trace!("keep-alive from client {}", msg.client_id);
                return BasicOutcome::Consumed;
            }
            _ => {}
        }

        if msg.is_reserved() {
            warn!("unknown reserved method '{}'", msg.destination_method);
            return self.reject(msg, ErrorCode::UnexpectedMessageType, "unknown reserved method");
        }

        let Some(index) = self.index_of(msg.client_id).filter(|i| !self.clients[*i].unusable)
        else {
            warn!(
                "service '{}': unknown client id {} for '{}'",
                self.service.name, msg.client_id, msg.destination_method
            );
            return self.reject(
                msg,
                ErrorCode::ClientIdNotFoundOnService,
                &format!("client id {} not connected", msg.client_id),
            );
        };

        let timeout = self.timeout_for(&self.clients[index].identity);
        let slot = &mut self.clients[index];
        slot.proxy.touch();
        slot.request_count += 1;
        if slot.proxy.state() != PortState::Ok {
            warn!(
                "client {} sent '{}' without connecting; marking it connected",
                msg.client_id, msg.destination_method
            );
            slot.proxy.attach(Arc::clone(channel), timeout);
        } else if slot.proxy.channel_id() != Some(channel.channel_id()) {
            debug!("client {} moved to a new connection", msg.client_id);
            slot.proxy.attach(Arc::clone(channel), timeout);
        }

        BasicOutcome::Forward {
            client_id: msg.client_id,
            client: slot.identity.clone(),
        }
    }

    fn reject(&self, msg: &RemactMessage, code: ErrorCode, text: &str) -> BasicOutcome {
        if msg.is_request() {
            BasicOutcome::Reply(msg.error_to(&ErrorMessage::new(code, text)))
        } else {
            BasicOutcome::Consumed
        }
    }

    fn timeout_for(&self, client: &ActorInfo) -> u32 {
        if client.timeout_seconds > 0 {
            client.timeout_seconds
        } else {
            self.default_timeout_secs
        }
    }

    /// Handle a connect request and build the reply.
    pub fn connect_partner(
        &mut self,
        msg: &RemactMessage,
        channel: &Arc<dyn ClientChannel>,
    ) -> RemactMessage {
        if !msg.is_request() {
            warn!("connect must be a request, got {:?}", msg.message_type);
            return msg.error_to(&ErrorMessage::new(
                ErrorCode::UnexpectedMessageType,
                "connect must be a request",
            ));
        }
        let client: ActorInfo = match msg.payload.decode() {
            Ok(client) => client,
            Err(e) => {
                warn!("connect without client identity: {}", e);
                return msg.error_to(&ErrorMessage::new(ErrorCode::UnexpectedMessageType, e.to_string()));
            }
        };

        let index = if msg.client_id == 0 {
            self.slot_for_new_process(&client)
        } else {
            match self.index_of(msg.client_id) {
                None => {
                    warn!(
                        "client {} reconnects with unknown client id {}",
                        client.describe(),
                        msg.client_id
                    );
                    return msg.error_to(&ErrorMessage::new(
                        ErrorCode::ClientIdNotFoundOnService,
                        format!("client id {} not known", msg.client_id),
                    ));
                }
                Some(index)
                    if self.clients[index].unusable
                        || !self.clients[index].identity.is_equal_to(&client) =>
                {
                    debug!(
                        "client id {} does not belong to {}; treating as new process",
                        msg.client_id,
                        client.describe()
                    );
                    self.slot_for_new_process(&client)
                }
                Some(index) => {
                    match self.clients[index].proxy.state() {
                        PortState::Ok => warn!(
                            "client {} reconnects while still connected",
                            msg.client_id
                        ),
                        PortState::Faulted => {
                            info!("client {} reconnects after a fault", msg.client_id)
                        }
                        _ => debug!("client {} reconnects", msg.client_id),
                    }
                    index
                }
            }
        };

        let client_id = self.first_client_id + index as i32;
        let timeout = self.timeout_for(&client);
        let slot = &mut self.clients[index];
        if let Some(old) = slot.proxy.channel_id() {
            if old != channel.channel_id() {
                if let Some(previous) = slot.proxy.detach(PortState::Disconnected) {
                    previous.close();
                }
            }
        }
        slot.identity = client;
        slot.proxy.attach(Arc::clone(channel), timeout);
        slot.connect_count += 1;
        info!(
            "service '{}': client {} connected as {} ({} connected)",
            self.service.name,
            self.clients[index].identity.describe(),
            client_id,
            self.connected_count()
        );

        let mut identity = self.service.with_usage(Usage::ServiceConnectResponse);
        identity.is_open = true;
        let mut reply = msg.response_to(Payload::new(&identity));
        reply.client_id = client_id;
        reply
    }

    /// Reuse the slot of a restarted client or append a new one.
    fn slot_for_new_process(&mut self, client: &ActorInfo) -> usize {
        if let Some(index) = self
            .clients
            .iter()
            .position(|s| !s.unusable && s.identity.is_equal_to(client))
        {
            info!(
                "client {} restarted; reusing client id {}",
                client.describe(),
                self.first_client_id + index as i32
            );
            return index;
        }
        let client_id = self.first_client_id + self.clients.len() as i32;
        self.clients.push(ClientSlot {
            identity: client.clone(),
            proxy: ServiceUserProxy::new(client_id, self.timeout_for(client)),
            unusable: false,
            connect_count: 0,
            request_count: 0,
        });
        self.clients.len() - 1
    }

    /// Handle a disconnect. Returns a reply when the message was a request.
    pub fn disconnect_partner(&mut self, msg: &RemactMessage) -> Option<RemactMessage> {
        let reply_error = |code: ErrorCode, text: String| {
            msg.is_request()
                .then(|| msg.error_to(&ErrorMessage::new(code, text)))
        };

        let client: ActorInfo = match msg.payload.decode() {
            Ok(client) => client,
            Err(e) => {
                warn!("disconnect without client identity: {}", e);
                return reply_error(ErrorCode::UnexpectedMessageType, e.to_string());
            }
        };
        let Some(index) = self.index_of(msg.client_id) else {
            warn!(
                "disconnect from {} with unknown client id {}",
                client.describe(),
                msg.client_id
            );
            return reply_error(
                ErrorCode::ClientIdNotFoundOnService,
                format!("client id {} not known", msg.client_id),
            );
        };

        let slot = &mut self.clients[index];
        if !slot.identity.is_equal_to(&client) {
            warn!(
                "disconnect for client id {} from {}, slot belongs to {}",
                msg.client_id,
                client.describe(),
                slot.identity.describe()
            );
            return reply_error(
                ErrorCode::ClientIdentityMismatch,
                format!("client id {} belongs to another client", msg.client_id),
            );
        }

        slot.proxy.detach(PortState::Disconnected);
        if slot.identity.is_process_bound() {
            slot.unusable = true;
        }
        info!(
            "service '{}': client {} disconnected",
            self.service.name, msg.client_id
        );

        msg.is_request().then(|| {
            msg.response_to(Payload::new(
                &self.service.with_usage(Usage::ServiceDisconnectResponse),
            ))
        })
    }

    /// Advance all liveness timers. Returns true when a slot changed state.
    pub fn do_periodic_tasks(&mut self, elapsed_ms: u64) -> bool {
        let mut changed = false;
        for slot in &mut self.clients {
            if !slot.proxy.test_channel(elapsed_ms) {
                continue;
            }
            changed = true;
            warn!(
                "service '{}': client {} timed out after {} ms",
                self.service.name,
                slot.proxy.client_id(),
                slot.proxy.timeout_ms()
            );
            if let Some(channel) = slot.proxy.detach(PortState::Faulted) {
                channel.close();
            }
            if slot.identity.is_process_bound() {
                slot.unusable = true;
            }
        }
        changed
    }

    /// The transport lost the connection `channel_id`.
    pub fn on_client_disconnect(&mut self, channel_id: u64) -> bool {
        let mut changed = false;
        for slot in &mut self.clients {
            if slot.proxy.channel_id() == Some(channel_id) && slot.proxy.state() == PortState::Ok {
                info!(
                    "service '{}': connection of client {} lost",
                    self.service.name,
                    slot.proxy.client_id()
                );
                slot.proxy.detach(PortState::Faulted);
                changed = true;
            }
        }
        changed
    }

    /// Forward a message to a client through its proxy.
    pub fn post_input(&mut self, client_id: i32, msg: RemactMessage) -> bool {
        match self.index_of(client_id) {
            Some(index) => self.clients[index].proxy.post_input(msg),
            None => {
                warn!("no client {} for '{}'", client_id, msg.destination_method);
                false
            }
        }
    }

    /// Send a notification to every connected client.
    pub fn broadcast(&mut self, msg: &RemactMessage) -> usize {
        let mut sent = 0;
        for slot in &mut self.clients {
            if slot.proxy.state() != PortState::Ok {
                continue;
            }
            let mut copy = msg.clone();
            copy.client_id = slot.proxy.client_id();
            if slot.proxy.post_input(copy) {
                sent += 1;
            }
        }
        sent
    }

    /// Close every client connection.
    pub fn disconnect_all(&mut self) {
        for slot in &mut self.clients {
            if let Some(channel) = slot.proxy.detach(PortState::Disconnected) {
                channel.close();
            }
        }
    }
}
