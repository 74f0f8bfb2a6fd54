// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client port.
//!
//! A [`ClientPort`] connects to one service, either at a fixed URI or
//! through a catalog lookup, and correlates requests with responses.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake ok--> Ok
//!      ^                          |                         |
//!      |                          +--error--> Faulted <-----+ (connection lost / timeout)
//!      +----------------disconnect()-------------------------+
//! ```
//!
//! Both `Disconnected` and `Faulted` accept a new `connect()`. Every request
//! still outstanding when the connection goes away is answered with a
//! `CouldNotSend` error, exactly once.
//!
//! # Example
//!
//! ```rust,no_run
//! use remact::{ClientPort, MemoryTransport, ThreadingMode, Payload};
//! use std::sync::Arc;
//!
//! # async fn example() -> remact::Result<()> {
//! let transport = Arc::new(MemoryTransport::new());
//! let client = ClientPort::builder("Console", transport)
//!     .service_uri("mem://plant-7:40001/Echo")
//!     .threading(ThreadingMode::Multithreaded)
//!     .build()?;
//! client.connect().await?;
//! let reply = client.call("Echo", Payload::empty()).await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod outstanding;

pub use outstanding::{OutstandingRequests, PendingRequest, ResponseSink};

use crate::actor_info::{ActorInfo, HostIdentity, Usage};
use crate::catalog::CatalogClient;
use crate::config::ClientConfig;
use crate::dispatch::{ContextHandle, Dispatcher, ThreadingMode};
use crate::error::{ErrorCode, ErrorMessage, RemactError, Result};
use crate::handler::NotificationTable;
use crate::message::{
    MessageType, Payload, PayloadType, RemactMessage, CONNECT_METHOD, DISCONNECT_METHOD,
    KEEP_ALIVE_METHOD,
};
use crate::transport::{ClientCallback, PortState, ServiceChannel, Transport};
use parking_lot::{Mutex, RwLock};
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// How the port finds its service.
#[derive(Debug, Clone)]
enum Target {
    Direct { uri: String, addresses: Vec<IpAddr> },
    Lookup { service_name: String },
}

struct ClientState {
    port_state: PortState,
    /// Bumped on every connect and disconnect; transport callbacks carry
    /// the value of the attempt that created them.
    epoch: u64,
    channel: Option<Arc<dyn ServiceChannel>>,
    client_id: i32,
    service: Option<ActorInfo>,
    addresses_tried: usize,
    last_error: Option<String>,
    ms_since_inbound: u64,
    ms_since_sent: u64,
    /// Successful connects over the port's lifetime.
    connect_count: u64,
}

struct ClientInner {
    name: String,
    host: HostIdentity,
    target: Target,
    transport: Arc<dyn Transport>,
    catalog: Option<Arc<CatalogClient>>,
    dispatcher: Dispatcher,
    config: ClientConfig,
    state: Mutex<ClientState>,
    outstanding: Mutex<OutstandingRequests>,
    notifications: RwLock<NotificationTable>,
}

/// Client side of a connection to one service.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ClientPort {
    inner: Arc<ClientInner>,
}

/// Non-owning reference to a [`ClientPort`].
#[derive(Clone)]
pub struct WeakClientPort(Weak<ClientInner>);

impl WeakClientPort {
    pub fn upgrade(&self) -> Option<ClientPort> {
        self.0.upgrade().map(|inner| ClientPort { inner })
    }

    pub fn points_to(&self, port: &ClientPort) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&port.inner))
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl std::fmt::Debug for WeakClientPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.0.upgrade().map(|inner| inner.name.clone());
        f.debug_struct("WeakClientPort").field("name", &name).finish()
    }
}

/// Builder for [`ClientPort`].
pub struct ClientPortBuilder {
    name: String,
    transport: Arc<dyn Transport>,
    host: Option<HostIdentity>,
    uri: Option<String>,
    addresses: Vec<IpAddr>,
    lookup: Option<String>,
    catalog: Option<Arc<CatalogClient>>,
    context: Option<ContextHandle>,
    config: ClientConfig,
}

impl ClientPortBuilder {
    pub fn host(mut self, host: HostIdentity) -> Self {
        self.host = Some(host);
        self
    }

    /// Connect to a fixed URI.
    pub fn service_uri(mut self, uri: &str) -> Self {
        self.uri = Some(uri.to_string());
        self
    }

    /// Addresses tried in order when the service URI cannot be opened.
    pub fn addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.addresses = addresses;
        self
    }

    /// Resolve the service through the catalog on every connect.
    pub fn lookup(mut self, service_name: &str, catalog: Arc<CatalogClient>) -> Self {
        self.lookup = Some(service_name.to_string());
        self.catalog = Some(catalog);
        self
    }

    /// Register with a catalog client for coordinated shutdown only.
    pub fn catalog(mut self, catalog: Arc<CatalogClient>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Execution context for handlers (single-context mode).
    pub fn context(mut self, handle: ContextHandle) -> Self {
        self.context = Some(handle);
        self
    }

    pub fn threading(mut self, mode: ThreadingMode) -> Self {
        self.config.threading = mode;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ClientPort> {
        let dispatcher = Dispatcher::for_mode(self.config.threading, self.context)?;
        let target = match (self.lookup, self.uri) {
            (Some(service_name), _) => {
                if self.catalog.is_none() {
                    return Err(RemactError::Config(format!(
                        "client '{}' looks up '{}' without a catalog client",
                        self.name, service_name
                    )));
                }
                Target::Lookup { service_name }
            }
            (None, Some(uri)) => Target::Direct {
                uri,
                addresses: self.addresses,
            },
            (None, None) => {
                return Err(RemactError::Config(format!(
                    "client '{}' needs a service uri or a catalog lookup",
                    self.name
                )))
            }
        };
        let host = self
            .host
            .unwrap_or_else(|| HostIdentity::current(&self.name, 0));

        Ok(ClientPort {
            inner: Arc::new(ClientInner {
                name: self.name,
                host,
                target,
                transport: self.transport,
                catalog: self.catalog,
                dispatcher,
                config: self.config,
                state: Mutex::new(ClientState {
                    port_state: PortState::Disconnected,
                    epoch: 0,
                    channel: None,
                    client_id: 0,
                    service: None,
                    addresses_tried: 0,
                    last_error: None,
                    ms_since_inbound: 0,
                    ms_since_sent: 0,
                    connect_count: 0,
                }),
                outstanding: Mutex::new(OutstandingRequests::new()),
                notifications: RwLock::new(NotificationTable::new()),
            }),
        })
    }
}

impl ClientPort {
    pub fn builder(name: &str, transport: Arc<dyn Transport>) -> ClientPortBuilder {
        ClientPortBuilder {
            name: name.to_string(),
            transport,
            host: None,
            uri: None,
            addresses: Vec::new(),
            lookup: None,
            catalog: None,
            context: None,
            config: ClientConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> PortState {
        self.inner.state.lock().port_state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PortState::Ok
    }

    /// Id assigned by the service; 0 before the first connect.
    pub fn client_id(&self) -> i32 {
        self.inner.state.lock().client_id
    }

    /// Identity the service sent on the last successful connect.
    pub fn service_identity(&self) -> Option<ActorInfo> {
        self.inner.state.lock().service.clone()
    }

    /// Alternative addresses attempted by the last connect.
    pub fn addresses_tried(&self) -> usize {
        self.inner.state.lock().addresses_tried
    }

    /// Number of successful connects; changes whenever the port reconnects.
    pub fn connect_count(&self) -> u64 {
        self.inner.state.lock().connect_count
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.outstanding.lock().len()
    }

    /// Identity announced to services.
    pub fn identity(&self) -> ActorInfo {
        self.inner.identity()
    }

    pub fn downgrade(&self) -> WeakClientPort {
        WeakClientPort(Arc::downgrade(&self.inner))
    }

    /// Handle notifications sent to `method`.
    pub fn on_notification<F>(&self, method: &str, f: F)
    where
        F: Fn(&RemactMessage) + Send + Sync + 'static,
    {
        self.inner.notifications.write().on_method(method, f);
    }

    /// Handle notifications carrying payload type `T`.
    pub fn on_notification_type<T, F>(&self, f: F)
    where
        T: PayloadType + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.inner.notifications.write().on_type(f);
    }

    /// Handle unmatched notifications, uncorrelated errors and responses
    /// to requests posted without a sink.
    pub fn on_unhandled<F>(&self, f: F)
    where
        F: Fn(&RemactMessage) + Send + Sync + 'static,
    {
        self.inner.notifications.write().fallback(f);
    }

    /// Look up (if configured), open the transport and run the connect
    /// handshake.
    ///
    /// Returns the service identity. On failure the port is `Faulted`.
    pub async fn connect(&self) -> Result<ActorInfo> {
        let epoch = {
            let mut st = self.inner.state.lock();
            if !st.port_state.can_connect() {
                return Err(RemactError::InvalidState(st.port_state));
            }
            st.port_state = PortState::Connecting;
            st.epoch += 1;
            st.addresses_tried = 0;
            st.last_error = None;
            st.epoch
        };
        debug!(
            "client '{}' connecting to {}",
            self.inner.name,
            self.inner.target_name()
        );

        let mut attempt = ConnectAttempt {
            inner: &self.inner,
            epoch,
            finished: false,
        };
        let result = self.inner.establish(epoch).await;
        attempt.finished = true;
        if let Err(e) = &result {
            self.inner.fault(epoch, &e.to_string());
        }
        result
    }

    /// Gracefully close the connection.
    ///
    /// Outstanding requests are answered with `CouldNotSend`.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let (channel, was_connected, client_id, drained) = {
            let mut st = inner.state.lock();
            if st.port_state == PortState::Disconnected {
                return;
            }
            let was_connected = st.port_state == PortState::Ok;
            st.port_state = PortState::Disconnected;
            st.epoch += 1;
            let drained = inner.outstanding.lock().drain();
            (st.channel.take(), was_connected, st.client_id, drained)
        };

        if let Some(channel) = channel {
            if was_connected {
                let identity = inner.identity().with_usage(Usage::ClientDisconnectRequest);
                let mut bye = RemactMessage::notification(DISCONNECT_METHOD, Payload::new(&identity));
                bye.client_id = client_id;
                if let Err(e) = channel.message_to_service(bye) {
                    debug!("client '{}': disconnect notification not sent: {}", inner.name, e);
                }
            }
            channel.close();
        }
        inner.fail_pending(drained, "client disconnected");

        if let Some(catalog) = &inner.catalog {
            catalog.remove_client(self);
        }
        info!("client '{}' disconnected from {}", inner.name, inner.target_name());
    }

    /// Send a message.
    ///
    /// Requests get a fresh request id and are recorded until answered; the
    /// answer goes to `sink`, or to the unhandled handler when `sink` is
    /// `None`. Returns the request id (0 for notifications).
    pub fn post_input(&self, mut msg: RemactMessage, sink: Option<ResponseSink>) -> Result<i32> {
        let inner = &self.inner;
        // Recorded under the state lock so a concurrent loss of connection
        // either refuses the send or drains the new entry.
        let (channel, request_id) = {
            let mut st = inner.state.lock();
            let channel = match (&st.channel, st.port_state) {
                (Some(channel), PortState::Ok) => Arc::clone(channel),
                _ => return Err(RemactError::NotConnected(inner.target_name())),
            };
            msg.client_id = st.client_id;
            st.ms_since_sent = 0;

            let request_id = if msg.message_type == MessageType::Request {
                let sink = sink.unwrap_or_else(|| inner.unhandled_sink());
                let mut out = inner.outstanding.lock();
                msg.request_id = out.next_request_id();
                out.insert(PendingRequest::new(&msg, sink));
                msg.request_id
            } else {
                msg.request_id = 0;
                0
            };
            (channel, request_id)
        };

        trace!(
            "client '{}' -> {:?} '{}' #{}",
            inner.name,
            msg.message_type,
            msg.destination_method,
            request_id
        );
        if let Err(e) = channel.message_to_service(msg) {
            // Already drained: the sink has had its CouldNotSend answer.
            if request_id != 0 && inner.outstanding.lock().take(request_id).is_none() {
                return Ok(request_id);
            }
            return Err(e);
        }
        Ok(request_id)
    }

    /// Send a request; `on_response` runs through the port's dispatcher.
    pub fn send_request<F>(&self, method: &str, payload: Payload, on_response: F) -> Result<i32>
    where
        F: FnOnce(RemactMessage) + Send + 'static,
    {
        self.post_input(
            RemactMessage::request(method, payload),
            Some(ResponseSink::callback(on_response)),
        )
    }

    /// Send a notification.
    pub fn notify(&self, method: &str, payload: Payload) -> Result<()> {
        self.post_input(RemactMessage::notification(method, payload), None)
            .map(|_| ())
    }

    /// Send a request and wait for its response.
    ///
    /// An Error envelope becomes `Err(RemactError::Remote)`.
    pub async fn call(&self, method: &str, payload: Payload) -> Result<RemactMessage> {
        let (tx, rx) = oneshot::channel();
        let request_id = self.post_input(
            RemactMessage::request(method, payload),
            Some(ResponseSink::Waiter(tx)),
        )?;
        let timeout = self.inner.config.request_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(msg)) => msg.into_result(),
            Ok(Err(_)) => Err(RemactError::Remote(ErrorMessage::new(
                ErrorCode::CouldNotSend,
                format!("request {} was evicted", request_id),
            ))),
            Err(_) => {
                self.inner.outstanding.lock().take(request_id);
                Err(RemactError::Timeout(timeout))
            }
        }
    }

    /// Typed [`call`](Self::call).
    pub async fn ask<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: PayloadType,
        Resp: PayloadType,
    {
        let response = self.call(method, Payload::new(request)).await?;
        response.payload.decode()
    }

    /// Advance liveness timers by `elapsed_ms`.
    ///
    /// Sends a keep-alive after half the timeout window without outbound
    /// traffic and faults the port after a full window without inbound
    /// traffic. Returns true when the state changed.
    pub fn do_periodic_tasks(&self, elapsed_ms: u64) -> bool {
        let inner = &self.inner;
        let (channel, client_id, epoch, timed_out) = {
            let mut st = inner.state.lock();
            if st.port_state != PortState::Ok {
                return false;
            }
            st.ms_since_inbound = st.ms_since_inbound.saturating_add(elapsed_ms);
            st.ms_since_sent = st.ms_since_sent.saturating_add(elapsed_ms);
            let timeout_secs = st
                .service
                .as_ref()
                .map(|s| s.timeout_seconds)
                .filter(|t| *t > 0)
                .unwrap_or(inner.config.timeout_secs);
            let timeout_ms = u64::from(timeout_secs) * 1000;

            if st.ms_since_inbound > timeout_ms {
                (None, st.client_id, st.epoch, true)
            } else if st.ms_since_sent >= timeout_ms / 2 {
                st.ms_since_sent = 0;
                (st.channel.clone(), st.client_id, st.epoch, false)
            } else {
                return false;
            }
        };

        if timed_out {
            inner.fault(epoch, "no traffic from service within timeout");
            return true;
        }
        if let Some(channel) = channel {
            if let Err(e) = channel.message_to_service(RemactMessage::keep_alive(client_id)) {
                debug!("client '{}': keep-alive not sent: {}", inner.name, e);
            }
        }
        false
    }
}

impl std::fmt::Debug for ClientPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPort")
            .field("name", &self.inner.name)
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .finish()
    }
}

/// Faults the port when a connect future is dropped before it finished.
struct ConnectAttempt<'a> {
    inner: &'a Arc<ClientInner>,
    epoch: u64,
    finished: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.fault(self.epoch, "connect cancelled");
        }
    }
}

impl ClientInner {
    fn identity(&self) -> ActorInfo {
        let mut info = ActorInfo::client(&self.name, &self.host);
        info.timeout_seconds = self.config.timeout_secs;
        info
    }

    fn target_name(&self) -> String {
        match &self.target {
            Target::Direct { uri, .. } => uri.clone(),
            Target::Lookup { service_name } => service_name.clone(),
        }
    }

    async fn establish(self: &Arc<Self>, epoch: u64) -> Result<ActorInfo> {
        let (uri, addresses) = self.resolve_target().await?;
        let callback: Arc<dyn ClientCallback> = Arc::new(CallbackAdapter {
            inner: Arc::downgrade(self),
            epoch,
        });
        let channel = self
            .open_first_reachable(epoch, &uri, &addresses, callback)
            .await?;

        let service = match self.handshake(epoch, &channel).await {
            Ok(service) => service,
            Err(e) => {
                channel.close();
                return Err(e);
            }
        };

        let client_id = {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                drop(st);
                channel.close();
                return Err(self.superseded());
            }
            // The transport may have dropped between the reply and here.
            if st.port_state != PortState::Connecting || st.channel.is_none() {
                drop(st);
                channel.close();
                return Err(RemactError::ConnectFailed {
                    service: self.target_name(),
                    reason: "connection lost during handshake".into(),
                });
            }
            st.port_state = PortState::Ok;
            st.connect_count += 1;
            st.service = Some(service.clone());
            st.ms_since_inbound = 0;
            st.ms_since_sent = 0;
            st.client_id
        };

        if let Some(catalog) = &self.catalog {
            catalog.add_client(WeakClientPort(Arc::downgrade(self)));
        }
        info!(
            "client '{}' connected to {} as client id {}",
            self.name,
            service.describe(),
            client_id
        );
        Ok(service)
    }

    async fn resolve_target(&self) -> Result<(String, Vec<IpAddr>)> {
        match &self.target {
            Target::Direct { uri, addresses } => Ok((uri.clone(), addresses.clone())),
            Target::Lookup { service_name } => {
                let catalog = self.catalog.as_ref().ok_or_else(|| {
                    RemactError::Config(format!("no catalog client to look up '{}'", service_name))
                })?;
                let info = catalog.lookup_service(service_name).await?;
                let uri = info.uri.clone().ok_or_else(|| RemactError::ConnectFailed {
                    service: service_name.clone(),
                    reason: "catalog entry has no uri".into(),
                })?;
                debug!("catalog resolved '{}' to {}", service_name, uri);
                Ok((uri, info.address_list))
            }
        }
    }

    /// Open the URI, then each alternative address in order.
    async fn open_first_reachable(
        &self,
        epoch: u64,
        uri: &str,
        addresses: &[IpAddr],
        callback: Arc<dyn ClientCallback>,
    ) -> Result<Arc<dyn ServiceChannel>> {
        let mut last_error = match self.transport.open(uri, Arc::clone(&callback)).await {
            Ok(channel) => return self.attach_channel(epoch, channel),
            Err(e) => e,
        };
        if !addresses.is_empty() {
            debug!(
                "client '{}': {} unreachable ({}), trying {} address(es) of {}",
                self.name,
                uri,
                last_error,
                addresses.len(),
                address::host_of(uri).unwrap_or_default()
            );
        }

        for addr in addresses {
            let candidate = match address::with_host(uri, *addr) {
                Ok(candidate) => candidate,
                Err(e) => {
                    last_error = e;
                    break;
                }
            };
            self.state.lock().addresses_tried += 1;
            match self.transport.open(&candidate, Arc::clone(&callback)).await {
                Ok(channel) => {
                    info!("client '{}' reached {} via {}", self.name, uri, candidate);
                    return self.attach_channel(epoch, channel);
                }
                Err(e) => {
                    debug!("client '{}': {} unreachable: {}", self.name, candidate, e);
                    last_error = e;
                }
            }
        }

        Err(RemactError::ConnectFailed {
            service: self.target_name(),
            reason: last_error.to_string(),
        })
    }

    fn attach_channel(
        &self,
        epoch: u64,
        channel: Arc<dyn ServiceChannel>,
    ) -> Result<Arc<dyn ServiceChannel>> {
        let mut st = self.state.lock();
        if st.epoch != epoch {
            drop(st);
            channel.close();
            return Err(self.superseded());
        }
        st.channel = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn handshake(&self, epoch: u64, channel: &Arc<dyn ServiceChannel>) -> Result<ActorInfo> {
        let identity = self.identity().with_usage(Usage::ClientConnectRequest);
        let mut request = RemactMessage::request(CONNECT_METHOD, Payload::new(&identity));
        request.client_id = self.state.lock().client_id;

        let (tx, rx) = oneshot::channel();
        {
            let mut out = self.outstanding.lock();
            request.request_id = out.next_request_id();
            out.insert(PendingRequest::new(&request, ResponseSink::Waiter(tx)));
        }
        let request_id = request.request_id;
        if let Err(e) = channel.message_to_service(request) {
            self.outstanding.lock().take(request_id);
            return Err(e);
        }

        let timeout = self.config.connect_timeout();
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) => {
                return Err(RemactError::ConnectFailed {
                    service: self.target_name(),
                    reason: "connect request dropped".into(),
                })
            }
            Err(_) => {
                self.outstanding.lock().take(request_id);
                return Err(RemactError::Timeout(timeout));
            }
        };

        let response = response.into_result()?;
        let service: ActorInfo = response.payload.decode()?;
        if !service.is_open || service.usage != Usage::ServiceConnectResponse {
            return Err(RemactError::ConnectFailed {
                service: self.target_name(),
                reason: format!(
                    "service answered {:?} (open: {})",
                    service.usage, service.is_open
                ),
            });
        }

        let mut st = self.state.lock();
        if st.epoch == epoch {
            st.client_id = response.client_id;
        }
        Ok(service)
    }

    fn superseded(&self) -> RemactError {
        RemactError::ConnectFailed {
            service: self.target_name(),
            reason: "superseded by disconnect".into(),
        }
    }

    /// Move the attempt `epoch` to Faulted and fail its pending requests.
    fn fault(&self, epoch: u64, reason: &str) {
        let (channel, drained) = {
            let mut st = self.state.lock();
            if st.epoch != epoch || st.port_state == PortState::Faulted {
                return;
            }
            st.port_state = PortState::Faulted;
            st.last_error = Some(reason.to_string());
            let drained = self.outstanding.lock().drain();
            (st.channel.take(), drained)
        };
        if let Some(channel) = channel {
            channel.close();
        }
        warn!("client '{}' faulted: {}", self.name, reason);
        self.fail_pending(drained, reason);
    }

    fn fail_pending(&self, drained: Vec<PendingRequest>, reason: &str) {
        for pending in drained {
            let error = pending.synthesize_error(ErrorCode::CouldNotSend, reason);
            pending.sink.deliver(error, &self.dispatcher);
        }
    }

    /// Sink for requests posted without one.
    fn unhandled_sink(self: &Arc<Self>) -> ResponseSink {
        let weak = Arc::downgrade(self);
        ResponseSink::callback(move |msg| {
            if let Some(inner) = weak.upgrade() {
                inner.run_notification_handler(&msg);
            }
        })
    }

    fn deliver_notification(self: &Arc<Self>, msg: RemactMessage) {
        let inner = Arc::clone(self);
        self.dispatcher
            .dispatch(move || inner.run_notification_handler(&msg));
    }

    fn run_notification_handler(&self, msg: &RemactMessage) {
        let handler = self.notifications.read().resolve(msg);
        match handler {
            Some(handler) => handler(msg),
            None => debug!(
                "client '{}': no handler for {:?} '{}'",
                self.name, msg.message_type, msg.destination_method
            ),
        }
    }

    fn on_message_to_client(self: &Arc<Self>, epoch: u64, msg: RemactMessage) {
        {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                trace!("client '{}': dropping message of a previous connection", self.name);
                return;
            }
            st.ms_since_inbound = 0;
        }

        match msg.message_type {
            MessageType::Response | MessageType::Error => {
                if msg.request_id == 0 && msg.is_error() {
                    self.deliver_notification(msg);
                    return;
                }
                let pending = self.outstanding.lock().take(msg.request_id);
                match pending {
                    Some(pending) => pending.sink.deliver(msg, &self.dispatcher),
                    None => {
                        let text = format!(
                            "no outstanding request {} for '{}'",
                            msg.request_id, msg.destination_method
                        );
                        warn!("client '{}': {}", self.name, text);
                        let mut error = RemactMessage::error(
                            0,
                            msg.client_id,
                            &ErrorMessage::new(ErrorCode::ResponseNotCorrelated, text),
                        );
                        error.destination_method = msg.destination_method;
                        self.deliver_notification(error);
                    }
                }
            }
            MessageType::Notification if msg.destination_method == KEEP_ALIVE_METHOD => {
                trace!("client '{}': keep-alive from service", self.name);
            }
            MessageType::Notification => self.deliver_notification(msg),
            MessageType::Request => {
                warn!(
                    "client '{}' cannot serve request '{}'",
                    self.name, msg.destination_method
                );
            }
        }
    }

    fn on_service_disconnect(&self, epoch: u64) {
        let drained = {
            let mut st = self.state.lock();
            if st.epoch != epoch
                || !matches!(st.port_state, PortState::Ok | PortState::Connecting)
            {
                return;
            }
            st.port_state = PortState::Faulted;
            st.channel = None;
            st.last_error = Some("connection to service lost".into());
            self.outstanding.lock().drain()
        };
        warn!(
            "client '{}' lost connection to {} ({} request(s) failed)",
            self.name,
            self.target_name(),
            drained.len()
        );
        self.fail_pending(drained, "connection to service lost");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(channel) = self.state.get_mut().channel.take() {
            channel.close();
        }
    }
}

/// Transport callback bound to one connect attempt.
struct CallbackAdapter {
    inner: Weak<ClientInner>,
    epoch: u64,
}

impl ClientCallback for CallbackAdapter {
    fn on_message_to_client(&self, msg: RemactMessage) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_message_to_client(self.epoch, msg);
        }
    }

    fn on_service_disconnect(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_service_disconnect(self.epoch);
        }
    }
}
