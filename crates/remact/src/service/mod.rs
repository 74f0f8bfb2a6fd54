// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service port.
//!
//! A [`ServicePort`] listens on a URI, keeps one slot per client
//! ([`connection::ServiceConnection`]) and runs application handlers from
//! its [`MethodTable`]. Framework messages (connect, disconnect,
//! keep-alive) never reach application handlers.
//!
//! # Example
//!
//! ```rust,no_run
//! use remact::{ServicePort, MemoryTransport, ThreadingMode, ReadyMessage, RequestContext};
//! use std::sync::Arc;
//!
//! # async fn example() -> remact::Result<()> {
//! let transport = Arc::new(MemoryTransport::new());
//! let service = ServicePort::builder("Echo", "mem://plant-7:40001/Echo", transport)
//!     .threading(ThreadingMode::Multithreaded)
//!     .build()?;
//! service.on_request("Ping", |_: ReadyMessage, _ctx: &RequestContext| Ok(ReadyMessage {}));
//! service.open().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod proxy;

pub use connection::{BasicOutcome, ClientSlotInfo, ServiceConnection};
pub use proxy::ServiceUserProxy;

use crate::actor_info::{ActorInfo, HostIdentity};
use crate::catalog::CatalogClient;
use crate::config::ServiceConfig;
use crate::dispatch::{ContextHandle, Dispatcher, ThreadingMode};
use crate::error::{ErrorCode, ErrorMessage, Result};
use crate::handler::{HandlerResult, MethodTable, RequestContext};
use crate::message::{Payload, PayloadType, RemactMessage};
use crate::transport::{ClientChannel, IncomingHandler, Listener, Transport};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Per-port counters.
#[derive(Debug, Default)]
pub struct ServiceStats {
    requests: AtomicU64,
    notifications: AtomicU64,
    handler_errors: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`ServiceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStatsSnapshot {
    /// Requests passed to handlers.
    pub requests: u64,
    /// Notifications passed to handlers.
    pub notifications: u64,
    /// Handler errors, panics and missing handlers.
    pub handler_errors: u64,
    /// Messages answered with an error before reaching a handler.
    pub rejected: u64,
}

impl ServiceStats {
    pub fn snapshot(&self) -> ServiceStatsSnapshot {
        ServiceStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

struct ServiceInner {
    name: String,
    uri: String,
    transport: Arc<dyn Transport>,
    catalog: Option<Arc<CatalogClient>>,
    dispatcher: Dispatcher,
    connection: Mutex<ServiceConnection>,
    methods: RwLock<MethodTable>,
    listener: Mutex<Option<Box<dyn Listener>>>,
    stats: ServiceStats,
}

/// Service side of a set of client connections.
#[derive(Clone)]
pub struct ServicePort {
    inner: Arc<ServiceInner>,
}

/// Builder for [`ServicePort`].
pub struct ServicePortBuilder {
    name: String,
    uri: String,
    transport: Arc<dyn Transport>,
    host: Option<HostIdentity>,
    catalog: Option<Arc<CatalogClient>>,
    context: Option<ContextHandle>,
    config: ServiceConfig,
}

impl ServicePortBuilder {
    pub fn host(mut self, host: HostIdentity) -> Self {
        self.host = Some(host);
        self
    }

    /// Announce the service through this catalog client while open.
    pub fn catalog(mut self, catalog: Arc<CatalogClient>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn context(mut self, handle: ContextHandle) -> Self {
        self.context = Some(handle);
        self
    }

    pub fn threading(mut self, mode: ThreadingMode) -> Self {
        self.config.threading = mode;
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ServicePort> {
        let dispatcher = Dispatcher::for_mode(self.config.threading, self.context)?;
        let host = self
            .host
            .unwrap_or_else(|| HostIdentity::current(&self.name, 0));
        let mut identity = ActorInfo::service(&self.name, &host, &self.uri);
        identity.timeout_seconds = self.config.timeout_secs;

        Ok(ServicePort {
            inner: Arc::new(ServiceInner {
                name: self.name,
                uri: self.uri,
                transport: self.transport,
                catalog: self.catalog,
                dispatcher,
                connection: Mutex::new(ServiceConnection::new(
                    identity,
                    self.config.first_client_id,
                    self.config.timeout_secs,
                )),
                methods: RwLock::new(MethodTable::new()),
                listener: Mutex::new(None),
                stats: ServiceStats::default(),
            }),
        })
    }
}

impl ServicePort {
    pub fn builder(name: &str, uri: &str, transport: Arc<dyn Transport>) -> ServicePortBuilder {
        ServicePortBuilder {
            name: name.to_string(),
            uri: uri.to_string(),
            transport,
            host: None,
            catalog: None,
            context: None,
            config: ServiceConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Current service identity.
    pub fn identity(&self) -> ActorInfo {
        self.inner.connection.lock().service().clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.connection.lock().service().is_open
    }

    pub fn connected_count(&self) -> usize {
        self.inner.connection.lock().connected_count()
    }

    pub fn clients(&self) -> Vec<ClientSlotInfo> {
        self.inner.connection.lock().clients()
    }

    pub fn stats(&self) -> ServiceStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Register an untyped handler.
    pub fn on_method<F>(&self, method: &str, f: F)
    where
        F: Fn(&RemactMessage, &RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.methods.write().on_method(method, f);
    }

    /// Register a typed request handler.
    pub fn on_request<Req, Resp, F>(&self, method: &str, f: F)
    where
        Req: PayloadType + 'static,
        Resp: PayloadType + 'static,
        F: Fn(Req, &RequestContext) -> std::result::Result<Resp, ErrorMessage>
            + Send
            + Sync
            + 'static,
    {
        self.inner.methods.write().on_request(method, f);
    }

    /// Register a typed handler selected by payload type.
    pub fn on_type<Req, Resp, F>(&self, f: F)
    where
        Req: PayloadType + 'static,
        Resp: PayloadType + 'static,
        F: Fn(Req, &RequestContext) -> std::result::Result<Resp, ErrorMessage>
            + Send
            + Sync
            + 'static,
    {
        self.inner.methods.write().on_type(f);
    }

    /// Start listening and announce the service to the catalog.
    pub async fn open(&self) -> Result<()> {
        if self.inner.listener.lock().is_some() {
            debug!("service '{}' already open", self.inner.name);
            return Ok(());
        }
        let handler: Arc<dyn IncomingHandler> =
            Arc::new(IncomingAdapter(Arc::downgrade(&self.inner)));
        let listener = self.inner.transport.listen(&self.inner.uri, handler).await?;
        let bound = listener.uri().to_string();
        *self.inner.listener.lock() = Some(listener);

        let identity = {
            let mut conn = self.inner.connection.lock();
            conn.set_uri(&bound);
            conn.set_open(true);
            conn.service().clone()
        };
        if let Some(catalog) = &self.inner.catalog {
            catalog.add_service(&identity);
        }
        info!("service {} open", identity.describe());
        Ok(())
    }

    /// Stop listening, drop all client connections and withdraw from the
    /// catalog.
    pub fn close(&self) {
        let listener = self.inner.listener.lock().take();
        if let Some(listener) = listener {
            listener.close();
        }
        {
            let mut conn = self.inner.connection.lock();
            conn.set_open(false);
            conn.disconnect_all();
        }
        if let Some(catalog) = &self.inner.catalog {
            catalog.remove_service(&self.inner.name);
        }
        info!("service '{}' closed", self.inner.name);
    }

    /// Send a notification to one client.
    pub fn notify_client(&self, client_id: i32, method: &str, payload: Payload) -> bool {
        let mut msg = RemactMessage::notification(method, payload);
        msg.client_id = client_id;
        self.inner.connection.lock().post_input(client_id, msg)
    }

    /// Send a notification to every connected client.
    pub fn broadcast(&self, method: &str, payload: Payload) -> usize {
        let msg = RemactMessage::notification(method, payload);
        self.inner.connection.lock().broadcast(&msg)
    }

    /// Advance client liveness timers. Returns true when a client changed
    /// state.
    pub fn do_periodic_tasks(&self, elapsed_ms: u64) -> bool {
        self.inner.connection.lock().do_periodic_tasks(elapsed_ms)
    }
}

impl std::fmt::Debug for ServicePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePort")
            .field("name", &self.inner.name)
            .field("uri", &self.inner.uri)
            .finish()
    }
}

impl ServiceInner {
    fn handle_incoming(self: &Arc<Self>, msg: RemactMessage, channel: Arc<dyn ClientChannel>) {
        let outcome = {
            let mut conn = self.connection.lock();
            if !conn.service().is_open {
                drop(conn);
                self.reject_closed(&msg, &channel);
                return;
            }
            conn.check_basic_response(&msg, &channel)
        };

        match outcome {
            BasicOutcome::Reply(reply) => {
                if reply.is_error() {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                }
                if let Err(e) = channel.message_to_client(reply) {
                    warn!("service '{}': reply not sent: {}", self.name, e);
                }
            }
            BasicOutcome::Consumed => {}
            BasicOutcome::Forward { client_id, client } => {
                let inner = Arc::clone(self);
                self.dispatcher
                    .dispatch(move || inner.invoke_handler(msg, client_id, client));
            }
        }
    }

    fn reject_closed(&self, msg: &RemactMessage, channel: &Arc<dyn ClientChannel>) {
        if !msg.is_request() {
            return;
        }
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        let reply = msg.error_to(&ErrorMessage::new(
            ErrorCode::ServiceNotRunning,
            format!("service '{}' is closed", self.name),
        ));
        if let Err(e) = channel.message_to_client(reply) {
            debug!("service '{}': reply not sent: {}", self.name, e);
        }
    }

    fn invoke_handler(&self, msg: RemactMessage, client_id: i32, client: ActorInfo) {
        let ctx = RequestContext {
            client_id,
            request_id: msg.request_id,
            client,
        };
        let handler = self.methods.read().resolve(&msg);
        let outcome = match handler {
            Some(handler) => panic::catch_unwind(AssertUnwindSafe(|| handler(&msg, &ctx)))
                .unwrap_or_else(|panic| {
                    Err(ErrorMessage::new(
                        ErrorCode::UnhandledExceptionOnService,
                        panic_text(panic.as_ref()),
                    ))
                }),
            None => Err(ErrorMessage::new(
                ErrorCode::MethodNotFoundOnService,
                format!(
                    "no handler for '{}' ({})",
                    msg.destination_method,
                    msg.payload.type_name()
                ),
            )),
        };

        if !msg.is_request() {
            self.stats.notifications.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = outcome {
                self.stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "service '{}': notification '{}' from client {} failed: {}",
                    self.name, msg.destination_method, client_id, e
                );
            }
            return;
        }

        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let reply = match outcome {
            Ok(payload) => msg.response_to(payload),
            Err(e) => {
                self.stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "service '{}': '{}' from client {} failed: {}",
                    self.name, msg.destination_method, client_id, e
                );
                msg.error_to(&e)
            }
        };
        trace!(
            "service '{}' -> client {} {:?} #{}",
            self.name,
            client_id,
            reply.message_type,
            reply.request_id
        );
        self.connection.lock().post_input(client_id, reply);
    }
}

fn panic_text(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

/// Transport-facing handle that does not keep the port alive.
struct IncomingAdapter(Weak<ServiceInner>);

impl IncomingHandler for IncomingAdapter {
    fn on_message_from_client(&self, msg: RemactMessage, channel: Arc<dyn ClientChannel>) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_incoming(msg, channel);
        }
    }

    fn on_client_disconnect(&self, channel_id: u64) {
        if let Some(inner) = self.0.upgrade() {
            inner.connection.lock().on_client_disconnect(channel_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientPort;
    use crate::dispatch::ExecutionContext;
    use crate::error::RemactError;
    use crate::transport::{MemoryTransport, PortState};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    const URI: &str = "mem://plant-7:40001/Echo";

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Text(String);

    impl PayloadType for Text {
        const TYPE_NAME: &'static str = "Text";
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn echo_service(transport: &MemoryTransport) -> ServicePort {
        let service = ServicePort::builder("Echo", URI, Arc::new(transport.clone()))
            .threading(ThreadingMode::Multithreaded)
            .build()
            .unwrap();
        service.on_request("Echo", |t: Text, _ctx: &RequestContext| Ok(t));
        service.on_request("Fail", |_: Text, _ctx: &RequestContext| {
            Err::<Text, _>(ErrorMessage::unhandled("sensor offline"))
        });
        service.on_request("Panic", |_: Text, _ctx: &RequestContext| -> std::result::Result<Text, ErrorMessage> {
            panic!("boom")
        });
        service.open().await.unwrap();
        service
    }

    async fn connected_client(transport: &MemoryTransport) -> ClientPort {
        let client = ClientPort::builder("Console", Arc::new(transport.clone()))
            .service_uri(URI)
            .threading(ThreadingMode::Multithreaded)
            .build()
            .unwrap();
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let transport = MemoryTransport::new();
        let service = echo_service(&transport).await;
        let client = connected_client(&transport).await;

        let reply: Text = client.ask("Echo", &Text("hello".into())).await.unwrap();
        assert_eq!(reply, Text("hello".into()));
        assert_eq!(service.connected_count(), 1);
        assert_eq!(service.stats().requests, 1);
        assert_eq!(client.client_id(), 1);
    }

    #[tokio::test]
    async fn test_handler_failures_become_error_responses() {
        let transport = MemoryTransport::new();
        let service = echo_service(&transport).await;
        let client = connected_client(&transport).await;

        let err = client.ask::<Text, Text>("Fail", &Text("x".into())).await.unwrap_err();
        assert_eq!(err.remote_code(), Some(ErrorCode::UnhandledExceptionOnService));

        let err = client.ask::<Text, Text>("Panic", &Text("x".into())).await.unwrap_err();
        assert_eq!(err.remote_code(), Some(ErrorCode::UnhandledExceptionOnService));

        let err = client.ask::<Text, Text>("Missing", &Text("x".into())).await.unwrap_err();
        assert_eq!(err.remote_code(), Some(ErrorCode::MethodNotFoundOnService));

        // The port keeps serving.
        let ok: Text = client.ask("Echo", &Text("still here".into())).await.unwrap();
        assert_eq!(ok.0, "still here");
        assert_eq!(service.stats().handler_errors, 3);
    }

    #[tokio::test]
    async fn test_closed_service_rejects_and_disconnects() {
        let transport = MemoryTransport::new();
        let service = echo_service(&transport).await;
        let client = connected_client(&transport).await;

        service.close();
        assert!(!service.is_open());
        assert!(!transport.is_listening(URI));
        wait_for(|| client.state() == PortState::Faulted).await;

        let err = client.notify("Echo", Payload::empty()).unwrap_err();
        assert!(matches!(err, RemactError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_notify_client_and_broadcast() {
        let transport = MemoryTransport::new();
        let service = echo_service(&transport).await;
        let client = connected_client(&transport).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&received);
        client.on_notification_type(move |t: Text| r.lock().push(t.0));

        assert!(service.notify_client(client.client_id(), "News", Payload::new(&Text("one".into()))));
        assert_eq!(service.broadcast("News", Payload::new(&Text("two".into()))), 1);
        wait_for(|| received.lock().len() == 2).await;
        assert_eq!(*received.lock(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_single_context_service_runs_handlers_on_context() {
        let transport = MemoryTransport::new();
        let ctx = ExecutionContext::new();
        let service = ServicePort::builder("Echo", URI, Arc::new(transport.clone()))
            .context(ctx.handle())
            .build()
            .unwrap();
        service.on_request("Echo", |t: Text, _ctx: &RequestContext| Ok(t));
        service.open().await.unwrap();
        tokio::spawn(ctx.run());

        let client = connected_client(&transport).await;
        let reply: Text = client.ask("Echo", &Text("ctx".into())).await.unwrap();
        assert_eq!(reply.0, "ctx");
    }

    #[tokio::test]
    async fn test_transport_loss_faults_slot() {
        let transport = MemoryTransport::new();
        let service = echo_service(&transport).await;
        let _client = connected_client(&transport).await;
        assert_eq!(service.connected_count(), 1);

        transport.sever(URI);
        wait_for(|| service.connected_count() == 0).await;
        assert_eq!(service.clients()[0].state, PortState::Faulted);
    }
}
