// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-process catalog agent.
//!
//! Keeps the list of local services to announce and the list of open
//! client ports (for coordinated shutdown). Announcements go out one
//! service per tick, round-robin, so a process with many services never
//! floods the catalog.

use super::{LOOKUP_SERVICE, SERVICE_CLOSED, SERVICE_OPENED};
use crate::actor_info::{ActorInfo, HostIdentity, Usage};
use crate::client::{ClientPort, WeakClientPort};
use crate::config::{CatalogClientConfig, ClientConfig};
use crate::dispatch::ThreadingMode;
use crate::error::{ErrorCode, RemactError, Result};
use crate::message::{Payload, RemactMessage};
use crate::timer::{spawn_periodic, PeriodicTask, TickGate};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

const CLIENT_NAME: &str = "CatalogClient";

#[derive(Debug)]
struct LocalService {
    info: ActorInfo,
    /// Run time of the service when it was added.
    base_run_time: Duration,
    /// Time since it was added.
    added_for: Duration,
    since_announce: Duration,
    registered: bool,
    backup: bool,
    in_flight: bool,
    withdrawn: bool,
}

impl LocalService {
    fn announcement(&self) -> ActorInfo {
        let mut info = self.info.clone();
        info.application_run_time = self.base_run_time.saturating_add(self.added_for);
        info.hop_count = 0;
        if self.withdrawn {
            info.is_open = false;
            info.usage = Usage::ServiceDisableRequest;
        } else {
            info.is_open = true;
            info.usage = Usage::ServiceEnableRequest;
        }
        info
    }
}

#[derive(Debug, Default)]
struct CatalogClientState {
    services: Vec<LocalService>,
    clients: Vec<WeakClientPort>,
    next_index: usize,
    /// Connect count of the catalog port the registrations belong to.
    announced_on: u64,
}

enum Announce {
    Opened(ActorInfo),
    Closed(ActorInfo),
}

/// Catalog agent of one hosting process.
///
/// Construct one per process and pass it to the ports that should be
/// announced or resolved through the catalog.
pub struct CatalogClient {
    config: CatalogClientConfig,
    port: ClientPort,
    connect_lock: tokio::sync::Mutex<()>,
    state: Mutex<CatalogClientState>,
    gate: TickGate,
}

impl CatalogClient {
    pub fn new(
        host: HostIdentity,
        config: CatalogClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|e| RemactError::Config(e.to_string()))?;
        let port = ClientPort::builder(CLIENT_NAME, transport)
            .host(host)
            .service_uri(&config.uri)
            .config(ClientConfig::default())
            .threading(ThreadingMode::Multithreaded)
            .build()?;
        Ok(Arc::new(Self {
            config,
            port,
            connect_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(CatalogClientState::default()),
            gate: TickGate::new(),
        }))
    }

    pub fn catalog_uri(&self) -> &str {
        &self.config.uri
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_connected()
    }

    /// Announce `service` until it is removed.
    pub fn add_service(&self, service: &ActorInfo) {
        let mut st = self.state.lock();
        let local = LocalService {
            info: service.clone(),
            base_run_time: service.application_run_time,
            added_for: Duration::ZERO,
            since_announce: Duration::ZERO,
            registered: false,
            backup: false,
            in_flight: false,
            withdrawn: false,
        };
        match st.services.iter_mut().find(|s| s.info.name == service.name) {
            Some(existing) => *existing = local,
            None => st.services.push(local),
        }
        debug!("catalog client: will announce {}", service.describe());
    }

    /// Withdraw a service. A registered service is announced closed first.
    pub fn remove_service(&self, name: &str) {
        let mut st = self.state.lock();
        let Some(index) = st.services.iter().position(|s| s.info.name == name) else {
            return;
        };
        let service = &mut st.services[index];
        if service.registered || service.in_flight {
            service.withdrawn = true;
        } else {
            st.services.remove(index);
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state
            .lock()
            .services
            .iter()
            .any(|s| s.info.name == name && s.registered && !s.backup && !s.withdrawn)
    }

    /// True when the catalog answered that another instance serves `name`.
    pub fn is_backup(&self, name: &str) -> bool {
        self.state
            .lock()
            .services
            .iter()
            .any(|s| s.info.name == name && s.backup)
    }

    pub fn service_count(&self) -> usize {
        self.state.lock().services.len()
    }

    /// Track an open client port.
    pub fn add_client(&self, client: WeakClientPort) {
        let mut st = self.state.lock();
        st.clients.retain(WeakClientPort::is_alive);
        let known = client
            .upgrade()
            .map(|port| st.clients.iter().any(|c| c.points_to(&port)))
            .unwrap_or(true);
        if !known {
            st.clients.push(client);
        }
    }

    pub fn remove_client(&self, client: &ClientPort) {
        self.state
            .lock()
            .clients
            .retain(|c| c.is_alive() && !c.points_to(client));
    }

    pub fn client_count(&self) -> usize {
        let mut st = self.state.lock();
        st.clients.retain(WeakClientPort::is_alive);
        st.clients.len()
    }

    /// Disconnect every tracked client port. Returns how many were open.
    pub fn disconnect_all_clients(&self) -> usize {
        let clients: Vec<ClientPort> = {
            let mut st = self.state.lock();
            st.clients.drain(..).filter_map(|c| c.upgrade()).collect()
        };
        let count = clients.len();
        for client in clients {
            client.disconnect();
        }
        if count > 0 {
            info!("catalog client: disconnected {} client port(s)", count);
        }
        count
    }

    /// Resolve `name` through the catalog.
    ///
    /// Boxed because client ports resolving through the catalog call this
    /// from their own connect.
    pub fn lookup_service<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ActorInfo>> + Send + 'a>> {
        Box::pin(async move {
            if !self.config.enabled {
                return Err(RemactError::Config(format!(
                    "catalog disabled, cannot look up '{}'",
                    name
                )));
            }
            self.ensure_connected().await?;
            let found: ActorInfo = self.port.ask(LOOKUP_SERVICE, &ActorInfo::lookup(name)).await?;
            debug!("catalog client: '{}' resolved to {}", name, found.describe());
            Ok(found)
        })
    }

    async fn ensure_connected(&self) -> Result<()> {
        let _connecting = self.connect_lock.lock().await;
        if self.port.is_connected() {
            return Ok(());
        }
        self.port.connect().await.map(|_| ())
    }

    /// One timer step.
    ///
    /// Returns false when skipped (catalog disabled or previous tick still
    /// running).
    pub async fn tick(self: &Arc<Self>, elapsed: Duration) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(_guard) = self.gate.try_enter() else {
            debug!("catalog client: tick skipped, previous one still running");
            return false;
        };
        self.port.do_periodic_tasks(elapsed.as_millis() as u64);

        let connected = self.port.is_connected();
        let pending = {
            let mut st = self.state.lock();
            for service in &mut st.services {
                service.added_for = service.added_for.saturating_add(elapsed);
                service.since_announce = service.since_announce.saturating_add(elapsed);
            }
            !st.services.is_empty()
        };

        if !connected {
            if !pending {
                return true;
            }
            if let Err(e) = self.ensure_connected().await {
                debug!("catalog client: {} unreachable: {}", self.config.uri, e);
                return true;
            }
            info!("catalog client: connected to {}", self.config.uri);
        }

        let next = {
            let mut st = self.state.lock();
            // Any reconnect may reach a catalog that never saw us, even one
            // that happened inside a lookup between two ticks.
            let connect_count = self.port.connect_count();
            if connect_count != st.announced_on {
                if st.announced_on != 0 {
                    warn!(
                        "catalog client: reconnected to {}, {} service(s) to announce again",
                        self.config.uri,
                        st.services.len()
                    );
                }
                st.announced_on = connect_count;
                for service in &mut st.services {
                    service.registered = false;
                    service.in_flight = false;
                }
            }
            self.next_announcement(&mut st)
        };
        if let Some(announce) = next {
            self.send(announce);
        }
        true
    }

    fn next_announcement(&self, st: &mut CatalogClientState) -> Option<Announce> {
        let count = st.services.len();
        let refresh = self.config.refresh_interval();
        for offset in 0..count {
            let index = (st.next_index + offset) % count;
            let service = &mut st.services[index];
            let due = if service.withdrawn {
                true
            } else if service.in_flight {
                false
            } else {
                !service.registered || service.since_announce >= refresh
            };
            if !due {
                continue;
            }
            st.next_index = index + 1;
            if st.services[index].withdrawn {
                let removed = st.services.remove(index);
                return Some(Announce::Closed(removed.announcement()));
            }
            let service = &mut st.services[index];
            service.in_flight = true;
            service.since_announce = Duration::ZERO;
            return Some(Announce::Opened(service.announcement()));
        }
        None
    }

    fn send(self: &Arc<Self>, announce: Announce) {
        let (method, info) = match announce {
            Announce::Opened(info) => (SERVICE_OPENED, info),
            Announce::Closed(info) => (SERVICE_CLOSED, info),
        };
        let name = info.name.clone();
        let weak = Arc::downgrade(self);
        let result = self.port.send_request(method, Payload::new(&info), move |reply| {
            if let Some(client) = Weak::upgrade(&weak) {
                client.on_reply(method, &name, reply);
            }
        });
        if let Err(e) = result {
            debug!("catalog client: {} for '{}' not sent: {}", method, info.name, e);
            if let Some(service) = self
                .state
                .lock()
                .services
                .iter_mut()
                .find(|s| s.info.name == info.name)
            {
                service.in_flight = false;
            }
        }
    }

    fn on_reply(&self, method: &str, name: &str, reply: RemactMessage) {
        if method == SERVICE_CLOSED {
            match reply.error_message() {
                Some(error) => warn!("catalog client: closing '{}' failed: {}", name, error),
                None => info!("catalog client: '{}' withdrawn", name),
            }
            return;
        }

        let mut st = self.state.lock();
        let Some(service) = st.services.iter_mut().find(|s| s.info.name == name) else {
            return;
        };
        service.in_flight = false;
        match reply.error_message() {
            None => {
                if !service.registered || service.backup {
                    info!("catalog client: '{}' registered at {}", name, self.config.uri);
                }
                service.registered = true;
                service.backup = false;
            }
            Some(error) if error.code == ErrorCode::ServiceIsBackup => {
                if !service.backup {
                    info!("catalog client: '{}' is backup: {}", name, error.text);
                }
                service.registered = true;
                service.backup = true;
            }
            Some(error) => {
                warn!("catalog client: announcing '{}' failed: {}", name, error);
                service.registered = false;
            }
        }
    }

    /// Drive [`tick`](Self::tick) every `tick_ms`.
    pub fn start(self: &Arc<Self>) -> PeriodicTask {
        let client = Arc::downgrade(self);
        spawn_periodic("catalog client", self.config.tick_interval(), move |elapsed| {
            let client = client.clone();
            async move {
                if let Some(client) = client.upgrade() {
                    client.tick(elapsed).await;
                }
            }
        })
    }
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("uri", &self.config.uri)
            .field("state", &self.port.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogService;
    use crate::config::CatalogServiceConfig;
    use crate::transport::MemoryTransport;

    const CATALOG_URI: &str = "mem://catalog:40000/RemactCatalog";

    fn host() -> HostIdentity {
        HostIdentity::current("Plant", 1).with_host_name("ws-17")
    }

    fn service(name: &str, uri: &str, run_secs: u64) -> ActorInfo {
        let mut info = ActorInfo::service(name, &host(), uri);
        info.is_open = true;
        info.application_run_time = Duration::from_secs(run_secs);
        info
    }

    async fn setup() -> (MemoryTransport, Arc<CatalogService>, Arc<CatalogClient>) {
        let transport = MemoryTransport::new();
        let catalog = CatalogService::new(
            CatalogServiceConfig {
                uri: CATALOG_URI.into(),
                ..Default::default()
            },
            host(),
            Arc::new(transport.clone()),
        )
        .unwrap();
        catalog.open().await.unwrap();
        let client = CatalogClient::new(
            host(),
            CatalogClientConfig {
                uri: CATALOG_URI.into(),
                ..Default::default()
            },
            Arc::new(transport.clone()),
        )
        .unwrap();
        (transport, catalog, client)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_one_announcement_per_tick() {
        let (_transport, catalog, client) = setup().await;
        client.add_service(&service("Echo", "mem://a:1/Echo", 5));
        client.add_service(&service("Log", "mem://a:1/Log", 5));

        client.tick(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(catalog.snapshot().len(), 1);
        assert!(client.is_registered("Echo"));
        assert!(!client.is_registered("Log"));

        client.tick(Duration::from_millis(100)).await;
        settle().await;
        assert!(catalog.lookup("Log").is_some());
        assert!(client.is_registered("Log"));
    }

    #[tokio::test]
    async fn test_backup_answer_marks_service() {
        let (_transport, catalog, client) = setup().await;
        catalog.register(&service("Echo", "mem://other:1/Echo", 1000), "local");
        client.add_service(&service("Echo", "mem://a:1/Echo", 5));

        client.tick(Duration::from_millis(100)).await;
        settle().await;
        assert!(client.is_backup("Echo"));
        assert!(!client.is_registered("Echo"));
    }

    #[tokio::test]
    async fn test_remove_announces_closed() {
        let (_transport, catalog, client) = setup().await;
        client.add_service(&service("Echo", "mem://a:1/Echo", 5));
        client.tick(Duration::from_millis(100)).await;
        settle().await;
        assert!(catalog.lookup("Echo").is_some());

        client.remove_service("Echo");
        client.tick(Duration::from_millis(100)).await;
        settle().await;
        assert!(catalog.lookup("Echo").is_none());
        assert_eq!(client.service_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_through_catalog() {
        let (_transport, catalog, client) = setup().await;
        catalog.register(&service("Echo", "mem://a:1/Echo", 5), "local");

        let found = client.lookup_service("Echo").await.unwrap();
        assert_eq!(found.uri.as_deref(), Some("mem://a:1/Echo"));

        let err = client.lookup_service("Missing").await.unwrap_err();
        assert_eq!(err.remote_code(), Some(ErrorCode::ServiceNameNotRegisteredInCatalog));
    }

    #[tokio::test]
    async fn test_connection_loss_marks_unregistered() {
        let (transport, catalog, client) = setup().await;
        client.add_service(&service("Echo", "mem://a:1/Echo", 5));
        client.tick(Duration::from_millis(100)).await;
        settle().await;
        assert!(client.is_registered("Echo"));

        transport.sever(CATALOG_URI);
        settle().await;
        client.tick(Duration::from_millis(100)).await;
        settle().await;
        // Reconnected and announced again in the same tick.
        assert!(client.is_registered("Echo"));
        assert!(client.is_connected());
        assert!(catalog.lookup("Echo").is_some());
    }

    #[tokio::test]
    async fn test_reconnect_inside_lookup_announces_again() {
        let (transport, catalog, client) = setup().await;
        client.add_service(&service("Echo", "mem://a:1/Echo", 5));
        client.tick(Duration::from_millis(100)).await;
        settle().await;
        assert!(client.is_registered("Echo"));

        // The catalog restarts with an empty registry.
        catalog.close();
        transport.sever(CATALOG_URI);
        settle().await;
        let fresh = CatalogService::new(
            CatalogServiceConfig {
                uri: CATALOG_URI.into(),
                ..Default::default()
            },
            host(),
            Arc::new(transport.clone()),
        )
        .unwrap();
        fresh.open().await.unwrap();
        fresh.register(&service("Other", "mem://b:1/Other", 5), "local");

        // The lookup reconnects before any tick notices the loss.
        let found = client.lookup_service("Other").await.unwrap();
        assert_eq!(found.uri.as_deref(), Some("mem://b:1/Other"));
        assert!(client.is_connected());

        client.tick(Duration::from_millis(100)).await;
        settle().await;
        assert!(fresh.lookup("Echo").is_some());
        assert!(client.is_registered("Echo"));
    }

    #[tokio::test]
    async fn test_disabled_catalog_is_inert() {
        let transport = MemoryTransport::new();
        let client = CatalogClient::new(
            host(),
            CatalogClientConfig {
                enabled: false,
                ..Default::default()
            },
            Arc::new(transport),
        )
        .unwrap();
        assert!(!client.tick(Duration::from_millis(100)).await);
        assert!(matches!(
            client.lookup_service("Echo").await,
            Err(RemactError::Config(_))
        ));
    }
}
