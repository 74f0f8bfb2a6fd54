// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Catalog service (registry/router).

use super::peer::{PeerLink, PeerStatus};
use super::registry::{Registration, Registry};
use super::{LOOKUP_SERVICE, SERVICE_CLOSED, SERVICE_OPENED, SYNCHRONIZE_CATALOG};
use crate::actor_info::{ActorInfo, ActorInfoList, HostIdentity, Usage};
use crate::config::CatalogServiceConfig;
use crate::dispatch::ThreadingMode;
use crate::error::{ErrorCode, ErrorMessage, RemactError, Result};
use crate::handler::RequestContext;
use crate::message::ReadyMessage;
use crate::service::ServicePort;
use crate::timer::{spawn_periodic, PeriodicTask, TickGate};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Service port answering catalog requests, plus links to peer catalogs.
///
/// Catalog ports always run handlers inline; the registry is behind its own
/// lock.
pub struct CatalogService {
    config: CatalogServiceConfig,
    port: ServicePort,
    registry: Arc<Mutex<Registry>>,
    peers: Vec<PeerLink>,
    gate: TickGate,
}

impl CatalogService {
    pub fn new(
        config: CatalogServiceConfig,
        host: HostIdentity,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|e| RemactError::Config(e.to_string()))?;

        let port = ServicePort::builder(&config.name, &config.uri, Arc::clone(&transport))
            .host(host.clone())
            .config(config.service.clone())
            .threading(ThreadingMode::Multithreaded)
            .build()?;
        let registry = Arc::new(Mutex::new(Registry::new()));
        register_handlers(&port, &registry);

        let peers = config
            .peers
            .iter()
            .map(|uri| PeerLink::new(&config.name, uri, &host, &config.client, Arc::clone(&transport)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Arc::new(Self {
            config,
            port,
            registry,
            peers,
            gate: TickGate::new(),
        }))
    }

    pub fn uri(&self) -> &str {
        &self.config.uri
    }

    pub fn port(&self) -> &ServicePort {
        &self.port
    }

    pub async fn open(&self) -> Result<()> {
        self.port.open().await?;
        info!(
            "catalog '{}' listening on {} with {} peer(s)",
            self.config.name,
            self.config.uri,
            self.peers.len()
        );
        Ok(())
    }

    pub fn close(&self) {
        for peer in &self.peers {
            peer.disconnect();
        }
        self.port.close();
    }

    /// Open entry for `name`.
    pub fn lookup(&self, name: &str) -> Option<ActorInfo> {
        self.registry.lock().lookup(name)
    }

    /// All entries.
    pub fn snapshot(&self) -> Vec<ActorInfo> {
        self.registry.lock().snapshot()
    }

    pub fn generation(&self) -> u64 {
        self.registry.lock().generation()
    }

    /// Merge an announcement as if it came from a client.
    pub fn register(&self, entry: &ActorInfo, origin: &str) -> Registration {
        self.registry.lock().register_service(entry, origin)
    }

    pub fn peers(&self) -> Vec<PeerStatus> {
        self.peers.iter().map(PeerLink::status).collect()
    }

    /// One timer step: lease expiry, client liveness, peer gossip.
    ///
    /// Returns false when the previous tick is still running.
    pub async fn tick(&self, elapsed: Duration) -> bool {
        let Some(_guard) = self.gate.try_enter() else {
            debug!("catalog '{}': tick skipped, previous one still running", self.config.name);
            return false;
        };

        let expired = self.registry.lock().tick(elapsed);
        if expired > 0 {
            debug!("catalog '{}': {} lease(s) expired", self.config.name, expired);
        }
        self.port.do_periodic_tasks(elapsed.as_millis() as u64);

        let backoff = self.config.peer_backoff();
        let refresh = self.config.peer_refresh();
        for peer in &self.peers {
            peer.tick(elapsed, &self.registry, backoff, refresh).await;
        }
        true
    }

    /// Drive [`tick`](Self::tick) every `tick_ms`.
    pub fn start(self: &Arc<Self>) -> PeriodicTask {
        let catalog = Arc::downgrade(self);
        spawn_periodic("catalog service", self.config.tick_interval(), move |elapsed| {
            let catalog = catalog.clone();
            async move {
                if let Some(catalog) = catalog.upgrade() {
                    catalog.tick(elapsed).await;
                }
            }
        })
    }
}

impl std::fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogService")
            .field("name", &self.config.name)
            .field("uri", &self.config.uri)
            .field("peers", &self.peers)
            .finish()
    }
}

fn register_handlers(port: &ServicePort, registry: &Arc<Mutex<Registry>>) {
    let reg = Arc::clone(registry);
    port.on_request(SERVICE_OPENED, move |mut entry: ActorInfo, ctx: &RequestContext| {
        entry.is_open = true;
        match reg.lock().register_service(&entry, &ctx.client.describe()) {
            Registration::Backup => Err(ErrorMessage::new(
                ErrorCode::ServiceIsBackup,
                format!("'{}' is already served by a longer running instance", entry.name),
            )),
            _ => Ok(ReadyMessage {}),
        }
    });

    let reg = Arc::clone(registry);
    port.on_request(SERVICE_CLOSED, move |mut entry: ActorInfo, ctx: &RequestContext| {
        entry.is_open = false;
        reg.lock().register_service(&entry, &ctx.client.describe());
        Ok(ReadyMessage {})
    });

    let reg = Arc::clone(registry);
    port.on_request(LOOKUP_SERVICE, move |query: ActorInfo, _ctx: &RequestContext| {
        reg.lock()
            .lookup(&query.name)
            .map(|found| found.with_usage(Usage::ServiceAddressResponse))
            .ok_or_else(|| {
                ErrorMessage::new(
                    ErrorCode::ServiceNameNotRegisteredInCatalog,
                    format!("'{}' is not registered", query.name),
                )
            })
    });

    let reg = Arc::clone(registry);
    port.on_request(SYNCHRONIZE_CATALOG, move |list: ActorInfoList, ctx: &RequestContext| {
        Ok(reg.lock().synchronize(&list, &ctx.client.describe()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientPort;
    use crate::transport::MemoryTransport;

    const CATALOG_URI: &str = "mem://catalog-a:40000/RemactCatalog";

    fn host() -> HostIdentity {
        HostIdentity::current("Plant", 1).with_host_name("ws-17")
    }

    fn announced(name: &str, uri: &str, run_secs: u64) -> ActorInfo {
        let mut info = ActorInfo::service(name, &host(), uri);
        info.is_open = true;
        info.application_run_time = Duration::from_secs(run_secs);
        info.usage = Usage::ServiceEnableRequest;
        info
    }

    async fn open_catalog(transport: &MemoryTransport) -> Arc<CatalogService> {
        let config = CatalogServiceConfig {
            uri: CATALOG_URI.into(),
            ..Default::default()
        };
        let catalog = CatalogService::new(config, host(), Arc::new(transport.clone())).unwrap();
        catalog.open().await.unwrap();
        catalog
    }

    async fn client(transport: &MemoryTransport) -> ClientPort {
        let port = ClientPort::builder("Console", Arc::new(transport.clone()))
            .service_uri(CATALOG_URI)
            .threading(ThreadingMode::Multithreaded)
            .build()
            .unwrap();
        port.connect().await.unwrap();
        port
    }

    #[tokio::test]
    async fn test_open_then_lookup() {
        let transport = MemoryTransport::new();
        let catalog = open_catalog(&transport).await;
        let port = client(&transport).await;

        let _: ReadyMessage = port
            .ask(SERVICE_OPENED, &announced("Echo", "mem://a:1/Echo", 5))
            .await
            .unwrap();
        let found: ActorInfo = port.ask(LOOKUP_SERVICE, &ActorInfo::lookup("Echo")).await.unwrap();
        assert_eq!(found.uri.as_deref(), Some("mem://a:1/Echo"));
        assert_eq!(found.usage, Usage::ServiceAddressResponse);
        assert_eq!(catalog.generation(), 1);

        let err = port
            .ask::<ActorInfo, ActorInfo>(LOOKUP_SERVICE, &ActorInfo::lookup("Nope"))
            .await
            .unwrap_err();
        assert_eq!(err.remote_code(), Some(ErrorCode::ServiceNameNotRegisteredInCatalog));
    }

    #[tokio::test]
    async fn test_backup_is_signalled() {
        let transport = MemoryTransport::new();
        let catalog = open_catalog(&transport).await;
        let port = client(&transport).await;

        let _: ReadyMessage = port
            .ask(SERVICE_OPENED, &announced("Echo", "mem://a:1/Echo", 100))
            .await
            .unwrap();
        let err = port
            .ask::<ActorInfo, ReadyMessage>(SERVICE_OPENED, &announced("Echo", "mem://b:2/Echo", 5))
            .await
            .unwrap_err();
        assert_eq!(err.remote_code(), Some(ErrorCode::ServiceIsBackup));
        assert_eq!(
            catalog.lookup("Echo").unwrap().uri.as_deref(),
            Some("mem://a:1/Echo")
        );
    }

    #[tokio::test]
    async fn test_service_closed_hides_entry() {
        let transport = MemoryTransport::new();
        let catalog = open_catalog(&transport).await;
        let port = client(&transport).await;

        let echo = announced("Echo", "mem://a:1/Echo", 5);
        let _: ReadyMessage = port.ask(SERVICE_OPENED, &echo).await.unwrap();
        let _: ReadyMessage = port.ask(SERVICE_CLOSED, &echo).await.unwrap();
        assert!(catalog.lookup("Echo").is_none());
        assert_eq!(catalog.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_synchronize_returns_full_list() {
        let transport = MemoryTransport::new();
        let catalog = open_catalog(&transport).await;
        catalog.register(&announced("Log", "mem://a:1/Log", 5), "local");
        let port = client(&transport).await;

        let mut remote = announced("Echo", "mem://b:2/Echo", 5);
        remote.hop_count = 1;
        let reply: ActorInfoList = port
            .ask(SYNCHRONIZE_CATALOG, &ActorInfoList { items: vec![remote] })
            .await
            .unwrap();
        let mut names: Vec<_> = reply.items.iter().map(|i| i.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["Echo".to_string(), "Log".to_string()]);
        assert_eq!(catalog.lookup("Echo").unwrap().hop_count, 2);
    }

    #[tokio::test]
    async fn test_tick_expires_leases() {
        let transport = MemoryTransport::new();
        let catalog = open_catalog(&transport).await;
        let mut echo = announced("Echo", "mem://a:1/Echo", 5);
        echo.timeout_seconds = 2;
        catalog.register(&echo, "local");

        assert!(catalog.tick(Duration::from_millis(1500)).await);
        assert!(catalog.lookup("Echo").is_some());
        assert!(catalog.tick(Duration::from_millis(600)).await);
        assert!(catalog.lookup("Echo").is_none());
    }

    #[test]
    fn test_rejects_self_peer() {
        let config = CatalogServiceConfig {
            uri: CATALOG_URI.into(),
            peers: vec![CATALOG_URI.into()],
            ..Default::default()
        };
        let err = CatalogService::new(config, host(), Arc::new(MemoryTransport::new())).unwrap_err();
        assert!(matches!(err, RemactError::Config(_)));
    }
}
