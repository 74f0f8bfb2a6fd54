// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hosting process.
//!
//! [`Host`] bundles what every port of a process shares: its identity, the
//! transport, the configuration and the catalog client.

use crate::actor_info::HostIdentity;
use crate::catalog::CatalogClient;
use crate::client::ClientPortBuilder;
use crate::config::RemactConfig;
use crate::error::{RemactError, Result};
use crate::service::ServicePortBuilder;
use crate::timer::PeriodicTask;
use crate::transport::Transport;
use crate::ClientPort;
use crate::ServicePort;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Process-wide context for building ports.
pub struct Host {
    identity: HostIdentity,
    config: RemactConfig,
    transport: Arc<dyn Transport>,
    catalog: Option<Arc<CatalogClient>>,
    catalog_timer: Mutex<Option<PeriodicTask>>,
}

impl Host {
    pub fn new(config: RemactConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RemactError::Config(e.to_string()))?;
        let identity = config.host_identity();
        let catalog = if config.catalog.enabled {
            Some(CatalogClient::new(
                identity.clone(),
                config.catalog.clone(),
                Arc::clone(&transport),
            )?)
        } else {
            None
        };
        Ok(Self {
            identity,
            config,
            transport,
            catalog,
            catalog_timer: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    pub fn config(&self) -> &RemactConfig {
        &self.config
    }

    pub fn catalog(&self) -> Option<&Arc<CatalogClient>> {
        self.catalog.as_ref()
    }

    /// Client port builder, registered with the catalog client.
    pub fn client(&self, name: &str) -> ClientPortBuilder {
        let builder = ClientPort::builder(name, Arc::clone(&self.transport))
            .host(self.identity.clone())
            .config(self.config.client.clone());
        match &self.catalog {
            Some(catalog) => builder.catalog(Arc::clone(catalog)),
            None => builder,
        }
    }

    /// Client port builder resolving `service_name` through the catalog.
    pub fn client_for(&self, name: &str, service_name: &str) -> Result<ClientPortBuilder> {
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            RemactError::Config(format!(
                "catalog disabled, '{}' cannot look up '{}'",
                name, service_name
            ))
        })?;
        Ok(self.client(name).lookup(service_name, Arc::clone(catalog)))
    }

    /// Service port builder, announced through the catalog client.
    pub fn service(&self, name: &str, uri: &str) -> ServicePortBuilder {
        let builder = ServicePort::builder(name, uri, Arc::clone(&self.transport))
            .host(self.identity.clone())
            .config(self.config.service.clone());
        match &self.catalog {
            Some(catalog) => builder.catalog(Arc::clone(catalog)),
            None => builder,
        }
    }

    /// Start the catalog client timer.
    pub fn start(&self) {
        let Some(catalog) = &self.catalog else {
            return;
        };
        let mut timer = self.catalog_timer.lock();
        if timer.is_none() {
            *timer = Some(catalog.start());
        }
    }

    /// Disconnect every client port and stop the catalog timer.
    pub async fn shutdown(&self) {
        let disconnected = self
            .catalog
            .as_ref()
            .map(|c| c.disconnect_all_clients())
            .unwrap_or(0);
        let timer = self.catalog_timer.lock().take();
        if let Some(timer) = timer {
            timer.stop().await;
        }
        info!(
            "host {}#{} shut down ({} client port(s) disconnected)",
            self.identity.app_name, self.identity.app_instance, disconnected
        );
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("identity", &self.identity)
            .field("catalog", &self.catalog.as_ref().map(|c| c.catalog_uri().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ThreadingMode;
    use crate::handler::RequestContext;
    use crate::message::ReadyMessage;
    use crate::transport::{MemoryTransport, PortState};

    fn config() -> RemactConfig {
        let mut config = RemactConfig::default();
        config.identity.app_name = "Plant".into();
        config.identity.app_instance = 4;
        config.catalog.uri = "mem://catalog:40000/RemactCatalog".into();
        config.client.threading = ThreadingMode::Multithreaded;
        config.service.threading = ThreadingMode::Multithreaded;
        config
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_clients() {
        let transport = MemoryTransport::new();
        let host = Host::new(config(), Arc::new(transport)).unwrap();

        let service = host.service("Echo", "mem://plant:1/Echo").build().unwrap();
        service.on_request("Ping", |_: ReadyMessage, _ctx: &RequestContext| Ok(ReadyMessage {}));
        service.open().await.unwrap();

        let client = host.client("Console").service_uri("mem://plant:1/Echo").build().unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.identity().app_instance, 4);
        assert_eq!(host.catalog().unwrap().client_count(), 1);

        host.shutdown().await;
        assert_eq!(client.state(), PortState::Disconnected);
        assert_eq!(host.catalog().unwrap().client_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_catalog() {
        let mut config = config();
        config.catalog.enabled = false;
        let host = Host::new(config, Arc::new(MemoryTransport::new())).unwrap();
        assert!(host.catalog().is_none());
        assert!(host.client_for("Console", "Echo").is_err());
    }
}
