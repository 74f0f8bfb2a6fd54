// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Catalog daemon runtime.

use crate::config::{CatalogServerConfig, ConfigError};
use parking_lot::Mutex;
use remact::{ActorInfo, CatalogService, PeriodicTask, RemactError};
use remact_tcp::TcpTransport;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("catalog: {0}")]
    Remact(#[from] RemactError),
}

/// Catalog service over TCP, ticked by its own timer.
pub struct CatalogServer {
    config: CatalogServerConfig,
    catalog: Arc<CatalogService>,
    timer: Mutex<Option<PeriodicTask>>,
    shutdown: Arc<Notify>,
}

impl CatalogServer {
    pub fn new(config: CatalogServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let transport = Arc::new(TcpTransport::new(config.transport.to_tcp_config()));
        let catalog =
            CatalogService::new(config.catalog.clone(), config.host_identity(), transport)?;
        Ok(Self {
            config,
            catalog,
            timer: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn config(&self) -> &CatalogServerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<CatalogService> {
        &self.catalog
    }

    /// URI the catalog actually listens on.
    pub fn bound_uri(&self) -> String {
        self.catalog
            .port()
            .identity()
            .uri
            .unwrap_or_else(|| self.config.catalog.uri.clone())
    }

    /// Registered services, open or not.
    pub fn entries(&self) -> Vec<ActorInfo> {
        self.catalog.snapshot()
    }

    /// Open the listener and start ticking.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.catalog.open().await?;
        let mut timer = self.timer.lock();
        if timer.is_none() {
            *timer = Some(self.catalog.start());
        }
        Ok(())
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.start().await?;
        self.shutdown.notified().await;
        self.stop().await;
        Ok(())
    }

    /// Ask [`run`](Self::run) to return.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Stop the timer, drop peer links and close the listener.
    pub async fn stop(&self) {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.stop().await;
        }
        self.catalog.close();
        let open = self.catalog.snapshot().iter().filter(|e| e.is_open).count();
        if open > 0 {
            warn!("catalog stopped with {} open registration(s)", open);
        }
        info!("catalog server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = CatalogServerConfig::default();
        config.catalog.tick_ms = 0;
        assert!(matches!(
            CatalogServer::new(config),
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_and_stop() {
        let mut config = CatalogServerConfig::default();
        config.catalog.uri = "tcp://127.0.0.1:0/RemactCatalog".into();
        let server = Arc::new(CatalogServer::new(config).unwrap());

        let runner = Arc::clone(&server);
        let run = tokio::spawn(async move { runner.run().await });
        for _ in 0..200 {
            if server.catalog().port().is_open() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(server.catalog().port().is_open());
        assert!(!server.bound_uri().contains(":0/"));

        server.shutdown();
        run.await.unwrap().unwrap();
        assert!(!server.catalog().port().is_open());
    }
}
