// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link from one catalog to a peer catalog.

use super::registry::Registry;
use super::SYNCHRONIZE_CATALOG;
use crate::actor_info::{ActorInfoList, HostIdentity};
use crate::client::ClientPort;
use crate::config::ClientConfig;
use crate::dispatch::ThreadingMode;
use crate::error::Result;
use crate::message::Payload;
use crate::transport::{PortState, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status of a peer link, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub uri: String,
    pub state: PortState,
    pub syncs_sent: u64,
    pub syncs_merged: u64,
    pub failed_attempts: u32,
}

#[derive(Debug, Default)]
struct PeerState {
    since_attempt: Duration,
    since_sync: Duration,
    synced_generation: Option<u64>,
    failed_attempts: u32,
    syncs_sent: u64,
    syncs_merged: u64,
}

/// Client port to a peer catalog plus its reconnect and refresh timers.
pub struct PeerLink {
    uri: String,
    port: ClientPort,
    state: Arc<Mutex<PeerState>>,
}

impl PeerLink {
    pub fn new(
        name: &str,
        uri: &str,
        host: &HostIdentity,
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let port = ClientPort::builder(name, transport)
            .host(host.clone())
            .service_uri(uri)
            .config(config.clone())
            .threading(ThreadingMode::Multithreaded)
            .build()?;
        Ok(Self {
            uri: uri.to_string(),
            port,
            state: Arc::new(Mutex::new(PeerState::default())),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_connected()
    }

    pub fn status(&self) -> PeerStatus {
        let st = self.state.lock();
        PeerStatus {
            uri: self.uri.clone(),
            state: self.port.state(),
            syncs_sent: st.syncs_sent,
            syncs_merged: st.syncs_merged,
            failed_attempts: st.failed_attempts,
        }
    }

    /// One timer step.
    ///
    /// Reconnects a lost peer no more often than `backoff`. A connected
    /// peer gets the full registry when the registry changed since the last
    /// send, or every `refresh`. The reply is merged into `registry`.
    pub async fn tick(
        &self,
        elapsed: Duration,
        registry: &Arc<Mutex<Registry>>,
        backoff: Duration,
        refresh: Duration,
    ) {
        self.port.do_periodic_tasks(elapsed.as_millis() as u64);

        if !self.port.is_connected() {
            let retry = {
                let mut st = self.state.lock();
                st.since_attempt = st.since_attempt.saturating_add(elapsed);
                if st.failed_attempts > 0 && st.since_attempt < backoff {
                    false
                } else {
                    st.since_attempt = Duration::ZERO;
                    st.synced_generation = None;
                    true
                }
            };
            if !retry || !self.reconnect().await {
                return;
            }
        }

        let (generation, list) = {
            let registry = registry.lock();
            (registry.generation(), registry.snapshot())
        };
        {
            let mut st = self.state.lock();
            st.since_sync = st.since_sync.saturating_add(elapsed);
            if st.synced_generation == Some(generation) && st.since_sync < refresh {
                return;
            }
            st.since_sync = Duration::ZERO;
            st.synced_generation = Some(generation);
        }
        self.send_sync(ActorInfoList { items: list }, registry);
    }

    async fn reconnect(&self) -> bool {
        match self.port.connect().await {
            Ok(service) => {
                info!("peer catalog {} connected ({})", self.uri, service.describe());
                self.state.lock().failed_attempts = 0;
                true
            }
            Err(e) => {
                let attempts = {
                    let mut st = self.state.lock();
                    st.failed_attempts = st.failed_attempts.saturating_add(1);
                    st.failed_attempts
                };
                if attempts == 1 {
                    warn!("peer catalog {} unreachable: {}", self.uri, e);
                } else {
                    debug!("peer catalog {} still unreachable ({} attempts): {}", self.uri, attempts, e);
                }
                false
            }
        }
    }

    fn send_sync(&self, list: ActorInfoList, registry: &Arc<Mutex<Registry>>) {
        let count = list.items.len();
        let registry = Arc::clone(registry);
        let state = Arc::clone(&self.state);
        let origin = format!("peer {}", self.uri);
        let sent = self.port.send_request(SYNCHRONIZE_CATALOG, Payload::new(&list), move |reply| {
            let merged = reply
                .into_result()
                .and_then(|msg| msg.payload.decode::<ActorInfoList>());
            match merged {
                Ok(theirs) => {
                    registry.lock().synchronize(&theirs, &origin);
                    state.lock().syncs_merged += 1;
                }
                Err(e) => warn!("synchronize with {} failed: {}", origin, e),
            }
        });
        match sent {
            Ok(_) => {
                self.state.lock().syncs_sent += 1;
                debug!("sent {} entries to peer catalog {}", count, self.uri);
            }
            Err(e) => {
                self.state.lock().synced_generation = None;
                debug!("synchronize with {} not sent: {}", self.uri, e);
            }
        }
    }

    pub fn disconnect(&self) {
        self.port.disconnect();
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("uri", &self.uri)
            .field("state", &self.port.state())
            .finish()
    }
}
