// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport.
//!
//! Service ports listen on a URI key inside a shared hub. Each opened
//! connection is a pair of unbounded channels, one per direction, drained
//! by a pump task that calls into the receiving port. Dropping a sender ends
//! the pump and reports the disconnect to the other side.

use super::{
    ClientCallback, ClientChannel, IncomingHandler, Listener, PortState, ServiceChannel, Transport,
};
use crate::error::{RemactError, Result};
use crate::message::RemactMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type Sender = mpsc::UnboundedSender<RemactMessage>;

#[derive(Default)]
struct Hub {
    listeners: Mutex<HashMap<String, Arc<dyn IncomingHandler>>>,
    links: Mutex<Vec<Weak<Link>>>,
    next_id: AtomicU64,
}

/// One connection between a client port and a service port.
struct Link {
    id: u64,
    uri: String,
    to_service: Mutex<Option<Sender>>,
    to_client: Mutex<Option<Sender>>,
    closed_by_client: AtomicBool,
}

impl Link {
    fn sever(&self) {
        self.to_service.lock().take();
        self.to_client.lock().take();
    }
}

/// Transport connecting ports inside one process.
///
/// Clones share the same hub.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a service listens on `uri`.
    pub fn is_listening(&self, uri: &str) -> bool {
        self.hub.listeners.lock().contains_key(uri)
    }

    /// Number of connections still open.
    pub fn connection_count(&self) -> usize {
        let mut links = self.hub.links.lock();
        links.retain(|l| l.strong_count() > 0);
        links
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|l| l.to_service.lock().is_some())
            .count()
    }

    /// Drop every connection to `uri` as if the network failed.
    ///
    /// Both sides receive their disconnect callback. Returns the number of
    /// connections cut.
    pub fn sever(&self, uri: &str) -> usize {
        let links: Vec<Arc<Link>> = self
            .hub
            .links
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|l| l.uri == uri)
            .collect();
        for link in &links {
            debug!("memory transport: severing connection {} to {}", link.id, uri);
            link.sever();
        }
        links.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        uri: &str,
        callback: Arc<dyn ClientCallback>,
    ) -> Result<Arc<dyn ServiceChannel>> {
        let handler = self
            .hub
            .listeners
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| RemactError::Transport(format!("no service listening on {}", uri)))?;

        let (svc_tx, mut svc_rx) = mpsc::unbounded_channel::<RemactMessage>();
        let (cli_tx, mut cli_rx) = mpsc::unbounded_channel::<RemactMessage>();
        let link = Arc::new(Link {
            id: self.hub.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            uri: uri.to_string(),
            to_service: Mutex::new(Some(svc_tx)),
            to_client: Mutex::new(Some(cli_tx)),
            closed_by_client: AtomicBool::new(false),
        });
        self.hub.links.lock().push(Arc::downgrade(&link));

        let client_channel: Arc<dyn ClientChannel> = Arc::new(MemoryClientChannel {
            link: Arc::clone(&link),
        });
        let link_id = link.id;
        tokio::spawn(async move {
            while let Some(msg) = svc_rx.recv().await {
                handler.on_message_from_client(msg, Arc::clone(&client_channel));
            }
            trace!("memory transport: service side of {} ended", link_id);
            handler.on_client_disconnect(link_id);
        });

        let pump_link = Arc::clone(&link);
        tokio::spawn(async move {
            while let Some(msg) = cli_rx.recv().await {
                callback.on_message_to_client(msg);
            }
            if !pump_link.closed_by_client.load(Ordering::Acquire) {
                callback.on_service_disconnect();
            }
        });

        debug!("memory transport: connection {} opened to {}", link.id, uri);
        Ok(Arc::new(MemoryServiceChannel { link }))
    }

    async fn listen(
        &self,
        uri: &str,
        handler: Arc<dyn IncomingHandler>,
    ) -> Result<Box<dyn Listener>> {
        let mut listeners = self.hub.listeners.lock();
        if listeners.contains_key(uri) {
            return Err(RemactError::Transport(format!("{} is already in use", uri)));
        }
        listeners.insert(uri.to_string(), handler);
        Ok(Box::new(MemoryListener {
            uri: uri.to_string(),
            hub: Arc::clone(&self.hub),
        }))
    }
}

struct MemoryServiceChannel {
    link: Arc<Link>,
}

impl ServiceChannel for MemoryServiceChannel {
    fn message_to_service(&self, msg: RemactMessage) -> Result<()> {
        match self.link.to_service.lock().as_ref() {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| RemactError::Transport("service side closed".into())),
            None => Err(RemactError::Transport(format!(
                "connection {} to {} is closed",
                self.link.id, self.link.uri
            ))),
        }
    }

    fn port_state(&self) -> PortState {
        if self.link.to_service.lock().is_some() {
            PortState::Ok
        } else {
            PortState::Disconnected
        }
    }

    fn close(&self) {
        self.link.closed_by_client.store(true, Ordering::Release);
        self.link.sever();
    }
}

struct MemoryClientChannel {
    link: Arc<Link>,
}

impl ClientChannel for MemoryClientChannel {
    fn message_to_client(&self, msg: RemactMessage) -> Result<()> {
        match self.link.to_client.lock().as_ref() {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| RemactError::Transport("client side closed".into())),
            None => Err(RemactError::Transport(format!(
                "connection {} is closed",
                self.link.id
            ))),
        }
    }

    fn is_open(&self) -> bool {
        self.link.to_client.lock().is_some()
    }

    fn channel_id(&self) -> u64 {
        self.link.id
    }

    fn close(&self) {
        self.link.sever();
    }
}

struct MemoryListener {
    uri: String,
    hub: Arc<Hub>,
}

impl Listener for MemoryListener {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn close(&self) {
        self.hub.listeners.lock().remove(&self.uri);
    }
}
