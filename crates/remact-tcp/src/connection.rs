// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One TCP connection: a writer task fed by a queue and a reader task.

use crate::error::TcpError;
use crate::frame::{read_frame, write_frame};
use parking_lot::Mutex;
use remact::{
    ClientCallback, ClientChannel, IncomingHandler, PortState, RemactError, RemactMessage,
    ServiceChannel,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

type Outbound = mpsc::UnboundedSender<RemactMessage>;

/// Queue side of a connection, shared by both channel kinds.
pub(crate) struct Link {
    id: u64,
    peer: SocketAddr,
    tx: Mutex<Option<Outbound>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed_locally: AtomicBool,
}

impl Link {
    fn send(&self, msg: RemactMessage) -> remact::Result<()> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| RemactError::Transport(format!("connection to {} closed", self.peer))),
            None => Err(RemactError::Transport(format!(
                "connection {} to {} is closed",
                self.id, self.peer
            ))),
        }
    }

    fn is_open(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Stop writing; the writer task ends and shuts the socket down.
    fn shutdown(&self) {
        self.tx.lock().take();
    }

    fn close_locally(&self) {
        self.closed_locally.store(true, Ordering::Release);
        self.shutdown();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

fn spawn_writer(
    link: &Arc<Link>,
    mut write: OwnedWriteHalf,
    max_frame_size: usize,
) -> Outbound {
    let (tx, mut rx) = mpsc::unbounded_channel::<RemactMessage>();
    let id = link.id;
    let peer = link.peer;
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match write_frame(&mut write, &msg, max_frame_size).await {
                Ok(()) => {}
                Err(TcpError::FrameTooLarge { size, max }) => {
                    warn!(
                        "connection {}: dropping '{}' ({} bytes > {})",
                        id, msg.destination_method, size, max
                    );
                }
                Err(e) => {
                    debug!("connection {} to {}: write failed: {}", id, peer, e);
                    break;
                }
            }
        }
        trace!("connection {}: writer ended", id);
    });
    tx
}

/// Client end of a connection.
pub(crate) struct TcpServiceChannel {
    link: Arc<Link>,
}

impl TcpServiceChannel {
    /// Start the reader and writer tasks for an opened stream.
    pub(crate) fn start(
        id: u64,
        stream: TcpStream,
        max_frame_size: usize,
        callback: Arc<dyn ClientCallback>,
    ) -> Result<Arc<Self>, TcpError> {
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();
        let link = Arc::new(Link {
            id,
            peer,
            tx: Mutex::new(None),
            reader: Mutex::new(None),
            closed_locally: AtomicBool::new(false),
        });
        *link.tx.lock() = Some(spawn_writer(&link, write, max_frame_size));

        let reader_link = Arc::clone(&link);
        let reader = tokio::spawn(async move {
            pump_to_client(&reader_link, read, max_frame_size, &callback).await;
            reader_link.shutdown();
            if !reader_link.closed_locally.load(Ordering::Acquire) {
                callback.on_service_disconnect();
            }
        });
        *link.reader.lock() = Some(reader);
        Ok(Arc::new(Self { link }))
    }
}

async fn pump_to_client(
    link: &Link,
    mut read: OwnedReadHalf,
    max_frame_size: usize,
    callback: &Arc<dyn ClientCallback>,
) {
    loop {
        match read_frame::<_, RemactMessage>(&mut read, max_frame_size).await {
            Ok(Some(msg)) => callback.on_message_to_client(msg),
            Ok(None) => {
                debug!("connection {}: service {} closed", link.id, link.peer);
                return;
            }
            Err(e) => {
                warn!("connection {}: read from {} failed: {}", link.id, link.peer, e);
                return;
            }
        }
    }
}

impl ServiceChannel for TcpServiceChannel {
    fn message_to_service(&self, msg: RemactMessage) -> remact::Result<()> {
        self.link.send(msg)
    }

    fn port_state(&self) -> PortState {
        if self.link.is_open() {
            PortState::Ok
        } else {
            PortState::Disconnected
        }
    }

    fn close(&self) {
        self.link.close_locally();
    }
}

/// Service end of a connection.
pub(crate) struct TcpClientChannel {
    link: Arc<Link>,
}

/// Serve an accepted stream whose hello frame selected `handler`.
pub(crate) fn serve_accepted(
    id: u64,
    peer: SocketAddr,
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    max_frame_size: usize,
    handler: Arc<dyn IncomingHandler>,
) {
    let link = Arc::new(Link {
        id,
        peer,
        tx: Mutex::new(None),
        reader: Mutex::new(None),
        closed_locally: AtomicBool::new(false),
    });
    *link.tx.lock() = Some(spawn_writer(&link, write, max_frame_size));
    let channel: Arc<dyn ClientChannel> = Arc::new(TcpClientChannel {
        link: Arc::clone(&link),
    });

    tokio::spawn(async move {
        let mut read = read;
        loop {
            match read_frame::<_, RemactMessage>(&mut read, max_frame_size).await {
                Ok(Some(msg)) => handler.on_message_from_client(msg, Arc::clone(&channel)),
                Ok(None) => {
                    debug!("connection {}: client {} closed", id, peer);
                    break;
                }
                Err(e) => {
                    warn!("connection {}: read from {} failed: {}", id, peer, e);
                    break;
                }
            }
        }
        link.shutdown();
        handler.on_client_disconnect(id);
    });
}

impl ClientChannel for TcpClientChannel {
    fn message_to_client(&self, msg: RemactMessage) -> remact::Result<()> {
        self.link.send(msg)
    }

    fn is_open(&self) -> bool {
        self.link.is_open()
    }

    fn channel_id(&self) -> u64 {
        self.link.id
    }

    fn close(&self) {
        self.link.shutdown();
    }
}
