// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # remact-tcp
//!
//! TCP transport for remact ports.
//!
//! URIs have the form `tcp://host:port/Service`. Several services may share
//! a port: a client's first frame is a [`frame::Hello`] naming the path it
//! wants, and the listener hands the connection to that service.
//!
//! Every frame is a 4-byte big-endian length followed by a JSON body. Each
//! connection has a writer task draining an unbounded queue, so sends never
//! block the caller, and a reader task pushing inbound envelopes into the
//! port.
//!
//! ```rust,no_run
//! use remact::{ClientPort, ThreadingMode};
//! use remact_tcp::TcpTransport;
//! use std::sync::Arc;
//!
//! # async fn example() -> remact::Result<()> {
//! let transport = Arc::new(TcpTransport::default());
//! let client = ClientPort::builder("Console", transport)
//!     .service_uri("tcp://plant-7:40001/Echo")
//!     .threading(ThreadingMode::Multithreaded)
//!     .build()?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
pub mod error;
pub mod frame;

pub use error::TcpError;

use async_trait::async_trait;
use connection::{serve_accepted, TcpServiceChannel};
use frame::{read_frame, write_frame, Hello, DEFAULT_MAX_FRAME_SIZE};
use parking_lot::Mutex;
use remact::{ClientCallback, IncomingHandler, Listener, ServiceChannel, Transport};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// TCP transport settings.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Local address to bind listeners to; the URI host when `None`.
    pub bind_address: Option<IpAddr>,
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            connect_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
        }
    }
}

/// Parsed `tcp://host:port/Service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpUri {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl TcpUri {
    pub fn parse(uri: &str) -> Result<Self, TcpError> {
        let invalid = |reason: &str| TcpError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "tcp" {
            return Err(invalid("scheme must be tcp"));
        }
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port().ok_or_else(|| invalid("missing port"))?;
        let path = url.path().to_string();
        if path.is_empty() || path == "/" {
            return Err(invalid("missing service path"));
        }
        Ok(Self { host, port, path })
    }

    /// Same service at another port.
    pub fn with_port(&self, port: u16) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("tcp://{}:{}{}", host, port, self.path)
    }
}

type Services = Arc<Mutex<HashMap<String, Arc<dyn IncomingHandler>>>>;

/// One bound port and the services reachable through it.
struct PortListener {
    local_addr: SocketAddr,
    services: Services,
    accept: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    /// Keyed by bound port.
    ports: Mutex<HashMap<u16, Arc<PortListener>>>,
    next_id: AtomicU64,
}

/// Transport over TCP.
///
/// Clones share listeners.
#[derive(Clone, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,
    shared: Arc<Shared>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    /// Locally bound address for `port`, once a service listens on it.
    pub fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.shared.ports.lock().get(&port).map(|p| p.local_addr)
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn bind(&self, uri: &TcpUri) -> Result<Arc<PortListener>, TcpError> {
        let listener = match self.config.bind_address {
            Some(ip) => TcpListener::bind(SocketAddr::new(ip, uri.port)).await?,
            None => TcpListener::bind((uri.host.as_str(), uri.port)).await?,
        };
        let local_addr = listener.local_addr()?;
        let services: Services = Arc::new(Mutex::new(HashMap::new()));
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&services), self.clone()));
        info!("tcp transport listening on {}", local_addr);
        Ok(Arc::new(PortListener {
            local_addr,
            services,
            accept,
        }))
    }
}

async fn accept_loop(listener: TcpListener, services: Services, transport: TcpTransport) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("tcp transport: connection from {}", peer);
                let services = Arc::clone(&services);
                let transport = transport.clone();
                tokio::spawn(async move {
                    if let Err(e) = route_accepted(stream, peer, &services, &transport).await {
                        warn!("tcp transport: connection from {} rejected: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                warn!("tcp transport: accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn route_accepted(
    stream: TcpStream,
    peer: SocketAddr,
    services: &Services,
    transport: &TcpTransport,
) -> Result<(), TcpError> {
    let max = transport.config.max_frame_size;
    if transport.config.nodelay {
        stream.set_nodelay(true)?;
    }
    let (mut read, write) = stream.into_split();
    let hello: Hello = tokio::time::timeout(
        transport.config.connect_timeout,
        read_frame(&mut read, max),
    )
    .await
    .map_err(|_| TcpError::ConnectTimeout(peer.to_string()))??
    .ok_or(TcpError::EmptyFrame)?;

    let handler = services
        .lock()
        .get(&hello.service)
        .cloned()
        .ok_or_else(|| TcpError::UnknownService(hello.service.clone()))?;
    let id = transport.next_id();
    debug!("tcp transport: connection {} from {} to {}", id, peer, hello.service);
    serve_accepted(id, peer, read, write, max, handler);
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(
        &self,
        uri: &str,
        callback: Arc<dyn ClientCallback>,
    ) -> remact::Result<Arc<dyn ServiceChannel>> {
        let target = TcpUri::parse(uri)?;
        let addr = (target.host.as_str(), target.port);
        let mut stream =
            tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| TcpError::ConnectTimeout(uri.to_string()))?
                .map_err(TcpError::from)?;
        if self.config.nodelay {
            stream.set_nodelay(true).map_err(TcpError::from)?;
        }
        let hello = Hello {
            service: target.path.clone(),
        };
        write_frame(&mut stream, &hello, self.config.max_frame_size).await?;

        let id = self.next_id();
        let channel: Arc<dyn ServiceChannel> =
            TcpServiceChannel::start(id, stream, self.config.max_frame_size, callback)?;
        debug!("tcp transport: connection {} opened to {}", id, uri);
        Ok(channel)
    }

    async fn listen(
        &self,
        uri: &str,
        handler: Arc<dyn IncomingHandler>,
    ) -> remact::Result<Box<dyn Listener>> {
        let target = TcpUri::parse(uri)?;
        let existing = if target.port == 0 {
            None
        } else {
            self.shared.ports.lock().get(&target.port).cloned()
        };
        let port = match existing {
            Some(port) => port,
            None => {
                let port = self.bind(&target).await?;
                self.shared
                    .ports
                    .lock()
                    .insert(port.local_addr.port(), Arc::clone(&port));
                port
            }
        };

        {
            let mut services = port.services.lock();
            if services.contains_key(&target.path) {
                return Err(remact::RemactError::Transport(format!(
                    "{} is already in use",
                    uri
                )));
            }
            services.insert(target.path.clone(), handler);
        }

        Ok(Box::new(TcpListenerHandle {
            uri: target.with_port(port.local_addr.port()),
            path: target.path,
            port,
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Registration of one service on a bound port.
struct TcpListenerHandle {
    uri: String,
    path: String,
    port: Arc<PortListener>,
    shared: Arc<Shared>,
}

impl Listener for TcpListenerHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn close(&self) {
        let empty = {
            let mut services = self.port.services.lock();
            services.remove(&self.path);
            services.is_empty()
        };
        if empty {
            self.port.accept.abort();
            self.shared.ports.lock().remove(&self.port.local_addr.port());
            info!("tcp transport: stopped listening on {}", self.port.local_addr);
        }
    }
}
