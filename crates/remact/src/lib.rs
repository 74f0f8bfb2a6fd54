// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Remact - actor ports with a gossiping service catalog
//!
//! Independent *actor ports* exchange typed Request / Response /
//! Notification / Error envelopes over a pluggable transport. A client port
//! opens a logical connection to a service port, correlates every request
//! with exactly one answer and detects connection loss. Services announce
//! themselves to a catalog; catalogs gossip their registries with each
//! other so clients can resolve a service name anywhere in the plant.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use remact::{ClientPort, MemoryTransport, RequestContext, ServicePort, ThreadingMode};
//! use remact::ReadyMessage;
//! use std::sync::Arc;
//!
//! # async fn example() -> remact::Result<()> {
//! let transport = Arc::new(MemoryTransport::new());
//!
//! let service = ServicePort::builder("Clock", "mem://plant:40001/Clock", transport.clone())
//!     .threading(ThreadingMode::Multithreaded)
//!     .build()?;
//! service.on_request("Ping", |_: ReadyMessage, _ctx: &RequestContext| Ok(ReadyMessage {}));
//! service.open().await?;
//!
//! let client = ClientPort::builder("Console", transport)
//!     .service_uri("mem://plant:40001/Clock")
//!     .threading(ThreadingMode::Multithreaded)
//!     .build()?;
//! client.connect().await?;
//! let _: ReadyMessage = client.ask("Ping", &ReadyMessage {}).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Application handlers                         |
//! |        NotificationTable (client)  |  MethodTable (service)         |
//! +---------------------------------------------------------------------+
//! |                      Dispatcher / ExecutionContext                  |
//! +---------------------------------------------------------------------+
//! |   ClientPort + OutstandingRequests | ServicePort + ServiceConnection |
//! +---------------------------------------------------------------------+
//! |        CatalogClient  <-->  CatalogService  <-->  peer catalogs     |
//! +---------------------------------------------------------------------+
//! |            Transport (MemoryTransport, remact-tcp, ...)             |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`client`] - client port, request correlation, address fallback
//! - [`service`] - service port, client slots, service-user proxies
//! - [`catalog`] - registry, catalog service, catalog client
//! - [`transport`] - driver contract and the in-process transport
//! - [`config`] - TOML configuration

/// Identities of actors and hosting processes.
pub mod actor_info;
/// Distributed service catalog.
pub mod catalog;
/// Client port.
pub mod client;
/// TOML configuration.
pub mod config;
/// Handler scheduling (execution contexts).
pub mod dispatch;
/// Error types.
pub mod error;
/// Handler tables.
pub mod handler;
/// Hosting process.
pub mod host;
/// Message envelope and payloads.
pub mod message;
/// Service port.
pub mod service;
/// Periodic task driver.
pub mod timer;
/// Driver contract and in-process transport.
pub mod transport;

pub use actor_info::{ActorInfo, ActorInfoList, HostIdentity, Usage};
pub use catalog::{CatalogClient, CatalogService, Registration, Registry};
pub use client::{ClientPort, ClientPortBuilder, ResponseSink, WeakClientPort};
pub use config::{
    CatalogClientConfig, CatalogServiceConfig, ClientConfig, ConfigError, RemactConfig,
    ServiceConfig,
};
pub use dispatch::{ContextHandle, Dispatcher, ExecutionContext, ThreadingMode};
pub use error::{ErrorCode, ErrorMessage, RemactError, Result};
pub use handler::{HandlerResult, RequestContext};
pub use host::Host;
pub use message::{MessageType, Payload, PayloadType, ReadyMessage, RemactMessage};
pub use service::{ServicePort, ServicePortBuilder};
pub use timer::{spawn_periodic, PeriodicTask, TickGate};
pub use transport::{
    ClientCallback, ClientChannel, IncomingHandler, Listener, MemoryTransport, PortState,
    ServiceChannel, Transport,
};
