// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Distributed service catalog.
//!
//! - [`Registry`]: the list of known services and its merge rules.
//! - [`CatalogService`]: a service port answering the catalog methods and
//!   gossiping the registry with peer catalogs.
//! - [`CatalogClient`]: per-process agent announcing local services and
//!   resolving service names.
//!
//! Catalog methods and payloads:
//!
//! | method | request | response |
//! |---|---|---|
//! | `ServiceOpened` | `ActorInfo` | `ReadyMessage` or `ServiceIsBackup` |
//! | `ServiceClosed` | `ActorInfo` | `ReadyMessage` |
//! | `LookupService` | `ActorInfo` (name only) | `ActorInfo` or `ServiceNameNotRegisteredInCatalog` |
//! | `SynchronizeCatalog` | `ActorInfoList` | `ActorInfoList` |

pub mod client;
pub mod peer;
pub mod registry;
pub mod service;

pub use client::CatalogClient;
pub use peer::{PeerLink, PeerStatus};
pub use registry::{Registration, Registry, RegistryEntry};
pub use service::CatalogService;

/// Announce (or keep alive) an open service.
pub const SERVICE_OPENED: &str = "ServiceOpened";
/// Withdraw a service.
pub const SERVICE_CLOSED: &str = "ServiceClosed";
/// Resolve a service name.
pub const LOOKUP_SERVICE: &str = "LookupService";
/// Exchange registries between catalogs.
pub const SYNCHRONIZE_CATALOG: &str = "SynchronizeCatalog";
