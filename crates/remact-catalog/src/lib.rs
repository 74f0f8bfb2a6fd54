// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # remact-catalog
//!
//! Standalone catalog daemon. Processes announce their services to the
//! catalog on their host; catalogs gossip their registries with configured
//! peers so a lookup at any of them finds services announced at the others.
//!
//! ```text
//!   plant-7                         plant-9
//! +-------------+   Synchronize   +-------------+
//! |  catalog    |<--------------->|  catalog    |
//! +-------------+                 +-------------+
//!    ^ ServiceOpened                 ^ LookupService
//!    |                               |
//! +-------------+                 +-------------+
//! | app (Echo)  |<----------------| app client  |
//! +-------------+    requests     +-------------+
//! ```

pub mod config;
pub mod server;

pub use config::{CatalogServerConfig, ConfigError, TransportSettings};
pub use server::{CatalogServer, ServerError};
