// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration. Every
//! field has a default, so a partial file is valid.
//!
//! ```toml
//! [identity]
//! app_name = "plant-console"
//! app_instance = 3
//!
//! [client]
//! timeout_secs = 30
//! threading = "multithreaded"
//!
//! [catalog]
//! uri = "tcp://catalog-host:40000/RemactCatalog"
//! ```

use crate::actor_info::{HostIdentity, DEFAULT_TIMEOUT_SECONDS};
use crate::dispatch::ThreadingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Well-known TCP port of the catalog service.
pub const CATALOG_PORT: u16 = 40000;
/// Service name of the catalog.
pub const CATALOG_SERVICE_NAME: &str = "RemactCatalog";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration of a hosting process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemactConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub catalog: CatalogClientConfig,
}

impl RemactConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.app_name.is_empty() {
            return Err(ConfigError::Invalid("identity.app_name is empty".into()));
        }
        self.client.validate()?;
        self.service.validate()?;
        self.catalog.validate()
    }

    /// Identity of the current process.
    pub fn host_identity(&self) -> HostIdentity {
        let host = HostIdentity::current(&self.identity.app_name, self.identity.app_instance);
        match &self.identity.host_name {
            Some(name) => host.with_host_name(name.clone()),
            None => host,
        }
    }
}

/// Process identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Plant-unique instance number, 0 when not unique.
    #[serde(default)]
    pub app_instance: i32,

    /// Overrides the host name taken from the environment.
    #[serde(default)]
    pub host_name: Option<String>,
}

fn default_app_name() -> String {
    "remact-app".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_instance: 0,
            host_name: None,
        }
    }
}

/// Client port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Announced timeout; also used when the service announces none.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,

    /// Bound for the connect handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound for awaited calls.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub threading: ThreadingMode,
}

fn default_timeout_secs() -> u32 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            threading: ThreadingMode::default(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("client.timeout_secs must be > 0".into()));
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "client connect and request timeouts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Service port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Timeout for clients that announce none.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,

    /// Client id of the first slot.
    #[serde(default = "default_first_client_id")]
    pub first_client_id: i32,

    #[serde(default)]
    pub threading: ThreadingMode,
}

fn default_first_client_id() -> i32 {
    1
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            first_client_id: default_first_client_id(),
            threading: ThreadingMode::default(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("service.timeout_secs must be > 0".into()));
        }
        if self.first_client_id <= 0 {
            return Err(ConfigError::Invalid(
                "service.first_client_id must be > 0 (0 means 'not connected')".into(),
            ));
        }
        Ok(())
    }
}

/// Settings of the per-process catalog client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogClientConfig {
    /// Announce local services and allow lookups.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_catalog_uri")]
    pub uri: String,

    /// Timer period; one local service is handled per tick.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Re-announce registered services after this many seconds.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_catalog_uri() -> String {
    format!("tcp://localhost:{}/{}", CATALOG_PORT, CATALOG_SERVICE_NAME)
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_refresh_secs() -> u64 {
    10
}

impl Default for CatalogClientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uri: default_catalog_uri(),
            tick_ms: default_tick_ms(),
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl CatalogClientConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.uri.is_empty() {
            return Err(ConfigError::Invalid("catalog.uri is empty".into()));
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("catalog.tick_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Settings of a catalog service (the registry/router).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogServiceConfig {
    #[serde(default = "default_catalog_name")]
    pub name: String,

    /// Listening URI.
    #[serde(default = "default_catalog_uri")]
    pub uri: String,

    /// URIs of peer catalogs to synchronize with.
    #[serde(default)]
    pub peers: Vec<String>,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Full list is re-sent to every peer at least this often.
    #[serde(default = "default_peer_refresh_secs")]
    pub peer_refresh_secs: u64,

    /// Delay between reconnect attempts to a peer.
    #[serde(default = "default_peer_backoff_secs")]
    pub peer_backoff_secs: u64,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

fn default_catalog_name() -> String {
    CATALOG_SERVICE_NAME.to_string()
}

fn default_peer_refresh_secs() -> u64 {
    10
}

fn default_peer_backoff_secs() -> u64 {
    5
}

impl Default for CatalogServiceConfig {
    fn default() -> Self {
        Self {
            name: default_catalog_name(),
            uri: default_catalog_uri(),
            peers: Vec::new(),
            tick_ms: default_tick_ms(),
            peer_refresh_secs: default_peer_refresh_secs(),
            peer_backoff_secs: default_peer_backoff_secs(),
            service: ServiceConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl CatalogServiceConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn peer_refresh(&self) -> Duration {
        Duration::from_secs(self.peer_refresh_secs)
    }

    pub fn peer_backoff(&self) -> Duration {
        Duration::from_secs(self.peer_backoff_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("catalog name is empty".into()));
        }
        if self.uri.is_empty() {
            return Err(ConfigError::Invalid("catalog uri is empty".into()));
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be > 0".into()));
        }
        if self.peers.iter().any(|p| p == &self.uri) {
            return Err(ConfigError::Invalid(format!(
                "catalog {} lists itself as peer",
                self.uri
            )));
        }
        self.service.validate()?;
        self.client.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = RemactConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client.timeout_secs, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(config.client.threading, ThreadingMode::SingleContext);
        assert_eq!(
            config.catalog.uri,
            "tcp://localhost:40000/RemactCatalog"
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RemactConfig::from_toml(
            r#"
            [identity]
            app_name = "plant-console"
            app_instance = 3

            [client]
            threading = "multithreaded"
            "#,
        )
        .unwrap();
        assert_eq!(config.identity.app_name, "plant-console");
        assert_eq!(config.identity.app_instance, 3);
        assert_eq!(config.client.threading, ThreadingMode::Multithreaded);
        assert_eq!(config.client.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.service.first_client_id, 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RemactConfig::from_toml("[service]\nfirst_client_id = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = RemactConfig::from_toml("[client]\ntimeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[identity]\napp_name = \"from-file\"\nhost_name = \"ws-9\"").unwrap();

        let config = RemactConfig::from_file(file.path()).unwrap();
        assert_eq!(config.identity.app_name, "from-file");
        assert_eq!(config.host_identity().host_name, "ws-9");
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = RemactConfig::default();
        config.catalog.refresh_secs = 42;
        let text = config.to_toml().unwrap();
        let back = RemactConfig::from_toml(&text).unwrap();
        assert_eq!(back.catalog.refresh_secs, 42);
    }

    #[test]
    fn test_catalog_service_rejects_self_peer() {
        let mut config = CatalogServiceConfig::default();
        assert!(config.validate().is_ok());
        config.peers.push(config.uri.clone());
        assert!(config.validate().is_err());
    }
}
