// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Catalog daemon configuration.
//!
//! ```toml
//! [identity]
//! app_name = "remact-catalog"
//!
//! [catalog]
//! uri = "tcp://plant-7:40000/RemactCatalog"
//! peers = ["tcp://plant-9:40000/RemactCatalog"]
//!
//! [transport]
//! bind_address = "0.0.0.0"
//! ```

use remact::config::{IdentityConfig, CATALOG_PORT};
use remact::{CatalogServiceConfig, HostIdentity};
use remact_tcp::{TcpTransportConfig, TcpUri};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

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

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogServerConfig {
    /// Tracing filter, e.g. `info` or `remact=debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_identity")]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub catalog: CatalogServiceConfig,

    #[serde(default)]
    pub transport: TransportSettings,
}

fn default_identity() -> IdentityConfig {
    IdentityConfig {
        app_name: "remact-catalog".into(),
        ..Default::default()
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for CatalogServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            identity: default_identity(),
            catalog: CatalogServiceConfig::default(),
            transport: TransportSettings::default(),
        }
    }
}

/// TCP settings of the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Listen on this address instead of the catalog URI host.
    #[serde(default)]
    pub bind_address: Option<IpAddr>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_true")]
    pub nodelay: bool,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_max_frame_size() -> usize {
    remact_tcp::frame::DEFAULT_MAX_FRAME_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            bind_address: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            max_frame_size: default_max_frame_size(),
            nodelay: true,
        }
    }
}

impl TransportSettings {
    pub fn to_tcp_config(&self) -> TcpTransportConfig {
        TcpTransportConfig {
            bind_address: self.bind_address,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_frame_size: self.max_frame_size,
            nodelay: self.nodelay,
        }
    }
}

impl CatalogServerConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.app_name.is_empty() {
            return Err(ConfigError::Invalid("identity.app_name is empty".into()));
        }
        let uri = TcpUri::parse(&self.catalog.uri)
            .map_err(|e| ConfigError::Invalid(format!("catalog.uri: {}", e)))?;
        if uri.path.trim_start_matches('/') != self.catalog.name {
            return Err(ConfigError::Invalid(format!(
                "catalog.uri path '{}' does not match catalog.name '{}'",
                uri.path, self.catalog.name
            )));
        }
        for peer in &self.catalog.peers {
            TcpUri::parse(peer).map_err(|e| ConfigError::Invalid(format!("peer: {}", e)))?;
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "transport.connect_timeout_ms must be > 0".into(),
            ));
        }
        if self.transport.max_frame_size < 1024 {
            return Err(ConfigError::Invalid(
                "transport.max_frame_size must be at least 1024".into(),
            ));
        }
        self.catalog
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Listen on `port` of the configured catalog host.
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let uri = TcpUri::parse(&self.catalog.uri)
            .map_err(|e| ConfigError::Invalid(format!("catalog.uri: {}", e)))?;
        self.catalog.uri = uri.with_port(port);
        Ok(())
    }

    /// Add peers given on the command line, skipping duplicates.
    pub fn add_peers<I>(&mut self, peers: I)
    where
        I: IntoIterator<Item = String>,
    {
        for peer in peers {
            if !self.catalog.peers.contains(&peer) {
                self.catalog.peers.push(peer);
            }
        }
    }

    pub fn host_identity(&self) -> HostIdentity {
        let host = HostIdentity::current(&self.identity.app_name, self.identity.app_instance);
        match &self.identity.host_name {
            Some(name) => host.with_host_name(name.clone()),
            None => host,
        }
    }

    /// Example file written by `gen-config`.
    pub fn example() -> Self {
        let mut config = Self::default();
        config.catalog.uri = format!("tcp://plant-7:{}/RemactCatalog", CATALOG_PORT);
        config.catalog.peers = vec![format!("tcp://plant-9:{}/RemactCatalog", CATALOG_PORT)];
        config.transport.bind_address = Some(IpAddr::from([0, 0, 0, 0]));
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CatalogServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.catalog.uri, "tcp://localhost:40000/RemactCatalog");
        assert_eq!(config.identity.app_name, "remact-catalog");
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "remact=debug"

[catalog]
uri = "tcp://plant-7:40100/RemactCatalog"
peers = ["tcp://plant-9:40000/RemactCatalog"]
peer_backoff_secs = 2

[transport]
bind_address = "0.0.0.0"
"#
        )
        .unwrap();

        let config = CatalogServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "remact=debug");
        assert_eq!(config.catalog.peers.len(), 1);
        assert_eq!(config.catalog.peer_backoff_secs, 2);
        assert_eq!(config.catalog.peer_refresh_secs, 10);
        assert_eq!(
            config.transport.to_tcp_config().bind_address,
            Some(IpAddr::from([0, 0, 0, 0]))
        );
    }

    #[test]
    fn test_rejects_bad_uris() {
        let mut config = CatalogServerConfig::default();
        config.catalog.uri = "mem://plant-7:40000/RemactCatalog".into();
        assert!(config.validate().is_err());

        let mut config = CatalogServerConfig::default();
        config.catalog.uri = "tcp://plant-7:40000/Elsewhere".into();
        assert!(config.validate().is_err());

        let mut config = CatalogServerConfig::default();
        config.catalog.peers = vec!["plant-9".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_command_line_overrides() {
        let mut config = CatalogServerConfig::default();
        config.set_port(40123).unwrap();
        assert_eq!(config.catalog.uri, "tcp://localhost:40123/RemactCatalog");

        let peer = "tcp://plant-9:40000/RemactCatalog".to_string();
        config.add_peers(vec![peer.clone(), peer]);
        assert_eq!(config.catalog.peers.len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_example_round_trips() {
        let example = CatalogServerConfig::example();
        let text = example.to_toml().unwrap();
        let parsed = CatalogServerConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.catalog.peers, example.catalog.peers);
        assert_eq!(parsed.catalog.uri, example.catalog.uri);
    }
}
