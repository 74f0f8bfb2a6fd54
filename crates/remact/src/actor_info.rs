// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Actor identity.
//!
//! [`ActorInfo`] is the public identity of a client or service port. It is
//! sent with connect, disconnect and catalog messages. Each component that
//! stores one keeps its own copy.

use crate::message::PayloadType;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Default connection timeout announced by ports (seconds).
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 30;

/// Purpose of an [`ActorInfo`] inside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Usage {
    #[default]
    Undefined,
    ClientConnectRequest,
    ServiceConnectResponse,
    ClientDisconnectRequest,
    ServiceDisconnectResponse,
    ServiceEnableRequest,
    ServiceEnableResponse,
    ServiceDisableRequest,
    ServiceDisableResponse,
    ServiceAddressRequest,
    ServiceAddressResponse,
}

/// Public identity of an actor port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorInfo {
    pub name: String,
    pub is_service_name: bool,
    #[serde(default)]
    pub app_name: String,
    /// Plant-unique instance number; 0 when not unique.
    #[serde(default)]
    pub app_instance: i32,
    #[serde(default)]
    pub process_id: u32,
    #[serde(default)]
    pub host_name: String,
    /// Endpoint of a service, e.g. `tcp://host:40001/Echo`.
    #[serde(default)]
    pub uri: Option<String>,
    /// Alternative addresses of the host, tried in order when the URI fails.
    #[serde(default)]
    pub address_list: Vec<IpAddr>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
    /// Number of catalog hops this record travelled.
    #[serde(default)]
    pub hop_count: i32,
    #[serde(default)]
    pub application_run_time: Duration,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub usage: Usage,
}

fn default_timeout_seconds() -> u32 {
    DEFAULT_TIMEOUT_SECONDS
}

impl PayloadType for ActorInfo {
    const TYPE_NAME: &'static str = "ActorInfo";
}

impl ActorInfo {
    /// Identity of a service port reachable at `uri`.
    pub fn service(name: &str, host: &HostIdentity, uri: &str) -> Self {
        let mut info = Self::from_host(name, host);
        info.is_service_name = true;
        info.uri = Some(uri.to_string());
        info
    }

    /// Identity of a client port.
    pub fn client(name: &str, host: &HostIdentity) -> Self {
        Self::from_host(name, host)
    }

    /// Bare name, used to query the catalog.
    pub fn lookup(service_name: &str) -> Self {
        Self {
            name: service_name.to_string(),
            is_service_name: true,
            app_name: String::new(),
            app_instance: 0,
            process_id: 0,
            host_name: String::new(),
            uri: None,
            address_list: Vec::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            hop_count: 0,
            application_run_time: Duration::ZERO,
            is_open: false,
            usage: Usage::ServiceAddressRequest,
        }
    }

    fn from_host(name: &str, host: &HostIdentity) -> Self {
        Self {
            name: name.to_string(),
            is_service_name: false,
            app_name: host.app_name.clone(),
            app_instance: host.app_instance,
            process_id: host.process_id,
            host_name: host.host_name.clone(),
            uri: None,
            address_list: host.addresses.clone(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            hop_count: 0,
            application_run_time: host.run_time(),
            is_open: false,
            usage: Usage::Undefined,
        }
    }

    /// Identity comparison.
    ///
    /// Services are relocatable and compare by name. Clients compare by
    /// instance, name and application; a non-unique instance (0) also
    /// requires the same host and process id.
    pub fn is_equal_to(&self, other: &ActorInfo) -> bool {
        if self.is_service_name || other.is_service_name {
            return self.is_service_name == other.is_service_name && self.name == other.name;
        }
        self.app_instance == other.app_instance
            && self.name == other.name
            && self.app_name == other.app_name
            && (self.app_instance != 0
                || (self.host_name == other.host_name && self.process_id == other.process_id))
    }

    /// True when the identity depends on the OS process id.
    ///
    /// The id is recycled by the OS, so a slot keyed on it must not be
    /// handed to another process after the owner has gone.
    pub fn is_process_bound(&self) -> bool {
        !self.is_service_name && self.app_instance == 0
    }

    /// Copy with a different usage.
    pub fn with_usage(&self, usage: Usage) -> Self {
        let mut info = self.clone();
        info.usage = usage;
        info
    }

    /// Short description for log lines.
    pub fn describe(&self) -> String {
        match &self.uri {
            Some(uri) => format!("'{}' at {}", self.name, uri),
            None if self.app_name.is_empty() => format!("'{}'", self.name),
            None => format!(
                "'{}' of {}#{} on {} (pid {})",
                self.name, self.app_name, self.app_instance, self.host_name, self.process_id
            ),
        }
    }
}

/// List of identities, exchanged between catalogs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActorInfoList {
    pub items: Vec<ActorInfo>,
}

impl PayloadType for ActorInfoList {
    const TYPE_NAME: &'static str = "ActorInfoList";
}

/// Identity of the hosting process, shared by all of its ports.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub app_name: String,
    pub app_instance: i32,
    pub process_id: u32,
    pub host_name: String,
    pub addresses: Vec<IpAddr>,
    started: Instant,
}

impl HostIdentity {
    /// Identity of the current process.
    pub fn current(app_name: &str, app_instance: i32) -> Self {
        Self {
            app_name: app_name.to_string(),
            app_instance,
            process_id: std::process::id(),
            host_name: local_host_name(),
            addresses: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn with_addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.addresses = addresses;
        self
    }

    /// Time since this identity was created.
    pub fn run_time(&self) -> Duration {
        self.started.elapsed()
    }
}

fn local_host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(instance: i32, pid: u32) -> HostIdentity {
        let mut h = HostIdentity::current("Plant", instance).with_host_name("ws-17");
        h.process_id = pid;
        h
    }

    #[test]
    fn test_service_identity_compares_by_name() {
        let a = ActorInfo::service("Echo", &host(1, 100), "tcp://a:1/Echo");
        let b = ActorInfo::service("Echo", &host(2, 200), "tcp://b:2/Echo");
        assert!(a.is_equal_to(&b));

        let client = ActorInfo::client("Echo", &host(1, 100));
        assert!(!a.is_equal_to(&client));
    }

    #[test]
    fn test_unique_instance_ignores_process() {
        let a = ActorInfo::client("Console", &host(3, 100));
        let restarted = ActorInfo::client("Console", &host(3, 999));
        assert!(a.is_equal_to(&restarted));
        assert!(!a.is_process_bound());
    }

    #[test]
    fn test_non_unique_instance_requires_same_process() {
        let a = ActorInfo::client("Console", &host(0, 100));
        let same = ActorInfo::client("Console", &host(0, 100));
        let other = ActorInfo::client("Console", &host(0, 101));
        assert!(a.is_equal_to(&same));
        assert!(!a.is_equal_to(&other));
        assert!(a.is_process_bound());
    }

    #[test]
    fn test_lookup_identity() {
        let q = ActorInfo::lookup("Echo");
        assert!(q.is_service_name);
        assert_eq!(q.usage, Usage::ServiceAddressRequest);
        assert!(q.uri.is_none());
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let json = serde_json::json!({ "name": "Echo", "is_service_name": true });
        let info: ActorInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(info.hop_count, 0);
        assert!(!info.is_open);
    }
}
