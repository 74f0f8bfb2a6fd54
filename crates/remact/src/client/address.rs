// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host substitution for address fallback.

use crate::error::{RemactError, Result};
use std::net::IpAddr;
use url::Url;

/// Replace the host part of `uri` with `addr`, keeping scheme, port and path.
pub fn with_host(uri: &str, addr: IpAddr) -> Result<String> {
    let mut url = Url::parse(uri).map_err(|e| RemactError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    url.set_ip_host(addr).map_err(|()| RemactError::InvalidUri {
        uri: uri.to_string(),
        reason: "uri has no host part".into(),
    })?;
    Ok(url.to_string())
}

/// Host name of `uri`, if any.
pub fn host_of(uri: &str) -> Option<String> {
    Url::parse(uri)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_with_host_keeps_port_and_path() {
        let uri = with_host("tcp://plant-7:40001/Echo", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
            .unwrap();
        assert_eq!(uri, "tcp://10.0.0.2:40001/Echo");
    }

    #[test]
    fn test_with_host_ipv6() {
        let uri = with_host("tcp://plant-7:40001/Echo", IpAddr::V6(Ipv6Addr::LOCALHOST)).unwrap();
        assert_eq!(uri, "tcp://[::1]:40001/Echo");
    }

    #[test]
    fn test_invalid_uri() {
        let err = with_host("not a uri", IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap_err();
        assert!(matches!(err, RemactError::InvalidUri { .. }));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("tcp://plant-7:40001/Echo").as_deref(), Some("plant-7"));
        assert_eq!(host_of("garbage"), None);
    }
}
