//! API endpoint addressing
//!
//! Endpoints are numeric socket addresses; the runtime never performs DNS
//! resolution. The logical API hostname only appears in the `Host` header.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An API frontend address: a numeric IP (v4 or v6) plus a TCP port.
///
/// Compared by value. Serializes as `{ "ip": "<literal>", "port": <u16> }`,
/// the record format used by the on-disk address cache and the bundled seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl ApiEndpoint {
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The endpoint as a connectable socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

impl From<SocketAddr> for ApiEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self { ip: addr.ip(), port: addr.port() }
    }
}

impl From<ApiEndpoint> for SocketAddr {
    fn from(endpoint: ApiEndpoint) -> Self {
        endpoint.socket_addr()
    }
}

impl FromStr for ApiEndpoint {
    type Err = std::net::AddrParseError;

    /// Parses socket-addr literals such as `45.83.223.196:443` or
    /// `[2001:db8::1]:443`, the format returned by the `api-addrs` endpoint.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SocketAddr::from_str(s).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    #[test]
    fn display_matches_socket_addr_format() {
        let v4: ApiEndpoint = "1.2.3.4:443".parse().unwrap();
        assert_eq!(v4.to_string(), "1.2.3.4:443");

        let v6 = ApiEndpoint::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8443);
        assert_eq!(v6.to_string(), "[::1]:8443");
        assert_eq!(v6.to_string().parse::<ApiEndpoint>().unwrap(), v6);
    }

    #[test]
    fn serializes_as_ip_port_record() {
        let endpoint: ApiEndpoint = "1.2.3.4:443".parse().unwrap();
        let json = serde_json::to_value(endpoint).unwrap();
        assert_eq!(json, serde_json::json!({ "ip": "1.2.3.4", "port": 443 }));
        assert_eq!(serde_json::from_value::<ApiEndpoint>(json).unwrap(), endpoint);
    }
}
