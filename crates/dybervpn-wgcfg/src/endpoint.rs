//! Peer endpoint syntax and name resolution
//!
//! Endpoints are written `host:port`. The port is split off at the last colon;
//! a host that itself contains a colon must be a bracketed IPv6 literal
//! (`[fd00::1]:51820`).

use crate::error::{ConfigError, ConfigResult};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// A candidate peer endpoint: unresolved host plus UDP port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or IP literal, without brackets
    pub host: String,
    /// UDP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to a single socket address.
    ///
    /// IP literals are used as-is. Hostnames go through `resolver`; the first
    /// IPv4 address wins, otherwise the first address of any family.
    pub fn resolve(&self, resolver: &dyn Resolver) -> ConfigResult<SocketAddr> {
        if let Ok(addr) = self.to_string().parse::<SocketAddr>() {
            return Ok(addr);
        }

        let ips = resolver.resolve(&self.host).map_err(|e| ConfigError::Resolve {
            host: self.host.clone(),
            reason: e.to_string(),
        })?;

        let mut chosen: Option<IpAddr> = None;
        for ip in ips.iter().map(|ip| ip.to_canonical()) {
            if ip.is_ipv4() {
                chosen = Some(ip);
                break;
            }
            if chosen.is_none() {
                chosen = Some(ip);
            }
        }

        match chosen {
            Some(ip) => Ok(SocketAddr::new(ip, self.port)),
            None => Err(ConfigError::Resolve {
                host: self.host.clone(),
                reason: format!("no addresses in {:?}", ips),
            }),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let i = s
            .rfind(':')
            .ok_or_else(|| ConfigError::parse("Missing port from endpoint", s))?;
        let (host, port_str) = (&s[..i], &s[i + 1..]);
        if host.is_empty() {
            return Err(ConfigError::parse("Invalid endpoint host", host));
        }
        let port = parse_port(port_str)?;

        let bracketed = host.starts_with('[') || host.ends_with(']') || host.contains(':');
        if !bracketed {
            return Ok(Endpoint::new(host, port));
        }

        let brackets_err = || ConfigError::parse("Brackets must contain an IPv6 address", host);
        if host.len() <= 3 || !host.starts_with('[') || !host.ends_with(']') {
            return Err(brackets_err());
        }
        let inner = &host[1..host.len() - 1];
        let (addr, scope) = match inner.split_once('%') {
            Some((addr, scope)) => (addr, Some(scope)),
            None => (inner, None),
        };
        if !addr.contains(':') || addr.parse::<Ipv6Addr>().is_err() {
            return Err(brackets_err());
        }
        if scope.map_or(false, |id| id.parse::<u32>().is_err()) {
            return Err(brackets_err());
        }
        Ok(Endpoint::new(inner, port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V6(v6) if v6.scope_id() != 0 => {
                Endpoint::new(format!("{}%{}", v6.ip(), v6.scope_id()), v6.port())
            }
            _ => Endpoint::new(addr.ip().to_string(), addr.port()),
        }
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse a comma-separated endpoint list, validating every entry without resolving
pub fn parse_endpoints(s: &str) -> ConfigResult<Vec<Endpoint>> {
    s.split(',').map(|ep| ep.trim().parse()).collect()
}

/// Parse a port number in [0, 65535]
pub(crate) fn parse_port(s: &str) -> ConfigResult<u16> {
    let n: i64 = s
        .parse()
        .map_err(|_| ConfigError::parse("Invalid port", s))?;
    u16::try_from(n).map_err(|_| ConfigError::parse("Invalid port", s))
}

/// Name resolution service consulted when endpoints name hosts
pub trait Resolver: Send + Sync {
    /// Resolve `host` to its addresses. May block.
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = (host, 0u16).to_socket_addrs()?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}
