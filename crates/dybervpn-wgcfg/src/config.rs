//! In-memory tunnel configuration

use crate::endpoint::Endpoint;
use crate::key::{Key, PrivateKey, SymmetricKey};
use crate::DEFAULT_MTU;
use ipnet::IpNet;
use serde::Serialize;
use std::net::IpAddr;

/// Device-level configuration of a tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Tunnel name (set by the text parser)
    pub name: String,

    /// Static private key; the zero value means "unset"
    pub private_key: PrivateKey,

    /// Local interface addresses
    pub addresses: Vec<IpNet>,

    /// UDP listen port (0 = pick automatically)
    pub listen_port: u16,

    /// MTU (0 = default)
    pub mtu: u16,

    /// DNS resolvers
    pub dns: Vec<IpAddr>,

    /// Peers, in configuration order
    pub peers: Vec<Peer>,
}

/// Configuration of a single peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Peer {
    /// Peer's public key; never zero in a decoded config
    pub public_key: Key,

    /// Optional preshared key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<SymmetricKey>,

    /// Routes this peer may originate and receive
    pub allowed_ips: Vec<IpNet>,

    /// Candidate endpoints
    pub endpoints: Vec<Endpoint>,

    /// Persistent keepalive interval in seconds (0 = disabled)
    pub persistent_keepalive: u16,
}

impl Config {
    /// Create a config with just a private key
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            ..Default::default()
        }
    }

    /// Add a peer
    pub fn with_peer(mut self, peer: Peer) -> Self {
        self.peers.push(peer);
        self
    }

    /// Set the listen port
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Look up a peer by public key
    pub fn peer(&self, public_key: &Key) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.public_key == public_key)
    }

    /// MTU to bring the interface up with
    pub fn effective_mtu(&self) -> u16 {
        if self.mtu == 0 {
            DEFAULT_MTU
        } else {
            self.mtu
        }
    }
}

impl Peer {
    /// Create a new peer config with just a public key
    pub fn new(public_key: Key) -> Self {
        Self {
            public_key,
            ..Default::default()
        }
    }

    /// Add an allowed IP
    pub fn with_allowed_ip(mut self, net: IpNet) -> Self {
        self.allowed_ips.push(net);
        self
    }

    /// Add an endpoint candidate
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Set persistent keepalive
    pub fn with_keepalive(mut self, seconds: u16) -> Self {
        self.persistent_keepalive = seconds;
        self
    }

    /// Set the preshared key
    pub fn with_preshared_key(mut self, key: SymmetricKey) -> Self {
        self.preshared_key = Some(key);
        self
    }

    /// Endpoints joined as `host:port,host:port`
    pub fn endpoints_string(&self) -> String {
        self.endpoints
            .iter()
            .map(|ep| ep.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}
