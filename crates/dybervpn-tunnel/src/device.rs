//! Live tunnel device state
//!
//! The device's mutable state is split into regions that are locked
//! independently and only for short critical sections:
//!
//! - network: the UDP bind and the configured listen port
//! - static identity: the device's private/public key pair
//! - peers: the table from public key to [`Peer`]
//! - allowed IPs: the shared prefix table (locks internally)
//!
//! Per-peer state is locked inside [`Peer`]. When more than one region is
//! needed, static identity is taken before peers.

use crate::allowed_ips::AllowedIps;
use crate::bind::{Bind, UdpBind};
use crate::error::{TunnelError, TunnelResult};
use crate::peer::{NullTransport, Peer, Transport};
use dybervpn_wgcfg::{Key, PrivateKey, Resolver, SystemResolver};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Most peers a single device will hold
pub const MAX_PEERS: usize = 1 << 16;

struct NetState {
    bind: Box<dyn Bind>,
    port: u16,
}

#[derive(Default)]
struct StaticIdentity {
    private_key: PrivateKey,
    public_key: Key,
}

/// A tunnel device
pub struct Device {
    net: RwLock<NetState>,
    static_identity: RwLock<StaticIdentity>,
    peers: RwLock<HashMap<Key, Arc<Peer>>>,
    allowed_ips: AllowedIps,
    is_up: AtomicBool,
    closed: AtomicBool,
    /// Held for the whole of a reconfiguration
    pub(crate) reconfig_lock: Mutex<()>,
    resolver: Arc<dyn Resolver>,
    transport: Arc<dyn Transport>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Device {
    /// Create a device that is down, has no identity and no peers.
    ///
    /// Uses a real UDP bind, the system resolver and a transport that drops
    /// keepalives until one is attached with [`Device::with_transport`].
    pub fn new() -> Self {
        Self {
            net: RwLock::new(NetState {
                bind: Box::new(UdpBind::new()),
                port: 0,
            }),
            static_identity: RwLock::new(StaticIdentity::default()),
            peers: RwLock::new(HashMap::new()),
            allowed_ips: AllowedIps::new(),
            is_up: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reconfig_lock: Mutex::new(()),
            resolver: Arc::new(SystemResolver),
            transport: Arc::new(NullTransport),
        }
    }

    /// Use a different socket source
    pub fn with_bind(self, bind: impl Bind + 'static) -> Self {
        write(&self.net).bind = Box::new(bind);
        self
    }

    /// Use a different name resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Attach the packet path. Only peers created afterwards use it.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Bring the device up and bind the listen port
    pub fn up(&self) -> TunnelResult<()> {
        if self.is_closed() {
            return Err(TunnelError::DeviceClosed);
        }
        if self.is_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.bind_update() {
            self.is_up.store(false, Ordering::SeqCst);
            return Err(e);
        }
        tracing::info!("Device up on port {}", self.listen_port());
        Ok(())
    }

    /// Take the device down and release the bind. Peers are kept.
    pub fn down(&self) {
        if self.is_up.swap(false, Ordering::SeqCst) {
            write(&self.net).bind.close();
            tracing::info!("Device down");
        }
    }

    /// Shut the device down for good, removing every peer
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.down();
        self.remove_all_peers();
        tracing::info!("Device closed");
    }

    /// True while the device is up and not closed
    pub fn is_active(&self) -> bool {
        self.is_up.load(Ordering::SeqCst) && !self.is_closed()
    }

    /// True once [`Device::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current private key (zero if none)
    pub fn private_key(&self) -> PrivateKey {
        read(&self.static_identity).private_key.clone()
    }

    /// Public key derived from the private key
    pub fn public_key(&self) -> Key {
        read(&self.static_identity).public_key
    }

    /// Replace the device identity.
    ///
    /// Any peer that has the device's new public key is removed, and every
    /// remaining peer's precomputed static-static secret is recomputed.
    pub fn set_private_key(&self, private_key: PrivateKey) {
        let mut identity = write(&self.static_identity);
        if identity.private_key == private_key {
            return;
        }
        let public_key = private_key.public_key();

        let mut peers = write(&self.peers);
        if !public_key.is_zero() {
            if let Some(own) = peers.remove(&public_key) {
                tracing::debug!("Removing peer {} matching own public key", public_key.short_string());
                self.allowed_ips.remove_by_peer(&own);
            }
        }
        for peer in peers.values() {
            peer.set_static_private(&private_key);
        }

        identity.private_key = private_key;
        identity.public_key = public_key;
        tracing::debug!("Device identity set to {}", public_key.short_string());
    }

    /// Port currently configured (or bound, while up)
    pub fn listen_port(&self) -> u16 {
        read(&self.net).port
    }

    /// Set the listen port and rebind.
    ///
    /// Nothing is rebound if the device is up and already bound to `port`.
    pub fn set_listen_port(&self, port: u16) -> TunnelResult<()> {
        {
            let mut net = write(&self.net);
            if port != 0 && net.port == port && net.bind.is_open() && self.is_active() {
                return Ok(());
            }
            net.port = port;
        }
        self.bind_update()
    }

    /// Close the current socket and, if the device is up, open a new one on
    /// the configured port. The bound port becomes the configured port.
    pub fn bind_update(&self) -> TunnelResult<()> {
        let mut net = write(&self.net);
        net.bind.close();
        if !self.is_active() {
            return Ok(());
        }
        let port = net.port;
        match net.bind.open(port) {
            Ok(bound) => {
                net.port = bound;
                tracing::debug!("Bound UDP port {}", bound);
                Ok(())
            }
            Err(source) => Err(TunnelError::PortInUse { port, source }),
        }
    }

    /// Find a peer by public key
    pub fn lookup_peer(&self, public_key: &Key) -> Option<Arc<Peer>> {
        read(&self.peers).get(public_key).cloned()
    }

    /// Snapshot of all peers, in no particular order
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        read(&self.peers).values().cloned().collect()
    }

    /// Number of peers
    pub fn peer_count(&self) -> usize {
        read(&self.peers).len()
    }

    /// Create a peer with no endpoint, routes or keepalive
    pub fn new_peer(&self, public_key: Key) -> TunnelResult<Arc<Peer>> {
        if self.is_closed() {
            return Err(TunnelError::DeviceClosed);
        }
        if public_key.is_zero() {
            return Err(TunnelError::InvalidPeerKey(public_key));
        }
        let identity = read(&self.static_identity);
        let mut peers = write(&self.peers);

        if peers.len() >= MAX_PEERS {
            return Err(TunnelError::TooManyPeers(MAX_PEERS));
        }
        if peers.contains_key(&public_key) {
            return Err(TunnelError::PeerExists(public_key));
        }

        let peer = Arc::new(Peer::new(
            public_key,
            &identity.private_key,
            Arc::clone(&self.transport),
        ));
        peers.insert(public_key, Arc::clone(&peer));
        Ok(peer)
    }

    /// Remove a peer and its allowed IPs
    pub fn remove_peer(&self, public_key: &Key) {
        let removed = write(&self.peers).remove(public_key);
        if let Some(peer) = removed {
            self.allowed_ips.remove_by_peer(&peer);
            tracing::debug!("Removed peer {}", public_key.short_string());
        }
    }

    /// Remove every peer
    pub fn remove_all_peers(&self) {
        let removed: Vec<Arc<Peer>> = write(&self.peers).drain().map(|(_, p)| p).collect();
        for peer in &removed {
            self.allowed_ips.remove_by_peer(peer);
        }
        if !removed.is_empty() {
            tracing::debug!("Removed all {} peers", removed.len());
        }
    }

    /// Build a peer endpoint from comma-separated socket addresses
    pub fn create_endpoint(&self, s: &str) -> TunnelResult<Vec<SocketAddr>> {
        s.split(',')
            .map(|addr| {
                addr.trim()
                    .parse()
                    .map_err(|_| TunnelError::InvalidEndpoint(s.to_string()))
            })
            .collect()
    }

    /// The device's allowed-IP table
    pub fn allowed_ips(&self) -> &AllowedIps {
        &self.allowed_ips
    }

    pub(crate) fn resolver(&self) -> &dyn Resolver {
        self.resolver.as_ref()
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}
