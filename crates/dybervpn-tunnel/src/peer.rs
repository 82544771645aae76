//! Live peer state
//!
//! A peer is shared between the device's peer table, the allowed-IP table
//! and the packet path, so it is always handled as `Arc<Peer>` and all of its
//! mutable state sits behind per-field locks or atomics. Two `Arc`s point to
//! the same peer only if reconfiguration left that peer alone.

use crate::error::TunnelResult;
use dybervpn_wgcfg::{Key, PrivateKey, SymmetricKey, KEY_SIZE};
use ipnet::IpNet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime};
use zeroize::Zeroizing;

/// Minimum spacing between handshake initiations to the same peer
pub const REKEY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound side of the packet path, as seen by the control plane
pub trait Transport: Send + Sync {
    /// Send a keepalive to `peer` via `endpoint`, returning the bytes written
    fn send_keepalive(&self, peer: &Key, endpoint: &[SocketAddr]) -> io::Result<usize>;
}

/// Transport that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send_keepalive(&self, peer: &Key, _endpoint: &[SocketAddr]) -> io::Result<usize> {
        tracing::trace!("Dropping keepalive for peer {}", peer.short_string());
        Ok(0)
    }
}

/// Handshake-related fields, guarded together
struct Handshake {
    preshared_key: SymmetricKey,
    precomputed_static_static: Zeroizing<[u8; KEY_SIZE]>,
    last_sent_handshake: Option<Instant>,
    last_handshake: Option<SystemTime>,
}

/// A remote tunnel endpoint
pub struct Peer {
    public_key: Key,
    handshake: RwLock<Handshake>,
    endpoint: RwLock<Vec<SocketAddr>>,
    allowed_ips: RwLock<Vec<IpNet>>,
    persistent_keepalive: AtomicU16,
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    transport: Arc<dyn Transport>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn static_static(private_key: &PrivateKey, public_key: &Key) -> Zeroizing<[u8; KEY_SIZE]> {
    if private_key.is_zero() {
        Zeroizing::new([0u8; KEY_SIZE])
    } else {
        private_key.shared_secret(public_key)
    }
}

impl Peer {
    pub(crate) fn new(
        public_key: Key,
        static_private: &PrivateKey,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            public_key,
            handshake: RwLock::new(Handshake {
                preshared_key: SymmetricKey::default(),
                precomputed_static_static: static_static(static_private, &public_key),
                last_sent_handshake: None,
                last_handshake: None,
            }),
            endpoint: RwLock::new(Vec::new()),
            allowed_ips: RwLock::new(Vec::new()),
            persistent_keepalive: AtomicU16::new(0),
            tx_bytes: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            transport,
        }
    }

    /// The peer's public key
    pub fn public_key(&self) -> Key {
        self.public_key
    }

    /// Current preshared key (zero if none)
    pub fn preshared_key(&self) -> SymmetricKey {
        read(&self.handshake).preshared_key.clone()
    }

    /// Replace the preshared key
    pub fn set_preshared_key(&self, key: SymmetricKey) {
        write(&self.handshake).preshared_key = key;
    }

    /// Recompute the static-static secret for a new device identity
    pub(crate) fn set_static_private(&self, private_key: &PrivateKey) {
        write(&self.handshake).precomputed_static_static =
            static_static(private_key, &self.public_key);
    }

    #[cfg(test)]
    pub(crate) fn precomputed_static_static(&self) -> [u8; KEY_SIZE] {
        *read(&self.handshake).precomputed_static_static
    }

    /// Persistent keepalive interval in seconds (0 = disabled)
    pub fn persistent_keepalive(&self) -> u16 {
        self.persistent_keepalive.load(Ordering::Relaxed)
    }

    /// Store a new keepalive interval, returning the previous one
    pub fn swap_persistent_keepalive(&self, seconds: u16) -> u16 {
        self.persistent_keepalive.swap(seconds, Ordering::Relaxed)
    }

    /// Resolved endpoint addresses
    pub fn endpoint(&self) -> Vec<SocketAddr> {
        read(&self.endpoint).clone()
    }

    /// Replace the endpoint
    pub fn set_endpoint(&self, endpoint: Vec<SocketAddr>) {
        *write(&self.endpoint) = endpoint;
    }

    /// Routes recorded for this peer
    pub fn allowed_ips(&self) -> Vec<IpNet> {
        read(&self.allowed_ips).clone()
    }

    /// Replace the recorded routes. The device's allowed-IP table is not touched.
    pub fn set_allowed_ips(&self, nets: Vec<IpNet>) {
        *write(&self.allowed_ips) = nets;
    }

    /// True if a handshake initiation may be sent now
    pub fn handshake_permitted(&self) -> bool {
        match read(&self.handshake).last_sent_handshake {
            Some(at) => at.elapsed() > REKEY_TIMEOUT,
            None => true,
        }
    }

    /// Note that a handshake initiation was just sent
    pub fn handshake_sent(&self) {
        write(&self.handshake).last_sent_handshake = Some(Instant::now());
    }

    /// Move the last-sent handshake time far enough back that the next
    /// initiation is not rate limited
    pub fn rewind_last_sent_handshake(&self) {
        let rewound = Instant::now().checked_sub(REKEY_TIMEOUT + Duration::from_secs(1));
        write(&self.handshake).last_sent_handshake = rewound;
    }

    /// Wall-clock time of the last completed handshake
    pub fn last_handshake(&self) -> Option<SystemTime> {
        read(&self.handshake).last_handshake
    }

    #[cfg(test)]
    pub(crate) fn handshake_completed(&self) {
        write(&self.handshake).last_handshake = Some(SystemTime::now());
    }

    /// Bytes sent to this peer
    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes.load(Ordering::Relaxed)
    }

    /// Bytes received from this peer
    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn record_rx(&self, bytes: u64) {
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Send a keepalive now
    pub fn send_keepalive(&self) -> TunnelResult<()> {
        let endpoint = self.endpoint();
        let sent = self.transport.send_keepalive(&self.public_key, &endpoint)?;
        self.tx_bytes.fetch_add(sent as u64, Ordering::Relaxed);
        tracing::debug!(
            "Sent keepalive to peer {} ({} bytes)",
            self.public_key.short_string(),
            sent
        );
        Ok(())
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("public_key", &self.public_key)
            .field("persistent_keepalive", &self.persistent_keepalive())
            .finish_non_exhaustive()
    }
}
