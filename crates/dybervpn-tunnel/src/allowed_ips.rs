//! Allowed-IP table: maps IP prefixes to the peer authorized for them
//!
//! Every prefix belongs to exactly one peer. Prefixes are stored with their
//! host bits cleared, so `10.0.0.1/24` and `10.0.0.0/24` are the same entry.
//! Lookups take a read lock and may run concurrently with reconfiguration.

use crate::peer::Peer;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

struct RouteEntry {
    net: IpNet,
    peer: Arc<Peer>,
}

/// Shared prefix table of a device
pub struct AllowedIps {
    /// Routes sorted by prefix length (longest first) for longest-prefix-match
    routes: RwLock<Vec<RouteEntry>>,
}

impl AllowedIps {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Assign `net` to `peer`, taking it over from any previous owner
    pub fn insert(&self, net: IpNet, peer: &Arc<Peer>) {
        let net = net.trunc();
        let mut table = self.routes.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = table.iter_mut().find(|e| e.net == net) {
            entry.peer = Arc::clone(peer);
            return;
        }
        let at = table
            .iter()
            .position(|e| e.net.prefix_len() < net.prefix_len())
            .unwrap_or(table.len());
        table.insert(
            at,
            RouteEntry {
                net,
                peer: Arc::clone(peer),
            },
        );
    }

    /// Remove every prefix owned by `peer`. Walks the whole table.
    pub fn remove_by_peer(&self, peer: &Arc<Peer>) {
        let mut table = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let before = table.len();
        table.retain(|e| !Arc::ptr_eq(&e.peer, peer));
        let removed = before - table.len();
        if removed > 0 {
            tracing::debug!(
                "Removed {} allowed IPs for peer {}",
                removed,
                peer.public_key().short_string()
            );
        }
    }

    /// Prefixes owned by `peer`
    pub fn entries_for_peer(&self, peer: &Arc<Peer>) -> Vec<IpNet> {
        let table = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        table
            .iter()
            .filter(|e| Arc::ptr_eq(&e.peer, peer))
            .map(|e| e.net)
            .collect()
    }

    /// Find the peer that owns `ip` (longest-prefix-match)
    pub fn lookup(&self, ip: IpAddr) -> Option<Arc<Peer>> {
        let table = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        table
            .iter()
            .find(|e| e.net.contains(&ip))
            .map(|e| Arc::clone(&e.peer))
    }

    /// Number of prefixes in the table
    pub fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if the table holds no prefixes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AllowedIps {
    fn default() -> Self {
        Self::new()
    }
}
