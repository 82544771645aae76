//! Reading and replacing a device's configuration
//!
//! [`Device::reconfig`] applies a new [`Config`] with as little disruption as
//! possible: peers that are unchanged keep their identity, their sessions and
//! their allowed-IP entries, and keepalives are only sent where one is
//! actually needed.

use crate::device::Device;
use crate::error::TunnelResult;
use crate::peer::Peer;
use dybervpn_wgcfg::config::Peer as PeerConfig;
use dybervpn_wgcfg::{Config, Endpoint, Key};
use std::collections::HashSet;
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};

impl Device {
    /// Snapshot of the live configuration, peers sorted by public key.
    ///
    /// Each state region is read under its own lock, so a peer added or
    /// removed concurrently may or may not appear.
    pub fn config(&self) -> Config {
        let listen_port = self.listen_port();
        let private_key = self.private_key();

        let mut cfg = Config::new(private_key).with_listen_port(listen_port);
        for peer in self.peers() {
            let preshared_key = peer.preshared_key();
            cfg.peers.push(PeerConfig {
                public_key: peer.public_key(),
                preshared_key: (!preshared_key.is_zero()).then_some(preshared_key),
                allowed_ips: self.allowed_ips().entries_for_peer(&peer),
                endpoints: peer.endpoint().into_iter().map(Endpoint::from).collect(),
                persistent_keepalive: peer.persistent_keepalive(),
            });
        }
        cfg.peers.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        cfg
    }

    /// Replace the device configuration with `cfg`.
    ///
    /// Calls are serialized. On any error every peer is removed before the
    /// error is returned, so the device is never left half configured.
    pub fn reconfig(&self, cfg: &Config) -> TunnelResult<()> {
        let _guard = self
            .reconfig_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let result = self.apply(cfg);
        if let Err(ref e) = result {
            tracing::warn!("Reconfiguration failed, removing all peers: {}", e);
            self.remove_all_peers();
        }
        result
    }

    fn apply(&self, cfg: &Config) -> TunnelResult<()> {
        let wanted: HashSet<Key> = cfg.peers.iter().map(|p| p.public_key).collect();
        for peer in self.peers() {
            let key = peer.public_key();
            if !wanted.contains(&key) {
                tracing::debug!("Reconfig: removing old peer {}", key.short_string());
                self.remove_peer(&key);
            }
        }

        if self.private_key() != cfg.private_key {
            tracing::debug!("Reconfig: resetting private key");
            self.set_private_key(cfg.private_key.clone());
        }

        self.set_listen_port(cfg.listen_port)?;

        let mut keepalive_peers: Vec<Arc<Peer>> = Vec::new();
        for p in &cfg.peers {
            if let Some(peer) = self.upsert_peer(p)? {
                keepalive_peers.push(peer);
            }
        }

        // Sent with no locks held: the send path takes peer locks itself.
        for peer in keepalive_peers {
            tracing::debug!(
                "Reconfig: sending keepalive to peer {}",
                peer.public_key().short_string()
            );
            if let Err(e) = peer.send_keepalive() {
                tracing::warn!(
                    "Keepalive to peer {} failed: {}",
                    peer.public_key().short_string(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Create or update one peer. Returns the peer if it needs an immediate
    /// keepalive.
    fn upsert_peer(&self, p: &PeerConfig) -> TunnelResult<Option<Arc<Peer>>> {
        let endpoint = p
            .endpoints
            .iter()
            .map(|ep| ep.resolve(self.resolver()))
            .collect::<Result<Vec<SocketAddr>, _>>()?;

        let (peer, created) = match self.lookup_peer(&p.public_key) {
            Some(peer) => (peer, false),
            None => {
                tracing::debug!("Reconfig: new peer {}", p.public_key.short_string());
                (self.new_peer(p.public_key)?, true)
            }
        };

        if let Some(psk) = p.preshared_key.as_ref().filter(|k| !k.is_zero()) {
            peer.set_preshared_key(psk.clone());
            tracing::debug!(
                "Reconfig: setting preshared key for peer {}",
                p.public_key.short_string()
            );
        }

        let previous = peer.swap_persistent_keepalive(p.persistent_keepalive);
        let keepalive_on = p.persistent_keepalive != 0 && self.is_active();
        let mut needs_keepalive = keepalive_on && (created || previous == 0);

        if !endpoint.is_empty() && !unordered_eq(&peer.endpoint(), &endpoint) {
            let joined = endpoint
                .iter()
                .map(|addr| addr.to_string())
                .collect::<Vec<_>>()
                .join(",");
            peer.set_endpoint(self.create_endpoint(&joined)?);
            if keepalive_on {
                needs_keepalive = true;
                peer.rewind_last_sent_handshake();
            }
        }

        if !unordered_eq(&peer.allowed_ips(), &p.allowed_ips) {
            peer.set_allowed_ips(p.allowed_ips.clone());
            self.allowed_ips().remove_by_peer(&peer);
        }
        for net in &p.allowed_ips {
            self.allowed_ips().insert(*net, &peer);
        }

        Ok(needs_keepalive.then_some(peer))
    }
}

/// Equal as multisets of distinct values: same length, same members
fn unordered_eq<T: Eq + Hash>(x: &[T], y: &[T]) -> bool {
    if x.len() != y.len() {
        return false;
    }
    if x == y {
        return true;
    }
    let xs: HashSet<&T> = x.iter().collect();
    let ys: HashSet<&T> = y.iter().collect();
    xs == ys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::tests::MockBind;
    use crate::error::TunnelError;
    use crate::peer::tests::RecordingTransport;
    use dybervpn_wgcfg::{ConfigError, PrivateKey, Resolver, SymmetricKey};
    use ipnet::IpNet;
    use std::collections::HashMap;
    use std::io;
    use std::net::IpAddr;

    #[derive(Default)]
    struct TableResolver(HashMap<String, Vec<IpAddr>>);

    impl Resolver for TableResolver {
        fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.0
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    struct Harness {
        device: Device,
        bind: MockBind,
        transport: Arc<RecordingTransport>,
    }

    fn harness() -> Harness {
        let mut hosts = TableResolver::default();
        hosts
            .0
            .insert("gw.example".to_string(), vec!["192.0.2.1".parse().unwrap()]);
        let bind = MockBind::default();
        let transport = Arc::new(RecordingTransport::default());
        let device = Device::new()
            .with_bind(bind.clone())
            .with_resolver(Arc::new(hosts))
            .with_transport(transport.clone());
        Harness {
            device,
            bind,
            transport,
        }
    }

    fn key(n: u8) -> Key {
        Key([n; 32])
    }

    fn peer_a() -> PeerConfig {
        PeerConfig::new(key(2))
            .with_allowed_ip("10.0.0.2/32".parse().unwrap())
            .with_allowed_ip("10.0.1.0/24".parse().unwrap())
            .with_endpoint(Endpoint::new("192.0.2.1", 51820))
    }

    fn peer_b() -> PeerConfig {
        PeerConfig::new(key(3)).with_allowed_ip("10.0.0.3/32".parse().unwrap())
    }

    fn base_config() -> Config {
        Config::new(PrivateKey([1u8; 32]))
            .with_listen_port(51820)
            .with_peer(peer_b())
            .with_peer(peer_a())
    }

    #[test]
    fn test_config_reflects_reconfig() {
        let h = harness();
        h.device.reconfig(&base_config()).unwrap();

        let expected = Config::new(PrivateKey([1u8; 32]))
            .with_listen_port(51820)
            .with_peer(peer_a())
            .with_peer(peer_b());
        assert_eq!(h.device.config(), expected);

        let a = h.device.lookup_peer(&key(2)).unwrap();
        let routed = h.device.allowed_ips().lookup("10.0.1.9".parse().unwrap()).unwrap();
        assert!(Arc::ptr_eq(&a, &routed));
    }

    #[test]
    fn test_reconfig_is_idempotent() {
        let h = harness();
        h.device.up().unwrap();
        let cfg = base_config();
        h.device.reconfig(&cfg).unwrap();

        let before: Vec<Arc<Peer>> = [key(2), key(3)]
            .iter()
            .map(|k| h.device.lookup_peer(k).unwrap())
            .collect();
        let snapshot = h.device.config();

        h.device.reconfig(&cfg).unwrap();
        for peer in &before {
            let after = h.device.lookup_peer(&peer.public_key()).unwrap();
            assert!(Arc::ptr_eq(peer, &after));
        }
        assert_eq!(h.device.config(), snapshot);
        assert_eq!(h.device.allowed_ips().len(), 3);
        assert_eq!(h.bind.opened(), vec![40000, 51820]);
    }

    #[test]
    fn test_dropped_peer_is_removed() {
        let h = harness();
        h.device.reconfig(&base_config()).unwrap();
        let b = h.device.lookup_peer(&key(3)).unwrap();

        let cfg = Config::new(PrivateKey([1u8; 32])).with_peer(peer_a());
        h.device.reconfig(&cfg).unwrap();

        let snapshot = h.device.config();
        assert_eq!(snapshot.peers.len(), 1);
        assert!(snapshot.peer(&key(3)).is_none());
        assert!(h.device.allowed_ips().entries_for_peer(&b).is_empty());
        assert!(h.device.allowed_ips().lookup("10.0.0.3".parse().unwrap()).is_none());
    }

    #[test]
    fn test_keepalive_off_to_on_sends_once() {
        let h = harness();
        h.device.up().unwrap();
        h.device.reconfig(&base_config()).unwrap();
        assert_eq!(h.transport.total(), 0);

        let cfg = Config::new(PrivateKey([1u8; 32]))
            .with_listen_port(51820)
            .with_peer(peer_a().with_keepalive(25))
            .with_peer(peer_b());
        h.device.reconfig(&cfg).unwrap();

        assert_eq!(h.transport.count_for(&key(2)), 1);
        assert_eq!(h.transport.count_for(&key(3)), 0);
        assert_eq!(h.transport.total(), 1);

        // already on: nothing more to send
        h.device.reconfig(&cfg).unwrap();
        assert_eq!(h.transport.total(), 1);
    }

    #[test]
    fn test_no_keepalive_while_down() {
        let h = harness();
        let cfg = Config::new(PrivateKey([1u8; 32])).with_peer(peer_a().with_keepalive(25));
        h.device.reconfig(&cfg).unwrap();
        assert_eq!(h.transport.total(), 0);
        assert_eq!(h.device.lookup_peer(&key(2)).unwrap().persistent_keepalive(), 25);
    }

    #[test]
    fn test_new_peer_with_keepalive_is_pinged() {
        let h = harness();
        h.device.up().unwrap();
        let cfg = Config::new(PrivateKey([1u8; 32])).with_peer(peer_a().with_keepalive(25));
        h.device.reconfig(&cfg).unwrap();
        assert_eq!(h.transport.count_for(&key(2)), 1);

        let sent = h.transport.sent.lock().unwrap();
        assert_eq!(sent[0].1, vec!["192.0.2.1:51820".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_reordered_lists_are_not_changes() {
        let h = harness();
        h.device.up().unwrap();
        let first = PeerConfig::new(key(2))
            .with_allowed_ip("10.0.0.2/32".parse().unwrap())
            .with_allowed_ip("10.0.1.0/24".parse().unwrap())
            .with_endpoint(Endpoint::new("192.0.2.1", 51820))
            .with_endpoint(Endpoint::new("192.0.2.2", 51820))
            .with_keepalive(25);
        let reordered = PeerConfig::new(key(2))
            .with_allowed_ip("10.0.1.0/24".parse().unwrap())
            .with_allowed_ip("10.0.0.2/32".parse().unwrap())
            .with_endpoint(Endpoint::new("192.0.2.2", 51820))
            .with_endpoint(Endpoint::new("192.0.2.1", 51820))
            .with_keepalive(25);

        h.device
            .reconfig(&Config::new(PrivateKey([1u8; 32])).with_peer(first.clone()))
            .unwrap();
        let peer = h.device.lookup_peer(&key(2)).unwrap();
        peer.handshake_sent();
        assert_eq!(h.transport.total(), 1);

        h.device
            .reconfig(&Config::new(PrivateKey([1u8; 32])).with_peer(reordered))
            .unwrap();
        assert_eq!(h.transport.total(), 1);
        assert!(!peer.handshake_permitted());
        assert_eq!(peer.allowed_ips(), first.allowed_ips);
        assert_eq!(peer.endpoint().len(), 2);
        assert_eq!(peer.endpoint()[0], "192.0.2.1:51820".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_endpoint_change_rewinds_handshake() {
        let h = harness();
        h.device.up().unwrap();
        let cfg = Config::new(PrivateKey([1u8; 32])).with_peer(peer_a().with_keepalive(25));
        h.device.reconfig(&cfg).unwrap();
        let peer = h.device.lookup_peer(&key(2)).unwrap();
        peer.handshake_sent();

        let moved = Config::new(PrivateKey([1u8; 32])).with_peer(
            PeerConfig::new(key(2))
                .with_allowed_ip("10.0.0.2/32".parse().unwrap())
                .with_allowed_ip("10.0.1.0/24".parse().unwrap())
                .with_endpoint(Endpoint::new("198.51.100.7", 51820))
                .with_keepalive(25),
        );
        h.device.reconfig(&moved).unwrap();

        assert!(peer.handshake_permitted());
        assert_eq!(h.transport.count_for(&key(2)), 2);
        assert_eq!(peer.endpoint(), vec!["198.51.100.7:51820".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_endpoints_compare_after_resolution() {
        let h = harness();
        h.device.up().unwrap();
        let cfg = Config::new(PrivateKey([1u8; 32])).with_peer(peer_a().with_keepalive(25));
        h.device.reconfig(&cfg).unwrap();
        assert_eq!(h.transport.total(), 1);

        let by_name = Config::new(PrivateKey([1u8; 32])).with_peer(
            PeerConfig::new(key(2))
                .with_allowed_ip("10.0.0.2/32".parse().unwrap())
                .with_allowed_ip("10.0.1.0/24".parse().unwrap())
                .with_endpoint(Endpoint::new("gw.example", 51820))
                .with_keepalive(25),
        );
        h.device.reconfig(&by_name).unwrap();
        assert_eq!(h.transport.total(), 1);
    }

    #[test]
    fn test_empty_endpoint_list_keeps_endpoint() {
        let h = harness();
        h.device.reconfig(&base_config()).unwrap();
        let cfg = Config::new(PrivateKey([1u8; 32]))
            .with_peer(PeerConfig::new(key(2)).with_allowed_ip("10.0.0.2/32".parse().unwrap()));
        h.device.reconfig(&cfg).unwrap();

        let peer = h.device.lookup_peer(&key(2)).unwrap();
        assert_eq!(peer.endpoint().len(), 1);
        assert_eq!(
            h.device.allowed_ips().entries_for_peer(&peer),
            vec!["10.0.0.2/32".parse::<IpNet>().unwrap()]
        );
    }

    #[test]
    fn test_empty_peer_list_removes_everything() {
        let h = harness();
        h.device.reconfig(&base_config()).unwrap();
        h.device.reconfig(&Config::new(PrivateKey([1u8; 32]))).unwrap();
        assert_eq!(h.device.peer_count(), 0);
        assert!(h.device.allowed_ips().is_empty());
        assert!(h.device.config().peers.is_empty());
    }

    #[test]
    fn test_port_in_use_rolls_back_all_peers() {
        let h = harness();
        h.device.up().unwrap();
        h.device.reconfig(&base_config()).unwrap();
        h.bind.set_busy(4000);

        let cfg = base_config().with_listen_port(4000);
        let err = h.device.reconfig(&cfg).unwrap_err();
        assert!(matches!(err, TunnelError::PortInUse { port: 4000, .. }));
        assert_eq!(h.device.peer_count(), 0);
        assert!(h.device.allowed_ips().is_empty());
    }

    #[test]
    fn test_unresolvable_endpoint_rolls_back() {
        let h = harness();
        h.device.reconfig(&base_config()).unwrap();

        let cfg = base_config()
            .with_peer(PeerConfig::new(key(4)).with_endpoint(Endpoint::new("nowhere.invalid", 1)));
        let err = h.device.reconfig(&cfg).unwrap_err();
        assert!(matches!(
            err,
            TunnelError::Config(ConfigError::Resolve { ref host, .. }) if host == "nowhere.invalid"
        ));
        assert_eq!(h.device.peer_count(), 0);
    }

    #[test]
    fn test_zero_public_key_rolls_back() {
        let h = harness();
        h.device.reconfig(&base_config()).unwrap();

        let zero = PeerConfig::new(Key::default()).with_allowed_ip("10.9.0.0/16".parse().unwrap());
        let cfg = base_config().with_peer(zero);
        let err = h.device.reconfig(&cfg).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidPeerKey(k) if k.is_zero()));
        assert_eq!(h.device.peer_count(), 0);
        assert!(h.device.allowed_ips().is_empty());
    }

    #[test]
    fn test_private_key_rotation_keeps_peers() {
        let h = harness();
        h.device.reconfig(&base_config()).unwrap();
        let a = h.device.lookup_peer(&key(2)).unwrap();

        let rotated = PrivateKey::generate();
        let mut cfg = base_config();
        cfg.private_key = rotated.clone();
        h.device.reconfig(&cfg).unwrap();

        assert_eq!(h.device.public_key(), rotated.public_key());
        assert_eq!(h.device.config().private_key, rotated);
        assert!(Arc::ptr_eq(&a, &h.device.lookup_peer(&key(2)).unwrap()));
    }

    #[test]
    fn test_absent_preshared_key_does_not_clear() {
        let h = harness();
        let cfg = Config::new(PrivateKey([1u8; 32]))
            .with_peer(peer_a().with_preshared_key(SymmetricKey([7u8; 32])));
        h.device.reconfig(&cfg).unwrap();

        let cfg = Config::new(PrivateKey([1u8; 32])).with_peer(peer_a());
        h.device.reconfig(&cfg).unwrap();
        assert_eq!(
            h.device.config().peers[0].preshared_key,
            Some(SymmetricKey([7u8; 32]))
        );
    }

    #[test]
    fn test_concurrent_config_and_reconfig() {
        let h = harness();
        let device = &h.device;
        let with_b = base_config();
        let without_b = Config::new(PrivateKey([1u8; 32]))
            .with_listen_port(51820)
            .with_peer(peer_a());

        std::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for i in 0..50 {
                        let cfg = if i % 2 == 0 { &with_b } else { &without_b };
                        device.reconfig(cfg).unwrap();
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..100 {
                    let snapshot = device.config();
                    assert!(snapshot.peers.windows(2).all(|w| w[0].public_key < w[1].public_key));
                }
            });
        });

        device.reconfig(&with_b).unwrap();
        assert_eq!(device.config().peers.len(), 2);
        assert_eq!(device.allowed_ips().len(), 3);
    }

    #[test]
    fn test_unordered_eq() {
        assert!(unordered_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(unordered_eq(&[1, 2, 3], &[3, 1, 2]));
        assert!(!unordered_eq(&[1, 2], &[1, 2, 3]));
        assert!(!unordered_eq(&[1, 2, 2], &[1, 2, 3]));
        assert!(unordered_eq::<u8>(&[], &[]));
    }
}
