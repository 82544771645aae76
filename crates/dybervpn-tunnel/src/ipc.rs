//! Control protocol read direction
//!
//! Emits the live device state in the same `key=value` vocabulary that
//! [`dybervpn_wgcfg::Config::from_uapi`] decodes.

use crate::device::Device;
use std::io::{self, Write};
use std::time::UNIX_EPOCH;

impl Device {
    /// Write the device state as control protocol lines, peers sorted by key
    pub fn ipc_get<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let private_key = self.private_key();
        let listen_port = self.listen_port();
        let mut peers = self.peers();
        peers.sort_by_key(|p| p.public_key());

        let mut out = String::new();
        if !private_key.is_zero() {
            out.push_str(&format!("private_key={}\n", private_key.to_hex()));
        }
        if listen_port != 0 {
            out.push_str(&format!("listen_port={}\n", listen_port));
        }

        for peer in &peers {
            out.push_str(&format!("public_key={}\n", peer.public_key().to_hex()));
            out.push_str(&format!("preshared_key={}\n", peer.preshared_key().to_hex()));
            out.push_str("protocol_version=1\n");

            let endpoint = peer.endpoint();
            if !endpoint.is_empty() {
                let joined: Vec<String> = endpoint.iter().map(|a| a.to_string()).collect();
                out.push_str(&format!("endpoint={}\n", joined.join(",")));
            }

            let since_epoch = peer
                .last_handshake()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .unwrap_or_default();
            out.push_str(&format!("last_handshake_time_sec={}\n", since_epoch.as_secs()));
            out.push_str(&format!(
                "last_handshake_time_nsec={}\n",
                since_epoch.subsec_nanos()
            ));
            out.push_str(&format!("tx_bytes={}\n", peer.tx_bytes()));
            out.push_str(&format!("rx_bytes={}\n", peer.rx_bytes()));
            out.push_str(&format!(
                "persistent_keepalive_interval={}\n",
                peer.persistent_keepalive()
            ));

            for net in self.allowed_ips().entries_for_peer(peer) {
                out.push_str(&format!("allowed_ip={}\n", net));
            }
        }

        w.write_all(out.as_bytes())
    }
}
