//! Control protocol codec
//!
//! The control protocol is newline-delimited `key=value` ASCII. Device fields
//! come first; every `public_key` line opens a new peer and all following lines
//! until the next `public_key` belong to it. Keys are hex encoded.
//!
//! A line must contain exactly one `=`, so values can never contain one.

use crate::config::{Config, Peer};
use crate::endpoint::{parse_endpoints, Resolver};
use crate::error::{ConfigError, ConfigResult};
use crate::key::{Key, KeyError, PrivateKey, SymmetricKey};
use std::io::BufRead;

/// The only protocol version spoken
pub const PROTOCOL_VERSION: &str = "1";

/// Which part of the stream the decoder is reading
enum DecodeState {
    Device,
    Peer(Peer),
}

impl Config {
    /// Decode control protocol text read from a device
    pub fn from_uapi_str(text: &str) -> ConfigResult<Config> {
        Self::from_uapi(text.as_bytes())
    }

    /// Decode a control protocol stream.
    ///
    /// The result is only returned once the whole stream decoded cleanly; on
    /// error every peer read so far is discarded with it.
    pub fn from_uapi<R: BufRead>(reader: R) -> ConfigResult<Config> {
        let mut cfg = Config::default();
        let mut state = DecodeState::Device;

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('=').collect();
            if parts.len() != 2 {
                return Err(ConfigError::FieldCount {
                    parts: parts.len(),
                    line,
                });
            }
            let (key, value) = (parts[0], parts[1]);

            if key == "public_key" {
                let public_key = decode_hex(value, Key::from_hex)?;
                if public_key.is_zero() {
                    return Err(ConfigError::parse("Peer public key must not be zero", value));
                }
                if let DecodeState::Peer(done) =
                    std::mem::replace(&mut state, DecodeState::Peer(Peer::new(public_key)))
                {
                    cfg.peers.push(done);
                }
                continue;
            }

            match &mut state {
                DecodeState::Device => handle_device_line(&mut cfg, key, value)?,
                DecodeState::Peer(peer) => handle_peer_line(peer, key, value)?,
            }
        }
        if let DecodeState::Peer(done) = state {
            cfg.peers.push(done);
        }

        if cfg.private_key.is_zero() {
            return Err(ConfigError::parse("Device must have a private key", "[none specified]"));
        }
        Ok(cfg)
    }

    /// Encode as control protocol write text that replaces the device's whole
    /// configuration.
    ///
    /// Endpoint hosts are resolved through `resolver` (this may block). The
    /// `endpoint` line of each peer is written before its
    /// `persistent_keepalive_interval` line: the receiving device starts a
    /// handshake to its configured endpoints as soon as the interval is set.
    pub fn to_uapi(&self, resolver: &dyn Resolver) -> ConfigResult<String> {
        let mut out = String::new();
        out.push_str(&format!("private_key={}\n", self.private_key.to_hex()));
        if self.listen_port > 0 {
            out.push_str(&format!("listen_port={}\n", self.listen_port));
        }
        out.push_str("replace_peers=true\n");

        for peer in &self.peers {
            out.push_str(&format!("public_key={}\n", peer.public_key.to_hex()));
            if let Some(psk) = peer.preshared_key.as_ref().filter(|k| !k.is_zero()) {
                out.push_str(&format!("preshared_key={}\n", psk.to_hex()));
            }
            out.push_str(&format!("protocol_version={}\n", PROTOCOL_VERSION));
            out.push_str("replace_allowed_ips=true\n");
            for net in &peer.allowed_ips {
                out.push_str(&format!("allowed_ip={}\n", net));
            }

            let resolved = peer
                .endpoints
                .iter()
                .map(|ep| ep.resolve(resolver).map(|addr| addr.to_string()))
                .collect::<ConfigResult<Vec<_>>>()?;
            out.push_str(&format!("endpoint={}\n", resolved.join(",")));

            out.push_str(&format!(
                "persistent_keepalive_interval={}\n",
                peer.persistent_keepalive
            ));
        }
        Ok(out)
    }
}

fn handle_device_line(cfg: &mut Config, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        "private_key" => cfg.private_key = decode_hex(value, PrivateKey::from_hex)?,
        "listen_port" => {
            cfg.listen_port = value
                .parse()
                .map_err(|_| ConfigError::parse("failed to parse listen_port", value))?
        }
        "replace_peers" => expect_true(key, value)?,
        "fwmark" => {}
        _ => return Err(ConfigError::UnexpectedKey(key.to_string())),
    }
    Ok(())
}

fn handle_peer_line(peer: &mut Peer, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        "preshared_key" => {
            let psk = decode_hex(value, SymmetricKey::from_hex)?;
            if !psk.is_zero() {
                peer.preshared_key = Some(psk);
            }
        }
        "endpoint" => {
            if !value.is_empty() {
                peer.endpoints = parse_endpoints(value)?;
            }
        }
        "persistent_keepalive_interval" => {
            peer.persistent_keepalive = value.parse().map_err(|_| {
                ConfigError::parse("failed to parse persistent_keepalive_interval", value)
            })?
        }
        "allowed_ip" => {
            let net = value
                .parse()
                .map_err(|_| ConfigError::parse("Invalid IP prefix", value))?;
            peer.allowed_ips.push(net);
        }
        "protocol_version" => {
            if value != PROTOCOL_VERSION {
                return Err(ConfigError::ProtocolVersion(value.to_string()));
            }
        }
        "replace_allowed_ips" => expect_true(key, value)?,
        "last_handshake_time_sec" | "last_handshake_time_nsec" | "tx_bytes" | "rx_bytes" => {}
        _ => return Err(ConfigError::UnexpectedKey(key.to_string())),
    }
    Ok(())
}

fn decode_hex<K>(value: &str, decode: fn(&str) -> Result<K, KeyError>) -> ConfigResult<K> {
    decode(value).map_err(|e| ConfigError::parse(format!("Invalid key: {}", e), value))
}

fn expect_true(key: &str, value: &str) -> ConfigResult<()> {
    if value == "true" {
        Ok(())
    } else {
        Err(ConfigError::parse(format!("{} only accepts true", key), value))
    }
}
