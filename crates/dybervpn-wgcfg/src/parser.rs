//! wg-quick style configuration parser
//!
//! ```text
//! [Interface]
//! PrivateKey = <base64>
//! ListenPort = 51820
//! Address = 10.0.0.1/24
//!
//! [Peer]
//! PublicKey = <base64>
//! AllowedIPs = 10.0.0.2/32
//! Endpoint = vpn.example.com:51820
//! PersistentKeepalive = 25
//! ```
//!
//! Section headers and keys are case-insensitive; `#` starts a comment.
//! Unknown keys are rejected.

use crate::config::{Config, Peer};
use crate::endpoint::{parse_endpoints, parse_port};
use crate::error::{ConfigError, ConfigResult};
use crate::key::{Key, KeyError, PrivateKey, SymmetricKey};
use crate::name::tunnel_name_is_valid;
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::Path;

/// Smallest MTU accepted in an `[Interface]` section
pub const MIN_MTU: u16 = 576;

const NONE_SPECIFIED: &str = "[none specified]";

/// Where the parser currently is
enum Section {
    None,
    Interface,
    Peer(Peer),
}

impl Config {
    /// Parse a wg-quick configuration for the tunnel called `name`
    pub fn from_wg_quick(text: &str, name: &str) -> ConfigResult<Config> {
        if !tunnel_name_is_valid(name) {
            return Err(ConfigError::parse("Tunnel name is not valid", name));
        }

        let mut conf = Config {
            name: name.to_string(),
            ..Default::default()
        };
        let mut section = Section::None;

        for raw in text.lines() {
            let line = match raw.find('#') {
                Some(pound) => &raw[..pound],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let line_lower = line.to_ascii_lowercase();
            if line_lower == "[interface]" {
                finish_peer(&mut conf, std::mem::replace(&mut section, Section::Interface));
                continue;
            }
            if line_lower == "[peer]" {
                finish_peer(&mut conf, std::mem::replace(&mut section, Section::Peer(Peer::default())));
                continue;
            }

            match &mut section {
                Section::None => return Err(ConfigError::parse("Line must occur in a section", line)),
                Section::Interface => {
                    let (key, value) = split_key_value(line, &line_lower)?;
                    parse_interface_line(&mut conf, key, value)?;
                }
                Section::Peer(peer) => {
                    let (key, value) = split_key_value(line, &line_lower)?;
                    parse_peer_line(peer, key, value)?;
                }
            }
        }
        finish_peer(&mut conf, section);

        if conf.private_key.is_zero() {
            return Err(ConfigError::parse("An interface must have a private key", NONE_SPECIFIED));
        }
        if conf.peers.iter().any(|p| p.public_key.is_zero()) {
            return Err(ConfigError::parse("All peers must have public keys", NONE_SPECIFIED));
        }

        tracing::debug!("Parsed tunnel {} with {} peers", conf.name, conf.peers.len());
        Ok(conf)
    }

    /// Load a wg-quick file; the tunnel name is the file stem (`wg0.conf` -> `wg0`)
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let content = std::fs::read_to_string(path)?;
        Self::from_wg_quick(&content, name)
    }
}

fn finish_peer(conf: &mut Config, section: Section) {
    if let Section::Peer(peer) = section {
        conf.peers.push(peer);
    }
}

/// Split `key = value` at the first `=`; keys come from the lowercased line
fn split_key_value<'a>(line: &'a str, line_lower: &'a str) -> ConfigResult<(&'a str, &'a str)> {
    let equals = line
        .find('=')
        .ok_or_else(|| ConfigError::parse("Invalid config key is missing an equals separator", line))?;
    let key = line_lower[..equals].trim();
    let value = line[equals + 1..].trim();
    if value.is_empty() {
        return Err(ConfigError::parse("Key must have a value", line));
    }
    Ok((key, value))
}

fn parse_interface_line(conf: &mut Config, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        "privatekey" => conf.private_key = parse_key(value, PrivateKey::parse)?,
        "listenport" => conf.listen_port = parse_port(value)?,
        "mtu" => conf.mtu = parse_mtu(value)?,
        "address" => {
            for address in split_list(value)? {
                conf.addresses.push(parse_prefix(address)?);
            }
        }
        "dns" => {
            for address in split_list(value)? {
                let ip: IpAddr = address
                    .parse()
                    .map_err(|_| ConfigError::parse("Invalid IP address", address))?;
                conf.dns.push(ip);
            }
        }
        _ => return Err(ConfigError::parse("Invalid key for [Interface] section", key)),
    }
    Ok(())
}

fn parse_peer_line(peer: &mut Peer, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        "publickey" => peer.public_key = parse_key(value, Key::parse)?,
        "presharedkey" => peer.preshared_key = Some(parse_key(value, SymmetricKey::parse)?),
        "allowedips" => {
            for address in split_list(value)? {
                peer.allowed_ips.push(parse_prefix(address)?);
            }
        }
        "persistentkeepalive" => peer.persistent_keepalive = parse_persistent_keepalive(value)?,
        "endpoint" => peer.endpoints = parse_endpoints(value)?,
        _ => return Err(ConfigError::parse("Invalid key for [Peer] section", key)),
    }
    Ok(())
}

fn parse_key<K>(value: &str, decode: fn(&str) -> Result<K, KeyError>) -> ConfigResult<K> {
    decode(value).map_err(|e| ConfigError::parse(e.to_string(), value))
}

fn parse_prefix(s: &str) -> ConfigResult<IpNet> {
    s.parse()
        .map_err(|_| ConfigError::parse("Invalid IP prefix", s))
}

fn parse_mtu(s: &str) -> ConfigResult<u16> {
    let m: i64 = s.parse().map_err(|_| ConfigError::parse("Invalid MTU", s))?;
    if m < i64::from(MIN_MTU) || m > i64::from(u16::MAX) {
        return Err(ConfigError::parse("Invalid MTU", s));
    }
    Ok(m as u16)
}

fn parse_persistent_keepalive(s: &str) -> ConfigResult<u16> {
    if s == "off" {
        return Ok(0);
    }
    let m: i64 = s
        .parse()
        .map_err(|_| ConfigError::parse("Invalid persistent keepalive", s))?;
    u16::try_from(m).map_err(|_| ConfigError::parse("Invalid persistent keepalive", s))
}

fn split_list(s: &str) -> ConfigResult<Vec<&str>> {
    s.split(',')
        .map(|item| {
            let item = item.trim();
            if item.is_empty() {
                Err(ConfigError::parse("Two commas in a row", s))
            } else {
                Ok(item)
            }
        })
        .collect()
}
