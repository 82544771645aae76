//! DyberVPN Tunnel Configuration
//!
//! WireGuard-compatible configuration model shared by the tunnel engine and
//! the CLI.
//!
//! # Formats
//!
//! - **wg-quick text**: `[Interface]`/`[Peer]` sections as written by users
//!   ([`Config::from_wg_quick`]).
//! - **Control protocol**: the newline-delimited `key=value` stream spoken by
//!   a running device ([`Config::from_uapi`], [`Config::to_uapi`]).
//!
//! # Example
//!
//! ```
//! use dybervpn_wgcfg::{Config, PrivateKey};
//!
//! let key = PrivateKey::generate();
//! let text = format!("[Interface]\nPrivateKey = {}\n", key.to_base64());
//! let cfg = Config::from_wg_quick(&text, "wg0").unwrap();
//! assert_eq!(cfg.name, "wg0");
//! assert!(cfg.peers.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod key;
pub mod name;
pub mod parser;
pub mod uapi;

// Re-exports
pub use config::{Config, Peer};
pub use endpoint::{parse_endpoints, Endpoint, Resolver, SystemResolver};
pub use error::{ConfigError, ConfigResult};
pub use key::{Key, KeyError, PrivateKey, SymmetricKey, KEY_SIZE};
pub use name::tunnel_name_is_valid;

/// Default tunnel MTU
pub const DEFAULT_MTU: u16 = 1420;

/// WireGuard default port
pub const DEFAULT_PORT: u16 = 51820;
