//! DyberVPN Tunnel Management
//!
//! Live device state and the reconciliation engine that moves a running
//! device from one configuration to another.
//!
//! # Example
//!
//! ```no_run
//! use dybervpn_tunnel::Device;
//! use dybervpn_wgcfg::Config;
//!
//! let text = std::fs::read_to_string("/etc/dybervpn/dvpn0.conf").unwrap();
//! let cfg = Config::from_wg_quick(&text, "dvpn0").unwrap();
//!
//! let device = Device::new();
//! device.up().unwrap();
//! device.reconfig(&cfg).unwrap();
//! assert_eq!(device.config().peers.len(), cfg.peers.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod allowed_ips;
pub mod bind;
pub mod device;
pub mod error;
mod ipc;
pub mod peer;
mod reconfig;

// Re-exports
pub use allowed_ips::AllowedIps;
pub use bind::{Bind, UdpBind};
pub use device::{Device, MAX_PEERS};
pub use error::{TunnelError, TunnelResult};
pub use peer::{NullTransport, Peer, Transport, REKEY_TIMEOUT};
