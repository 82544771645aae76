//! Tunnel error types

use dybervpn_wgcfg::{ConfigError, Key};
use std::io;
use thiserror::Error;

/// Result type for tunnel operations
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Errors that can occur while operating or reconfiguring a device
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Configuration could not be decoded, encoded or resolved
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The listen port could not be bound
    #[error("Failed to bind port {port}: {source}")]
    PortInUse {
        /// Port that was requested
        port: u16,
        /// Underlying socket error
        source: io::Error,
    },

    /// Peer table is full
    #[error("Too many peers (limit {0})")]
    TooManyPeers(usize),

    /// The all-zero public key cannot identify a peer
    #[error("Invalid peer public key: {0}")]
    InvalidPeerKey(Key),

    /// A peer with this public key already exists
    #[error("Peer already exists: {0}")]
    PeerExists(Key),

    /// Device has been closed
    #[error("Device closed")]
    DeviceClosed,

    /// Endpoint could not be constructed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
