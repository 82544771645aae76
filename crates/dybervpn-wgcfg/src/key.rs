//! Fixed-size key material for tunnel configuration
//!
//! Keys are opaque 32-byte values. The all-zero value means "unset" and never
//! identifies a real peer.

use rand_core::OsRng;
use serde::{Serialize, Serializer};
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of every key in bytes
pub const KEY_SIZE: usize = 32;

macro_rules! key_codec {
    ($name:ident) => {
        impl $name {
            /// Create from raw bytes, rejecting anything that is not exactly 32 bytes
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
                if bytes.len() != KEY_SIZE {
                    return Err(KeyError::InvalidLength {
                        expected: KEY_SIZE,
                        actual: bytes.len(),
                    });
                }
                let mut arr = [0u8; KEY_SIZE];
                arr.copy_from_slice(bytes);
                Ok(Self(arr))
            }

            /// Get raw bytes
            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }

            /// True for the all-zero (unset) value
            pub fn is_zero(&self) -> bool {
                self.0.iter().fold(0u8, |acc, b| acc | b) == 0
            }

            /// Decode from lowercase or uppercase hex
            pub fn from_hex(s: &str) -> Result<Self, KeyError> {
                let bytes = hex::decode(s).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
                Self::from_bytes(&bytes)
            }

            /// Encode as lowercase hex
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Decode from standard base64
            pub fn from_base64(s: &str) -> Result<Self, KeyError> {
                let bytes = base64::decode(s).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
                Self::from_bytes(&bytes)
            }

            /// Encode as standard base64
            pub fn to_base64(&self) -> String {
                base64::encode(self.0)
            }

            /// Decode a key as written in a wg-quick file: base64, or 64 hex digits
            pub fn parse(s: &str) -> Result<Self, KeyError> {
                if s.len() == KEY_SIZE * 2 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Self::from_hex(s);
                }
                Self::from_base64(s)
            }
        }
    };
}

/// A peer's public key
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub [u8; KEY_SIZE]);

key_codec!(Key);

impl Key {
    /// Short fingerprint for logs, e.g. `[AbCdE]`
    pub fn short_string(&self) -> String {
        let b64 = self.to_base64();
        format!("[{}]", &b64[..5])
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.short_string())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

/// The device's static private key (zeroized on drop)
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(pub [u8; KEY_SIZE]);

key_codec!(PrivateKey);

impl PrivateKey {
    /// Generate a new clamped Curve25519 private key
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let mut key = Self(secret.to_bytes());
        key.clamp();
        key
    }

    /// Apply Curve25519 clamping in place
    pub fn clamp(&mut self) {
        self.0[0] &= 248;
        self.0[31] = (self.0[31] & 127) | 64;
    }

    /// Derive the matching public key. The zero key has no public key.
    pub fn public_key(&self) -> Key {
        if self.is_zero() {
            return Key::default();
        }
        let secret = StaticSecret::from(self.0);
        Key(X25519PublicKey::from(&secret).to_bytes())
    }

    /// X25519 shared secret between this key and a peer's public key
    pub fn shared_secret(&self, peer: &Key) -> Zeroizing<[u8; KEY_SIZE]> {
        let secret = StaticSecret::from(self.0);
        let shared = secret.diffie_hellman(&X25519PublicKey::from(peer.0));
        Zeroizing::new(shared.to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl Serialize for PrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("(hidden)")
    }
}

/// A preshared symmetric key (zeroized on drop)
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey(pub [u8; KEY_SIZE]);

key_codec!(SymmetricKey);

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl Serialize for SymmetricKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("(hidden)")
    }
}

/// Key-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    /// Decoded to the wrong number of bytes
    #[error("Keys must decode to exactly {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Not valid hex/base64
    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),
}
