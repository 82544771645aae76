//! Configuration error types

use std::borrow::Cow;
use std::io;
use thiserror::Error;

/// Result type for configuration codecs
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced while parsing, validating, encoding or resolving a configuration.
///
/// Codecs never partially succeed: any of these discards the value being built.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Syntax or validation failure, carrying the offending fragment
    #[error("{why}: ‘{offender}’")]
    Parse {
        /// Human-readable reason
        why: Cow<'static, str>,
        /// The fragment of input that was rejected
        offender: String,
    },

    /// Control protocol line that is not exactly one `key=value` pair
    #[error("failed to parse line {line:?}, found {parts} =-separated parts, want 2")]
    FieldCount {
        /// The raw line
        line: String,
        /// Number of `=`-separated parts found
        parts: usize,
    },

    /// Control protocol key not recognized in its section
    #[error("unexpected control protocol key: {0}")]
    UnexpectedKey(String),

    /// `protocol_version` other than 1
    #[error("invalid protocol version: {0}")]
    ProtocolVersion(String),

    /// Endpoint host could not be resolved
    #[error("unable to resolve IP address of endpoint {host:?}: {reason}")]
    Resolve {
        /// Host that failed to resolve
        host: String,
        /// Resolver diagnostic
        reason: String,
    },

    /// IO error while reading input
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ConfigError {
    /// Build a [`ConfigError::Parse`]
    pub fn parse(why: impl Into<Cow<'static, str>>, offender: impl Into<String>) -> Self {
        ConfigError::Parse {
            why: why.into(),
            offender: offender.into(),
        }
    }

    /// The offending fragment, if this is a parse error
    pub fn offender(&self) -> Option<&str> {
        match self {
            ConfigError::Parse { offender, .. } => Some(offender),
            ConfigError::FieldCount { line, .. } => Some(line),
            _ => None,
        }
    }
}
