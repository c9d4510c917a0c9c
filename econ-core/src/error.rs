//! Error types for the simulation core.
//!
//! The tick itself is infallible. Errors surface only from configuration
//! loading, link registration, the wire codec, and network I/O.

use std::io;

use crate::types::CityName;

/// Failure to load or validate a [`SimConfig`](crate::config::SimConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Failure to encode or decode a wire record.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    Invalid(&'static str),
}

/// Rejected link registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("city {0} cannot link to itself")]
    SelfLink(CityName),

    #[error("a link between {local} and {remote} already exists")]
    Duplicate { local: CityName, remote: CityName },

    #[error("unknown city {0}")]
    UnknownCity(CityName),

    #[error("a city named {0} is already scheduled")]
    NameTaken(CityName),
}

/// Errors raised by the networked transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("link rejected: {0}")]
    Link(#[from] LinkError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("no free port in {first}..={last}")]
    NoFreePort { first: u16, last: u16 },

    #[error("city is no longer accepting links")]
    CityGone,
}
