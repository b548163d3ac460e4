//! Error types
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are
//! surfaced to the nearest caller; nothing is routed through a global
//! error channel, and a failure for one device never touches another.

use thiserror::Error;

use crate::config::ConfigError;
use crate::preview::NegotiationError;
use crate::registry::RegistryError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error type
#[derive(Debug, Error)]
pub enum Error {
    /// Connect or publish failed at the transport
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation attempted before the transport reported readiness
    #[error("not connected")]
    NotConnected,

    /// Presence query failed
    #[error("presence error: {0}")]
    Presence(String),

    /// Inventory probe failed
    #[error("inventory probe error: {0}")]
    Inventory(String),

    /// Preview negotiation failed for one device
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// Registry operation failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Payload could not be encoded or decoded
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Error reported by a [`Transport`](crate::transport::Transport) implementation
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport refused or lost the session
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The transport rejected an operation
    #[error("transport rejected operation: {0}")]
    Rejected(String),
}

impl Error {
    /// Whether this error is scoped to a single device
    pub fn is_device_scoped(&self) -> bool {
        matches!(self, Error::Negotiation(_) | Error::Registry(_))
    }
}
