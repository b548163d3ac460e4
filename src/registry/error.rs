//! Registry error types
//!
//! Error types for entity registry operations.

use thiserror::Error;

use super::entry::DeviceKind;

/// Error type for registry operations
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// No session with this id in the registry
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: DeviceKind, id: String },
}
