//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Deterministic parsing failures only. Store, network and configuration
/// failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. empty launch key).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A persisted webhook status could not be understood.
    #[error("unknown webhook status: {0}")]
    UnknownStatus(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
