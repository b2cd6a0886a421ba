//! Error types for Meshforge provisioning operations.
//!
//! Every variant maps onto one [`ErrorKind`] so callers can react to the
//! class of failure without matching on individual variants.

use thiserror::Error;

/// Broad failure classes of the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input could not be parsed (CIDR, address, PEM, endpoint)
    Parse,
    /// Input parsed but breaks a record invariant
    Validation,
    /// Address pool has no free host address
    Exhaustion,
    /// Key generation, signing or verification failed
    CryptoOperation,
    /// Referenced record does not exist
    NotFound,
    /// Storage rejected a write on a uniqueness constraint
    Conflict,
    /// Storage or encoding failure unrelated to the input
    Internal,
}

/// Errors that can occur in provisioning operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// CIDR could not be parsed
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Address could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Address family other than IPv4
    #[error("Unsupported address family: {0}")]
    UnsupportedFamily(String),

    /// No free host address left in the pool
    #[error("Address pool exhausted: {cidr}")]
    Exhausted { cidr: String },

    /// Record breaks an invariant
    #[error("Validation error: {0}")]
    Validation(String),

    /// Firewall rule declaration rejected by the compiler
    #[error("Invalid firewall rule ({direction} #{index}): {reason}")]
    InvalidFirewallRule {
        direction: &'static str,
        index: usize,
        reason: String,
    },

    /// Public endpoint is not `host:port`
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness constraint violated on write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Certificate issuance failed
    #[error("Issuance error: {0}")]
    Issuance(#[from] meshforge_identity::IssuanceError),

    /// Key or certificate operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] meshforge_crypto::CryptoError),

    /// Provisioner configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] meshforge_core::CoreError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Storage backend failure other than a database error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration document could not be rendered
    #[error("Render error: {0}")]
    Render(#[from] serde_yaml::Error),
}

impl MeshError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        MeshError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        use meshforge_identity::IssuanceError;

        match self {
            MeshError::InvalidCidr(_) | MeshError::InvalidAddress(_) => ErrorKind::Parse,
            MeshError::InvalidEndpoint(_) => ErrorKind::Parse,
            MeshError::UnsupportedFamily(_)
            | MeshError::Validation(_)
            | MeshError::InvalidFirewallRule { .. }
            | MeshError::Config(_) => ErrorKind::Validation,
            MeshError::Exhausted { .. } => ErrorKind::Exhaustion,
            MeshError::NotFound { .. } => ErrorKind::NotFound,
            MeshError::Conflict(_) => ErrorKind::Conflict,
            MeshError::Issuance(err) => match err {
                IssuanceError::InvalidOverlayAddress(_) | IssuanceError::CaParse(_) => {
                    ErrorKind::Parse
                }
                IssuanceError::InvalidValidity(_)
                | IssuanceError::CaExpired { .. }
                | IssuanceError::NotAnAuthority(_) => ErrorKind::Validation,
                IssuanceError::Rejected(_) | IssuanceError::Crypto(_) => {
                    ErrorKind::CryptoOperation
                }
            },
            MeshError::Crypto(_) => ErrorKind::CryptoOperation,
            MeshError::Database(_)
            | MeshError::Storage(_)
            | MeshError::Serialization(_)
            | MeshError::Render(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for provisioning operations.
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        assert_eq!(MeshError::InvalidCidr("x".into()).kind(), ErrorKind::Parse);
        assert_eq!(
            MeshError::Exhausted { cidr: "10.0.0.0/31".into() }.kind(),
            ErrorKind::Exhaustion
        );
        assert_eq!(MeshError::not_found("host", "h1").kind(), ErrorKind::NotFound);
        assert_eq!(MeshError::Conflict("dup".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            MeshError::from(meshforge_identity::IssuanceError::InvalidOverlayAddress(
                "bad".into()
            ))
            .kind(),
            ErrorKind::Parse
        );
    }
}
