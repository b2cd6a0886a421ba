//! Error types for certificate issuance and verification.

use thiserror::Error;

/// Errors that can occur while issuing or verifying certificates.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Overlay address could not be parsed as IPv4
    #[error("Invalid overlay address: {0}")]
    InvalidOverlayAddress(String),

    /// Requested validity period is unusable
    #[error("Invalid validity: {0}")]
    InvalidValidity(String),

    /// Authority certificate or key is malformed
    #[error("CA parse error: {0}")]
    CaParse(String),

    /// Authority certificate is past its expiry
    #[error("CA expired at {expired_at}")]
    CaExpired { expired_at: chrono::DateTime<chrono::Utc> },

    /// Issuing certificate does not carry the authority flag
    #[error("Not an authority: {0}")]
    NotAnAuthority(String),

    /// Certificate failed verification
    #[error("Certificate rejected: {0}")]
    Rejected(String),

    /// Key generation, signing or encoding failure
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] meshforge_crypto::CryptoError),
}

/// Result type for issuance operations.
pub type IssuanceResult<T> = Result<T, IssuanceError>;
