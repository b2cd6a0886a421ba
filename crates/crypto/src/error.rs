//! Error types for Meshforge cryptographic operations.

use thiserror::Error;

/// Errors raised by the signer, key handling and PEM codecs.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Entropy source failed while generating a key pair
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate could not be signed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Signature or issuer check failed
    #[error("Verification failed: {0}")]
    Verification(String),

    /// PEM block missing, mislabelled or malformed
    #[error("PEM error: {0}")]
    Pem(String),

    /// Key bytes of the wrong shape
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Certificate body could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
