//! Cryptographic primitives for the Meshforge provisioner.
//!
//! This crate owns everything that touches key material:
//!
//! - **Keys**: Ed25519 authority keys and X25519 host keys
//! - **Certificates**: the mesh certificate format and its fingerprints
//! - **PEM**: armour for certificates and private keys
//! - **Signing**: the [`Signer`] seam and its Ed25519 implementation
//!
//! # Security Principles
//!
//! - Secrets are zeroized after use and never logged
//! - Every issued certificate names the authority that signed it
//! - BLAKE3 is used for all fingerprints

pub mod certificate;
pub mod error;
pub mod keys;
pub mod pem;
pub mod signer;

pub use certificate::{CertificateDetails, MeshCertificate};
pub use error::{CryptoError, CryptoResult};
pub use keys::{public_key_fingerprint, HostKeyPair, SigningKeyPair, KEY_LENGTH};
pub use signer::{Ed25519Signer, Signer};
