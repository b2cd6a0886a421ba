//! Certificate issuance for the Meshforge provisioner.
//!
//! This crate binds hosts to the mesh: it mints the self-signed root
//! authority and signs host certificates that carry a host's overlay address
//! and group membership.
//!
//! # Core Concepts
//!
//! - **Authority**: the single self-signed root of a deployment
//! - **Host certificate**: overlay address as a /32 plus groups, signed by the authority
//! - **Validity chain**: a host certificate never outlives its authority
//!
//! The authority is always passed in explicitly; nothing here looks up
//! ambient state.

pub mod error;
pub mod pki;

pub use error::{IssuanceError, IssuanceResult};
pub use pki::{
    add_years, verify_host_certificate, CertificateIssuer, HostCertParams, IssuedCertificate,
    VerifiedCertificate,
};
