//! Certificate signing.
//!
//! [`Signer`] is the seam between the provisioner and the cryptographic
//! backend. The provisioner only asks for key pairs, self-signed authority
//! certificates and issuer-signed host certificates; [`Ed25519Signer`] is the
//! default implementation.
//!
//! # Issuer binding
//!
//! A host certificate names its issuer by the fingerprint of the authority
//! certificate. Signing refuses an issuer that is not an authority or whose
//! key does not match the certificate presented.

use ed25519_dalek::{Signature, Signer as _, VerifyingKey};
use tracing::debug;

use crate::certificate::{CertificateDetails, MeshCertificate};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{HostKeyPair, SigningKeyPair, KEY_LENGTH};

/// Backend that mints keys and signs certificates.
pub trait Signer: Send + Sync {
    fn generate_signing_keypair(&self) -> CryptoResult<SigningKeyPair>;

    fn generate_host_keypair(&self) -> CryptoResult<HostKeyPair>;

    /// Sign `details` with the key it certifies.
    fn self_sign(
        &self,
        details: CertificateDetails,
        key: &SigningKeyPair,
    ) -> CryptoResult<MeshCertificate>;

    /// Sign `details` with an authority's key.
    fn sign_with_issuer(
        &self,
        details: CertificateDetails,
        issuer: &MeshCertificate,
        issuer_key: &SigningKeyPair,
    ) -> CryptoResult<MeshCertificate>;

    /// Check `cert`'s signature and issuer binding against `issuer`.
    fn verify(&self, cert: &MeshCertificate, issuer: &MeshCertificate) -> CryptoResult<()>;
}

/// Ed25519 signer backed by `ed25519-dalek`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Signer;

impl Ed25519Signer {
    pub fn new() -> Self {
        Self
    }

    fn sign_details(
        details: CertificateDetails,
        key: &SigningKeyPair,
    ) -> CryptoResult<MeshCertificate> {
        let message = details.signing_bytes()?;
        let signature = key.signing_key().sign(&message);
        Ok(MeshCertificate {
            details,
            signature: signature.to_bytes().to_vec(),
        })
    }
}

impl Signer for Ed25519Signer {
    fn generate_signing_keypair(&self) -> CryptoResult<SigningKeyPair> {
        SigningKeyPair::generate()
    }

    fn generate_host_keypair(&self) -> CryptoResult<HostKeyPair> {
        HostKeyPair::generate()
    }

    fn self_sign(
        &self,
        mut details: CertificateDetails,
        key: &SigningKeyPair,
    ) -> CryptoResult<MeshCertificate> {
        if details.public_key != key.public_key() {
            return Err(CryptoError::Signing(
                "self-signed certificate must certify the signing key".to_string(),
            ));
        }
        details.issuer.clear();
        Self::sign_details(details, key)
    }

    fn sign_with_issuer(
        &self,
        mut details: CertificateDetails,
        issuer: &MeshCertificate,
        issuer_key: &SigningKeyPair,
    ) -> CryptoResult<MeshCertificate> {
        if !issuer.details.is_ca {
            return Err(CryptoError::Signing(format!(
                "issuer {} is not an authority",
                issuer.details.name
            )));
        }
        if issuer.details.public_key != issuer_key.public_key() {
            return Err(CryptoError::Signing(
                "issuer key does not match issuer certificate".to_string(),
            ));
        }

        details.issuer = issuer.fingerprint()?;
        debug!(name = %details.name, issuer = %details.issuer, "Signing certificate");
        Self::sign_details(details, issuer_key)
    }

    fn verify(&self, cert: &MeshCertificate, issuer: &MeshCertificate) -> CryptoResult<()> {
        if !issuer.details.is_ca {
            return Err(CryptoError::Verification(format!(
                "{} is not an authority",
                issuer.details.name
            )));
        }

        let expected_issuer = if cert.is_self_signed() {
            String::new()
        } else {
            issuer.fingerprint()?
        };
        if cert.details.issuer != expected_issuer {
            return Err(CryptoError::Verification(
                "certificate was not issued by this authority".to_string(),
            ));
        }

        let key_bytes: [u8; KEY_LENGTH] = issuer
            .details
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("issuer public key length".to_string()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let signature = Signature::from_slice(&cert.signature)
            .map_err(|e| CryptoError::Verification(e.to_string()))?;

        verifying_key
            .verify_strict(&cert.details.signing_bytes()?, &signature)
            .map_err(|e| CryptoError::Verification(e.to_string()))
    }
}
