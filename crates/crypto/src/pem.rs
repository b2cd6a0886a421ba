//! PEM armour for certificates and private keys.

use crate::certificate::MeshCertificate;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{HostKeyPair, SigningKeyPair};

pub const CERTIFICATE_TAG: &str = "MESH CERTIFICATE";
pub const SIGNING_KEY_TAG: &str = "MESH ED25519 PRIVATE KEY";
pub const HOST_KEY_TAG: &str = "MESH X25519 PRIVATE KEY";

fn encode(tag: &str, contents: Vec<u8>) -> String {
    ::pem::encode(&::pem::Pem::new(tag, contents))
}

fn decode(input: &str, expected_tag: &str) -> CryptoResult<Vec<u8>> {
    let parsed = ::pem::parse(input.trim()).map_err(|e| CryptoError::Pem(e.to_string()))?;
    if parsed.tag() != expected_tag {
        return Err(CryptoError::Pem(format!(
            "expected {} block, found {}",
            expected_tag,
            parsed.tag()
        )));
    }
    Ok(parsed.into_contents())
}

pub fn marshal_certificate(cert: &MeshCertificate) -> CryptoResult<String> {
    Ok(encode(CERTIFICATE_TAG, cert.to_bytes()?))
}

pub fn parse_certificate(input: &str) -> CryptoResult<MeshCertificate> {
    let body = decode(input, CERTIFICATE_TAG)?;
    MeshCertificate::from_bytes(&body)
}

pub fn marshal_signing_key(pair: &SigningKeyPair) -> String {
    encode(SIGNING_KEY_TAG, pair.secret_bytes().to_vec())
}

pub fn parse_signing_key(input: &str) -> CryptoResult<SigningKeyPair> {
    let body = decode(input, SIGNING_KEY_TAG)?;
    SigningKeyPair::from_secret_bytes(&body)
}

pub fn marshal_host_key(pair: &HostKeyPair) -> String {
    encode(HOST_KEY_TAG, pair.secret_bytes().to_vec())
}

pub fn parse_host_key(input: &str) -> CryptoResult<HostKeyPair> {
    let body = decode(input, HOST_KEY_TAG)?;
    HostKeyPair::from_secret_bytes(&body)
}
