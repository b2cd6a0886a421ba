//! Mesh certificate format.
//!
//! A certificate binds a public key to a name, a set of overlay networks and
//! a set of groups for a validity window. Authorities carry no networks or
//! groups and an empty issuer; host certificates name their issuer by the
//! authority's fingerprint.

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use meshforge_core::Curve;
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::public_key_fingerprint;

/// The to-be-signed part of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDetails {
    pub name: String,
    pub networks: Vec<Ipv4Net>,
    pub groups: Vec<String>,
    /// Unix seconds.
    pub not_before: i64,
    /// Unix seconds.
    pub not_after: i64,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    pub is_ca: bool,
    /// Fingerprint of the signing authority; empty when self-signed.
    pub issuer: String,
    pub curve: Curve,
}

impl CertificateDetails {
    /// Template for a self-signed authority certificate.
    pub fn authority(
        name: impl Into<String>,
        public_key: Vec<u8>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            networks: Vec::new(),
            groups: Vec::new(),
            not_before: not_before.timestamp(),
            not_after: not_after.timestamp(),
            public_key,
            is_ca: true,
            issuer: String::new(),
            curve: Curve::Curve25519,
        }
    }

    /// Template for a host certificate; the issuer is filled in when signed.
    pub fn host(
        name: impl Into<String>,
        network: Ipv4Net,
        groups: Vec<String>,
        public_key: Vec<u8>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            networks: vec![network],
            groups,
            not_before: not_before.timestamp(),
            not_after: not_after.timestamp(),
            public_key,
            is_ca: false,
            issuer: String::new(),
            curve: Curve::Curve25519,
        }
    }

    /// Deterministic bytes covered by the signature.
    pub fn signing_bytes(&self) -> CryptoResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A signed certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshCertificate {
    pub details: CertificateDetails,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl MeshCertificate {
    /// Canonical encoding, also used as the PEM body.
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// BLAKE3 fingerprint over the canonical encoding.
    pub fn fingerprint(&self) -> CryptoResult<String> {
        Ok(hex::encode(blake3::hash(&self.to_bytes()?).as_bytes()))
    }

    /// Fingerprint of the certified public key; changes only when the key does.
    pub fn public_key_fingerprint(&self) -> String {
        public_key_fingerprint(&self.details.public_key)
    }

    pub fn is_self_signed(&self) -> bool {
        self.details.issuer.is_empty()
    }

    pub fn not_before(&self) -> CryptoResult<DateTime<Utc>> {
        timestamp(self.details.not_before)
    }

    pub fn not_after(&self) -> CryptoResult<DateTime<Utc>> {
        timestamp(self.details.not_after)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.details.not_after
    }
}

fn timestamp(secs: i64) -> CryptoResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CryptoError::Pem(format!("timestamp out of range: {}", secs)))
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> MeshCertificate {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        MeshCertificate {
            details: CertificateDetails::host(
                "web-1",
                "10.128.0.100/32".parse().unwrap(),
                vec!["web".to_string()],
                vec![9u8; 32],
                now,
                now + Duration::days(365),
            ),
            signature: vec![1u8; 64],
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let cert = sample();
        let decoded = MeshCertificate::from_bytes(&cert.to_bytes().unwrap()).unwrap();
        assert_eq!(cert, decoded);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let cert = sample();
        let mut other = sample();
        other.details.groups.push("db".to_string());
        assert_eq!(cert.fingerprint().unwrap(), sample().fingerprint().unwrap());
        assert_ne!(cert.fingerprint().unwrap(), other.fingerprint().unwrap());
    }

    #[test]
    fn test_expiry_window() {
        let cert = sample();
        let not_after = cert.not_after().unwrap();
        assert!(!cert.is_expired(not_after));
        assert!(cert.is_expired(not_after + Duration::seconds(1)));
    }

    #[test]
    fn test_authority_template() {
        let now = Utc::now();
        let details = CertificateDetails::authority("root", vec![1u8; 32], now, now);
        assert!(details.is_ca);
        assert!(details.networks.is_empty());
        assert!(details.groups.is_empty());
        assert!(details.issuer.is_empty());
    }
}
