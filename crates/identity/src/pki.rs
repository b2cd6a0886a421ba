//! Certificate issuance for authorities and hosts.
//!
//! [`CertificateIssuer`] turns a [`Signer`] into the two issuance operations
//! the provisioner needs. Both are pure: they return PEM material and an
//! expiry and leave persistence to the caller.
//!
//! # Validity chain
//!
//! A host certificate never outlives its authority. The requested lifetime is
//! capped at the authority's expiry, silently; callers read the effective
//! expiry from [`IssuedCertificate::expires_at`].

use chrono::{DateTime, Months, Utc};
use ipnet::Ipv4Net;
use meshforge_crypto::pem::{
    marshal_certificate, marshal_host_key, marshal_signing_key, parse_certificate,
    parse_signing_key,
};
use meshforge_crypto::{CertificateDetails, Ed25519Signer, MeshCertificate, Signer};
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::{debug, info};

use crate::error::{IssuanceError, IssuanceResult};

/// PEM material produced by an issuance.
#[derive(Clone)]
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Inputs for a host certificate.
#[derive(Clone)]
pub struct HostCertParams {
    pub hostname: String,
    /// Dotted-quad IPv4 address; embedded as a /32.
    pub overlay_ip: String,
    pub groups: Vec<String>,
    pub validity_years: u32,
    pub ca_certificate_pem: String,
    pub ca_private_key_pem: String,
    pub ca_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for HostCertParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCertParams")
            .field("hostname", &self.hostname)
            .field("overlay_ip", &self.overlay_ip)
            .field("groups", &self.groups)
            .field("validity_years", &self.validity_years)
            .field("ca_private_key_pem", &"[REDACTED]")
            .field("ca_expires_at", &self.ca_expires_at)
            .finish()
    }
}

/// `start + years`, calendar aware. `None` on overflow.
pub fn add_years(start: DateTime<Utc>, years: u32) -> Option<DateTime<Utc>> {
    start.checked_add_months(Months::new(years.checked_mul(12)?))
}

fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

fn lifetime_end(now: DateTime<Utc>, years: u32) -> IssuanceResult<DateTime<Utc>> {
    if years == 0 {
        return Err(IssuanceError::InvalidValidity(
            "validity must be at least one year".to_string(),
        ));
    }
    add_years(now, years).ok_or_else(|| {
        IssuanceError::InvalidValidity(format!("{} years overflows the calendar", years))
    })
}

/// Issues authority and host certificates through a [`Signer`].
#[derive(Debug, Clone, Default)]
pub struct CertificateIssuer<S: Signer = Ed25519Signer> {
    signer: S,
}

impl<S: Signer> CertificateIssuer<S> {
    pub fn new(signer: S) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// Issue a self-signed authority certificate valid from now.
    pub fn issue_authority(
        &self,
        name: &str,
        validity_years: u32,
    ) -> IssuanceResult<IssuedCertificate> {
        self.issue_authority_at(name, validity_years, Utc::now())
    }

    /// Issue a self-signed authority certificate valid from `now`.
    pub fn issue_authority_at(
        &self,
        name: &str,
        validity_years: u32,
        now: DateTime<Utc>,
    ) -> IssuanceResult<IssuedCertificate> {
        let now = whole_seconds(now);
        let not_after = lifetime_end(now, validity_years)?;

        let key = self.signer.generate_signing_keypair()?;
        let details = CertificateDetails::authority(name, key.public_key().to_vec(), now, not_after);
        let cert = self.signer.self_sign(details, &key)?;

        info!(
            authority = %name,
            fingerprint = %cert.fingerprint()?,
            expires_at = %not_after,
            "Issued authority certificate"
        );

        Ok(IssuedCertificate {
            certificate_pem: marshal_certificate(&cert)?,
            private_key_pem: marshal_signing_key(&key),
            expires_at: not_after,
        })
    }

    /// Issue a host certificate signed by the authority in `params`.
    pub fn issue_host(&self, params: &HostCertParams) -> IssuanceResult<IssuedCertificate> {
        self.issue_host_at(params, Utc::now())
    }

    /// Issue a host certificate valid from `now`.
    ///
    /// The expiry is `min(now + validity_years, ca_expires_at)`, further capped
    /// by the authority certificate's own `not_after`.
    pub fn issue_host_at(
        &self,
        params: &HostCertParams,
        now: DateTime<Utc>,
    ) -> IssuanceResult<IssuedCertificate> {
        let now = whole_seconds(now);
        let overlay_ip: Ipv4Addr = params
            .overlay_ip
            .trim()
            .parse()
            .map_err(|_| IssuanceError::InvalidOverlayAddress(params.overlay_ip.clone()))?;
        let network = Ipv4Net::new(overlay_ip, 32)
            .map_err(|e| IssuanceError::InvalidOverlayAddress(e.to_string()))?;

        let ca_cert = parse_certificate(&params.ca_certificate_pem)
            .map_err(|e| IssuanceError::CaParse(e.to_string()))?;
        let ca_key = parse_signing_key(&params.ca_private_key_pem)
            .map_err(|e| IssuanceError::CaParse(e.to_string()))?;

        if !ca_cert.details.is_ca {
            return Err(IssuanceError::NotAnAuthority(ca_cert.details.name));
        }
        let ca_not_after = ca_cert
            .not_after()
            .map_err(|e| IssuanceError::CaParse(e.to_string()))?;
        let ca_expiry = ca_not_after.min(params.ca_expires_at);
        if ca_cert.is_expired(now) || ca_expiry <= now {
            return Err(IssuanceError::CaExpired {
                expired_at: ca_expiry,
            });
        }

        let requested = lifetime_end(now, params.validity_years)?;
        let expires_at = whole_seconds(requested.min(ca_expiry));
        if expires_at < requested {
            debug!(
                host = %params.hostname,
                requested = %requested,
                capped = %expires_at,
                "Host validity capped at authority expiry"
            );
        }

        let host_key = self.signer.generate_host_keypair()?;
        let details = CertificateDetails::host(
            params.hostname.clone(),
            network,
            params.groups.clone(),
            host_key.public_key().to_vec(),
            now,
            expires_at,
        );
        let cert = self.signer.sign_with_issuer(details, &ca_cert, &ca_key)?;

        info!(
            host = %params.hostname,
            overlay_ip = %overlay_ip,
            groups = ?params.groups,
            expires_at = %expires_at,
            "Issued host certificate"
        );

        Ok(IssuedCertificate {
            certificate_pem: marshal_certificate(&cert)?,
            private_key_pem: marshal_host_key(&host_key),
            expires_at,
        })
    }

    /// Verify a host certificate against an authority certificate at `now`.
    pub fn verify_host(
        &self,
        host_pem: &str,
        ca_pem: &str,
        now: DateTime<Utc>,
    ) -> IssuanceResult<VerifiedCertificate> {
        let ca = parse_certificate(ca_pem).map_err(|e| IssuanceError::CaParse(e.to_string()))?;
        let cert = parse_certificate(host_pem)?;

        if !ca.details.is_ca {
            return Err(IssuanceError::NotAnAuthority(ca.details.name));
        }
        if ca.is_expired(now) {
            return Err(IssuanceError::CaExpired {
                expired_at: ca.not_after()?,
            });
        }
        if cert.details.is_ca {
            return Err(IssuanceError::Rejected(format!(
                "{} is an authority certificate",
                cert.details.name
            )));
        }

        self.signer
            .verify(&cert, &ca)
            .map_err(|e| IssuanceError::Rejected(e.to_string()))?;

        let not_before = cert.not_before()?;
        let not_after = cert.not_after()?;
        if now < not_before || now > not_after {
            return Err(IssuanceError::Rejected(format!(
                "outside validity window {} .. {}",
                not_before, not_after
            )));
        }

        Ok(VerifiedCertificate::from_certificate(cert, not_before, not_after))
    }
}

/// Summary of a certificate that passed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedCertificate {
    pub name: String,
    pub networks: Vec<Ipv4Net>,
    pub groups: Vec<String>,
    pub issuer: String,
    pub public_key_fingerprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl VerifiedCertificate {
    fn from_certificate(
        cert: MeshCertificate,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        let public_key_fingerprint = cert.public_key_fingerprint();
        Self {
            name: cert.details.name,
            networks: cert.details.networks,
            groups: cert.details.groups,
            issuer: cert.details.issuer,
            public_key_fingerprint,
            not_before,
            not_after,
        }
    }
}

/// Verify `host_pem` against `ca_pem` with the default Ed25519 signer.
pub fn verify_host_certificate(
    host_pem: &str,
    ca_pem: &str,
    now: DateTime<Utc>,
) -> IssuanceResult<VerifiedCertificate> {
    CertificateIssuer::new(Ed25519Signer::new()).verify_host(host_pem, ca_pem, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meshforge_crypto::pem::parse_host_key;

    fn issuer() -> CertificateIssuer {
        CertificateIssuer::new(Ed25519Signer::new())
    }

    fn params(ca: &IssuedCertificate, validity_years: u32) -> HostCertParams {
        HostCertParams {
            hostname: "web-1".to_string(),
            overlay_ip: "10.128.0.100".to_string(),
            groups: vec!["web".to_string(), "prod".to_string()],
            validity_years,
            ca_certificate_pem: ca.certificate_pem.clone(),
            ca_private_key_pem: ca.private_key_pem.clone(),
            ca_expires_at: ca.expires_at,
        }
    }

    #[test]
    fn test_authority_is_self_signed() {
        let issued = issuer().issue_authority("root", 10).unwrap();
        let cert = parse_certificate(&issued.certificate_pem).unwrap();

        assert!(cert.details.is_ca);
        assert!(cert.is_self_signed());
        assert!(cert.details.networks.is_empty());
        assert!(cert.details.groups.is_empty());
        assert_eq!(cert.not_after().unwrap(), issued.expires_at);
        Ed25519Signer::new().verify(&cert, &cert).unwrap();
    }

    #[test]
    fn test_authority_validity_window() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let issued = issuer().issue_authority_at("root", 10, now).unwrap();
        assert_eq!(issued.expires_at, add_years(now, 10).unwrap());
    }

    #[test]
    fn test_host_embeds_identity() {
        let issuer = issuer();
        let ca = issuer.issue_authority("root", 10).unwrap();
        let issued = issuer.issue_host(&params(&ca, 1)).unwrap();

        let cert = parse_certificate(&issued.certificate_pem).unwrap();
        let ca_cert = parse_certificate(&ca.certificate_pem).unwrap();
        assert_eq!(cert.details.networks, vec!["10.128.0.100/32".parse::<Ipv4Net>().unwrap()]);
        assert_eq!(cert.details.groups, vec!["web", "prod"]);
        assert_eq!(cert.details.issuer, ca_cert.fingerprint().unwrap());
        assert!(!cert.details.is_ca);

        let key = parse_host_key(&issued.private_key_pem).unwrap();
        assert_eq!(cert.details.public_key, key.public_key().to_vec());
    }

    #[test]
    fn test_host_expiry_uses_requested_validity() {
        let issuer = issuer();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ca = issuer.issue_authority_at("root", 10, now).unwrap();
        let issued = issuer.issue_host_at(&params(&ca, 1), now).unwrap();
        assert_eq!(issued.expires_at, add_years(now, 1).unwrap());
    }

    #[test]
    fn test_host_expiry_capped_at_authority() {
        let issuer = issuer();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ca = issuer.issue_authority_at("root", 1, now).unwrap();
        let issued = issuer.issue_host_at(&params(&ca, 5), now).unwrap();

        assert_eq!(issued.expires_at, ca.expires_at);
        let cert = parse_certificate(&issued.certificate_pem).unwrap();
        assert_eq!(cert.not_after().unwrap(), ca.expires_at);
    }

    #[test]
    fn test_host_expiry_capped_at_recorded_authority_expiry() {
        let issuer = issuer();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ca = issuer.issue_authority_at("root", 10, now).unwrap();
        let mut request = params(&ca, 3);
        request.ca_expires_at = now + Duration::days(30);

        let issued = issuer.issue_host_at(&request, now).unwrap();
        assert_eq!(issued.expires_at, now + Duration::days(30));
    }

    #[test]
    fn test_invalid_overlay_address() {
        let issuer = issuer();
        let ca = issuer.issue_authority("root", 10).unwrap();
        let mut request = params(&ca, 1);
        request.overlay_ip = "10.128.0.300".to_string();

        assert!(matches!(
            issuer.issue_host(&request).unwrap_err(),
            IssuanceError::InvalidOverlayAddress(_)
        ));
    }

    #[test]
    fn test_malformed_authority_material() {
        let issuer = issuer();
        let ca = issuer.issue_authority("root", 10).unwrap();
        let mut request = params(&ca, 1);
        request.ca_private_key_pem = "garbage".to_string();

        assert!(matches!(
            issuer.issue_host(&request).unwrap_err(),
            IssuanceError::CaParse(_)
        ));
    }

    #[test]
    fn test_expired_authority_rejected() {
        let issuer = issuer();
        let then = DateTime::from_timestamp(1_500_000_000, 0).unwrap();
        let ca = issuer.issue_authority_at("root", 1, then).unwrap();

        let err = issuer
            .issue_host_at(&params(&ca, 1), then + Duration::days(800))
            .unwrap_err();
        assert!(matches!(err, IssuanceError::CaExpired { .. }));
    }

    #[test]
    fn test_host_certificate_cannot_issue() {
        let issuer = issuer();
        let ca = issuer.issue_authority("root", 10).unwrap();
        let host = issuer.issue_host(&params(&ca, 1)).unwrap();

        let mut request = params(&ca, 1);
        request.ca_certificate_pem = host.certificate_pem;
        assert!(matches!(
            issuer.issue_host(&request).unwrap_err(),
            IssuanceError::NotAnAuthority(_)
        ));
    }

    #[test]
    fn test_zero_validity_rejected() {
        assert!(matches!(
            issuer().issue_authority("root", 0).unwrap_err(),
            IssuanceError::InvalidValidity(_)
        ));
    }

    #[test]
    fn test_verify_host_certificate() {
        let issuer = issuer();
        let ca = issuer.issue_authority("root", 10).unwrap();
        let host = issuer.issue_host(&params(&ca, 1)).unwrap();

        let verified =
            verify_host_certificate(&host.certificate_pem, &ca.certificate_pem, Utc::now())
                .unwrap();
        assert_eq!(verified.name, "web-1");
        assert_eq!(verified.not_after, host.expires_at);

        let other = issuer.issue_authority("other", 10).unwrap();
        assert!(matches!(
            verify_host_certificate(&host.certificate_pem, &other.certificate_pem, Utc::now())
                .unwrap_err(),
            IssuanceError::Rejected(_)
        ));
    }

    #[test]
    fn test_verify_outside_window() {
        let issuer = issuer();
        let ca = issuer.issue_authority("root", 10).unwrap();
        let host = issuer.issue_host(&params(&ca, 1)).unwrap();

        let later = host.expires_at + Duration::days(1);
        assert!(matches!(
            verify_host_certificate(&host.certificate_pem, &ca.certificate_pem, later)
                .unwrap_err(),
            IssuanceError::Rejected(_)
        ));
    }
}
