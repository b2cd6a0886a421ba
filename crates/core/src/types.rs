//! Record types shared by every Meshforge crate.
//!
//! Each record separates the fields an operator declares from the material
//! the provisioner generates (certificates, keys, configuration documents).
//! Change classification only ever looks at the declared half.

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

/// Primary key of a stored record.
pub type RecordId = String;

/// Generate a fresh record identifier.
pub fn new_record_id() -> RecordId {
    uuid::Uuid::new_v4().to_string()
}

/// Key curve of a certificate authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Curve {
    /// Ed25519 signing keys, X25519 host keys.
    #[default]
    #[serde(rename = "CURVE25519")]
    Curve25519,
}

impl Curve {
    pub fn as_str(&self) -> &'static str {
        match self {
            Curve::Curve25519 => "CURVE25519",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CURVE25519" => Some(Curve::Curve25519),
            _ => None,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The root of trust of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    pub id: RecordId,
    pub name: String,
    pub validity_years: u32,
    pub curve: Curve,
    /// Populated once, when the authority is first provisioned.
    #[serde(default)]
    pub material: Option<AuthorityMaterial>,
}

impl CertificateAuthority {
    pub fn new(name: impl Into<String>, validity_years: u32) -> Self {
        Self {
            id: new_record_id(),
            name: name.into(),
            validity_years,
            curve: Curve::default(),
            material: None,
        }
    }

    pub fn is_issued(&self) -> bool {
        self.material.is_some()
    }
}

/// Certificate and signing key of the authority.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityMaterial {
    /// PEM encoded self-signed certificate.
    pub certificate: String,
    /// PEM encoded signing key. Never serialized outward.
    #[serde(skip_serializing, default)]
    pub private_key: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AuthorityMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityMaterial")
            .field("certificate", &self.certificate)
            .field("private_key", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One firewall rule as declared by an operator.
///
/// This is the input schema (`{port, proto, host?, groups?}`); it is checked
/// and normalized by the firewall compiler in `meshforge-mesh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDeclaration {
    pub port: String,
    pub proto: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl RuleDeclaration {
    pub fn for_host(port: impl Into<String>, proto: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            proto: proto.into(),
            host: Some(host.into()),
            groups: None,
        }
    }

    pub fn for_groups<I, S>(port: impl Into<String>, proto: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            port: port.into(),
            proto: proto.into(),
            host: None,
            groups: Some(groups.into_iter().map(Into::into).collect()),
        }
    }
}

/// An isolated overlay network signed by one authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDomain {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cidr: Ipv4Net,
    pub authority_id: RecordId,
    pub active: bool,
    /// Used for hosts that declare no outbound rules of their own.
    #[serde(default)]
    pub firewall_outbound: Vec<RuleDeclaration>,
    /// Used for hosts that declare no inbound rules of their own.
    #[serde(default)]
    pub firewall_inbound: Vec<RuleDeclaration>,
}

impl NetworkDomain {
    pub fn new(name: impl Into<String>, cidr: Ipv4Net, authority_id: impl Into<RecordId>) -> Self {
        Self {
            id: new_record_id(),
            name: name.into(),
            description: String::new(),
            cidr,
            authority_id: authority_id.into(),
            active: true,
            firewall_outbound: Vec::new(),
            firewall_inbound: Vec::new(),
        }
    }
}

/// Operator-declared host fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub hostname: String,
    pub domain_id: RecordId,
    /// `None` asks the provisioner to allocate an address on creation.
    #[serde(default)]
    pub overlay_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub is_lighthouse: bool,
    /// `host:port` reachable from the internet; required for lighthouses.
    #[serde(default)]
    pub public_endpoint: Option<String>,
    pub validity_years: u32,
    #[serde(default)]
    pub firewall_outbound: Vec<RuleDeclaration>,
    #[serde(default)]
    pub firewall_inbound: Vec<RuleDeclaration>,
    pub active: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

impl HostSpec {
    pub fn new(hostname: impl Into<String>, domain_id: impl Into<RecordId>, validity_years: u32) -> Self {
        Self {
            hostname: hostname.into(),
            domain_id: domain_id.into(),
            overlay_ip: None,
            groups: BTreeSet::new(),
            is_lighthouse: false,
            public_endpoint: None,
            validity_years,
            firewall_outbound: Vec::new(),
            firewall_inbound: Vec::new(),
            active: true,
            email: None,
            verified: false,
        }
    }

    pub fn with_overlay_ip(mut self, ip: Ipv4Addr) -> Self {
        self.overlay_ip = Some(ip);
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_lighthouse(mut self, public_endpoint: impl Into<String>) -> Self {
        self.is_lighthouse = true;
        self.public_endpoint = Some(public_endpoint.into());
        self
    }
}

/// Certificate material issued to a host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMaterial {
    pub certificate: String,
    pub private_key: String,
    /// Copy of the issuing authority's certificate.
    pub ca_certificate: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for HostMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMaterial")
            .field("certificate", &self.certificate)
            .field("private_key", &"[REDACTED]")
            .field("ca_certificate", &self.ca_certificate)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A member of a network domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: RecordId,
    #[serde(flatten)]
    pub spec: HostSpec,
    #[serde(default)]
    pub material: Option<HostMaterial>,
    /// Generated configuration document (YAML).
    #[serde(default)]
    pub config: Option<String>,
}

impl Host {
    pub fn new(spec: HostSpec) -> Self {
        Self {
            id: new_record_id(),
            spec,
            material: None,
            config: None,
        }
    }

    pub fn is_issued(&self) -> bool {
        self.material.is_some()
    }

    /// Discovery data other hosts need, if this host is an active lighthouse.
    pub fn lighthouse_info(&self) -> Option<LighthouseInfo> {
        if !self.spec.active || !self.spec.is_lighthouse {
            return None;
        }
        Some(LighthouseInfo {
            overlay_ip: self.spec.overlay_ip?,
            public_endpoint: self.spec.public_endpoint.clone()?,
        })
    }
}

/// Read-only projection of a lighthouse used for peer discovery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LighthouseInfo {
    pub overlay_ip: Ipv4Addr,
    pub public_endpoint: String,
}
