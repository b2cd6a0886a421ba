//! Change classification for host records.
//!
//! Decides, from a before/after pair of declared host fields, whether a
//! mutation needs a new certificate, only a new configuration document, or
//! nothing at all.
//!
//! # State Transitions
//!
//! ```text
//! Unissued
//!     ↓ (issue + generate)
//! Issued ──(groups, validity, address, domain)──→ NeedsCertRegeneration ──┐
//!   │  ↑                                                                  │
//!   │  └──────────────────────── (re-issue + generate) ───────────────────┘
//!   ├──(lighthouse, endpoint, firewall)──→ NeedsConfigRegeneration ─→ Issued
//!   └──(anything else)──→ Stable
//! ```
//!
//! Only declared fields ([`HostSpec`]) are compared. Generated material never
//! enters the diff, so the engine's own write of a certificate or document
//! always classifies as `Stable`.

use meshforge_core::{HostSpec, NetworkDomain};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a host stands relative to its generated material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    /// No certificate yet
    Unissued,
    /// Certificate and configuration current
    Issued,
    /// New key pair, certificate and configuration required
    NeedsCertRegeneration,
    /// New configuration document required
    NeedsConfigRegeneration,
    /// Nothing generated depends on the change
    Stable,
}

impl HostState {
    pub fn requires_certificate(&self) -> bool {
        matches!(self, HostState::Unissued | HostState::NeedsCertRegeneration)
    }

    pub fn requires_config(&self) -> bool {
        !matches!(self, HostState::Issued | HostState::Stable)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Unissued => "unissued",
            HostState::Issued => "issued",
            HostState::NeedsCertRegeneration => "needs_cert_regeneration",
            HostState::NeedsConfigRegeneration => "needs_config_regeneration",
            HostState::Stable => "stable",
        };
        f.write_str(name)
    }
}

/// Declared host field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostField {
    Hostname,
    Domain,
    OverlayIp,
    Groups,
    IsLighthouse,
    PublicEndpoint,
    ValidityYears,
    FirewallOutbound,
    FirewallInbound,
    Active,
    Email,
    Verified,
}

/// What a field change invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Impact {
    None,
    Config,
    Certificate,
}

impl HostField {
    pub fn impact(&self) -> Impact {
        match self {
            HostField::Groups
            | HostField::ValidityYears
            | HostField::OverlayIp
            | HostField::Domain => Impact::Certificate,
            HostField::IsLighthouse
            | HostField::PublicEndpoint
            | HostField::FirewallOutbound
            | HostField::FirewallInbound => Impact::Config,
            HostField::Hostname | HostField::Active | HostField::Email | HostField::Verified => {
                Impact::None
            }
        }
    }
}

/// Declared fields that differ between `before` and `after`.
pub fn changed_fields(before: &HostSpec, after: &HostSpec) -> Vec<HostField> {
    let checks = [
        (HostField::Hostname, before.hostname != after.hostname),
        (HostField::Domain, before.domain_id != after.domain_id),
        (HostField::OverlayIp, before.overlay_ip != after.overlay_ip),
        (HostField::Groups, before.groups != after.groups),
        (HostField::IsLighthouse, before.is_lighthouse != after.is_lighthouse),
        (HostField::PublicEndpoint, before.public_endpoint != after.public_endpoint),
        (HostField::ValidityYears, before.validity_years != after.validity_years),
        (
            HostField::FirewallOutbound,
            before.firewall_outbound != after.firewall_outbound,
        ),
        (
            HostField::FirewallInbound,
            before.firewall_inbound != after.firewall_inbound,
        ),
        (HostField::Active, before.active != after.active),
        (HostField::Email, before.email != after.email),
        (HostField::Verified, before.verified != after.verified),
    ];
    checks
        .into_iter()
        .filter_map(|(field, changed)| changed.then_some(field))
        .collect()
}

/// Outcome of classifying a host mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDecision {
    pub state: HostState,
    pub changed: Vec<HostField>,
}

impl HostDecision {
    /// Whether the declared fields need writing at all.
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Classify a freshly created host.
pub fn classify_host_creation(has_certificate: bool) -> HostState {
    if has_certificate {
        HostState::Stable
    } else {
        HostState::Unissued
    }
}

/// Classify an update of a host's declared fields.
///
/// A host without a certificate stays `Unissued` whatever changed.
pub fn classify_host_update(
    before: &HostSpec,
    after: &HostSpec,
    has_certificate: bool,
) -> HostDecision {
    let changed = changed_fields(before, after);
    let state = if !has_certificate {
        HostState::Unissued
    } else {
        match changed.iter().map(HostField::impact).max() {
            Some(Impact::Certificate) => HostState::NeedsCertRegeneration,
            Some(Impact::Config) => HostState::NeedsConfigRegeneration,
            Some(Impact::None) | None => HostState::Stable,
        }
    };
    HostDecision { state, changed }
}

/// Whether a domain update changes anything hosts render.
pub fn domain_requires_regeneration(before: &NetworkDomain, after: &NetworkDomain) -> bool {
    before.name != after.name
        || before.description != after.description
        || before.cidr != after.cidr
        || before.authority_id != after.authority_id
        || before.active != after.active
        || before.firewall_outbound != after.firewall_outbound
        || before.firewall_inbound != after.firewall_inbound
}
