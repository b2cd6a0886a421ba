//! Regeneration engine.
//!
//! Applies record mutations and keeps generated material in step with the
//! declared fields. Every operation follows the same shape:
//!
//! 1. load the pre-mutation record and validate the new one
//! 2. classify the change against the pre-mutation snapshot
//! 3. compute the complete new record (certificate, document)
//! 4. write it once, or not at all when nothing changed
//!
//! Because classification only ever reads declared fields and the engine
//! only ever writes generated ones, re-applying a record the engine just
//! wrote classifies as `Stable` and produces no further writes.
//!
//! # Fan-out
//!
//! Domain updates and lighthouse changes regenerate the configuration of
//! other hosts. Those writes are per host and best effort: a failing host is
//! logged and reported, the rest continue.

use meshforge_core::{
    AuthorityMaterial, CertificateAuthority, EventFilter, EventKind, Host, HostMaterial, HostSpec,
    LighthouseInfo, NetworkDomain, ProvisionerConfig, RecordId,
};
use meshforge_crypto::{Ed25519Signer, Signer};
use meshforge_identity::{CertificateIssuer, HostCertParams};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

use crate::classifier::{
    classify_host_creation, classify_host_update, domain_requires_regeneration, HostDecision,
    HostState,
};
use crate::error::{MeshError, MeshResult};
use crate::firewall::compile;
use crate::generator::{parse_endpoint, ConfigGenerator};
use crate::ipam::{check_host_ip, check_network_address, next_available_in};
use crate::store::{DomainFilter, HostFilter, Store};

/// Per-host results of a configuration fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegenerationReport {
    /// Hosts whose document changed and was written.
    pub regenerated: Vec<RecordId>,
    /// Hosts whose document rendered identically; not written.
    pub unchanged: Vec<RecordId>,
    /// Hosts without a certificate yet.
    pub skipped: Vec<RecordId>,
    /// Hosts that failed, with the reason.
    pub failed: Vec<(RecordId, String)>,
}

impl RegenerationReport {
    fn merge(&mut self, other: RegenerationReport) {
        self.regenerated.extend(other.regenerated);
        self.unchanged.extend(other.unchanged);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }
}

/// Result of a domain update.
#[derive(Debug, Clone)]
pub struct DomainUpdate {
    pub domain: NetworkDomain,
    /// Whether the domain record itself was written.
    pub written: bool,
    pub report: RegenerationReport,
}

/// Result of a host update.
#[derive(Debug, Clone)]
pub struct HostUpdate {
    pub host: Host,
    pub decision: HostDecision,
    /// Whether the host record was written.
    pub written: bool,
    /// Peer regeneration triggered by a lighthouse change.
    pub propagation: RegenerationReport,
}

/// Orchestrates issuance and configuration generation over a [`Store`].
pub struct RegenerationEngine<S: Store, G: Signer = Ed25519Signer> {
    store: S,
    issuer: CertificateIssuer<G>,
    generator: ConfigGenerator,
    config: ProvisionerConfig,
    filter: Option<EventFilter>,
}

impl<S: Store> RegenerationEngine<S, Ed25519Signer> {
    pub fn new(store: S, config: ProvisionerConfig) -> Self {
        Self::with_signer(store, Ed25519Signer::new(), config)
    }
}

impl<S: Store, G: Signer> RegenerationEngine<S, G> {
    pub fn with_signer(store: S, signer: G, config: ProvisionerConfig) -> Self {
        Self {
            store,
            issuer: CertificateIssuer::new(signer),
            generator: ConfigGenerator::new(&config),
            config,
            filter: None,
        }
    }

    /// Skip generation for events the filter rejects. Records are still
    /// validated and saved. Creating a domain generates nothing, so
    /// `DomainCreate` is never consulted.
    pub fn with_event_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    fn handles(&self, kind: EventKind) -> bool {
        let handled = self.filter.as_ref().map_or(true, |filter| filter(kind));
        if !handled {
            debug!(event = %kind, "Event filtered");
        }
        handled
    }

    // ---- authorities ----

    /// Create the deployment's authority and issue its certificate.
    pub fn create_authority(
        &self,
        name: &str,
        validity_years: Option<u32>,
    ) -> MeshResult<CertificateAuthority> {
        if name.trim().is_empty() {
            return Err(MeshError::Validation("authority name is empty".to_string()));
        }
        if !self.store.list_authorities()?.is_empty() {
            return Err(MeshError::Conflict(
                "a certificate authority already exists".to_string(),
            ));
        }

        let years = validity_years.unwrap_or(self.config.certificates.ca_validity_years);
        let mut authority = CertificateAuthority::new(name.trim(), years);
        if self.handles(EventKind::AuthorityCreate) {
            authority.material = Some(self.issue_authority_material(&authority)?);
        }
        self.store.save_authority(&authority)?;

        info!(
            authority = %authority.id,
            name = %authority.name,
            issued = authority.is_issued(),
            "Authority created"
        );
        Ok(authority)
    }

    /// Issue the certificate of an authority created without one.
    /// An already issued authority is returned unchanged.
    pub fn issue_authority(&self, authority_id: &str) -> MeshResult<CertificateAuthority> {
        let mut authority = self
            .store
            .find_authority(authority_id)?
            .ok_or_else(|| MeshError::not_found("authority", authority_id))?;
        if authority.is_issued() {
            return Ok(authority);
        }
        authority.material = Some(self.issue_authority_material(&authority)?);
        self.store.save_authority(&authority)?;
        info!(authority = %authority.id, "Authority issued");
        Ok(authority)
    }

    fn issue_authority_material(
        &self,
        authority: &CertificateAuthority,
    ) -> MeshResult<AuthorityMaterial> {
        let issued = self
            .issuer
            .issue_authority(&authority.name, authority.validity_years)?;
        Ok(AuthorityMaterial {
            certificate: issued.certificate_pem,
            private_key: issued.private_key_pem,
            expires_at: issued.expires_at,
        })
    }

    fn authority_material(&self, domain: &NetworkDomain) -> MeshResult<AuthorityMaterial> {
        let authority = self
            .store
            .find_authority(&domain.authority_id)?
            .ok_or_else(|| MeshError::not_found("authority", &domain.authority_id))?;
        authority.material.ok_or_else(|| {
            MeshError::Validation(format!("authority {} has no certificate", authority.name))
        })
    }

    // ---- domains ----

    fn domain(&self, id: &str) -> MeshResult<NetworkDomain> {
        self.store
            .find_domain(id)?
            .ok_or_else(|| MeshError::not_found("domain", id))
    }

    fn validate_domain(&self, domain: &NetworkDomain) -> MeshResult<()> {
        if domain.name.trim().is_empty() {
            return Err(MeshError::Validation("domain name is empty".to_string()));
        }
        check_network_address(&domain.cidr)?;
        if self.store.find_authority(&domain.authority_id)?.is_none() {
            return Err(MeshError::not_found("authority", &domain.authority_id));
        }
        compile(&domain.firewall_outbound, &domain.firewall_inbound)?;

        let siblings = self
            .store
            .list_domains(&DomainFilter::for_authority(domain.authority_id.clone()))?;
        if let Some(other) = siblings.iter().find(|other| {
            other.id != domain.id
                && (other.cidr.contains(&domain.cidr.network())
                    || domain.cidr.contains(&other.cidr.network()))
        }) {
            return Err(MeshError::Validation(format!(
                "{} overlaps domain {} ({})",
                domain.cidr, other.name, other.cidr
            )));
        }
        Ok(())
    }

    /// Validate and store a new domain.
    pub fn create_domain(&self, domain: NetworkDomain) -> MeshResult<NetworkDomain> {
        self.validate_domain(&domain)?;
        self.store.save_domain(&domain)?;
        info!(
            domain = %domain.id,
            name = %domain.name,
            cidr = %domain.cidr,
            "Domain created"
        );
        Ok(domain)
    }

    /// Store an updated domain and regenerate the configuration of its
    /// active hosts. Certificates are never reissued here.
    pub fn update_domain(&self, after: NetworkDomain) -> MeshResult<DomainUpdate> {
        let before = self.domain(&after.id)?;
        if before.authority_id != after.authority_id {
            return Err(MeshError::Validation(
                "a domain cannot move to another authority".to_string(),
            ));
        }
        self.validate_domain(&after)?;

        if before.cidr != after.cidr {
            let hosts = self.store.list_hosts(&HostFilter::in_domain(after.id.clone()))?;
            if let Some(stray) = hosts.iter().find(|host| {
                host.spec
                    .overlay_ip
                    .map_or(false, |ip| !after.cidr.contains(&ip))
            }) {
                return Err(MeshError::Validation(format!(
                    "host {} would fall outside {}",
                    stray.spec.hostname, after.cidr
                )));
            }
        }

        if !domain_requires_regeneration(&before, &after) {
            debug!(domain = %after.id, "Domain unchanged");
            return Ok(DomainUpdate {
                domain: after,
                written: false,
                report: RegenerationReport::default(),
            });
        }

        self.store.save_domain(&after)?;
        let report = if self.handles(EventKind::DomainUpdate) {
            self.regenerate_domain(&after, None)?
        } else {
            RegenerationReport::default()
        };

        info!(
            domain = %after.id,
            regenerated = report.regenerated.len(),
            failed = report.failed.len(),
            "Domain updated"
        );
        Ok(DomainUpdate {
            domain: after,
            written: true,
            report,
        })
    }

    // ---- hosts ----

    fn validate_host(&self, spec: &HostSpec, domain: &NetworkDomain) -> MeshResult<()> {
        if spec.hostname.trim().is_empty() {
            return Err(MeshError::Validation("hostname is empty".to_string()));
        }
        if spec.validity_years == 0 {
            return Err(MeshError::Validation(
                "validity must be at least one year".to_string(),
            ));
        }
        if let Some(ip) = spec.overlay_ip {
            check_host_ip(ip, &domain.cidr)?;
        }
        if spec.is_lighthouse {
            let endpoint = spec.public_endpoint.as_deref().ok_or_else(|| {
                MeshError::Validation(format!(
                    "lighthouse {} needs a public endpoint",
                    spec.hostname
                ))
            })?;
            parse_endpoint(endpoint)?;
        }
        compile(&spec.firewall_outbound, &spec.firewall_inbound)?;
        Ok(())
    }

    fn allocate(
        &self,
        domain: &NetworkDomain,
        contended: &HashSet<Ipv4Addr>,
    ) -> MeshResult<Ipv4Addr> {
        let mut used: HashSet<Ipv4Addr> = self
            .store
            .list_hosts(&HostFilter::in_domain(domain.id.clone()))?
            .into_iter()
            .filter_map(|host| host.spec.overlay_ip)
            .collect();
        used.extend(contended.iter().copied());
        next_available_in(&domain.cidr, &used)
    }

    fn lighthouses(&self, domain_id: &str, exclude: &str) -> MeshResult<Vec<LighthouseInfo>> {
        Ok(self
            .store
            .list_hosts(&HostFilter::in_domain(domain_id).active().lighthouses())?
            .into_iter()
            .filter(|host| host.id != exclude)
            .filter_map(|host| host.lighthouse_info())
            .collect())
    }

    fn issue(&self, spec: &HostSpec, authority: &AuthorityMaterial) -> MeshResult<HostMaterial> {
        let overlay_ip = spec.overlay_ip.ok_or_else(|| {
            MeshError::Validation(format!("host {} has no overlay address", spec.hostname))
        })?;
        let params = HostCertParams {
            hostname: spec.hostname.clone(),
            overlay_ip: overlay_ip.to_string(),
            groups: spec.groups.iter().cloned().collect(),
            validity_years: spec.validity_years,
            ca_certificate_pem: authority.certificate.clone(),
            ca_private_key_pem: authority.private_key.clone(),
            ca_expires_at: authority.expires_at,
        };
        let issued = self.issuer.issue_host(&params)?;
        Ok(HostMaterial {
            certificate: issued.certificate_pem,
            private_key: issued.private_key_pem,
            ca_certificate: authority.certificate.clone(),
            expires_at: issued.expires_at,
        })
    }

    fn render(
        &self,
        host: &Host,
        material: &HostMaterial,
        domain: &NetworkDomain,
    ) -> MeshResult<String> {
        let lighthouses = self.lighthouses(&domain.id, &host.id)?;
        self.generator.generate(host, material, domain, &lighthouses)
    }

    /// Fill in certificate and document of `host`.
    fn provision(
        &self,
        host: &mut Host,
        domain: &NetworkDomain,
        authority: &AuthorityMaterial,
    ) -> MeshResult<()> {
        let material = self.issue(&host.spec, authority)?;
        host.config = Some(self.render(host, &material, domain)?);
        host.material = Some(material);
        Ok(())
    }

    /// Create a host from its declared fields, allocating an overlay
    /// address when none is given.
    pub fn create_host(&self, spec: HostSpec) -> MeshResult<Host> {
        self.insert_host(Host::new(spec))
    }

    /// Store a new host record. Certificate and document are generated only
    /// when the record carries no certificate yet.
    pub fn insert_host(&self, host: Host) -> MeshResult<Host> {
        let domain = self.domain(&host.spec.domain_id)?;
        self.validate_host(&host.spec, &domain)?;
        if self
            .store
            .list_hosts(&HostFilter::hostname(host.spec.hostname.clone()))?
            .iter()
            .any(|other| other.id != host.id)
        {
            return Err(MeshError::Conflict(format!(
                "hostname {} already taken",
                host.spec.hostname
            )));
        }

        let state = classify_host_creation(host.is_issued());
        let authority = if state == HostState::Unissued && self.handles(EventKind::HostCreate) {
            Some(self.authority_material(&domain)?)
        } else {
            None
        };

        let auto_allocate = host.spec.overlay_ip.is_none();
        let max_attempts = if auto_allocate {
            self.config.allocation.max_attempts.max(1)
        } else {
            1
        };
        let mut contended = HashSet::new();
        let mut attempt = 0;

        let host = loop {
            attempt += 1;
            let mut candidate = host.clone();
            if auto_allocate {
                candidate.spec.overlay_ip = Some(self.allocate(&domain, &contended)?);
            }
            if let Some(authority) = &authority {
                self.provision(&mut candidate, &domain, authority)?;
            }

            match self.store.save_host(&candidate) {
                Ok(()) => break candidate,
                Err(MeshError::Conflict(reason)) if auto_allocate && attempt < max_attempts => {
                    warn!(
                        host = %candidate.spec.hostname,
                        attempt,
                        reason = %reason,
                        "Allocated address taken, retrying"
                    );
                    contended.extend(candidate.spec.overlay_ip);
                }
                Err(err) => return Err(err),
            }
        };

        info!(
            host = %host.spec.hostname,
            overlay_ip = ?host.spec.overlay_ip,
            domain = %domain.name,
            state = %state,
            issued = host.is_issued(),
            "Host created"
        );

        if authority.is_some() && host.lighthouse_info().is_some() {
            self.propagate(&[domain.id.as_str()], &host.id)?;
        }
        Ok(host)
    }

    /// Classify replacing `before`'s declared fields with `after`.
    pub fn evaluate_host_update(&self, before: &Host, after: &HostSpec) -> HostDecision {
        classify_host_update(&before.spec, after, before.is_issued())
    }

    /// Replace a host's declared fields and regenerate whatever depends on
    /// the change. The host is written at most once.
    pub fn update_host(&self, host_id: &str, after: HostSpec) -> MeshResult<HostUpdate> {
        let before = self
            .store
            .find_host(host_id)?
            .ok_or_else(|| MeshError::not_found("host", host_id))?;
        let domain = self.domain(&after.domain_id)?;
        if after.overlay_ip.is_none() && before.spec.overlay_ip.is_some() {
            return Err(MeshError::Validation(format!(
                "overlay address of {} cannot be cleared",
                before.spec.hostname
            )));
        }
        self.validate_host(&after, &domain)?;

        let decision = self.evaluate_host_update(&before, &after);
        let handled = self.handles(EventKind::HostUpdate);

        let mut host = before.clone();
        host.spec = after;
        if handled {
            if decision.state.requires_certificate() {
                if host.spec.overlay_ip.is_none() {
                    host.spec.overlay_ip = Some(self.allocate(&domain, &HashSet::new())?);
                }
                let authority = self.authority_material(&domain)?;
                self.provision(&mut host, &domain, &authority)?;
            } else if decision.state.requires_config() {
                if let Some(material) = &host.material {
                    host.config = Some(self.render(&host, material, &domain)?);
                }
            }
        }

        let written = host != before;
        if written {
            self.store.save_host(&host)?;
        }

        info!(
            host = %host.spec.hostname,
            state = %decision.state,
            changed = ?decision.changed,
            written,
            "Host updated"
        );

        let mut propagation = RegenerationReport::default();
        let moved = before.spec.domain_id != host.spec.domain_id;
        let was_lighthouse = before.lighthouse_info();
        let is_lighthouse = host.lighthouse_info();
        let lighthouse_changed = was_lighthouse != is_lighthouse
            || (moved && (was_lighthouse.is_some() || is_lighthouse.is_some()));
        if handled && written && lighthouse_changed {
            let mut domains = vec![host.spec.domain_id.as_str()];
            if moved {
                domains.push(before.spec.domain_id.as_str());
            }
            propagation = self.propagate(&domains, &host.id)?;
        }

        Ok(HostUpdate {
            host,
            decision,
            written,
            propagation,
        })
    }

    /// Re-render one host's document, writing it only if it changed.
    pub fn regenerate_config(&self, host_id: &str) -> MeshResult<bool> {
        let host = self
            .store
            .find_host(host_id)?
            .ok_or_else(|| MeshError::not_found("host", host_id))?;
        let domain = self.domain(&host.spec.domain_id)?;
        self.refresh_config(host, &domain)
    }

    fn refresh_config(&self, mut host: Host, domain: &NetworkDomain) -> MeshResult<bool> {
        let material = host.material.clone().ok_or_else(|| {
            MeshError::Validation(format!("host {} has no certificate", host.spec.hostname))
        })?;
        let config = self.render(&host, &material, domain)?;
        if host.config.as_deref() == Some(config.as_str()) {
            return Ok(false);
        }
        host.config = Some(config);
        self.store.save_host(&host)?;
        Ok(true)
    }

    fn regenerate_domain(
        &self,
        domain: &NetworkDomain,
        exclude: Option<&str>,
    ) -> MeshResult<RegenerationReport> {
        let mut report = RegenerationReport::default();
        let hosts = self
            .store
            .list_hosts(&HostFilter::in_domain(domain.id.clone()).active())?;

        for host in hosts {
            if Some(host.id.as_str()) == exclude {
                continue;
            }
            if !host.is_issued() {
                report.skipped.push(host.id);
                continue;
            }
            let id = host.id.clone();
            let hostname = host.spec.hostname.clone();
            match self.refresh_config(host, domain) {
                Ok(true) => report.regenerated.push(id),
                Ok(false) => report.unchanged.push(id),
                Err(err) => {
                    warn!(host = %hostname, domain = %domain.name, error = %err, "Config regeneration failed");
                    report.failed.push((id, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn propagate(&self, domain_ids: &[&str], source: &str) -> MeshResult<RegenerationReport> {
        let mut report = RegenerationReport::default();
        if !self.config.lighthouse.propagate_changes {
            return Ok(report);
        }
        for domain_id in domain_ids {
            let domain = self.domain(domain_id)?;
            report.merge(self.regenerate_domain(&domain, Some(source))?);
        }
        debug!(
            source = %source,
            regenerated = report.regenerated.len(),
            "Lighthouse change propagated"
        );
        Ok(report)
    }
}
