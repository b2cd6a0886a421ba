//! Record storage.
//!
//! The [`Store`] trait is the provisioner's only view of persistence. It
//! enforces the uniqueness invariants the engine relies on:
//!
//! - one certificate authority per deployment
//! - unique hostnames
//! - unique overlay addresses within a domain
//!
//! A violating write fails with [`MeshError::Conflict`] and leaves the store
//! unchanged.

use meshforge_core::{CertificateAuthority, Host, NetworkDomain};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{MeshError, MeshResult};

/// Host selection criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFilter {
    pub domain_id: Option<String>,
    pub hostname: Option<String>,
    pub active: Option<bool>,
    pub lighthouse: Option<bool>,
}

impl HostFilter {
    pub fn in_domain(domain_id: impl Into<String>) -> Self {
        Self {
            domain_id: Some(domain_id.into()),
            ..Self::default()
        }
    }

    pub fn hostname(hostname: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            ..Self::default()
        }
    }

    pub fn active(mut self) -> Self {
        self.active = Some(true);
        self
    }

    pub fn lighthouses(mut self) -> Self {
        self.lighthouse = Some(true);
        self
    }

    pub fn matches(&self, host: &Host) -> bool {
        let spec = &host.spec;
        self.domain_id.as_ref().map_or(true, |id| &spec.domain_id == id)
            && self.hostname.as_ref().map_or(true, |name| &spec.hostname == name)
            && self.active.map_or(true, |active| spec.active == active)
            && self.lighthouse.map_or(true, |lh| spec.is_lighthouse == lh)
    }
}

/// Domain selection criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainFilter {
    pub authority_id: Option<String>,
    pub name: Option<String>,
    pub active: Option<bool>,
}

impl DomainFilter {
    pub fn for_authority(authority_id: impl Into<String>) -> Self {
        Self {
            authority_id: Some(authority_id.into()),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, domain: &NetworkDomain) -> bool {
        self.authority_id
            .as_ref()
            .map_or(true, |id| &domain.authority_id == id)
            && self.name.as_ref().map_or(true, |name| &domain.name == name)
            && self.active.map_or(true, |active| domain.active == active)
    }
}

/// Persistence used by the regeneration engine.
///
/// `save_*` inserts or replaces by id. Listings are ordered by name.
pub trait Store: Send + Sync {
    fn find_authority(&self, id: &str) -> MeshResult<Option<CertificateAuthority>>;
    fn save_authority(&self, authority: &CertificateAuthority) -> MeshResult<()>;
    fn list_authorities(&self) -> MeshResult<Vec<CertificateAuthority>>;

    fn find_domain(&self, id: &str) -> MeshResult<Option<NetworkDomain>>;
    fn save_domain(&self, domain: &NetworkDomain) -> MeshResult<()>;
    fn list_domains(&self, filter: &DomainFilter) -> MeshResult<Vec<NetworkDomain>>;

    fn find_host(&self, id: &str) -> MeshResult<Option<Host>>;
    fn save_host(&self, host: &Host) -> MeshResult<()>;
    fn list_hosts(&self, filter: &HostFilter) -> MeshResult<Vec<Host>>;
}

impl<T: Store + ?Sized> Store for Arc<T> {
    fn find_authority(&self, id: &str) -> MeshResult<Option<CertificateAuthority>> {
        (**self).find_authority(id)
    }
    fn save_authority(&self, authority: &CertificateAuthority) -> MeshResult<()> {
        (**self).save_authority(authority)
    }
    fn list_authorities(&self) -> MeshResult<Vec<CertificateAuthority>> {
        (**self).list_authorities()
    }
    fn find_domain(&self, id: &str) -> MeshResult<Option<NetworkDomain>> {
        (**self).find_domain(id)
    }
    fn save_domain(&self, domain: &NetworkDomain) -> MeshResult<()> {
        (**self).save_domain(domain)
    }
    fn list_domains(&self, filter: &DomainFilter) -> MeshResult<Vec<NetworkDomain>> {
        (**self).list_domains(filter)
    }
    fn find_host(&self, id: &str) -> MeshResult<Option<Host>> {
        (**self).find_host(id)
    }
    fn save_host(&self, host: &Host) -> MeshResult<()> {
        (**self).save_host(host)
    }
    fn list_hosts(&self, filter: &HostFilter) -> MeshResult<Vec<Host>> {
        (**self).list_hosts(filter)
    }
}

#[derive(Debug, Default)]
struct Records {
    authorities: BTreeMap<String, CertificateAuthority>,
    domains: BTreeMap<String, NetworkDomain>,
    hosts: BTreeMap<String, Host>,
}

/// In-process store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MeshResult<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| MeshError::Storage("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn find_authority(&self, id: &str) -> MeshResult<Option<CertificateAuthority>> {
        Ok(self.lock()?.authorities.get(id).cloned())
    }

    fn save_authority(&self, authority: &CertificateAuthority) -> MeshResult<()> {
        let mut records = self.lock()?;
        if records.authorities.keys().any(|id| id != &authority.id) {
            return Err(MeshError::Conflict(
                "a certificate authority already exists".to_string(),
            ));
        }
        records
            .authorities
            .insert(authority.id.clone(), authority.clone());
        Ok(())
    }

    fn list_authorities(&self) -> MeshResult<Vec<CertificateAuthority>> {
        Ok(self.lock()?.authorities.values().cloned().collect())
    }

    fn find_domain(&self, id: &str) -> MeshResult<Option<NetworkDomain>> {
        Ok(self.lock()?.domains.get(id).cloned())
    }

    fn save_domain(&self, domain: &NetworkDomain) -> MeshResult<()> {
        self.lock()?
            .domains
            .insert(domain.id.clone(), domain.clone());
        Ok(())
    }

    fn list_domains(&self, filter: &DomainFilter) -> MeshResult<Vec<NetworkDomain>> {
        let mut domains: Vec<NetworkDomain> = self
            .lock()?
            .domains
            .values()
            .filter(|domain| filter.matches(domain))
            .cloned()
            .collect();
        domains.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(domains)
    }

    fn find_host(&self, id: &str) -> MeshResult<Option<Host>> {
        Ok(self.lock()?.hosts.get(id).cloned())
    }

    fn save_host(&self, host: &Host) -> MeshResult<()> {
        let mut records = self.lock()?;
        for other in records.hosts.values().filter(|other| other.id != host.id) {
            if other.spec.hostname == host.spec.hostname {
                return Err(MeshError::Conflict(format!(
                    "hostname {} already taken",
                    host.spec.hostname
                )));
            }
            if host.spec.overlay_ip.is_some()
                && other.spec.domain_id == host.spec.domain_id
                && other.spec.overlay_ip == host.spec.overlay_ip
            {
                return Err(MeshError::Conflict(format!(
                    "overlay address {} already assigned in domain {}",
                    host.spec.overlay_ip.map(|ip| ip.to_string()).unwrap_or_default(),
                    host.spec.domain_id
                )));
            }
        }
        records.hosts.insert(host.id.clone(), host.clone());
        Ok(())
    }

    fn list_hosts(&self, filter: &HostFilter) -> MeshResult<Vec<Host>> {
        let mut hosts: Vec<Host> = self
            .lock()?
            .hosts
            .values()
            .filter(|host| filter.matches(host))
            .cloned()
            .collect();
        hosts.sort_by(|a, b| a.spec.hostname.cmp(&b.spec.hostname));
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use meshforge_core::HostSpec;
    use std::net::Ipv4Addr;

    fn host(name: &str, domain: &str, last_octet: u8) -> Host {
        Host::new(
            HostSpec::new(name, domain, 1).with_overlay_ip(Ipv4Addr::new(10, 0, 0, last_octet)),
        )
    }

    #[test]
    fn test_single_authority() {
        let store = MemoryStore::new();
        let ca = CertificateAuthority::new("root", 10);
        store.save_authority(&ca).unwrap();
        store.save_authority(&ca).unwrap();

        let err = store
            .save_authority(&CertificateAuthority::new("second", 10))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.list_authorities().unwrap().len(), 1);
    }

    #[test]
    fn test_hostname_unique() {
        let store = MemoryStore::new();
        store.save_host(&host("web-1", "d1", 1)).unwrap();
        let err = store.save_host(&host("web-1", "d2", 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_overlay_ip_unique_per_domain() {
        let store = MemoryStore::new();
        store.save_host(&host("web-1", "d1", 1)).unwrap();
        store.save_host(&host("web-2", "d2", 1)).unwrap();

        let err = store.save_host(&host("web-3", "d1", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(store.list_hosts(&HostFilter::hostname("web-3")).unwrap().is_empty());
    }

    #[test]
    fn test_resave_same_host() {
        let store = MemoryStore::new();
        let mut h = host("web-1", "d1", 1);
        store.save_host(&h).unwrap();
        h.spec.email = Some("ops@example.com".to_string());
        store.save_host(&h).unwrap();
        assert_eq!(store.find_host(&h.id).unwrap(), Some(h));
    }

    #[test]
    fn test_host_filters() {
        let store = MemoryStore::new();
        let mut lh = host("lh-1", "d1", 1);
        lh.spec.is_lighthouse = true;
        let mut idle = host("idle", "d1", 3);
        idle.spec.active = false;
        store.save_host(&lh).unwrap();
        store.save_host(&host("web-1", "d1", 2)).unwrap();
        store.save_host(&idle).unwrap();
        store.save_host(&host("web-2", "d2", 2)).unwrap();

        let names = |filter: HostFilter| -> Vec<String> {
            store
                .list_hosts(&filter)
                .unwrap()
                .into_iter()
                .map(|h| h.spec.hostname)
                .collect()
        };
        assert_eq!(names(HostFilter::in_domain("d1")), vec!["idle", "lh-1", "web-1"]);
        assert_eq!(names(HostFilter::in_domain("d1").active()), vec!["lh-1", "web-1"]);
        assert_eq!(names(HostFilter::in_domain("d1").lighthouses()), vec!["lh-1"]);
    }
}
