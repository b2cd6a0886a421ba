//! Meshforge Mesh - host provisioning for the overlay network
//!
//! Turns declared records (authority, domains, hosts) into the material a
//! mesh node needs to join: an overlay address, a signed certificate and a
//! ready-to-boot configuration document.
//!
//! # Core Components
//!
//! - **IPAM**: overlay address allocation and validation inside a domain CIDR
//! - **Firewall**: rule declarations compiled to the node's wire form
//! - **Generator**: deterministic YAML configuration documents
//! - **Classifier**: decides what a record change invalidates
//! - **Engine**: applies mutations and regenerates dependent material
//! - **Store**: persistence seam with in-memory and SQLite backends
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use meshforge_core::{HostSpec, NetworkDomain, ProvisionerConfig};
//! use meshforge_mesh::{MemoryStore, RegenerationEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = RegenerationEngine::new(MemoryStore::new(), ProvisionerConfig::default());
//! let ca = engine.create_authority("root", Some(10))?;
//! let domain = engine.create_domain(NetworkDomain::new("prod", "10.128.0.0/16".parse()?, &ca.id))?;
//! let host = engine.create_host(HostSpec::new("web-1", &domain.id, 1))?;
//! println!("{}", host.config.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod engine;
pub mod error;
pub mod firewall;
pub mod generator;
pub mod ipam;
pub mod sqlite;
pub mod store;

pub use classifier::{
    changed_fields, classify_host_creation, classify_host_update, domain_requires_regeneration,
    HostDecision, HostField, HostState, Impact,
};
pub use engine::{DomainUpdate, HostUpdate, RegenerationEngine, RegenerationReport};
pub use error::{ErrorKind, MeshError, MeshResult};
pub use firewall::{compile, CompiledFirewall, FirewallRule, PortSpec, Protocol, RuleTarget};
pub use generator::{parse_endpoint, ConfigGenerator};
pub use ipam::{next_available, validate_domain_cidr, validate_host_ip};
pub use sqlite::SqliteStore;
pub use store::{DomainFilter, HostFilter, MemoryStore, Store};
