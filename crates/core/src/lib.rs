//! Core functionality for the Meshforge mesh-VPN provisioner.
//!
//! This crate provides the record types, configuration, logging setup and
//! error types used across the Meshforge workspace.

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod types;

pub use config::{
    AllocationConfig, CertificateDefaults, LighthouseDefaults, NodeLoggingDefaults,
    ProvisionerConfig, PunchyDefaults, StorageConfig, TunnelDefaults,
};
pub use error::{CoreError, Error, Result};
pub use event::{EventFilter, EventKind};
pub use types::{
    new_record_id, AuthorityMaterial, CertificateAuthority, Curve, Host, HostMaterial, HostSpec,
    LighthouseInfo, NetworkDomain, RecordId, RuleDeclaration,
};
