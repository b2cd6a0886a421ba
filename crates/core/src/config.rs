//! Configuration management for Meshforge.
//!
//! Every field has a default so a partial TOML file (or none at all) yields a
//! usable configuration. Values here are deployment constants: they end up
//! verbatim in generated host configuration documents.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Default CA certificate lifetime.
pub const DEFAULT_CA_VALIDITY_YEARS: u32 = 10;
/// Default host certificate lifetime.
pub const DEFAULT_HOST_VALIDITY_YEARS: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub certificates: CertificateDefaults,
    pub tunnel: TunnelDefaults,
    pub node_logging: NodeLoggingDefaults,
    pub lighthouse: LighthouseDefaults,
    pub punchy: PunchyDefaults,
    pub allocation: AllocationConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateDefaults {
    pub ca_validity_years: u32,
    pub host_validity_years: u32,
}

impl Default for CertificateDefaults {
    fn default() -> Self {
        Self {
            ca_validity_years: DEFAULT_CA_VALIDITY_YEARS,
            host_validity_years: DEFAULT_HOST_VALIDITY_YEARS,
        }
    }
}

/// `tun` section of generated host configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelDefaults {
    pub disabled: bool,
    pub dev: String,
    pub drop_local_broadcast: bool,
    pub drop_multicast: bool,
    pub tx_queue: u32,
    pub mtu: u32,
}

impl Default for TunnelDefaults {
    fn default() -> Self {
        Self {
            disabled: false,
            dev: "mesh1".to_string(),
            drop_local_broadcast: false,
            drop_multicast: false,
            tx_queue: 500,
            mtu: 1300,
        }
    }
}

/// `logging` section of generated host configs (not the provisioner's own logging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLoggingDefaults {
    pub level: String,
    pub format: String,
}

impl Default for NodeLoggingDefaults {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LighthouseDefaults {
    /// Seconds between lighthouse updates on non-lighthouse hosts.
    pub interval_secs: u32,
    /// Regenerate peer configs when a lighthouse's discovery data changes.
    pub propagate_changes: bool,
}

impl Default for LighthouseDefaults {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            propagate_changes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PunchyDefaults {
    pub punch: bool,
    pub respond: bool,
}

impl Default for PunchyDefaults {
    fn default() -> Self {
        Self {
            punch: true,
            respond: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Attempts at allocate-then-save before giving up on a contended address.
    pub max_attempts: u32,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("meshforge.db"),
        }
    }
}

impl ProvisionerConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would produce unusable certificates or configs.
    pub fn validate(&self) -> Result<()> {
        if self.certificates.ca_validity_years == 0 {
            return Err(CoreError::Config(
                "certificates.ca_validity_years must be at least 1".to_string(),
            ));
        }
        if self.certificates.host_validity_years == 0 {
            return Err(CoreError::Config(
                "certificates.host_validity_years must be at least 1".to_string(),
            ));
        }
        if self.tunnel.mtu == 0 {
            return Err(CoreError::Config("tunnel.mtu must be positive".to_string()));
        }
        if self.tunnel.dev.is_empty() {
            return Err(CoreError::Config("tunnel.dev must not be empty".to_string()));
        }
        if self.allocation.max_attempts == 0 {
            return Err(CoreError::Config(
                "allocation.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProvisionerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.certificates.ca_validity_years, 10);
        assert_eq!(config.certificates.host_validity_years, 1);
        assert_eq!(config.tunnel.mtu, 1300);
        assert_eq!(config.tunnel.tx_queue, 500);
        assert_eq!(config.lighthouse.interval_secs, 60);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ProvisionerConfig::from_toml_str(
            r#"
            [certificates]
            host_validity_years = 2

            [tunnel]
            mtu = 1400
            "#,
        )
        .unwrap();

        assert_eq!(config.certificates.host_validity_years, 2);
        assert_eq!(config.certificates.ca_validity_years, 10);
        assert_eq!(config.tunnel.mtu, 1400);
        assert_eq!(config.tunnel.dev, "mesh1");
        assert_eq!(config.node_logging.level, "info");
    }

    #[test]
    fn test_zero_validity_rejected() {
        let err = ProvisionerConfig::from_toml_str(
            r#"
            [certificates]
            host_validity_years = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = ProvisionerConfig::from_toml_str("tunnel = 12").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse(_)));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("meshforge_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[allocation]\nmax_attempts = 5\n").unwrap();

        let config = ProvisionerConfig::from_file(&path).unwrap();
        assert_eq!(config.allocation.max_attempts, 5);

        std::fs::remove_file(path).ok();
    }
}
