//! Test utilities for provisioning tests

use meshforge_core::{CertificateAuthority, NetworkDomain, ProvisionerConfig};
use meshforge_mesh::{RegenerationEngine, SqliteStore};
use std::path::{Path, PathBuf};

/// Unique database path under the system temp directory.
pub fn temp_db_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("meshforge_{}_{}.db", label, uuid::Uuid::new_v4()))
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A provisioned authority and domain backed by a SQLite file.
///
/// The database file and its WAL side files are removed on drop.
pub struct Deployment {
    pub engine: RegenerationEngine<SqliteStore>,
    pub authority: CertificateAuthority,
    pub domain: NetworkDomain,
    pub db_path: PathBuf,
}

impl Deployment {
    pub fn new(label: &str, cidr: &str, ca_years: u32) -> Self {
        init_tracing();
        let db_path = temp_db_path(label);
        let engine = open_engine(&db_path);
        let authority = engine
            .create_authority("root", Some(ca_years))
            .expect("create authority");
        let domain = engine
            .create_domain(NetworkDomain::new(
                "prod",
                cidr.parse().expect("domain cidr"),
                &authority.id,
            ))
            .expect("create domain");
        Self {
            engine,
            authority,
            domain,
            db_path,
        }
    }

    /// A second engine over the same database file.
    pub fn reopen(&self) -> RegenerationEngine<SqliteStore> {
        open_engine(&self.db_path)
    }
}

impl Drop for Deployment {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.db_path.clone().into_os_string();
            path.push(suffix);
            std::fs::remove_file(path).ok();
        }
    }
}

pub fn open_engine(path: &Path) -> RegenerationEngine<SqliteStore> {
    let store = SqliteStore::open(path).expect("open sqlite store");
    RegenerationEngine::new(store, ProvisionerConfig::default())
}
