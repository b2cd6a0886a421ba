//! SQLite-backed [`Store`].
//!
//! Uniqueness is enforced by the schema itself: a singleton column on
//! `authorities`, `UNIQUE(hostname)` and `UNIQUE(domain_id, overlay_ip)` on
//! `hosts`. Constraint failures surface as [`MeshError::Conflict`]. Rule sets
//! and groups are stored as JSON text, timestamps as RFC 3339.

use chrono::{DateTime, Utc};
use meshforge_core::{
    AuthorityMaterial, CertificateAuthority, Curve, Host, HostMaterial, HostSpec, NetworkDomain,
    RuleDeclaration,
};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};
use crate::store::{DomainFilter, HostFilter, Store};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS authorities (
        id TEXT PRIMARY KEY,
        singleton INTEGER NOT NULL DEFAULT 1 UNIQUE CHECK (singleton = 1),
        name TEXT NOT NULL,
        validity_years INTEGER NOT NULL,
        curve TEXT NOT NULL,
        certificate TEXT,
        private_key TEXT,
        expires_at TEXT
    );

    CREATE TABLE IF NOT EXISTS domains (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        cidr TEXT NOT NULL,
        authority_id TEXT NOT NULL REFERENCES authorities(id),
        active INTEGER NOT NULL,
        firewall_outbound TEXT NOT NULL,
        firewall_inbound TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS hosts (
        id TEXT PRIMARY KEY,
        hostname TEXT NOT NULL UNIQUE,
        domain_id TEXT NOT NULL REFERENCES domains(id),
        overlay_ip TEXT,
        groups TEXT NOT NULL,
        is_lighthouse INTEGER NOT NULL,
        public_endpoint TEXT,
        validity_years INTEGER NOT NULL,
        firewall_outbound TEXT NOT NULL,
        firewall_inbound TEXT NOT NULL,
        active INTEGER NOT NULL,
        email TEXT,
        verified INTEGER NOT NULL,
        certificate TEXT,
        private_key TEXT,
        ca_certificate TEXT,
        expires_at TEXT,
        config TEXT,
        UNIQUE (domain_id, overlay_ip)
    );

    CREATE INDEX IF NOT EXISTS idx_domains_authority ON domains(authority_id);
    CREATE INDEX IF NOT EXISTS idx_hosts_domain ON hosts(domain_id);
"#;

const AUTHORITY_COLUMNS: &str =
    "id, name, validity_years, curve, certificate, private_key, expires_at";

const DOMAIN_COLUMNS: &str =
    "id, name, description, cidr, authority_id, active, firewall_outbound, firewall_inbound";

const HOST_COLUMNS: &str = "id, hostname, domain_id, overlay_ip, groups, is_lighthouse, \
     public_endpoint, validity_years, firewall_outbound, firewall_inbound, active, email, \
     verified, certificate, private_key, ca_certificate, expires_at, config";

/// Map constraint violations onto `Conflict`.
fn write_error(err: rusqlite::Error) -> MeshError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            MeshError::Conflict(
                message
                    .clone()
                    .unwrap_or_else(|| "uniqueness constraint violated".to_string()),
            )
        }
        _ => MeshError::Database(err),
    }
}

fn parse_time(value: &str) -> MeshResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MeshError::Storage(format!("bad timestamp '{}': {}", value, e)))
}

fn rules_json(rules: &[RuleDeclaration]) -> MeshResult<String> {
    Ok(serde_json::to_string(rules)?)
}

fn rules_from_json(value: &str) -> MeshResult<Vec<RuleDeclaration>> {
    Ok(serde_json::from_str(value)?)
}

struct AuthorityRow {
    id: String,
    name: String,
    validity_years: u32,
    curve: String,
    certificate: Option<String>,
    private_key: Option<String>,
    expires_at: Option<String>,
}

impl AuthorityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            validity_years: row.get(2)?,
            curve: row.get(3)?,
            certificate: row.get(4)?,
            private_key: row.get(5)?,
            expires_at: row.get(6)?,
        })
    }

    fn into_record(self) -> MeshResult<CertificateAuthority> {
        let curve = Curve::parse(&self.curve)
            .ok_or_else(|| MeshError::Storage(format!("unknown curve '{}'", self.curve)))?;
        let material = match (self.certificate, self.private_key, self.expires_at) {
            (Some(certificate), Some(private_key), Some(expires_at)) => Some(AuthorityMaterial {
                certificate,
                private_key,
                expires_at: parse_time(&expires_at)?,
            }),
            _ => None,
        };
        Ok(CertificateAuthority {
            id: self.id,
            name: self.name,
            validity_years: self.validity_years,
            curve,
            material,
        })
    }
}

struct DomainRow {
    id: String,
    name: String,
    description: String,
    cidr: String,
    authority_id: String,
    active: bool,
    firewall_outbound: String,
    firewall_inbound: String,
}

impl DomainRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            cidr: row.get(3)?,
            authority_id: row.get(4)?,
            active: row.get(5)?,
            firewall_outbound: row.get(6)?,
            firewall_inbound: row.get(7)?,
        })
    }

    fn into_record(self) -> MeshResult<NetworkDomain> {
        Ok(NetworkDomain {
            cidr: self
                .cidr
                .parse()
                .map_err(|_| MeshError::InvalidCidr(self.cidr.clone()))?,
            id: self.id,
            name: self.name,
            description: self.description,
            authority_id: self.authority_id,
            active: self.active,
            firewall_outbound: rules_from_json(&self.firewall_outbound)?,
            firewall_inbound: rules_from_json(&self.firewall_inbound)?,
        })
    }
}

struct HostRow {
    id: String,
    hostname: String,
    domain_id: String,
    overlay_ip: Option<String>,
    groups: String,
    is_lighthouse: bool,
    public_endpoint: Option<String>,
    validity_years: u32,
    firewall_outbound: String,
    firewall_inbound: String,
    active: bool,
    email: Option<String>,
    verified: bool,
    certificate: Option<String>,
    private_key: Option<String>,
    ca_certificate: Option<String>,
    expires_at: Option<String>,
    config: Option<String>,
}

impl HostRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hostname: row.get(1)?,
            domain_id: row.get(2)?,
            overlay_ip: row.get(3)?,
            groups: row.get(4)?,
            is_lighthouse: row.get(5)?,
            public_endpoint: row.get(6)?,
            validity_years: row.get(7)?,
            firewall_outbound: row.get(8)?,
            firewall_inbound: row.get(9)?,
            active: row.get(10)?,
            email: row.get(11)?,
            verified: row.get(12)?,
            certificate: row.get(13)?,
            private_key: row.get(14)?,
            ca_certificate: row.get(15)?,
            expires_at: row.get(16)?,
            config: row.get(17)?,
        })
    }

    fn into_record(self) -> MeshResult<Host> {
        let overlay_ip = self
            .overlay_ip
            .as_deref()
            .map(|ip| {
                ip.parse::<Ipv4Addr>()
                    .map_err(|_| MeshError::InvalidAddress(ip.to_string()))
            })
            .transpose()?;
        let groups: BTreeSet<String> = serde_json::from_str(&self.groups)?;
        let material = match (
            self.certificate,
            self.private_key,
            self.ca_certificate,
            self.expires_at,
        ) {
            (Some(certificate), Some(private_key), Some(ca_certificate), Some(expires_at)) => {
                Some(HostMaterial {
                    certificate,
                    private_key,
                    ca_certificate,
                    expires_at: parse_time(&expires_at)?,
                })
            }
            _ => None,
        };

        Ok(Host {
            id: self.id,
            spec: HostSpec {
                hostname: self.hostname,
                domain_id: self.domain_id,
                overlay_ip,
                groups,
                is_lighthouse: self.is_lighthouse,
                public_endpoint: self.public_endpoint,
                validity_years: self.validity_years,
                firewall_outbound: rules_from_json(&self.firewall_outbound)?,
                firewall_inbound: rules_from_json(&self.firewall_inbound)?,
                active: self.active,
                email: self.email,
                verified: self.verified,
            },
            material,
            config: self.config,
        })
    }
}

/// Store persisted in a single SQLite database file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> MeshResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening record store");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MeshError::Storage(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> MeshResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> MeshResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MeshResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MeshError::Storage("sqlite connection lock poisoned".to_string()))
    }
}

impl Store for SqliteStore {
    fn find_authority(&self, id: &str) -> MeshResult<Option<CertificateAuthority>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM authorities WHERE id = ?1", AUTHORITY_COLUMNS),
                [id],
                AuthorityRow::read,
            )
            .optional()?;
        row.map(AuthorityRow::into_record).transpose()
    }

    fn save_authority(&self, authority: &CertificateAuthority) -> MeshResult<()> {
        let material = authority.material.as_ref();
        self.conn()?
            .execute(
                r#"
                INSERT INTO authorities (
                    id, name, validity_years, curve, certificate, private_key, expires_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    validity_years = excluded.validity_years,
                    curve = excluded.curve,
                    certificate = excluded.certificate,
                    private_key = excluded.private_key,
                    expires_at = excluded.expires_at
                "#,
                params![
                    authority.id,
                    authority.name,
                    authority.validity_years,
                    authority.curve.as_str(),
                    material.map(|m| m.certificate.as_str()),
                    material.map(|m| m.private_key.as_str()),
                    material.map(|m| m.expires_at.to_rfc3339()),
                ],
            )
            .map_err(write_error)?;
        debug!(authority = %authority.id, "Saved authority");
        Ok(())
    }

    fn list_authorities(&self) -> MeshResult<Vec<CertificateAuthority>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM authorities ORDER BY name",
            AUTHORITY_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], AuthorityRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(AuthorityRow::into_record).collect()
    }

    fn find_domain(&self, id: &str) -> MeshResult<Option<NetworkDomain>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM domains WHERE id = ?1", DOMAIN_COLUMNS),
                [id],
                DomainRow::read,
            )
            .optional()?;
        row.map(DomainRow::into_record).transpose()
    }

    fn save_domain(&self, domain: &NetworkDomain) -> MeshResult<()> {
        self.conn()?
            .execute(
                r#"
                INSERT INTO domains (
                    id, name, description, cidr, authority_id, active,
                    firewall_outbound, firewall_inbound
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    cidr = excluded.cidr,
                    authority_id = excluded.authority_id,
                    active = excluded.active,
                    firewall_outbound = excluded.firewall_outbound,
                    firewall_inbound = excluded.firewall_inbound
                "#,
                params![
                    domain.id,
                    domain.name,
                    domain.description,
                    domain.cidr.to_string(),
                    domain.authority_id,
                    domain.active,
                    rules_json(&domain.firewall_outbound)?,
                    rules_json(&domain.firewall_inbound)?,
                ],
            )
            .map_err(write_error)?;
        debug!(domain = %domain.id, "Saved domain");
        Ok(())
    }

    fn list_domains(&self, filter: &DomainFilter) -> MeshResult<Vec<NetworkDomain>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM domains
             WHERE (?1 IS NULL OR authority_id = ?1)
               AND (?2 IS NULL OR name = ?2)
               AND (?3 IS NULL OR active = ?3)
             ORDER BY name",
            DOMAIN_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![filter.authority_id, filter.name, filter.active],
                DomainRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(DomainRow::into_record).collect()
    }

    fn find_host(&self, id: &str) -> MeshResult<Option<Host>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM hosts WHERE id = ?1", HOST_COLUMNS),
                [id],
                HostRow::read,
            )
            .optional()?;
        row.map(HostRow::into_record).transpose()
    }

    fn save_host(&self, host: &Host) -> MeshResult<()> {
        let spec = &host.spec;
        let material = host.material.as_ref();
        self.conn()?
            .execute(
                r#"
                INSERT INTO hosts (
                    id, hostname, domain_id, overlay_ip, groups, is_lighthouse,
                    public_endpoint, validity_years, firewall_outbound, firewall_inbound,
                    active, email, verified, certificate, private_key, ca_certificate,
                    expires_at, config
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
                )
                ON CONFLICT(id) DO UPDATE SET
                    hostname = excluded.hostname,
                    domain_id = excluded.domain_id,
                    overlay_ip = excluded.overlay_ip,
                    groups = excluded.groups,
                    is_lighthouse = excluded.is_lighthouse,
                    public_endpoint = excluded.public_endpoint,
                    validity_years = excluded.validity_years,
                    firewall_outbound = excluded.firewall_outbound,
                    firewall_inbound = excluded.firewall_inbound,
                    active = excluded.active,
                    email = excluded.email,
                    verified = excluded.verified,
                    certificate = excluded.certificate,
                    private_key = excluded.private_key,
                    ca_certificate = excluded.ca_certificate,
                    expires_at = excluded.expires_at,
                    config = excluded.config
                "#,
                params![
                    host.id,
                    spec.hostname,
                    spec.domain_id,
                    spec.overlay_ip.map(|ip| ip.to_string()),
                    serde_json::to_string(&spec.groups)?,
                    spec.is_lighthouse,
                    spec.public_endpoint,
                    spec.validity_years,
                    rules_json(&spec.firewall_outbound)?,
                    rules_json(&spec.firewall_inbound)?,
                    spec.active,
                    spec.email,
                    spec.verified,
                    material.map(|m| m.certificate.as_str()),
                    material.map(|m| m.private_key.as_str()),
                    material.map(|m| m.ca_certificate.as_str()),
                    material.map(|m| m.expires_at.to_rfc3339()),
                    host.config,
                ],
            )
            .map_err(write_error)?;
        debug!(host = %spec.hostname, "Saved host");
        Ok(())
    }

    fn list_hosts(&self, filter: &HostFilter) -> MeshResult<Vec<Host>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM hosts
             WHERE (?1 IS NULL OR domain_id = ?1)
               AND (?2 IS NULL OR hostname = ?2)
               AND (?3 IS NULL OR active = ?3)
               AND (?4 IS NULL OR is_lighthouse = ?4)
             ORDER BY hostname",
            HOST_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![
                    filter.domain_id,
                    filter.hostname,
                    filter.active,
                    filter.lighthouse
                ],
                HostRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(HostRow::into_record).collect()
    }
}
