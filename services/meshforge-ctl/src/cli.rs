//! Command line structure.

use clap::{Args, Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Meshforge - certificate and configuration provisioner for mesh VPNs
#[derive(Parser)]
#[command(name = "meshforge-ctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Provisioner configuration file (TOML)
    #[arg(short, long, global = true, env = "MESHFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Record database, overrides `storage.database_path`
    #[arg(short, long, global = true, env = "MESHFORGE_DATABASE")]
    pub database: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "MESHFORGE_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Certificate authority
    #[command(subcommand)]
    Ca(CaCommands),

    /// Network domains
    #[command(subcommand)]
    Domain(DomainCommands),

    /// Hosts
    #[command(subcommand)]
    Host(HostCommands),
}

#[derive(Subcommand)]
pub enum CaCommands {
    /// Create and issue the deployment's authority
    Init {
        #[arg(long)]
        name: String,
        /// Validity in years, defaults to `certificates.ca_validity_years`
        #[arg(long)]
        years: Option<u32>,
    },
    /// Print the authority certificate
    Show,
}

/// Firewall rules as `PORT:PROTO:host=NAME` or `PORT:PROTO:groups=A,B`.
#[derive(Args, Default)]
pub struct RuleArgs {
    /// Outbound rule, repeatable
    #[arg(long = "outbound")]
    pub outbound: Vec<String>,
    /// Inbound rule, repeatable
    #[arg(long = "inbound")]
    pub inbound: Vec<String>,
    /// Drop existing rules before applying the given ones
    #[arg(long)]
    pub replace_rules: bool,
}

#[derive(Subcommand)]
pub enum DomainCommands {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        cidr: String,
        #[arg(long)]
        description: Option<String>,
        #[command(flatten)]
        rules: RuleArgs,
    },
    Update {
        name: String,
        #[arg(long)]
        cidr: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[command(flatten)]
        rules: RuleArgs,
    },
    List,
}

#[derive(Subcommand)]
pub enum HostCommands {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        domain: String,
        /// Overlay address, allocated when omitted
        #[arg(long)]
        ip: Option<Ipv4Addr>,
        #[arg(long, value_delimiter = ',')]
        groups: Vec<String>,
        /// Serve as lighthouse reachable at HOST:PORT
        #[arg(long, value_name = "ENDPOINT")]
        lighthouse: Option<String>,
        /// Validity in years, defaults to `certificates.host_validity_years`
        #[arg(long)]
        years: Option<u32>,
        #[command(flatten)]
        rules: RuleArgs,
    },
    Update {
        name: String,
        #[arg(long)]
        ip: Option<Ipv4Addr>,
        /// Replace the group set
        #[arg(long, value_delimiter = ',')]
        groups: Option<Vec<String>>,
        #[arg(long, value_name = "ENDPOINT", conflicts_with = "no_lighthouse")]
        lighthouse: Option<String>,
        #[arg(long)]
        no_lighthouse: bool,
        #[arg(long)]
        years: Option<u32>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        verified: Option<bool>,
        #[command(flatten)]
        rules: RuleArgs,
    },
    List {
        #[arg(long)]
        domain: Option<String>,
    },
    /// Print or write a host's configuration document
    Config {
        name: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Re-render a host's configuration document
    Regenerate { name: String },
    /// Check a host's certificate against the authority
    Verify { name: String },
}
