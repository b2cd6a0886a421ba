//! Meshforge provisioner CLI
//!
//! Usage:
//!   meshforge-ctl ca init --name root
//!   meshforge-ctl domain create --name prod --cidr 10.128.0.0/16
//!   meshforge-ctl host create --name web-1 --domain prod --groups web
//!   meshforge-ctl host config web-1 -o web-1.yaml

mod cli;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use ipnet::Ipv4Net;
use meshforge_core::{logging, Host, HostSpec, NetworkDomain, ProvisionerConfig, RuleDeclaration};
use meshforge_identity::verify_host_certificate;
use meshforge_mesh::{DomainFilter, HostFilter, RegenerationEngine, SqliteStore, Store};
use tracing::info;

use cli::{CaCommands, Cli, Commands, DomainCommands, HostCommands, RuleArgs};

type Engine = RegenerationEngine<SqliteStore>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_with(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => ProvisionerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProvisionerConfig::default(),
    };
    if let Some(database) = cli.database {
        config.storage.database_path = database;
    }

    let store = SqliteStore::open(&config.storage.database_path)
        .with_context(|| format!("opening {}", config.storage.database_path.display()))?;
    info!(database = %config.storage.database_path.display(), "Store opened");
    let engine = RegenerationEngine::new(store, config);

    match cli.command {
        Commands::Ca(command) => run_ca(&engine, command),
        Commands::Domain(command) => run_domain(&engine, command),
        Commands::Host(command) => run_host(&engine, command),
    }
}

fn run_ca(engine: &Engine, command: CaCommands) -> Result<()> {
    match command {
        CaCommands::Init { name, years } => {
            let authority = engine.create_authority(&name, years)?;
            println!("{}", authority.id);
        }
        CaCommands::Show => {
            let authority = engine
                .store()
                .list_authorities()?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no certificate authority; run `ca init`"))?;
            let material = authority
                .material
                .ok_or_else(|| anyhow!("authority {} has no certificate", authority.name))?;
            println!("# {} expires {}", authority.name, material.expires_at.to_rfc3339());
            print!("{}", material.certificate);
        }
    }
    Ok(())
}

fn run_domain(engine: &Engine, command: DomainCommands) -> Result<()> {
    match command {
        DomainCommands::Create {
            name,
            cidr,
            description,
            rules,
        } => {
            let authority = engine
                .store()
                .list_authorities()?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no certificate authority; run `ca init`"))?;
            let cidr: Ipv4Net = cidr.parse().with_context(|| format!("invalid CIDR {cidr}"))?;
            let mut domain = NetworkDomain::new(name, cidr, authority.id);
            domain.description = description.unwrap_or_default();
            apply_rules(&mut domain.firewall_outbound, &mut domain.firewall_inbound, &rules)?;
            let domain = engine.create_domain(domain)?;
            println!("{}", domain.id);
        }
        DomainCommands::Update {
            name,
            cidr,
            description,
            active,
            rules,
        } => {
            let mut domain = find_domain(engine, &name)?;
            if let Some(cidr) = cidr {
                domain.cidr = cidr.parse().with_context(|| format!("invalid CIDR {cidr}"))?;
            }
            if let Some(description) = description {
                domain.description = description;
            }
            if let Some(active) = active {
                domain.active = active;
            }
            apply_rules(&mut domain.firewall_outbound, &mut domain.firewall_inbound, &rules)?;

            let update = engine.update_domain(domain)?;
            println!(
                "regenerated={} unchanged={} skipped={} failed={}",
                update.report.regenerated.len(),
                update.report.unchanged.len(),
                update.report.skipped.len(),
                update.report.failed.len()
            );
            for (host, reason) in &update.report.failed {
                eprintln!("failed {host}: {reason}");
            }
        }
        DomainCommands::List => {
            for domain in engine.store().list_domains(&DomainFilter::default())? {
                println!(
                    "{}\t{}\t{}\t{}",
                    domain.name,
                    domain.cidr,
                    if domain.active { "active" } else { "inactive" },
                    domain.id
                );
            }
        }
    }
    Ok(())
}

fn run_host(engine: &Engine, command: HostCommands) -> Result<()> {
    match command {
        HostCommands::Create {
            name,
            domain,
            ip,
            groups,
            lighthouse,
            years,
            rules,
        } => {
            let domain = find_domain(engine, &domain)?;
            let years = years.unwrap_or(engine.config().certificates.host_validity_years);
            let mut spec = HostSpec::new(name, domain.id, years).with_groups(groups);
            spec.overlay_ip = ip;
            if let Some(endpoint) = lighthouse {
                spec = spec.as_lighthouse(endpoint);
            }
            apply_rules(&mut spec.firewall_outbound, &mut spec.firewall_inbound, &rules)?;

            let host = engine.create_host(spec)?;
            print_host(&host);
        }
        HostCommands::Update {
            name,
            ip,
            groups,
            lighthouse,
            no_lighthouse,
            years,
            active,
            email,
            verified,
            rules,
        } => {
            let host = find_host(engine, &name)?;
            let mut spec = host.spec.clone();
            if ip.is_some() {
                spec.overlay_ip = ip;
            }
            if let Some(groups) = groups {
                spec = spec.with_groups(groups);
            }
            if let Some(endpoint) = lighthouse {
                spec = spec.as_lighthouse(endpoint);
            }
            if no_lighthouse {
                spec.is_lighthouse = false;
                spec.public_endpoint = None;
            }
            if let Some(years) = years {
                spec.validity_years = years;
            }
            if let Some(active) = active {
                spec.active = active;
            }
            if email.is_some() {
                spec.email = email;
            }
            if let Some(verified) = verified {
                spec.verified = verified;
            }
            apply_rules(&mut spec.firewall_outbound, &mut spec.firewall_inbound, &rules)?;

            let update = engine.update_host(&host.id, spec)?;
            println!(
                "{} state={} written={} propagated={}",
                update.host.spec.hostname,
                update.decision.state,
                update.written,
                update.propagation.regenerated.len()
            );
        }
        HostCommands::List { domain } => {
            let filter = match domain {
                Some(name) => HostFilter::in_domain(find_domain(engine, &name)?.id),
                None => HostFilter::default(),
            };
            for host in engine.store().list_hosts(&filter)? {
                print_host(&host);
            }
        }
        HostCommands::Config { name, output } => {
            let host = find_host(engine, &name)?;
            let config = host
                .config
                .ok_or_else(|| anyhow!("host {name} has no configuration yet"))?;
            match output {
                Some(path) => {
                    std::fs::write(&path, config)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(host = %name, path = %path.display(), "Configuration written");
                }
                None => print!("{config}"),
            }
        }
        HostCommands::Regenerate { name } => {
            let host = find_host(engine, &name)?;
            let written = engine.regenerate_config(&host.id)?;
            println!("{name} written={written}");
        }
        HostCommands::Verify { name } => {
            let host = find_host(engine, &name)?;
            let material = host
                .material
                .ok_or_else(|| anyhow!("host {name} has no certificate"))?;
            let verified =
                verify_host_certificate(&material.certificate, &material.ca_certificate, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&verified)?);
        }
    }
    Ok(())
}

fn find_domain(engine: &Engine, name: &str) -> Result<NetworkDomain> {
    engine
        .store()
        .list_domains(&DomainFilter::named(name))?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no domain named {name}"))
}

fn find_host(engine: &Engine, name: &str) -> Result<Host> {
    engine
        .store()
        .list_hosts(&HostFilter::hostname(name))?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no host named {name}"))
}

fn print_host(host: &Host) {
    let ip = host
        .spec
        .overlay_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "-".to_string());
    let expires = host
        .material
        .as_ref()
        .map(|material| material.expires_at.to_rfc3339())
        .unwrap_or_else(|| "unissued".to_string());
    let groups: Vec<&str> = host.spec.groups.iter().map(String::as_str).collect();
    println!(
        "{}\t{}\t{}\t{}{}",
        host.spec.hostname,
        ip,
        expires,
        groups.join(","),
        if host.spec.is_lighthouse { "\tlighthouse" } else { "" }
    );
}

fn apply_rules(
    outbound: &mut Vec<RuleDeclaration>,
    inbound: &mut Vec<RuleDeclaration>,
    rules: &RuleArgs,
) -> Result<()> {
    if rules.replace_rules {
        outbound.clear();
        inbound.clear();
    }
    for rule in &rules.outbound {
        outbound.push(parse_rule(rule)?);
    }
    for rule in &rules.inbound {
        inbound.push(parse_rule(rule)?);
    }
    Ok(())
}

/// Parse `PORT:PROTO:host=NAME` or `PORT:PROTO:groups=A,B`.
fn parse_rule(value: &str) -> Result<RuleDeclaration> {
    let mut parts = value.splitn(3, ':');
    let (Some(port), Some(proto), Some(target)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("rule {value} is not PORT:PROTO:TARGET");
    };
    match target.split_once('=') {
        Some(("host", host)) => Ok(RuleDeclaration::for_host(port, proto, host)),
        Some(("groups", groups)) => Ok(RuleDeclaration::for_groups(
            port,
            proto,
            groups.split(',').map(str::trim).filter(|g| !g.is_empty()),
        )),
        _ => bail!("rule target {target} must be host=NAME or groups=A,B"),
    }
}
