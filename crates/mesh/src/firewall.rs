//! Firewall rule compiler.
//!
//! Operators declare rules as `{port, proto, host?, groups?}`. The compiler
//! checks each declaration and turns it into a typed [`FirewallRule`] whose
//! target is either a host specifier or a non-empty group set, never both.
//! Empty rule lists fall back to the built-in defaults: allow all outbound,
//! allow ICMP inbound from anywhere.

use meshforge_core::RuleDeclaration;
use serde::Serialize;
use std::fmt;

use crate::error::{MeshError, MeshResult};

/// Port match of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Any,
    Single(u16),
    /// Inclusive range, `start <= end`.
    Range(u16, u16),
}

impl PortSpec {
    /// Accepts `any`, a port, or an inclusive `start-end` range.
    ///
    /// A bare `0` is read as `any`; zero is rejected inside ranges.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("any") || value == "0" {
            return Ok(PortSpec::Any);
        }
        if let Some((start, end)) = value.split_once('-') {
            let start = parse_port(start)?;
            let end = parse_port(end)?;
            if start > end {
                return Err(format!("port range {} is reversed", value));
            }
            return Ok(PortSpec::Range(start, end));
        }
        parse_port(value).map(PortSpec::Single)
    }
}

fn parse_port(value: &str) -> Result<u16, String> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port '{}'", value)),
        Ok(port) => Ok(port),
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Any => f.write_str("any"),
            PortSpec::Single(port) => write!(f, "{}", port),
            PortSpec::Range(start, end) => write!(f, "{}-{}", start, end),
        }
    }
}

/// Protocol match of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Protocol::Any),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            _ => Err(format!("unknown protocol '{}'", value)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Any => "any",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

/// Who a rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    /// A hostname, or `any`.
    Host(String),
    /// Peers carrying every listed group.
    Groups(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub port: PortSpec,
    pub proto: Protocol,
    pub target: RuleTarget,
}

impl FirewallRule {
    pub fn allow_all() -> Self {
        Self {
            port: PortSpec::Any,
            proto: Protocol::Any,
            target: RuleTarget::Host("any".to_string()),
        }
    }

    pub fn allow_icmp() -> Self {
        Self {
            port: PortSpec::Any,
            proto: Protocol::Icmp,
            target: RuleTarget::Host("any".to_string()),
        }
    }

    /// Check a declaration and build the typed rule.
    pub fn from_declaration(decl: &RuleDeclaration) -> Result<Self, String> {
        let port = PortSpec::parse(&decl.port)?;
        let proto = Protocol::parse(&decl.proto)?;

        let target = match (&decl.host, &decl.groups) {
            (Some(_), Some(_)) => return Err("rule sets both host and groups".to_string()),
            (None, None) => return Err("rule needs a host or groups".to_string()),
            (Some(host), None) => {
                let host = host.trim();
                if host.is_empty() {
                    return Err("host must not be empty".to_string());
                }
                RuleTarget::Host(host.to_string())
            }
            (None, Some(groups)) => {
                let groups: Vec<String> = groups
                    .iter()
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect();
                if groups.is_empty() {
                    return Err("groups must not be empty".to_string());
                }
                RuleTarget::Groups(groups)
            }
        };

        Ok(Self {
            port,
            proto,
            target,
        })
    }

    /// Wire form written into the configuration document.
    pub fn to_wire(&self) -> RuleDeclaration {
        let port = self.port.to_string();
        let proto = self.proto.as_str();
        match &self.target {
            RuleTarget::Host(host) => RuleDeclaration::for_host(port, proto, host.clone()),
            RuleTarget::Groups(groups) => {
                RuleDeclaration::for_groups(port, proto, groups.iter().cloned())
            }
        }
    }
}

/// Both rule directions of a host, defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFirewall {
    pub outbound: Vec<FirewallRule>,
    pub inbound: Vec<FirewallRule>,
}

/// `firewall` section of the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireFirewall {
    pub outbound: Vec<RuleDeclaration>,
    pub inbound: Vec<RuleDeclaration>,
}

impl CompiledFirewall {
    pub fn to_wire(&self) -> WireFirewall {
        WireFirewall {
            outbound: self.outbound.iter().map(FirewallRule::to_wire).collect(),
            inbound: self.inbound.iter().map(FirewallRule::to_wire).collect(),
        }
    }
}

fn compile_direction(
    direction: &'static str,
    rules: &[RuleDeclaration],
    default: fn() -> FirewallRule,
) -> MeshResult<Vec<FirewallRule>> {
    if rules.is_empty() {
        return Ok(vec![default()]);
    }
    rules
        .iter()
        .enumerate()
        .map(|(index, decl)| {
            FirewallRule::from_declaration(decl).map_err(|reason| {
                MeshError::InvalidFirewallRule {
                    direction,
                    index,
                    reason,
                }
            })
        })
        .collect()
}

/// Compile outbound and inbound declarations.
pub fn compile(
    outbound: &[RuleDeclaration],
    inbound: &[RuleDeclaration],
) -> MeshResult<CompiledFirewall> {
    Ok(CompiledFirewall {
        outbound: compile_direction("outbound", outbound, FirewallRule::allow_all)?,
        inbound: compile_direction("inbound", inbound, FirewallRule::allow_icmp)?,
    })
}

/// Host rules when declared, else the domain's defaults.
pub fn effective_rules<'a>(
    host_rules: &'a [RuleDeclaration],
    domain_rules: &'a [RuleDeclaration],
) -> &'a [RuleDeclaration] {
    if host_rules.is_empty() {
        domain_rules
    } else {
        host_rules
    }
}
