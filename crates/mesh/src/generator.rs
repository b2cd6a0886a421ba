//! Host configuration document generator.
//!
//! Assembles the YAML document a mesh node boots from: PKI material,
//! lighthouse discovery data, listener, hole punching, tunnel device,
//! node logging and the compiled firewall. Section order is fixed and
//! lighthouse entries are sorted, so identical inputs always render
//! byte-identical documents.

use meshforge_core::{
    Host, HostMaterial, LighthouseInfo, NetworkDomain, NodeLoggingDefaults, ProvisionerConfig,
    PunchyDefaults, TunnelDefaults,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::error::{MeshError, MeshResult};
use crate::firewall::{compile, effective_rules, WireFirewall};

const LISTEN_HOST: &str = "0.0.0.0";

#[derive(Serialize)]
struct NodeConfig<'a> {
    pki: Pki<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    static_host_map: Option<BTreeMap<Ipv4Addr, Vec<&'a str>>>,
    lighthouse: LighthouseSection,
    listen: Listen,
    punchy: &'a PunchyDefaults,
    tun: &'a TunnelDefaults,
    logging: &'a NodeLoggingDefaults,
    firewall: WireFirewall,
}

#[derive(Serialize)]
struct Pki<'a> {
    ca: &'a str,
    cert: &'a str,
    key: &'a str,
}

#[derive(Serialize)]
struct LighthouseSection {
    am_lighthouse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hosts: Option<Vec<Ipv4Addr>>,
}

#[derive(Serialize)]
struct Listen {
    host: &'static str,
    port: u16,
}

/// Split `host:port` on the last colon.
pub fn parse_endpoint(endpoint: &str) -> MeshResult<(&str, u16)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| MeshError::InvalidEndpoint(endpoint.to_string()))?;
    if host.is_empty() {
        return Err(MeshError::InvalidEndpoint(endpoint.to_string()));
    }
    let port = port
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| MeshError::InvalidEndpoint(endpoint.to_string()))?;
    Ok((host, port))
}

/// Renders host configuration documents from deployment defaults.
#[derive(Debug, Clone)]
pub struct ConfigGenerator {
    tunnel: TunnelDefaults,
    logging: NodeLoggingDefaults,
    punchy: PunchyDefaults,
    lighthouse_interval: u32,
}

impl Default for ConfigGenerator {
    fn default() -> Self {
        Self::new(&ProvisionerConfig::default())
    }
}

impl ConfigGenerator {
    pub fn new(config: &ProvisionerConfig) -> Self {
        Self {
            tunnel: config.tunnel.clone(),
            logging: config.node_logging.clone(),
            punchy: config.punchy.clone(),
            lighthouse_interval: config.lighthouse.interval_secs,
        }
    }

    /// Render the configuration document of `host`.
    ///
    /// `lighthouses` is the discovery set of the host's domain; the host's
    /// own entry, if present, is ignored.
    pub fn generate(
        &self,
        host: &Host,
        material: &HostMaterial,
        domain: &NetworkDomain,
        lighthouses: &[LighthouseInfo],
    ) -> MeshResult<String> {
        let spec = &host.spec;
        let firewall = compile(
            effective_rules(&spec.firewall_outbound, &domain.firewall_outbound),
            effective_rules(&spec.firewall_inbound, &domain.firewall_inbound),
        )?;

        let own_ip = spec.overlay_ip;
        let peers: Vec<&LighthouseInfo> = lighthouses
            .iter()
            .filter(|lh| Some(lh.overlay_ip) != own_ip)
            .collect();

        let (static_host_map, lighthouse, port) = if spec.is_lighthouse {
            let endpoint = spec.public_endpoint.as_deref().ok_or_else(|| {
                MeshError::Validation(format!("lighthouse {} has no public endpoint", spec.hostname))
            })?;
            let (_, port) = parse_endpoint(endpoint)?;
            let section = LighthouseSection {
                am_lighthouse: true,
                interval: None,
                hosts: None,
            };
            (None, section, port)
        } else {
            let mut map: BTreeMap<Ipv4Addr, Vec<&str>> = BTreeMap::new();
            for lh in &peers {
                let endpoints = map.entry(lh.overlay_ip).or_default();
                endpoints.push(lh.public_endpoint.as_str());
                endpoints.sort_unstable();
                endpoints.dedup();
            }
            let section = LighthouseSection {
                am_lighthouse: false,
                interval: Some(self.lighthouse_interval),
                hosts: Some(map.keys().copied().collect()),
            };
            (Some(map), section, 0)
        };

        let document = NodeConfig {
            pki: Pki {
                ca: &material.ca_certificate,
                cert: &material.certificate,
                key: &material.private_key,
            },
            static_host_map,
            lighthouse,
            listen: Listen {
                host: LISTEN_HOST,
                port,
            },
            punchy: &self.punchy,
            tun: &self.tunnel,
            logging: &self.logging,
            firewall: firewall.to_wire(),
        };

        Ok(serde_yaml::to_string(&document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meshforge_core::{HostSpec, RuleDeclaration};

    fn domain() -> NetworkDomain {
        NetworkDomain::new("prod", "10.128.0.0/16".parse().unwrap(), "ca")
    }

    fn material() -> HostMaterial {
        HostMaterial {
            certificate: "HOST CERT".to_string(),
            private_key: "HOST KEY".to_string(),
            ca_certificate: "CA CERT".to_string(),
            expires_at: Utc::now(),
        }
    }

    fn lighthouses() -> Vec<LighthouseInfo> {
        vec![
            LighthouseInfo {
                overlay_ip: Ipv4Addr::new(10, 128, 0, 2),
                public_endpoint: "198.51.100.2:4242".to_string(),
            },
            LighthouseInfo {
                overlay_ip: Ipv4Addr::new(10, 128, 0, 1),
                public_endpoint: "198.51.100.1:4242".to_string(),
            },
        ]
    }

    fn regular_host() -> Host {
        Host::new(
            HostSpec::new("web-1", "domain", 1).with_overlay_ip(Ipv4Addr::new(10, 128, 0, 100)),
        )
    }

    fn render(host: &Host, domain: &NetworkDomain) -> serde_yaml::Value {
        let yaml = ConfigGenerator::default()
            .generate(host, &material(), domain, &lighthouses())
            .unwrap();
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn test_section_order() {
        let yaml = ConfigGenerator::default()
            .generate(&regular_host(), &material(), &domain(), &lighthouses())
            .unwrap();
        let sections: Vec<&str> = yaml
            .lines()
            .filter(|line| !line.starts_with(' ') && !line.starts_with('-') && line.contains(':'))
            .map(|line| line.split(':').next().unwrap_or_default())
            .collect();
        assert_eq!(
            sections,
            vec![
                "pki",
                "static_host_map",
                "lighthouse",
                "listen",
                "punchy",
                "tun",
                "logging",
                "firewall"
            ]
        );
    }

    #[test]
    fn test_regular_host_discovers_lighthouses() {
        let doc = render(&regular_host(), &domain());

        assert_eq!(doc["pki"]["ca"], "CA CERT");
        assert_eq!(doc["pki"]["key"], "HOST KEY");
        assert_eq!(doc["static_host_map"]["10.128.0.1"][0], "198.51.100.1:4242");
        assert_eq!(doc["lighthouse"]["am_lighthouse"], false);
        assert_eq!(doc["lighthouse"]["interval"], 60);
        assert_eq!(doc["lighthouse"]["hosts"][0], "10.128.0.1");
        assert_eq!(doc["lighthouse"]["hosts"][1], "10.128.0.2");
        assert_eq!(doc["listen"]["host"], "0.0.0.0");
        assert_eq!(doc["listen"]["port"], 0);
        assert_eq!(doc["tun"]["mtu"], 1300);
        assert_eq!(doc["tun"]["tx_queue"], 500);
        assert_eq!(doc["logging"]["level"], "info");
        assert_eq!(doc["firewall"]["outbound"][0]["proto"], "any");
        assert_eq!(doc["firewall"]["inbound"][0]["proto"], "icmp");
    }

    #[test]
    fn test_lighthouse_listens_on_public_port() {
        let host = Host::new(
            HostSpec::new("lh-1", "domain", 1)
                .with_overlay_ip(Ipv4Addr::new(10, 128, 0, 1))
                .as_lighthouse("198.51.100.1:4242"),
        );
        let doc = render(&host, &domain());

        assert_eq!(doc["lighthouse"]["am_lighthouse"], true);
        assert!(doc["lighthouse"].get("hosts").is_none());
        assert!(doc.get("static_host_map").is_none());
        assert_eq!(doc["listen"]["port"], 4242);
    }

    #[test]
    fn test_lighthouse_document_omits_static_host_map() {
        let host = Host::new(
            HostSpec::new("lh-1", "domain", 1)
                .with_overlay_ip(Ipv4Addr::new(10, 128, 0, 1))
                .as_lighthouse("198.51.100.1:4242"),
        );
        let yaml = ConfigGenerator::default()
            .generate(&host, &material(), &domain(), &lighthouses())
            .unwrap();
        assert!(!yaml.contains("static_host_map"));
        assert!(yaml.starts_with("pki:"));

        let yaml = ConfigGenerator::default()
            .generate(&regular_host(), &material(), &domain(), &[])
            .unwrap();
        assert!(yaml.contains("static_host_map: {}"));
    }

    #[test]
    fn test_domain_rules_apply_when_host_declares_none() {
        let mut domain = domain();
        domain.firewall_inbound = vec![RuleDeclaration::for_groups("443", "tcp", ["web"])];
        let doc = render(&regular_host(), &domain);
        assert_eq!(doc["firewall"]["inbound"][0]["port"], "443");
        assert_eq!(doc["firewall"]["inbound"][0]["groups"][0], "web");

        let mut host = regular_host();
        host.spec.firewall_inbound = vec![RuleDeclaration::for_host("22", "tcp", "any")];
        let doc = render(&host, &domain);
        assert_eq!(doc["firewall"]["inbound"][0]["port"], "22");
    }

    #[test]
    fn test_output_is_deterministic() {
        let generator = ConfigGenerator::default();
        let mut reversed = lighthouses();
        reversed.reverse();
        let a = generator
            .generate(&regular_host(), &material(), &domain(), &lighthouses())
            .unwrap();
        let b = generator
            .generate(&regular_host(), &material(), &domain(), &reversed)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(parse_endpoint("203.0.113.7:4242").unwrap(), ("203.0.113.7", 4242));
        assert_eq!(parse_endpoint("lh.example.com:4242").unwrap().1, 4242);
        assert!(parse_endpoint("203.0.113.7").is_err());
        assert!(parse_endpoint(":4242").is_err());
        assert!(parse_endpoint("203.0.113.7:0").is_err());
    }
}
