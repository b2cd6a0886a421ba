//! Lighthouse discovery and propagation.

use meshforge_core::HostSpec;
use meshforge_mesh::{HostState, Store};
use std::net::Ipv4Addr;

use crate::test_utils::Deployment;

fn static_map_entry(config: &str, ip: &str) -> Option<String> {
    let doc: serde_yaml::Value = serde_yaml::from_str(config).ok()?;
    doc["static_host_map"][ip][0].as_str().map(str::to_string)
}

#[test]
fn test_lighthouse_discovery_and_propagation() {
    let deployment = Deployment::new("lighthouse", "10.128.0.0/16", 10);
    let engine = &deployment.engine;
    let domain_id = deployment.domain.id.clone();

    let lighthouse = engine
        .create_host(
            HostSpec::new("lh-1", &domain_id, 1)
                .with_overlay_ip(Ipv4Addr::new(10, 128, 0, 1))
                .as_lighthouse("198.51.100.1:4242"),
        )
        .unwrap();
    let lh_doc: serde_yaml::Value =
        serde_yaml::from_str(lighthouse.config.as_deref().unwrap()).unwrap();
    assert_eq!(lh_doc["lighthouse"]["am_lighthouse"], true);
    assert_eq!(lh_doc["listen"]["port"], 4242);

    let peer = engine
        .create_host(HostSpec::new("web-1", &domain_id, 1))
        .unwrap();
    assert_eq!(peer.spec.overlay_ip, Some(Ipv4Addr::new(10, 128, 0, 2)));
    assert_eq!(
        static_map_entry(peer.config.as_deref().unwrap(), "10.128.0.1").as_deref(),
        Some("198.51.100.1:4242")
    );

    let moved = lighthouse.spec.clone().as_lighthouse("203.0.113.7:4242");
    let update = engine.update_host(&lighthouse.id, moved).unwrap();
    assert_eq!(update.decision.state, HostState::NeedsConfigRegeneration);
    assert_eq!(update.propagation.regenerated, vec![peer.id.clone()]);
    assert_eq!(update.host.material, lighthouse.material);

    let peer_now = engine.store().find_host(&peer.id).unwrap().unwrap();
    assert_eq!(peer_now.material, peer.material);
    assert_eq!(
        static_map_entry(peer_now.config.as_deref().unwrap(), "10.128.0.1").as_deref(),
        Some("203.0.113.7:4242")
    );
}

#[test]
fn test_retired_lighthouse_leaves_peer_configs() {
    let deployment = Deployment::new("retire", "10.128.0.0/16", 10);
    let engine = &deployment.engine;
    let domain_id = deployment.domain.id.clone();

    let lighthouse = engine
        .create_host(
            HostSpec::new("lh-1", &domain_id, 1)
                .with_overlay_ip(Ipv4Addr::new(10, 128, 0, 1))
                .as_lighthouse("198.51.100.1:4242"),
        )
        .unwrap();
    let peer = engine
        .create_host(HostSpec::new("web-1", &domain_id, 1))
        .unwrap();

    let mut retired = lighthouse.spec.clone();
    retired.active = false;
    let update = engine.update_host(&lighthouse.id, retired).unwrap();
    assert_eq!(update.decision.state, HostState::Stable);
    assert_eq!(update.propagation.regenerated, vec![peer.id.clone()]);

    let peer_now = engine.store().find_host(&peer.id).unwrap().unwrap();
    assert_eq!(
        static_map_entry(peer_now.config.as_deref().unwrap(), "10.128.0.1"),
        None
    );
}
