//! Provisioning flow over the SQLite store.

use chrono::{Duration, Utc};
use meshforge_core::{HostSpec, RuleDeclaration};
use meshforge_crypto::pem::parse_certificate;
use meshforge_identity::{add_years, verify_host_certificate};
use meshforge_mesh::{validate_host_ip, ErrorKind, HostFilter, HostState, Store};
use std::net::Ipv4Addr;

use crate::test_utils::Deployment;

#[test]
fn test_end_to_end_host_provisioning() {
    let deployment = Deployment::new("e2e", "10.128.0.0/16", 10);
    let authority_material = deployment.authority.material.clone().expect("issued authority");

    let before = Utc::now();
    let host = deployment
        .engine
        .create_host(
            HostSpec::new("web-1", &deployment.domain.id, 1)
                .with_overlay_ip(Ipv4Addr::new(10, 128, 0, 100))
                .with_groups(["web", "prod"]),
        )
        .expect("create host");
    let after = Utc::now();

    let material = host.material.clone().expect("host material");
    let earliest = add_years(before, 1).unwrap() - Duration::seconds(1);
    let latest = add_years(after, 1).unwrap();
    assert!(material.expires_at >= earliest && material.expires_at <= latest);
    assert!(material.expires_at < authority_material.expires_at);
    assert_eq!(material.ca_certificate, authority_material.certificate);

    let verified = verify_host_certificate(&material.certificate, &material.ca_certificate, Utc::now())
        .expect("certificate verifies");
    assert_eq!(verified.name, "web-1");
    let networks: Vec<String> = verified.networks.iter().map(ToString::to_string).collect();
    assert_eq!(networks, vec!["10.128.0.100/32"]);
    assert_eq!(verified.groups, vec!["prod", "web"]);
    let ca_cert = parse_certificate(&authority_material.certificate).unwrap();
    assert_eq!(verified.issuer, ca_cert.fingerprint().unwrap());

    let doc: serde_yaml::Value =
        serde_yaml::from_str(host.config.as_deref().expect("config")).unwrap();
    assert_eq!(doc["pki"]["ca"].as_str(), Some(authority_material.certificate.as_str()));
    assert_eq!(doc["pki"]["cert"].as_str(), Some(material.certificate.as_str()));
    assert_eq!(doc["lighthouse"]["am_lighthouse"], false);
}

#[test]
fn test_host_address_validation() {
    let deployment = Deployment::new("addr", "10.128.0.0/16", 10);
    let cidr = deployment.domain.cidr;

    assert_eq!(
        validate_host_ip("10.128.0.100", &cidr).unwrap(),
        Ipv4Addr::new(10, 128, 0, 100)
    );
    assert_eq!(
        validate_host_ip("10.1.0.5", &cidr).unwrap_err().kind(),
        ErrorKind::Validation
    );

    let err = deployment
        .engine
        .create_host(
            HostSpec::new("stray", &deployment.domain.id, 1)
                .with_overlay_ip(Ipv4Addr::new(10, 1, 0, 5)),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(deployment
        .engine
        .store()
        .list_hosts(&HostFilter::hostname("stray"))
        .unwrap()
        .is_empty());
}

#[test]
fn test_host_validity_capped_by_authority() {
    let deployment = Deployment::new("cap", "10.128.0.0/16", 1);
    let ca_expiry = deployment.authority.material.as_ref().unwrap().expires_at;

    let host = deployment
        .engine
        .create_host(HostSpec::new("long-lived", &deployment.domain.id, 5))
        .unwrap();
    assert_eq!(host.material.unwrap().expires_at, ca_expiry);
}

#[test]
fn test_allocation_until_exhausted() {
    let deployment = Deployment::new("alloc", "10.200.0.0/30", 10);
    let engine = &deployment.engine;
    let domain_id = deployment.domain.id.clone();

    let first = engine.create_host(HostSpec::new("a", &domain_id, 1)).unwrap();
    let second = engine.create_host(HostSpec::new("b", &domain_id, 1)).unwrap();
    assert_eq!(first.spec.overlay_ip, Some(Ipv4Addr::new(10, 200, 0, 1)));
    assert_eq!(second.spec.overlay_ip, Some(Ipv4Addr::new(10, 200, 0, 2)));

    let err = engine.create_host(HostSpec::new("c", &domain_id, 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exhaustion);
}

#[test]
fn test_replay_after_reopen_is_stable() {
    let deployment = Deployment::new("reopen", "10.128.0.0/16", 10);
    let host = deployment
        .engine
        .create_host(HostSpec::new("web-1", &deployment.domain.id, 1).with_groups(["web"]))
        .unwrap();

    let engine = deployment.reopen();
    let stored = engine.store().find_host(&host.id).unwrap().expect("stored host");
    assert_eq!(stored, host);

    let replay = engine.update_host(&host.id, stored.spec.clone()).unwrap();
    assert_eq!(replay.decision.state, HostState::Stable);
    assert!(!replay.written);
    assert!(!engine.regenerate_config(&host.id).unwrap());
}

#[test]
fn test_update_paths_through_store() {
    let deployment = Deployment::new("update", "10.128.0.0/16", 10);
    let engine = &deployment.engine;
    let host = engine
        .create_host(HostSpec::new("db-1", &deployment.domain.id, 1).with_groups(["db"]))
        .unwrap();
    let original = host.material.clone().unwrap();

    let mut spec = host.spec.clone();
    spec.firewall_inbound = vec![RuleDeclaration::for_groups("5432", "tcp", ["web"])];
    let update = engine.update_host(&host.id, spec).unwrap();
    assert_eq!(update.decision.state, HostState::NeedsConfigRegeneration);
    assert_eq!(update.host.material.as_ref(), Some(&original));

    let spec = update.host.spec.clone().with_groups(["db", "primary"]);
    let update = engine.update_host(&host.id, spec).unwrap();
    assert_eq!(update.decision.state, HostState::NeedsCertRegeneration);
    let reissued = update.host.material.clone().unwrap();
    assert_ne!(reissued.certificate, original.certificate);
    assert_ne!(reissued.private_key, original.private_key);

    let stored = engine.store().find_host(&host.id).unwrap().unwrap();
    assert_eq!(stored, update.host);
}

#[test]
fn test_domain_update_fans_out() {
    let mut deployment = Deployment::new("fanout", "10.128.0.0/16", 10);
    let engine = &deployment.engine;
    let domain_id = deployment.domain.id.clone();
    let a = engine.create_host(HostSpec::new("a", &domain_id, 1)).unwrap();
    let b = engine.create_host(HostSpec::new("b", &domain_id, 1)).unwrap();
    let mut idle = HostSpec::new("idle", &domain_id, 1);
    idle.active = false;
    engine.create_host(idle).unwrap();

    deployment.domain.firewall_inbound = vec![RuleDeclaration::for_host("22", "tcp", "any")];
    let update = deployment
        .engine
        .update_domain(deployment.domain.clone())
        .unwrap();
    assert!(update.written);
    assert_eq!(update.report.regenerated, vec![a.id.clone(), b.id.clone()]);
    assert!(update.report.failed.is_empty());

    for host in [a, b] {
        let stored = deployment.engine.store().find_host(&host.id).unwrap().unwrap();
        assert_eq!(stored.material, host.material);
        let doc: serde_yaml::Value = serde_yaml::from_str(stored.config.as_deref().unwrap()).unwrap();
        assert_eq!(doc["firewall"]["inbound"][0]["port"], "22");
    }
}
