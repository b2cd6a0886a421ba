//! Overlay address allocation.
//!
//! Allocation is a pure function of a CIDR and the addresses already in use:
//! the first free host address wins. The network and broadcast addresses are
//! never handed out, so /31 and /32 pools have no usable addresses at all.
//!
//! Uniqueness across concurrent writers is the store's job; the allocator
//! only promises a deterministic answer for a given input.

use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{MeshError, MeshResult};

fn parse_ipv4_net(cidr: &str) -> MeshResult<Ipv4Net> {
    let net: IpNet = cidr
        .trim()
        .parse()
        .map_err(|_| MeshError::InvalidCidr(cidr.to_string()))?;
    match net {
        IpNet::V4(net) => Ok(net),
        IpNet::V6(_) => Err(MeshError::UnsupportedFamily(cidr.to_string())),
    }
}

/// Collect the address part of each used entry. Entries may be bare
/// (`10.0.0.5`) or CIDR annotated (`10.0.0.5/32`); anything else is ignored.
pub fn parse_used<S: AsRef<str>>(used: &[S]) -> HashSet<Ipv4Addr> {
    used.iter()
        .filter_map(|entry| {
            let entry = entry.as_ref().trim();
            let addr = entry.split('/').next().unwrap_or(entry);
            addr.parse::<Ipv4Addr>().ok()
        })
        .collect()
}

/// First free host address of `cidr` not in `used`.
pub fn next_available<S: AsRef<str>>(cidr: &str, used: &[S]) -> MeshResult<Ipv4Addr> {
    let net = parse_ipv4_net(cidr)?;
    next_available_in(&net, &parse_used(used))
}

/// Typed form of [`next_available`].
pub fn next_available_in(net: &Ipv4Net, used: &HashSet<Ipv4Addr>) -> MeshResult<Ipv4Addr> {
    let net = net.trunc();
    let exhausted = || MeshError::Exhausted {
        cidr: net.to_string(),
    };
    if net.prefix_len() >= 31 {
        return Err(exhausted());
    }

    let first = u32::from(net.network()) + 1;
    let last = u32::from(net.broadcast()) - 1;
    (first..=last)
        .map(Ipv4Addr::from)
        .find(|candidate| !used.contains(candidate))
        .ok_or_else(exhausted)
}

/// Parse a domain CIDR. It must be IPv4 and name a network address.
pub fn validate_domain_cidr(cidr: &str) -> MeshResult<Ipv4Net> {
    let net = parse_ipv4_net(cidr)?;
    check_network_address(&net)?;
    Ok(net)
}

/// Reject a CIDR whose address has host bits set (`10.0.0.5/24`).
pub fn check_network_address(net: &Ipv4Net) -> MeshResult<()> {
    if net.addr() != net.network() {
        return Err(MeshError::Validation(format!(
            "{} is not a network address (expected {})",
            net,
            net.trunc()
        )));
    }
    Ok(())
}

/// Parse a host address and check it lies inside the domain CIDR.
pub fn validate_host_ip(ip: &str, domain_cidr: &Ipv4Net) -> MeshResult<Ipv4Addr> {
    let addr: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| MeshError::InvalidAddress(ip.to_string()))?;
    let addr = match addr {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(_) => return Err(MeshError::UnsupportedFamily(ip.to_string())),
    };
    check_host_ip(addr, domain_cidr)?;
    Ok(addr)
}

/// Typed form of [`validate_host_ip`].
pub fn check_host_ip(addr: Ipv4Addr, domain_cidr: &Ipv4Net) -> MeshResult<()> {
    if !domain_cidr.contains(&addr) {
        return Err(MeshError::Validation(format!(
            "{} is outside domain network {}",
            addr, domain_cidr
        )));
    }
    Ok(())
}
