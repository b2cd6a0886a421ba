//! End-to-end tests for the Meshforge provisioner
//!
//! This test suite validates:
//! - authority, domain and host provisioning over the SQLite store
//! - certificate validity bounds and verification against the authority
//! - lighthouse discovery and propagation to peers
//! - regeneration idempotence across store reopen

pub mod test_utils;

#[cfg(test)]
mod provisioning_tests;

#[cfg(test)]
mod lighthouse_tests;
