//! Mutation events that drive certificate and configuration regeneration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of record mutation delivered to the regeneration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AuthorityCreate,
    DomainCreate,
    DomainUpdate,
    HostCreate,
    HostUpdate,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AuthorityCreate => "authority_create",
            EventKind::DomainCreate => "domain_create",
            EventKind::DomainUpdate => "domain_update",
            EventKind::HostCreate => "host_create",
            EventKind::HostUpdate => "host_update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate deciding whether an event is handled. Returning `false` turns
/// the event into a no-op.
pub type EventFilter = Box<dyn Fn(EventKind) -> bool + Send + Sync>;
