//! On-chain events and the domain records they produce.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::namehash::namehash_from;
use crate::types::{Address, Hash32, Namehash};

/// Scope tag leading every event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Register,
    Transfer,
}

impl EventScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventScope::Register => "register",
            EventScope::Transfer => "transfer",
        }
    }

    /// Storage key prefix shared by every event in this scope.
    pub fn prefix(&self) -> String {
        format!("{}:", self.as_str())
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lexicographically sortable event id.
///
/// `{scope}:{block_height:020}:{log_index:010}:{block_hash}`, so ids of one
/// scope sort in chain order and reorged copies of a log get distinct ids.
pub fn event_id(scope: EventScope, block_height: u64, log_index: u64, block_hash: &Hash32) -> String {
    format!(
        "{}:{:020}:{:010}:{}",
        scope, block_height, log_index, block_hash
    )
}

/// A domain ownership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub id: String,
    pub namehash: Namehash,
    pub from: Address,
    pub to: Address,
    pub removed: bool,
    pub block_height: u64,
    pub block_hash: Hash32,
    pub tx_id: Hash32,
    pub log_index: u64,
}

/// A new label registered under a parent domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEvent {
    pub id: String,
    pub parent: Namehash,
    pub label: String,
    pub removed: bool,
    pub block_height: u64,
    pub block_hash: Hash32,
    pub tx_id: Hash32,
    pub log_index: u64,
}

impl RegisterEvent {
    /// Namehash of the registered child.
    pub fn namehash(&self) -> Namehash {
        namehash_from(&self.label, self.parent)
    }
}

/// A decoded log of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Register(RegisterEvent),
    Transfer(TransferEvent),
}

impl ChainEvent {
    pub fn id(&self) -> &str {
        match self {
            ChainEvent::Register(e) => &e.id,
            ChainEvent::Transfer(e) => &e.id,
        }
    }

    pub fn removed(&self) -> bool {
        match self {
            ChainEvent::Register(e) => e.removed,
            ChainEvent::Transfer(e) => e.removed,
        }
    }
}

/// Immutable identity of a registered domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub namehash: Namehash,
    pub parent: Namehash,
    pub label: String,
    pub fqn: String,
}

impl DomainRecord {
    /// Record for `label` under a parent with the given fqn.
    ///
    /// A root parent has no fqn, and the child's fqn is just its label.
    pub fn child(parent: Namehash, parent_fqn: Option<&str>, label: &str) -> Self {
        let fqn = match parent_fqn {
            Some(p) if !p.is_empty() => format!("{}.{}", label, p),
            _ => label.to_string(),
        };
        Self {
            namehash: namehash_from(label, parent),
            parent,
            label: label.to_string(),
            fqn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namehash::namehash;

    #[test]
    fn test_event_id_sorts_by_height_then_index() {
        let hash = Hash32::from_bytes([0xaa; 32]);
        let a = event_id(EventScope::Transfer, 9, 5, &hash);
        let b = event_id(EventScope::Transfer, 10, 0, &hash);
        let c = event_id(EventScope::Transfer, 10, 1, &hash);
        assert!(a < b && b < c);
        assert!(a.starts_with("transfer:00000000000000000009:0000000005:0xaaaa"));
    }

    #[test]
    fn test_register_namehash() {
        let event = RegisterEvent {
            id: String::new(),
            parent: namehash("eth"),
            label: "foo".into(),
            removed: false,
            block_height: 1,
            block_hash: Hash32::ZERO,
            tx_id: Hash32::ZERO,
            log_index: 0,
        };
        assert_eq!(event.namehash(), namehash("foo.eth"));
    }

    #[test]
    fn test_child_record_under_root() {
        let record = DomainRecord::child(Namehash::ZERO, None, "alice");
        assert_eq!(record.fqn, "alice");
        assert_eq!(record.namehash, namehash("alice"));

        let nested = DomainRecord::child(namehash("eth"), Some("eth"), "foo");
        assert_eq!(nested.fqn, "foo.eth");
        assert_eq!(nested.namehash, namehash("foo.eth"));
    }
}
