//! Hierarchical name hashing.
//!
//! A name is a dot-separated label path (`a.b.tld`). Its namehash folds the
//! labels from the root outwards: starting from 32 zero bytes, each label
//! replaces the accumulator with `keccak256(acc || keccak256(label))`.

use crate::crypto::keccak256;
use crate::types::Namehash;

/// Namehash of a fully qualified name. The empty name is the root.
pub fn namehash(fqn: &str) -> Namehash {
    namehash_from(fqn, Namehash::ZERO)
}

/// Namehash of `fqn` relative to an arbitrary starting hash.
///
/// `namehash_from("alice", namehash("eth")) == namehash("alice.eth")`.
pub fn namehash_from(fqn: &str, root: Namehash) -> Namehash {
    if fqn.is_empty() {
        return root;
    }
    fqn.rsplit('.')
        .fold(root, |parent, label| child_namehash(&parent, label))
}

/// One folding step: the hash of `label` directly under `parent`.
pub fn child_namehash(parent: &Namehash, label: &str) -> Namehash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(parent.as_bytes());
    buf[32..].copy_from_slice(keccak256(label).as_bytes());
    keccak256(buf)
}
