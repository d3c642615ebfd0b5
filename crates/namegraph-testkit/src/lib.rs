//! # Namegraph Testkit
//!
//! Testing utilities for Namegraph.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known hashes and addresses every implementation must reproduce
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Signing parties and EVM log builders for integration tests
//!
//! ## Golden Vectors
//!
//! ```rust
//! use namegraph_testkit::vectors::verify_all_vectors;
//!
//! for (name, ok, actual) in verify_all_vectors() {
//!     assert!(ok, "{name}: {actual}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use namegraph_testkit::generators::CommitParams;
//!
//! proptest! {
//!     #[test]
//!     fn signed_commits_validate(params: CommitParams) {
//!         prop_assert!(params.signed().validate());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use namegraph_core::Namehash;
//! use namegraph_testkit::fixtures::{LogBuilder, Party};
//!
//! let alice = Party::from_seed(1);
//! let commit = alice.commit(1000, Some("profile"));
//! assert!(commit.validate());
//!
//! let log = LogBuilder::new(10).register(Namehash::ZERO, "alice");
//! assert_eq!(log.block_number, "0xa");
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{parties, pointer, pointer_with, LogBuilder, Party, CONTRACT, POINTER};
