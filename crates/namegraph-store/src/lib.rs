//! # Namegraph Store
//!
//! Storage abstraction for Namegraph. Two traits cover everything the
//! engine persists:
//!
//! - [`KvStore`] - durable per-actor state, partitioned by scope
//! - [`IndexStore`] - the shared projection index, with JSON metadata
//!
//! [`SqliteStore`] / [`SqliteIndex`] are the persistent backends;
//! [`MemoryStore`] / [`MemoryIndex`] keep everything in memory for tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use namegraph_store::{IndexStore, KvStore, ListOptions, SqliteStore};
//!
//! async fn example() -> namegraph_store::Result<()> {
//!     let store = SqliteStore::open("namegraph.db")?;
//!     store.put("zone:main", "head", b"1024").await?;
//!
//!     let commits = store
//!         .list("note:0x01", &ListOptions::prefix("commit:").reverse().limit(10))
//!         .await?;
//!
//!     let index = store.index("main");
//!     index.put("domain:0x01", b"{}", None).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Single writer per scope**: each actor owns its scope; the store does
//!   not arbitrate concurrent writers to the same key
//! - **Byte ordering**: listing sorts keys bytewise, so zero-padded numeric
//!   keys list in numeric order

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryIndex, MemoryStore};
pub use sqlite::{SqliteIndex, SqliteStore};
pub use traits::{IndexEntry, IndexStore, IndexStoreExt, KvStore, KvStoreExt, ListOptions};
