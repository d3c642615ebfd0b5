//! # Namegraph
//!
//! Chain-anchored names, signed notes, and the resolver index they project
//! into.
//!
//! ## Overview
//!
//! Namegraph mirrors a registry contract into a hierarchical name tree and
//! binds off-chain content pointers to the owners of those names:
//!
//! - **Zones** follow a registry contract, decode its Register and Transfer
//!   logs, and apply them to domains with confirmation-depth safety
//! - **Domains** hold an immutable name record and the transfers that
//!   decide its current owner
//! - **Notes** hold the revision-ordered commits of one issuer key,
//!   possibly a channel key derived from an owner's wallet
//! - **The resolver index** is an eventually-consistent view every domain
//!   and note projects into after a debounced delay
//!
//! ## Key Concepts
//!
//! - **Actor**: one task per entity; requests on one entity run serially.
//! - **Projection**: derived facts written to the index, idempotently.
//! - **Cursor**: the only ingestion state a zone relies on is its head block.
//! - **Commit**: a signed pointer update; see [`core::Commit`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use namegraph::{Graph, GraphConfig};
//!
//! async fn example() -> namegraph::Result<()> {
//!     let graph = Graph::open("namegraph.db", GraphConfig::default())?;
//!
//!     // Ingest the next batch of every configured zone.
//!     for (origin, status) in graph.sync_zones().await? {
//!         println!("{origin}: {:?} ({} blocks behind)", status.state, status.remaining);
//!     }
//!
//!     // Publish a hex-encoded commit and read it back from the index.
//!     let view = graph.publish_hex("0x85...").await?;
//!     graph.flush().await?;
//!     let note = graph.resolver().get_note(&view.addr, None).await?;
//!     println!("{:?}", note);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `namegraph::core` - Hashing, keys, commits and event types
//! - `namegraph::store` - Storage traits, memory and SQLite backends
//! - `namegraph::chain` - Chain RPC client and log decoding

pub mod actor;
pub mod config;
pub mod content;
pub mod directory;
pub mod domain;
pub mod error;
pub mod graph;
pub mod note;
pub mod resolver;
pub mod zone;

// Re-export component crates
pub use namegraph_chain as chain;
pub use namegraph_core as core;
pub use namegraph_store as store;

// Re-export main types for convenience
pub use config::{GraphConfig, SyncWindow, ZoneConfig, ZoneState, ZoneStatus};
pub use content::{ContentFetcher, GatewayFetcher, MemoryContent};
pub use domain::{DomainHandle, Domains};
pub use error::{GraphError, Result};
pub use graph::{Graph, GraphBuilder};
pub use note::{NoteAccount, NoteHandle, Notes};
pub use resolver::{AccountView, DomainView, NoteView, Resolver};
pub use zone::{ZoneHandle, ZoneInfo, Zones};

// Re-export commonly used core types
pub use namegraph_core::{
    namehash, Address, ChannelId, Commit, CommitView, DomainRecord, Hash32, Keypair, Namehash,
    Pointer, PublicKey, TransferEvent,
};
