//! # Namegraph Core
//!
//! Pure primitives for Namegraph: name hashing, channel key derivation and
//! signed commits.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over keccak-256 and secp256k1.
//!
//! ## Key Types
//!
//! - [`Namehash`] - 32-byte identifier of a fully qualified name
//! - [`PublicKey`] / [`Keypair`] - secp256k1 keys
//! - [`ChannelKey`] - one step of a derived sub-identity
//! - [`Commit`] - a signed pointer update
//! - [`TransferEvent`] / [`RegisterEvent`] - decoded on-chain events
//!
//! ## Canonicalization
//!
//! Commits are encoded as deterministic CBOR arrays. See [`canonical`] module.

pub mod canonical;
pub mod channel;
pub mod commit;
pub mod crypto;
pub mod error;
pub mod event;
pub mod namehash;
pub mod pointer;
pub mod types;

pub use canonical::{canonical_commit_bytes, decode_commit};
pub use channel::{
    derive_channel_key, derive_channel_keypair, derive_channel_path, derive_channel_public_key,
    ChannelKey,
};
pub use commit::{Commit, CommitView};
pub use crypto::{
    derive_address, keccak256, recover_pubkey, sign_message_hash, Keypair, PublicKey, Signature,
};
pub use error::CoreError;
pub use event::{event_id, ChainEvent, DomainRecord, EventScope, RegisterEvent, TransferEvent};
pub use namehash::{child_namehash, namehash, namehash_from};
pub use pointer::Pointer;
pub use types::{decode_hex, encode_hex, now_millis, Address, ChannelId, Hash32, Namehash};
