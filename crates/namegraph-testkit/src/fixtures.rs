//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use namegraph_chain::{address_topic, encode_abi_string, to_quantity, RawLog, REGISTER_TOPIC, TRANSFER_TOPIC};
use namegraph_core::{encode_hex, keccak256, Address, Commit, Hash32, Keypair, Namehash, Pointer};

/// A CIDv1 every fixture commit points at.
pub const POINTER: &str = "bafybeihe67oiezjclcok2toyvbypldy4rhe4jybc6kydf75cnvvu2424zu";

/// Contract address fixture logs are emitted by.
pub const CONTRACT: &str = "0x00000000000000000000000000000000000c0de5";

/// The fixture pointer.
pub fn pointer() -> Pointer {
    Pointer::parse(POINTER).expect("fixture pointer must parse")
}

/// A CIDv1 (raw codec) over the sha2-256 digest `[fill; 32]`.
pub fn pointer_with(fill: u8) -> Pointer {
    let mut bytes = vec![0x01, 0x55, 0x12, 0x20];
    bytes.extend_from_slice(&[fill; 32]);
    Pointer::from_bytes(bytes).expect("fixture pointer is non-empty")
}

/// A signing party with a deterministic keypair.
pub struct Party {
    pub keypair: Keypair,
}

impl Party {
    /// Party whose secret is derived from a one-byte seed.
    pub fn from_seed(seed: u8) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0] = seed;
        bytes[31] = 1;
        Self {
            keypair: Keypair::from_seed(&bytes),
        }
    }

    /// Base account address.
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// An unsigned commit of [`POINTER`], issued under `topic` if given.
    pub fn unsigned(&self, rev: u64, topic: Option<&str>) -> Commit {
        Commit::create(&self.keypair.public_key(), pointer(), rev, topic)
            .expect("fixture commit must derive")
    }

    /// A commit of [`POINTER`] signed by this party's base key.
    pub fn commit(&self, rev: u64, topic: Option<&str>) -> Commit {
        self.commit_to(pointer(), rev, topic)
    }

    /// A commit of `ptr` signed by this party's base key.
    pub fn commit_to(&self, ptr: Pointer, rev: u64, topic: Option<&str>) -> Commit {
        let mut commit = Commit::create(&self.keypair.public_key(), ptr, rev, topic)
            .expect("fixture commit must derive");
        commit
            .sign_with(&self.keypair, topic)
            .expect("fixture commit must sign");
        commit
    }
}

/// Create parties with distinct seeds `1..=count`.
pub fn parties(count: usize) -> Vec<Party> {
    (1..=count).map(|i| Party::from_seed(i as u8)).collect()
}

/// Builds raw logs as a chain node would return them.
///
/// Block and transaction hashes are derived from the block number and log
/// index, so rebuilding a log yields an identical copy.
#[derive(Debug, Clone)]
pub struct LogBuilder {
    block: u64,
    log_index: u64,
    contract: String,
    removed: bool,
}

impl LogBuilder {
    pub fn new(block: u64) -> Self {
        Self {
            block,
            log_index: 0,
            contract: CONTRACT.to_string(),
            removed: false,
        }
    }

    pub fn index(mut self, log_index: u64) -> Self {
        self.log_index = log_index;
        self
    }

    pub fn contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = contract.into();
        self
    }

    pub fn removed(mut self) -> Self {
        self.removed = true;
        self
    }

    /// Hash of the block this builder emits into.
    pub fn block_hash(&self) -> Hash32 {
        keccak256(format!("block:{}", self.block))
    }

    /// Hash of the transaction carrying the log.
    pub fn tx_hash(&self) -> Hash32 {
        keccak256(format!("tx:{}:{}", self.block, self.log_index))
    }

    /// `Register(parent, label)`.
    pub fn register(&self, parent: Namehash, label: &str) -> RawLog {
        self.log(
            vec![REGISTER_TOPIC.to_string(), parent.to_hex()],
            &encode_abi_string(label),
        )
    }

    /// `Transfer(from, to, namehash)`.
    pub fn transfer(&self, namehash: Namehash, from: Address, to: Address) -> RawLog {
        self.log(
            vec![
                TRANSFER_TOPIC.to_string(),
                address_topic(&from).to_hex(),
                address_topic(&to).to_hex(),
                namehash.to_hex(),
            ],
            &[],
        )
    }

    fn log(&self, topics: Vec<String>, data: &[u8]) -> RawLog {
        RawLog {
            address: self.contract.clone(),
            topics,
            data: encode_hex(data),
            block_number: to_quantity(self.block),
            block_hash: self.block_hash().to_hex(),
            transaction_hash: self.tx_hash().to_hex(),
            log_index: to_quantity(self.log_index),
            removed: self.removed,
        }
    }
}
