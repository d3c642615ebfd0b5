//! Raw EVM logs and their decoding into [`ChainEvent`]s.
//!
//! Two events are understood:
//!
//! - `Register(bytes32 indexed parent, string label)`: topic 0 is
//!   [`REGISTER_TOPIC`], topic 1 the parent namehash, the data an ABI
//!   encoded string.
//! - `Transfer(address indexed from, address indexed to, uint256 indexed id)`:
//!   topic 0 is [`TRANSFER_TOPIC`], topics 1-2 hold the padded addresses and
//!   topic 3 the namehash.

use serde::{Deserialize, Serialize};

use namegraph_core::{
    decode_hex, event_id, Address, ChainEvent, EventScope, Hash32, RegisterEvent, TransferEvent,
};

use crate::error::{ChainError, Result};

/// Topic 0 of the Register event.
pub const REGISTER_TOPIC: &str =
    "0xfa0de44d6b928def17acff11cc1684fd8bcdfc30b81206468debd6fd42e5cd9f";

/// Topic 0 of the ERC-721 Transfer event.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Every topic the decoder accepts, in filter order.
pub const EVENT_TOPICS: [&str; 2] = [REGISTER_TOPIC, TRANSFER_TOPIC];

const WORD: usize = 32;

/// A log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(default)]
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// Topic 0, lowercased.
    pub fn signature(&self) -> Option<String> {
        self.topics.first().map(|t| t.to_ascii_lowercase())
    }
}

/// Parse a JSON-RPC hex quantity (`0x1a`).
pub fn parse_quantity(s: &str) -> Result<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Err(ChainError::InvalidResponse(format!("empty quantity: {:?}", s)));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity {:?}: {}", s, e)))
}

/// Format a block number as a JSON-RPC hex quantity.
pub fn to_quantity(n: u64) -> String {
    format!("0x{:x}", n)
}

/// Decode a log by its topic 0.
pub fn decode_log(log: &RawLog) -> Result<ChainEvent> {
    let topic = log.signature().unwrap_or_default();
    match topic.as_str() {
        REGISTER_TOPIC => decode_register(log).map(ChainEvent::Register),
        TRANSFER_TOPIC => decode_transfer(log).map(ChainEvent::Transfer),
        _ => Err(ChainError::UnknownEvent { topic }),
    }
}

struct Position {
    block_height: u64,
    block_hash: Hash32,
    tx_id: Hash32,
    log_index: u64,
}

fn position(log: &RawLog) -> Result<Position> {
    Ok(Position {
        block_height: parse_quantity(&log.block_number)?,
        block_hash: Hash32::from_hex(&log.block_hash)?,
        tx_id: Hash32::from_hex(&log.transaction_hash)?,
        log_index: parse_quantity(&log.log_index)?,
    })
}

fn topic(log: &RawLog, index: usize) -> Result<Hash32> {
    let raw = log.topics.get(index).ok_or_else(|| {
        ChainError::MalformedLog(format!(
            "expected at least {} topics, got {}",
            index + 1,
            log.topics.len()
        ))
    })?;
    Ok(Hash32::from_hex(raw)?)
}

/// Decode a Register log.
pub fn decode_register(log: &RawLog) -> Result<RegisterEvent> {
    let pos = position(log)?;
    let parent = topic(log, 1)?;
    let data = decode_hex(&log.data)?;
    let label = decode_abi_string(&data)?;

    Ok(RegisterEvent {
        id: event_id(EventScope::Register, pos.block_height, pos.log_index, &pos.block_hash),
        parent,
        label,
        removed: log.removed,
        block_height: pos.block_height,
        block_hash: pos.block_hash,
        tx_id: pos.tx_id,
        log_index: pos.log_index,
    })
}

/// Decode a Transfer log.
pub fn decode_transfer(log: &RawLog) -> Result<TransferEvent> {
    let pos = position(log)?;
    let from = Address::from_word(&topic(log, 1)?);
    let to = Address::from_word(&topic(log, 2)?);
    let namehash = topic(log, 3)?;

    Ok(TransferEvent {
        id: event_id(EventScope::Transfer, pos.block_height, pos.log_index, &pos.block_hash),
        namehash,
        from,
        to,
        removed: log.removed,
        block_height: pos.block_height,
        block_hash: pos.block_hash,
        tx_id: pos.tx_id,
        log_index: pos.log_index,
    })
}

/// Read a big-endian ABI word that must fit in a usize.
fn read_word(data: &[u8], at: usize) -> Result<usize> {
    let word = at
        .checked_add(WORD)
        .and_then(|end| data.get(at..end))
        .ok_or_else(|| ChainError::MalformedLog(format!("data too short for word at {}", at)))?;
    let (high, low) = word.split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(ChainError::MalformedLog(format!("word at {} overflows", at)));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    usize::try_from(u64::from_be_bytes(buf))
        .map_err(|_| ChainError::MalformedLog(format!("word at {} overflows", at)))
}

/// Decode a single ABI-encoded `string` argument.
///
/// Invalid UTF-8 is replaced rather than rejected, so one odd label cannot
/// wedge ingestion of a whole zone.
pub fn decode_abi_string(data: &[u8]) -> Result<String> {
    let offset = read_word(data, 0)?;
    let len = read_word(data, offset)?;
    let start = offset + WORD;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            ChainError::MalformedLog(format!("string of {} bytes overruns data", len))
        })?;

    match String::from_utf8(bytes.to_vec()) {
        Ok(s) => Ok(s),
        Err(e) => {
            tracing::warn!(error = %e, "register label is not valid utf-8");
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// ABI-encode a single `string` argument.
pub fn encode_abi_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(2 * WORD + padded);
    out.extend_from_slice(&word(WORD as u64));
    out.extend_from_slice(&word(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out.resize(2 * WORD + padded, 0);
    out
}

fn word(n: u64) -> [u8; WORD] {
    let mut w = [0u8; WORD];
    w[WORD - 8..].copy_from_slice(&n.to_be_bytes());
    w
}

/// Left-pad an address into a 32-byte topic.
pub fn address_topic(address: &Address) -> Hash32 {
    let mut w = [0u8; WORD];
    w[WORD - 20..].copy_from_slice(address.as_bytes());
    Hash32::from_bytes(w)
}
