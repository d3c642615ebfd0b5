//! # Namegraph Chain
//!
//! Read-only access to the EVM chain that anchors a zone: a JSON-RPC
//! client and the decoder for Register and Transfer logs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use namegraph_chain::{decode_log, ChainClient, HttpChainClient};
//!
//! async fn example() -> namegraph_chain::Result<()> {
//!     let client = HttpChainClient::new("https://rpc.example", Duration::from_secs(30))?;
//!     let head = client.block_number().await?;
//!     let from = head.saturating_sub(1000);
//!     for log in client.get_logs("0x00000000000000000000000000000000000000c0", from, head).await? {
//!         let event = decode_log(&log)?;
//!         println!("{}", event.id());
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod log;

pub use client::{memory::MemoryChain, ChainClient, ChainConnector, HttpChainClient, HttpConnector};
pub use error::{ChainError, Result};
pub use log::{
    address_topic, decode_abi_string, decode_log, decode_register, decode_transfer,
    encode_abi_string, parse_quantity, to_quantity, RawLog, EVENT_TOPICS, REGISTER_TOPIC,
    TRANSFER_TOPIC,
};
