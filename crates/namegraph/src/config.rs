//! Configuration for the graph runtime and its zones.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use namegraph_core::{now_millis, Namehash};

use crate::error::{GraphError, Result};

/// Runtime configuration shared by every actor.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Debounce between a state change and its projection.
    pub projection_delay: Duration,
    /// Delay before retrying a failed projection.
    pub retry_delay: Duration,
    /// Mailbox slots per actor.
    pub mailbox_capacity: usize,
    /// Per-request timeout for chain RPC and content fetches.
    pub rpc_timeout: Duration,
    /// Content URL template; `{cid}` is replaced by the pointer.
    pub content_gateway: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            projection_delay: Duration::ZERO,
            retry_delay: Duration::from_secs(5),
            mailbox_capacity: 64,
            rpc_timeout: Duration::from_secs(30),
            content_gateway: "https://{cid}.ipfs.w3s.link/metadata.json".to_string(),
        }
    }
}

/// Placeholder shown instead of a zone's RPC endpoint.
pub const HIDDEN_ENDPOINT: &str = "hidden";

/// Configuration of one zone: which contract to follow and where it sits
/// in the name tree.
///
/// Deserializes from the zone configuration store. Missing fields take
/// their defaults, and the short field names used by older deployments
/// are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    #[serde(alias = "api")]
    pub rpc_endpoint: String,
    #[serde(alias = "contract")]
    pub contract_address: String,
    #[serde(alias = "chain")]
    pub chain_id: String,
    #[serde(alias = "parent")]
    pub parent_namehash: Namehash,
    #[serde(alias = "origin")]
    pub origin_namehash: Namehash,
    pub label: String,
    pub fqn: String,
    #[serde(alias = "start")]
    pub start_block: u64,
    #[serde(alias = "batch")]
    pub batch_size: u64,
    #[serde(alias = "lag")]
    pub confirmation_lag: u64,
    /// Suggested interval between scheduled syncs.
    #[serde(alias = "delay")]
    pub delay_ms: u64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: String::new(),
            contract_address: String::new(),
            chain_id: String::new(),
            parent_namehash: Namehash::ZERO,
            origin_namehash: Namehash::ZERO,
            label: String::new(),
            fqn: String::new(),
            start_block: 0,
            batch_size: 1000,
            confirmation_lag: 128,
            delay_ms: 10_000,
        }
    }
}

impl ZoneConfig {
    /// Fail unless the zone can reach its chain.
    pub fn validate(&self) -> Result<()> {
        if self.rpc_endpoint.is_empty() {
            return Err(GraphError::Configuration(format!(
                "rpc endpoint not configured: {}",
                self.contract_address
            )));
        }
        if self.contract_address.is_empty() {
            return Err(GraphError::Configuration(
                "contract not configured".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.validate().is_ok()
    }

    /// Copy safe to show to clients.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.rpc_endpoint.is_empty() {
            config.rpc_endpoint = HIDDEN_ENDPOINT.to_string();
        }
        config
    }
}

/// Lifecycle of a zone sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneState {
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
}

/// Observability snapshot of a zone's last sync.
///
/// Only the persisted head cursor drives ingestion; these numbers are
/// recomputed by every sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneStatus {
    pub state: ZoneState,
    pub timestamp: u64,
    pub current_block: u64,
    pub head_block: u64,
    pub safe_block: u64,
    pub target_block: u64,
    pub remaining: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ZoneStatus {
    /// An error snapshot carrying only the failure message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: ZoneState::Error,
            timestamp: now_millis(),
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Block numbers for one sync step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub current: u64,
    pub head: u64,
    pub safe: u64,
    pub target: u64,
}

impl SyncWindow {
    /// Window for a chain at `current` with the cursor at `head`.
    pub fn compute(current: u64, head: u64, config: &ZoneConfig) -> Self {
        let safe = current.saturating_sub(config.confirmation_lag);
        let target = head.saturating_add(config.batch_size).min(safe);
        Self {
            current,
            head,
            safe,
            target,
        }
    }

    /// Whether the safe block has not yet reached the cursor.
    pub fn is_behind(&self) -> bool {
        self.safe < self.head
    }

    pub fn remaining(&self) -> u64 {
        self.safe.saturating_sub(self.target)
    }
}
