//! Chain client abstraction.
//!
//! The ingestion engine needs two JSON-RPC methods: the current block height
//! and the logs of one contract over a block range. [`HttpChainClient`]
//! speaks JSON-RPC 2.0 over HTTP; [`memory::MemoryChain`] is a scripted
//! chain for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ChainError, Result};
use crate::log::{parse_quantity, to_quantity, RawLog, EVENT_TOPICS};

/// Read access to an EVM chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64>;

    /// `eth_getLogs` for `contract` over the inclusive range `[from, to]`,
    /// filtered to the Register and Transfer topics.
    async fn get_logs(&self, contract: &str, from: u64, to: u64) -> Result<Vec<RawLog>>;
}

/// Builds a client for a zone's configured endpoint.
pub trait ChainConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainClient>>;
}

/// JSON-RPC 2.0 client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChainClient {
    /// Create a client for `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Share an existing reqwest client.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Send a JSON-RPC request and return the result field.
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Transport(format!("{method}: request timed out"))
                } else {
                    ChainError::Transport(format!("{method}: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            return Err(ChainError::Transport(format!(
                "{method}: HTTP {}",
                resp.status()
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(format!("{method}: invalid JSON: {e}")))?;

        if let Some(error) = json.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error");
            return Err(ChainError::Rpc {
                code,
                message: message.to_string(),
            });
        }

        json.get("result").cloned().ok_or_else(|| {
            ChainError::InvalidResponse(format!("{method}: response missing 'result' field"))
        })
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64> {
        let result = self.rpc_call("eth_blockNumber", json!([])).await?;
        let quantity = result.as_str().ok_or_else(|| {
            ChainError::InvalidResponse("eth_blockNumber returned non-string result".into())
        })?;
        parse_quantity(quantity)
    }

    async fn get_logs(&self, contract: &str, from: u64, to: u64) -> Result<Vec<RawLog>> {
        let filter = json!({
            "address": [contract],
            "fromBlock": to_quantity(from),
            "toBlock": to_quantity(to),
            "topics": [EVENT_TOPICS],
        });
        let result = self.rpc_call("eth_getLogs", json!([filter])).await?;
        let logs: Vec<RawLog> = serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidResponse(format!("eth_getLogs: {e}")))?;
        tracing::debug!(contract, from, to, count = logs.len(), "fetched logs");
        Ok(logs)
    }
}

/// Connects [`HttpChainClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl ChainConnector for HttpConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainClient>> {
        Ok(Arc::new(HttpChainClient::with_client(
            self.client.clone(),
            endpoint,
        )))
    }
}

/// A scripted in-memory chain for testing.
pub mod memory {
    use super::*;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct State {
        head: u64,
        logs: Vec<RawLog>,
        requests: Vec<(u64, u64)>,
        fail_next: Option<String>,
    }

    /// In-memory chain. Clones share state.
    #[derive(Clone, Default)]
    pub struct MemoryChain {
        state: Arc<RwLock<State>>,
    }

    impl MemoryChain {
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the current block height.
        pub async fn set_head(&self, head: u64) {
            self.state.write().await.head = head;
        }

        /// Append a log. Its `blockNumber` decides which ranges return it.
        pub async fn push_log(&self, log: RawLog) {
            self.state.write().await.logs.push(log);
        }

        /// Mark every stored copy of a log (same tx and index) as removed.
        pub async fn remove_log(&self, transaction_hash: &str, log_index: &str) {
            let mut state = self.state.write().await;
            for log in state
                .logs
                .iter_mut()
                .filter(|l| l.transaction_hash == transaction_hash && l.log_index == log_index)
            {
                log.removed = true;
            }
        }

        /// Make the next call fail with a transport error.
        pub async fn fail_next(&self, reason: impl Into<String>) {
            self.state.write().await.fail_next = Some(reason.into());
        }

        /// Every `(from, to)` range requested so far.
        pub async fn requests(&self) -> Vec<(u64, u64)> {
            self.state.read().await.requests.clone()
        }
    }

    #[async_trait]
    impl ChainClient for MemoryChain {
        async fn block_number(&self) -> Result<u64> {
            let mut state = self.state.write().await;
            if let Some(reason) = state.fail_next.take() {
                return Err(ChainError::Transport(reason));
            }
            Ok(state.head)
        }

        async fn get_logs(&self, contract: &str, from: u64, to: u64) -> Result<Vec<RawLog>> {
            let mut state = self.state.write().await;
            if let Some(reason) = state.fail_next.take() {
                return Err(ChainError::Transport(reason));
            }
            state.requests.push((from, to));

            let mut logs = Vec::new();
            for log in &state.logs {
                if !log.address.is_empty() && !log.address.eq_ignore_ascii_case(contract) {
                    continue;
                }
                let height = parse_quantity(&log.block_number)?;
                if height >= from && height <= to {
                    logs.push(log.clone());
                }
            }
            Ok(logs)
        }
    }

    impl ChainConnector for MemoryChain {
        fn connect(&self, _endpoint: &str) -> Result<Arc<dyn ChainClient>> {
            Ok(Arc::new(self.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryChain;
    use super::*;

    fn log_at(height: u64, index: u64) -> RawLog {
        RawLog {
            address: "0xC0".into(),
            topics: vec![crate::log::TRANSFER_TOPIC.into()],
            data: "0x".into(),
            block_number: to_quantity(height),
            block_hash: format!("0x{}", "ab".repeat(32)),
            transaction_hash: format!("0x{:064x}", height),
            log_index: to_quantity(index),
            removed: false,
        }
    }

    #[tokio::test]
    async fn test_memory_chain_ranges() {
        let chain = MemoryChain::new();
        chain.set_head(100).await;
        for h in [5, 10, 15] {
            chain.push_log(log_at(h, 0)).await;
        }

        assert_eq!(chain.block_number().await.unwrap(), 100);
        let logs = chain.get_logs("0xc0", 5, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(chain.get_logs("0xc1", 0, 100).await.unwrap().is_empty());
        assert_eq!(chain.requests().await, vec![(5, 10), (0, 100)]);
    }

    #[tokio::test]
    async fn test_memory_chain_failure_and_removal() {
        let chain = MemoryChain::new();
        chain.push_log(log_at(7, 1)).await;
        chain.fail_next("offline").await;
        assert!(matches!(chain.block_number().await, Err(ChainError::Transport(_))));
        assert!(chain.block_number().await.is_ok());

        chain.remove_log(&format!("0x{:064x}", 7), "0x1").await;
        let logs = chain.get_logs("0xc0", 0, 10).await.unwrap();
        assert!(logs[0].removed);
    }

    #[tokio::test]
    async fn test_connector_shares_state() {
        let chain = MemoryChain::new();
        let client = chain.connect("http://unused").unwrap();
        chain.set_head(42).await;
        assert_eq!(client.block_number().await.unwrap(), 42);
    }
}
