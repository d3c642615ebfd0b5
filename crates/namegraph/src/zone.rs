//! Zone actor: ingests one registry contract into the domain tree.
//!
//! A zone follows a contract on one chain from a persisted block cursor
//! (`head`). Each sync fetches the logs of at most `batch_size` blocks that
//! are at least `confirmation_lag` deep, decodes all of them, and only then
//! applies them in order. A failure anywhere leaves the cursor where it was,
//! and since every event is keyed by its id, replaying a range is harmless.
//! The block at the cursor is fetched again by the next sync for that reason.
//!
//! Syncs are serialized by the actor mailbox: concurrent calls queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use namegraph_chain::{decode_log, ChainConnector};
use namegraph_core::{
    now_millis, ChainEvent, DomainRecord, EventScope, Namehash, RegisterEvent, TransferEvent,
};
use namegraph_store::{IndexStore, IndexStoreExt, KvStore, KvStoreExt, ListOptions};

use crate::actor::{self, Actor, ActorHandle, Alarm};
use crate::config::{GraphConfig, SyncWindow, ZoneConfig, ZoneState, ZoneStatus};
use crate::directory::Directory;
use crate::domain::Domains;
use crate::error::{GraphError, Result};

const CONFIG_KEY: &str = "config";
const STATUS_KEY: &str = "status";
const HEAD_KEY: &str = "head";

/// Storage scope of a zone actor.
pub fn scope(origin: &Namehash) -> String {
    format!("zone:{}", origin)
}

/// What a zone reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneInfo {
    pub origin: Namehash,
    pub status: ZoneStatus,
    /// Configuration with the RPC endpoint hidden.
    pub config: ZoneConfig,
}

/// Requests served by a zone actor.
pub enum ZoneMessage {
    Info {
        reply: oneshot::Sender<ZoneInfo>,
    },
    Load {
        reply: oneshot::Sender<Result<ZoneConfig>>,
    },
    Sync {
        reply: oneshot::Sender<Result<ZoneStatus>>,
    },
    Reset {
        reply: oneshot::Sender<Result<ZoneStatus>>,
    },
    Registers {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<RegisterEvent>>>,
    },
}

/// Ingestion state of one zone.
pub struct ZoneActor {
    origin: Namehash,
    scope: String,
    config: ZoneConfig,
    status: ZoneStatus,
    store: Arc<dyn KvStore>,
    configs: Arc<dyn IndexStore>,
    chain: Arc<dyn ChainConnector>,
    domains: Domains,
}

impl ZoneActor {
    /// Load a zone's persisted config and status.
    pub async fn load(
        origin: Namehash,
        store: Arc<dyn KvStore>,
        configs: Arc<dyn IndexStore>,
        chain: Arc<dyn ChainConnector>,
        domains: Domains,
    ) -> Result<Self> {
        let scope = scope(&origin);
        let config = store
            .get_json::<ZoneConfig>(&scope, CONFIG_KEY)
            .await?
            .unwrap_or_else(|| ZoneConfig {
                origin_namehash: origin,
                ..ZoneConfig::default()
            });
        let status = store
            .get_json::<ZoneStatus>(&scope, STATUS_KEY)
            .await?
            .unwrap_or_default();

        Ok(Self {
            origin,
            scope,
            config,
            status,
            store,
            configs,
            chain,
            domains,
        })
    }

    fn info(&self) -> ZoneInfo {
        ZoneInfo {
            origin: self.origin,
            status: self.status.clone(),
            config: self.config.redacted(),
        }
    }

    async fn set_status(&mut self, status: ZoneStatus) -> Result<ZoneStatus> {
        self.store.put_json(&self.scope, STATUS_KEY, &status).await?;
        self.status = status.clone();
        Ok(status)
    }

    /// Re-read the configuration and register the origin domain.
    async fn reload(&mut self) -> Result<ZoneConfig> {
        let mut config = self
            .configs
            .get_json::<ZoneConfig>(&self.origin.to_string())
            .await?
            .ok_or_else(|| {
                GraphError::Configuration(format!("no configuration for zone {}", self.origin))
            })?;
        config.origin_namehash = self.origin;

        self.store.put_json(&self.scope, CONFIG_KEY, &config).await?;
        self.config = config.clone();

        let origin = DomainRecord {
            namehash: self.origin,
            parent: config.parent_namehash,
            label: config.label.clone(),
            fqn: config.fqn.clone(),
        };
        self.domains.get(self.origin).await?.init(origin).await?;

        tracing::info!(
            zone = %self.origin,
            fqn = %config.fqn,
            chain = %config.chain_id,
            contract = %config.contract_address,
            "zone loaded"
        );
        Ok(config.redacted())
    }

    async fn sync(&mut self) -> Result<ZoneStatus> {
        self.config.validate()?;

        match self.sync_window().await {
            Ok(status) => Ok(status),
            Err(error) => {
                tracing::warn!(zone = %self.origin, %error, "sync failed");
                let status = ZoneStatus {
                    state: ZoneState::Error,
                    timestamp: now_millis(),
                    error: Some(error.to_string()),
                    ..self.status.clone()
                };
                if let Err(store_error) = self.set_status(status).await {
                    tracing::error!(zone = %self.origin, error = %store_error, "failed to persist zone status");
                }
                Err(error)
            }
        }
    }

    async fn sync_window(&mut self) -> Result<ZoneStatus> {
        let client = self.chain.connect(&self.config.rpc_endpoint)?;
        let current = client.block_number().await?;
        let head = self
            .store
            .get_json::<u64>(&self.scope, HEAD_KEY)
            .await?
            .unwrap_or(self.config.start_block);
        let window = SyncWindow::compute(current, head, &self.config);

        let mut status = ZoneStatus {
            state: ZoneState::Syncing,
            timestamp: now_millis(),
            current_block: window.current,
            head_block: window.head,
            safe_block: window.safe,
            target_block: window.target,
            remaining: window.remaining(),
            error: None,
        };
        self.set_status(status.clone()).await?;

        if window.is_behind() {
            tracing::debug!(zone = %self.origin, head, safe = window.safe, "no confirmed blocks past head");
            status.state = ZoneState::Synced;
            status.remaining = 0;
            return self.set_status(status).await;
        }

        let logs = client
            .get_logs(&self.config.contract_address, window.head, window.target)
            .await?;
        let events = logs
            .iter()
            .map(decode_log)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for event in events {
            match event {
                ChainEvent::Register(event) => self.apply_register(event).await?,
                ChainEvent::Transfer(event) => self.apply_transfer(event).await?,
            }
        }

        self.store.put_json(&self.scope, HEAD_KEY, &window.target).await?;
        tracing::info!(
            zone = %self.origin,
            from = window.head,
            to = window.target,
            events = logs.len(),
            remaining = window.remaining(),
            "zone synced"
        );

        status.state = ZoneState::Synced;
        status.timestamp = now_millis();
        self.set_status(status).await
    }

    async fn apply_register(&mut self, event: RegisterEvent) -> Result<()> {
        let parent_fqn = if event.parent.is_zero() {
            None
        } else {
            let parent = self
                .domains
                .get(event.parent)
                .await?
                .get()
                .await?
                .ok_or(GraphError::ParentNotFound(event.parent))?;
            Some(parent.fqn)
        };

        let record = DomainRecord::child(event.parent, parent_fqn.as_deref(), &event.label);
        tracing::debug!(zone = %self.origin, id = %event.id, fqn = %record.fqn, removed = event.removed, "register");
        self.domains.get(record.namehash).await?.init(record).await?;

        if event.removed {
            self.store.delete(&self.scope, &event.id).await?;
        } else {
            self.store.put_json(&self.scope, &event.id, &event).await?;
        }
        Ok(())
    }

    async fn apply_transfer(&mut self, event: TransferEvent) -> Result<()> {
        tracing::debug!(zone = %self.origin, id = %event.id, namehash = %event.namehash, "transfer");
        self.domains.get(event.namehash).await?.transfer(event).await?;
        Ok(())
    }

    /// Forget the cursor; the next sync starts over from `start_block`.
    async fn reset(&mut self) -> Result<ZoneStatus> {
        self.store.delete(&self.scope, HEAD_KEY).await?;
        tracing::info!(zone = %self.origin, "zone reset");
        self.set_status(ZoneStatus {
            state: ZoneState::Idle,
            timestamp: now_millis(),
            ..ZoneStatus::default()
        })
        .await
    }

    async fn registers(&self, limit: usize) -> Result<Vec<RegisterEvent>> {
        let options = ListOptions::prefix(EventScope::Register.prefix())
            .reverse()
            .limit(limit);
        let mut events = Vec::new();
        for (_, bytes) in self.store.list(&self.scope, &options).await? {
            events.push(serde_json::from_slice(&bytes)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl Actor for ZoneActor {
    type Message = ZoneMessage;

    async fn handle(&mut self, message: ZoneMessage, _alarm: &mut Alarm) {
        match message {
            ZoneMessage::Info { reply } => {
                let _ = reply.send(self.info());
            }
            ZoneMessage::Load { reply } => {
                let _ = reply.send(self.reload().await);
            }
            ZoneMessage::Sync { reply } => {
                let _ = reply.send(self.sync().await);
            }
            ZoneMessage::Reset { reply } => {
                let _ = reply.send(self.reset().await);
            }
            ZoneMessage::Registers { limit, reply } => {
                let _ = reply.send(self.registers(limit).await);
            }
        }
    }

    /// Zones write to domains, not to the index.
    async fn project(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Address of a zone actor.
#[derive(Clone)]
pub struct ZoneHandle {
    origin: Namehash,
    inner: ActorHandle<ZoneMessage>,
}

impl ZoneHandle {
    pub fn origin(&self) -> Namehash {
        self.origin
    }

    /// Status and redacted configuration.
    pub async fn info(&self) -> Result<ZoneInfo> {
        self.inner.request(|reply| ZoneMessage::Info { reply }).await
    }

    pub async fn status(&self) -> Result<ZoneStatus> {
        Ok(self.info().await?.status)
    }

    /// Re-read configuration and register the origin domain.
    pub async fn load(&self) -> Result<ZoneConfig> {
        self.inner.request(|reply| ZoneMessage::Load { reply }).await?
    }

    /// Ingest the next batch of confirmed blocks.
    pub async fn sync(&self) -> Result<ZoneStatus> {
        self.inner.request(|reply| ZoneMessage::Sync { reply }).await?
    }

    pub async fn reset(&self) -> Result<ZoneStatus> {
        self.inner.request(|reply| ZoneMessage::Reset { reply }).await?
    }

    /// Most recent register events, newest first.
    pub async fn registers(&self, limit: usize) -> Result<Vec<RegisterEvent>> {
        self.inner
            .request(|reply| ZoneMessage::Registers { limit, reply })
            .await?
    }
}

/// Every zone actor, spawned on demand.
#[derive(Clone)]
pub struct Zones {
    inner: Arc<ZonesInner>,
}

struct ZonesInner {
    store: Arc<dyn KvStore>,
    configs: Arc<dyn IndexStore>,
    chain: Arc<dyn ChainConnector>,
    domains: Domains,
    config: GraphConfig,
    directory: Directory<Namehash, ZoneMessage>,
}

impl Zones {
    pub fn new(
        store: Arc<dyn KvStore>,
        configs: Arc<dyn IndexStore>,
        chain: Arc<dyn ChainConnector>,
        domains: Domains,
        config: GraphConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ZonesInner {
                store,
                configs,
                chain,
                domains,
                config,
                directory: Directory::new(),
            }),
        }
    }

    /// The actor for the zone rooted at `origin`.
    pub async fn get(&self, origin: Namehash) -> Result<ZoneHandle> {
        let inner = &self.inner;
        let handle = inner
            .directory
            .get_or_spawn(&origin, || async {
                let actor = ZoneActor::load(
                    origin,
                    inner.store.clone(),
                    inner.configs.clone(),
                    inner.chain.clone(),
                    inner.domains.clone(),
                )
                .await?;
                let scope = scope(&origin);
                let alarm =
                    Alarm::load(inner.store.clone(), &scope, inner.config.projection_delay).await?;
                Ok(actor::spawn(scope, actor, alarm, &inner.config))
            })
            .await?;
        Ok(ZoneHandle {
            origin,
            inner: handle,
        })
    }

    /// Origins of every zone in the configuration store.
    pub async fn origins(&self) -> Result<Vec<Namehash>> {
        let mut origins = Vec::new();
        for entry in self.inner.configs.list("").await? {
            match entry.key.parse::<Namehash>() {
                Ok(origin) => origins.push(origin),
                Err(error) => {
                    tracing::warn!(key = %entry.key, %error, "skipping zone config with bad key")
                }
            }
        }
        Ok(origins)
    }

    /// Sync every configured zone once.
    ///
    /// Zones whose actor has no configuration yet are loaded first. A zone
    /// that fails is reported with an error status; the sweep goes on.
    pub async fn sync_all(&self) -> Result<Vec<(Namehash, ZoneStatus)>> {
        let mut statuses = Vec::new();
        for origin in self.origins().await? {
            let status = match self.sync_one(origin).await {
                Ok(status) => status,
                Err(error) => {
                    tracing::warn!(zone = %origin, %error, "zone sync failed");
                    ZoneStatus::failed(error.to_string())
                }
            };
            statuses.push((origin, status));
        }
        Ok(statuses)
    }

    async fn sync_one(&self, origin: Namehash) -> Result<ZoneStatus> {
        let zone = self.get(origin).await?;
        if !zone.info().await?.config.is_configured() {
            zone.load().await?;
        }
        zone.sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{keys, IndexedDomain};
    use namegraph_chain::MemoryChain;
    use namegraph_core::{namehash, Address};
    use namegraph_store::{MemoryIndex, MemoryStore};
    use namegraph_testkit::{LogBuilder, CONTRACT};

    struct Fixture {
        chain: MemoryChain,
        configs: Arc<MemoryIndex>,
        index: Arc<MemoryIndex>,
        domains: Domains,
        zones: Zones,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new());
        let configs = Arc::new(MemoryIndex::new());
        let chain = MemoryChain::new();
        let config = GraphConfig::default();
        let domains = Domains::new(store.clone(), index.clone(), config.clone());
        let zones = Zones::new(
            store,
            configs.clone(),
            Arc::new(chain.clone()),
            domains.clone(),
            config,
        );
        Fixture {
            chain,
            configs,
            index,
            domains,
            zones,
        }
    }

    fn eth_config() -> ZoneConfig {
        ZoneConfig {
            rpc_endpoint: "http://node.invalid".into(),
            contract_address: CONTRACT.into(),
            chain_id: "1".into(),
            parent_namehash: Namehash::ZERO,
            origin_namehash: namehash("eth"),
            label: "eth".into(),
            fqn: "eth".into(),
            start_block: 0,
            batch_size: 100,
            confirmation_lag: 10,
            ..ZoneConfig::default()
        }
    }

    async fn configured(f: &Fixture, config: &ZoneConfig) -> ZoneHandle {
        f.configs
            .put_json(&config.origin_namehash.to_string(), config, None)
            .await
            .unwrap();
        let zone = f.zones.get(config.origin_namehash).await.unwrap();
        zone.load().await.unwrap();
        zone
    }

    #[tokio::test]
    async fn test_unconfigured_sync_leaves_status() {
        let f = fixture();
        let zone = f.zones.get(namehash("eth")).await.unwrap();

        let err = zone.sync().await.unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
        assert_eq!(zone.status().await.unwrap().state, ZoneState::Idle);
        assert!(f.chain.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_hides_endpoint_and_registers_origin() {
        let f = fixture();
        let zone = configured(&f, &eth_config()).await;

        let info = zone.info().await.unwrap();
        assert_eq!(info.config.rpc_endpoint, crate::config::HIDDEN_ENDPOINT);
        assert_eq!(info.config.contract_address, CONTRACT);

        let origin = f.domains.get(namehash("eth")).await.unwrap();
        assert_eq!(origin.get().await.unwrap().unwrap().fqn, "eth");
    }

    #[tokio::test]
    async fn test_sync_registers_and_transfers() {
        let f = fixture();
        let zone = configured(&f, &eth_config()).await;
        let owner = Address::from_bytes([0xaa; 20]);
        let foo = namehash("foo.eth");

        f.chain.push_log(LogBuilder::new(5).register(namehash("eth"), "foo")).await;
        f.chain
            .push_log(LogBuilder::new(5).index(1).transfer(foo, Address::ZERO, owner))
            .await;
        f.chain.set_head(60).await;

        let status = zone.sync().await.unwrap();
        assert_eq!(status.state, ZoneState::Synced);
        assert_eq!(status.current_block, 60);
        assert_eq!(status.safe_block, 50);
        assert_eq!(status.target_block, 50);
        assert_eq!(status.remaining, 0);
        assert_eq!(f.chain.requests().await, vec![(0, 50)]);

        let domain = f.domains.get(foo).await.unwrap();
        assert_eq!(domain.get().await.unwrap().unwrap().fqn, "foo.eth");
        assert_eq!(domain.owner().await.unwrap(), Some(owner));
        domain.flush().await.unwrap();

        let indexed: IndexedDomain = f.index.get_json(&keys::domain(foo)).await.unwrap().unwrap();
        assert_eq!(indexed.owner, Some(owner));
        assert_eq!(zone.registers(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batches_advance_head() {
        let f = fixture();
        let config = ZoneConfig {
            batch_size: 20,
            ..eth_config()
        };
        let zone = configured(&f, &config).await;
        f.chain.set_head(60).await;

        assert_eq!(zone.sync().await.unwrap().remaining, 30);
        assert_eq!(zone.sync().await.unwrap().remaining, 10);
        assert_eq!(zone.sync().await.unwrap().remaining, 0);
        assert_eq!(
            f.chain.requests().await,
            vec![(0, 20), (20, 40), (40, 50)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_syncs_run_in_turn() {
        let f = fixture();
        let zone = configured(&f, &eth_config()).await;
        f.chain.push_log(LogBuilder::new(5).register(namehash("eth"), "foo")).await;
        f.chain.push_log(LogBuilder::new(150).register(namehash("eth"), "bar")).await;
        f.chain.set_head(210).await;

        let (a, b) = tokio::join!(zone.sync(), zone.sync());
        let mut targets = vec![a.unwrap().target_block, b.unwrap().target_block];
        targets.sort_unstable();
        assert_eq!(targets, vec![100, 200]);
        assert_eq!(f.chain.requests().await, vec![(0, 100), (100, 200)]);

        let status = zone.status().await.unwrap();
        assert_eq!(status.target_block, 200);
        assert_eq!(status.remaining, 0);
        for name in ["foo.eth", "bar.eth"] {
            let domain = f.domains.get(namehash(name)).await.unwrap();
            assert_eq!(domain.get().await.unwrap().unwrap().fqn, name);
        }
    }

    #[tokio::test]
    async fn test_unknown_parent_fails_without_progress() {
        let f = fixture();
        let zone = configured(&f, &eth_config()).await;
        f.chain.push_log(LogBuilder::new(3).register(namehash("nope"), "x")).await;
        f.chain.set_head(60).await;

        let err = zone.sync().await.unwrap_err();
        assert!(matches!(err, GraphError::ParentNotFound(_)));
        let status = zone.status().await.unwrap();
        assert_eq!(status.state, ZoneState::Error);
        assert!(status.error.is_some());

        // Cursor unchanged: the same range is requested again.
        let _ = zone.sync().await;
        assert_eq!(f.chain.requests().await, vec![(0, 50), (0, 50)]);
    }

    #[tokio::test]
    async fn test_unknown_topic_aborts_batch() {
        let f = fixture();
        let zone = configured(&f, &eth_config()).await;
        let mut log = LogBuilder::new(2).register(namehash("eth"), "early");
        f.chain.push_log(log.clone()).await;
        log.topics[0] = format!("0x{}", "11".repeat(32));
        log.block_number = "0x4".into();
        f.chain.push_log(log).await;
        f.chain.set_head(60).await;

        assert!(matches!(
            zone.sync().await,
            Err(GraphError::Chain(namegraph_chain::ChainError::UnknownEvent { .. }))
        ));
        // Decoding precedes application, so nothing was registered.
        let early = f.domains.get(namehash("early.eth")).await.unwrap();
        assert!(early.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_behind_chain_is_synced_without_fetch() {
        let f = fixture();
        let config = ZoneConfig {
            start_block: 100,
            ..eth_config()
        };
        let zone = configured(&f, &config).await;
        f.chain.set_head(50).await;

        let status = zone.sync().await.unwrap();
        assert_eq!(status.state, ZoneState::Synced);
        assert_eq!(status.remaining, 0);
        assert!(f.chain.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_rpc_failure_sets_error_status() {
        let f = fixture();
        let zone = configured(&f, &eth_config()).await;
        f.chain.fail_next("connection refused").await;

        assert!(zone.sync().await.is_err());
        let status = zone.status().await.unwrap();
        assert_eq!(status.state, ZoneState::Error);
        assert!(status.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_reset_restarts_from_start_block() {
        let f = fixture();
        let zone = configured(&f, &eth_config()).await;
        f.chain.set_head(60).await;
        zone.sync().await.unwrap();

        let status = zone.reset().await.unwrap();
        assert_eq!(status.state, ZoneState::Idle);
        zone.sync().await.unwrap();
        assert_eq!(f.chain.requests().await, vec![(0, 50), (0, 50)]);
    }

    #[tokio::test]
    async fn test_sync_all_reports_each_zone() {
        let f = fixture();
        f.configs
            .put_json(&namehash("eth").to_string(), &eth_config(), None)
            .await
            .unwrap();
        let broken = ZoneConfig {
            rpc_endpoint: String::new(),
            origin_namehash: namehash("xyz"),
            label: "xyz".into(),
            fqn: "xyz".into(),
            ..eth_config()
        };
        f.configs
            .put_json(&namehash("xyz").to_string(), &broken, None)
            .await
            .unwrap();
        f.chain.set_head(60).await;

        let statuses = f.zones.sync_all().await.unwrap();
        assert_eq!(statuses.len(), 2);
        for (origin, status) in statuses {
            if origin == namehash("eth") {
                assert_eq!(status.state, ZoneState::Synced);
            } else {
                assert_eq!(status.state, ZoneState::Error);
            }
        }
    }
}
