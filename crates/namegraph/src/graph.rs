//! The Graph: unified API for Namegraph.
//!
//! The Graph wires storage, the chain connector and the content fetcher
//! into the three actor registries and exposes the resolver's read views.

use std::path::Path;
use std::sync::Arc;

use namegraph_chain::{ChainConnector, HttpConnector};
use namegraph_core::{decode_hex, namehash, Address, Commit, CommitView, Namehash};
use namegraph_store::{IndexStore, KvStore, MemoryIndex, MemoryStore, SqliteStore};

use crate::config::{GraphConfig, ZoneStatus};
use crate::content::{ContentFetcher, GatewayFetcher};
use crate::domain::{DomainHandle, Domains};
use crate::error::{GraphError, Result};
use crate::note::{NoteHandle, Notes};
use crate::resolver::Resolver;
use crate::zone::{ZoneHandle, Zones};

/// Index namespace holding resolver entries.
pub const RESOLVER_NAMESPACE: &str = "resolver";

/// Index namespace holding zone configurations.
pub const ZONES_NAMESPACE: &str = "zones";

/// Assembles a [`Graph`]. Unset parts default to in-memory storage, the
/// HTTP chain connector and the configured content gateway.
#[derive(Default)]
pub struct GraphBuilder {
    config: GraphConfig,
    store: Option<Arc<dyn KvStore>>,
    index: Option<Arc<dyn IndexStore>>,
    zones: Option<Arc<dyn IndexStore>>,
    chain: Option<Arc<dyn ChainConnector>>,
    content: Option<Arc<dyn ContentFetcher>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Actor state storage.
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolver index.
    pub fn index(mut self, index: Arc<dyn IndexStore>) -> Self {
        self.index = Some(index);
        self
    }

    /// Zone configuration store, keyed by origin namehash.
    pub fn zones(mut self, zones: Arc<dyn IndexStore>) -> Self {
        self.zones = Some(zones);
        self
    }

    pub fn chain(mut self, chain: Arc<dyn ChainConnector>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn content(mut self, content: Arc<dyn ContentFetcher>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn build(self) -> Result<Graph> {
        let config = self.config;
        let store: Arc<dyn KvStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let index: Arc<dyn IndexStore> = match self.index {
            Some(index) => index,
            None => Arc::new(MemoryIndex::new()),
        };
        let configs: Arc<dyn IndexStore> = match self.zones {
            Some(zones) => zones,
            None => Arc::new(MemoryIndex::new()),
        };
        let chain: Arc<dyn ChainConnector> = match self.chain {
            Some(chain) => chain,
            None => Arc::new(HttpConnector::new(config.rpc_timeout)?),
        };
        let content: Arc<dyn ContentFetcher> = match self.content {
            Some(content) => content,
            None => Arc::new(GatewayFetcher::new(
                config.content_gateway.clone(),
                config.rpc_timeout,
            )?),
        };

        let domains = Domains::new(store.clone(), index.clone(), config.clone());
        let notes = Notes::new(store.clone(), index.clone(), content, config.clone());
        let zones = Zones::new(store, configs.clone(), chain, domains.clone(), config.clone());

        Ok(Graph {
            config,
            resolver: Resolver::new(index),
            configs,
            domains,
            notes,
            zones,
        })
    }
}

/// The main Graph struct.
///
/// Provides a unified API for:
/// - Looking up domain, note and zone actors by stable id
/// - Publishing signed commits
/// - Sweeping every configured zone
/// - Reading the resolver index
pub struct Graph {
    config: GraphConfig,
    resolver: Resolver,
    configs: Arc<dyn IndexStore>,
    domains: Domains,
    notes: Notes,
    zones: Zones,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Open a graph persisted in one SQLite database.
    pub fn open(path: impl AsRef<Path>, config: GraphConfig) -> Result<Self> {
        let sqlite = SqliteStore::open(path)?;
        Self::builder()
            .config(config)
            .index(Arc::new(sqlite.index(RESOLVER_NAMESPACE)))
            .zones(Arc::new(sqlite.index(ZONES_NAMESPACE)))
            .store(Arc::new(sqlite))
            .build()
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Zone configuration store.
    pub fn zone_configs(&self) -> &Arc<dyn IndexStore> {
        &self.configs
    }

    /// Namehash of a fully qualified name.
    pub fn namehash(&self, fqn: &str) -> Namehash {
        namehash(fqn)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Actors
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn domain(&self, namehash: Namehash) -> Result<DomainHandle> {
        self.domains.get(namehash).await
    }

    pub async fn note(&self, address: Address) -> Result<NoteHandle> {
        self.notes.get(address).await
    }

    pub async fn zone(&self, origin: Namehash) -> Result<ZoneHandle> {
        self.zones.get(origin).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish an encoded commit to its issuer's note.
    ///
    /// Commits whose signature does not authorize the issuer are rejected
    /// before they reach the note.
    pub async fn publish(&self, bytes: &[u8]) -> Result<CommitView> {
        let commit = Commit::decode(bytes)?;
        if !commit.validate() {
            return Err(GraphError::InvalidCommit(commit.id()));
        }
        let note = self.notes.get(commit.addr()).await?;
        let stored = note.publish(commit.encode()).await?;
        tracing::info!(id = %stored.id(), ptr = %stored.ptr, "commit published");
        Ok(stored.view())
    }

    /// [`Graph::publish`] from hex, with or without `0x`.
    pub async fn publish_hex(&self, hex: &str) -> Result<CommitView> {
        self.publish(&decode_hex(hex.trim())?).await
    }

    /// Sync every configured zone once.
    pub async fn sync_zones(&self) -> Result<Vec<(Namehash, ZoneStatus)>> {
        self.zones.sync_all().await
    }

    /// Run every pending projection now.
    pub async fn flush(&self) -> Result<()> {
        self.domains.flush_all().await?;
        self.notes.flush_all().await
    }
}
