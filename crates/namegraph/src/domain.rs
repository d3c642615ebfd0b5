//! Domain actor: one registered name and its transfer history.
//!
//! The domain record is immutable once set. Ownership is derived: the
//! owner is the recipient of the newest stored transfer. Transfers removed
//! by a reorg are deleted, not tombstoned, so the newest stored transfer is
//! always a live one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use namegraph_core::{Address, DomainRecord, EventScope, Namehash, TransferEvent};
use namegraph_store::{IndexStore, IndexStoreExt, KvStore, KvStoreExt, ListOptions};

use crate::actor::{self, Actor, ActorHandle, Alarm};
use crate::config::GraphConfig;
use crate::directory::Directory;
use crate::error::Result;
use crate::resolver::{keys, IndexedDomain};

const DATA_KEY: &str = "data";

/// Storage scope of a domain actor.
pub fn scope(namehash: &Namehash) -> String {
    format!("domain:{}", namehash)
}

/// Requests served by a domain actor.
pub enum DomainMessage {
    Get {
        reply: oneshot::Sender<Option<DomainRecord>>,
    },
    Init {
        record: DomainRecord,
        reply: oneshot::Sender<Result<DomainRecord>>,
    },
    Transfers {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<TransferEvent>>>,
    },
    Transfer {
        event: TransferEvent,
        reply: oneshot::Sender<Result<TransferEvent>>,
    },
    Owner {
        reply: oneshot::Sender<Result<Option<Address>>>,
    },
}

/// Authoritative state of one domain.
pub struct DomainActor {
    namehash: Namehash,
    scope: String,
    data: Option<DomainRecord>,
    store: Arc<dyn KvStore>,
    index: Arc<dyn IndexStore>,
}

impl DomainActor {
    /// Load a domain's state from `store`.
    pub async fn load(
        namehash: Namehash,
        store: Arc<dyn KvStore>,
        index: Arc<dyn IndexStore>,
    ) -> Result<Self> {
        let scope = scope(&namehash);
        let data = store.get_json(&scope, DATA_KEY).await?;
        Ok(Self {
            namehash,
            scope,
            data,
            store,
            index,
        })
    }

    async fn init(&mut self, record: DomainRecord, alarm: &mut Alarm) -> Result<DomainRecord> {
        if self.data.as_ref() != Some(&record) {
            self.store.put_json(&self.scope, DATA_KEY, &record).await?;
            tracing::debug!(namehash = %self.namehash, fqn = %record.fqn, "domain initialized");
            self.data = Some(record.clone());
        }
        alarm.schedule().await?;
        Ok(record)
    }

    async fn transfer(&mut self, event: TransferEvent, alarm: &mut Alarm) -> Result<TransferEvent> {
        if event.removed {
            self.store.delete(&self.scope, &event.id).await?;
        } else {
            self.store.put_json(&self.scope, &event.id, &event).await?;
        }
        tracing::debug!(
            namehash = %self.namehash,
            id = %event.id,
            to = %event.to,
            removed = event.removed,
            "transfer applied"
        );
        alarm.schedule().await?;
        Ok(event)
    }

    async fn transfers(&self, limit: usize) -> Result<Vec<TransferEvent>> {
        let options = ListOptions::prefix(EventScope::Transfer.prefix())
            .reverse()
            .limit(limit);
        let mut transfers = Vec::new();
        for (_, bytes) in self.store.list(&self.scope, &options).await? {
            transfers.push(serde_json::from_slice(&bytes)?);
        }
        Ok(transfers)
    }

    async fn owner(&self) -> Result<Option<Address>> {
        Ok(self.transfers(1).await?.first().map(|event| event.to))
    }
}

#[async_trait]
impl Actor for DomainActor {
    type Message = DomainMessage;

    async fn handle(&mut self, message: DomainMessage, alarm: &mut Alarm) {
        match message {
            DomainMessage::Get { reply } => {
                let _ = reply.send(self.data.clone());
            }
            DomainMessage::Init { record, reply } => {
                let _ = reply.send(self.init(record, alarm).await);
            }
            DomainMessage::Transfers { limit, reply } => {
                let _ = reply.send(self.transfers(limit).await);
            }
            DomainMessage::Transfer { event, reply } => {
                let _ = reply.send(self.transfer(event, alarm).await);
            }
            DomainMessage::Owner { reply } => {
                let _ = reply.send(self.owner().await);
            }
        }
    }

    /// Project the domain into the resolver index.
    ///
    /// Leaves exactly one `domains:{owner}` entry for this namehash.
    async fn project(&mut self) -> Result<()> {
        let Some(data) = self.data.clone() else {
            return Ok(());
        };
        let owner = self.owner().await?;
        let indexed: Option<IndexedDomain> = self.index.get_json(&keys::domain(data.namehash)).await?;

        if let Some(old) = indexed.and_then(|i| i.owner) {
            if Some(old) != owner {
                self.index.delete(&keys::domains(old, data.namehash)).await?;
            }
        }

        let entry = IndexedDomain {
            parent: data.parent,
            label: data.label,
            fqn: data.fqn,
            owner,
        };
        let metadata = serde_json::to_value(&entry)?;

        self.index
            .put(&keys::domains(entry.parent, data.namehash), b"", Some(&metadata))
            .await?;
        if let Some(owner) = owner {
            self.index
                .put(&keys::domains(owner, data.namehash), b"", Some(&metadata))
                .await?;
        }
        self.index
            .put_json(&keys::domain(data.namehash), &entry, None)
            .await?;

        tracing::debug!(namehash = %data.namehash, owner = ?owner, "domain projected");
        Ok(())
    }
}

/// Address of a domain actor.
#[derive(Clone)]
pub struct DomainHandle {
    namehash: Namehash,
    inner: ActorHandle<DomainMessage>,
}

impl DomainHandle {
    pub fn namehash(&self) -> Namehash {
        self.namehash
    }

    /// The domain record, if registered.
    pub async fn get(&self) -> Result<Option<DomainRecord>> {
        self.inner.request(|reply| DomainMessage::Get { reply }).await
    }

    /// Set the domain record. Idempotent.
    pub async fn init(&self, record: DomainRecord) -> Result<DomainRecord> {
        self.inner
            .request(|reply| DomainMessage::Init { record, reply })
            .await?
    }

    /// Stored transfers, newest first.
    pub async fn transfers(&self, limit: usize) -> Result<Vec<TransferEvent>> {
        self.inner
            .request(|reply| DomainMessage::Transfers { limit, reply })
            .await?
    }

    /// Apply a transfer, or retract it when `removed`.
    pub async fn transfer(&self, event: TransferEvent) -> Result<TransferEvent> {
        self.inner
            .request(|reply| DomainMessage::Transfer { event, reply })
            .await?
    }

    /// Recipient of the newest transfer.
    pub async fn owner(&self) -> Result<Option<Address>> {
        self.inner.request(|reply| DomainMessage::Owner { reply }).await?
    }

    /// Run any pending projection now.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// Every domain actor, spawned on demand.
#[derive(Clone)]
pub struct Domains {
    inner: Arc<DomainsInner>,
}

struct DomainsInner {
    store: Arc<dyn KvStore>,
    index: Arc<dyn IndexStore>,
    config: GraphConfig,
    directory: Directory<Namehash, DomainMessage>,
}

impl Domains {
    pub fn new(store: Arc<dyn KvStore>, index: Arc<dyn IndexStore>, config: GraphConfig) -> Self {
        Self {
            inner: Arc::new(DomainsInner {
                store,
                index,
                config,
                directory: Directory::new(),
            }),
        }
    }

    /// The actor for `namehash`.
    pub async fn get(&self, namehash: Namehash) -> Result<DomainHandle> {
        let inner = &self.inner;
        let handle = inner
            .directory
            .get_or_spawn(&namehash, || async {
                let actor =
                    DomainActor::load(namehash, inner.store.clone(), inner.index.clone()).await?;
                let scope = scope(&namehash);
                let alarm =
                    Alarm::load(inner.store.clone(), &scope, inner.config.projection_delay).await?;
                Ok(actor::spawn(scope, actor, alarm, &inner.config))
            })
            .await?;
        Ok(DomainHandle {
            namehash,
            inner: handle,
        })
    }

    /// Flush every live domain actor.
    pub async fn flush_all(&self) -> Result<()> {
        self.inner.directory.flush_all().await
    }
}
