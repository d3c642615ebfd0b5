//! Note actor: the revision-ordered commit history of one issuer.
//!
//! Publishing does not check signatures; the note stores whatever decodes.
//! Its projection only links a note to a signer's account when the signer
//! can be recovered.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use namegraph_core::{now_millis, Address, Commit, PublicKey};
use namegraph_store::{IndexStore, IndexStoreExt, KvStore, ListOptions};

use crate::actor::{self, Actor, ActorHandle, Alarm};
use crate::config::GraphConfig;
use crate::content::ContentFetcher;
use crate::directory::Directory;
use crate::error::Result;
use crate::resolver::{keys, AddrMetadata, NoteEntry};

const COMMIT_PREFIX: &str = "commit:";

/// Storage scope of a note actor.
pub fn scope(address: &Address) -> String {
    format!("note:{}", address)
}

fn commit_key(rev: u64) -> String {
    format!("{}{:020}", COMMIT_PREFIX, rev)
}

/// Summary of a note's issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteAccount {
    /// `account:{address}`.
    pub id: String,
    pub address: Address,
    /// Issuer key of the latest commit.
    pub publickey: Option<PublicKey>,
}

/// Requests served by a note actor.
pub enum NoteMessage {
    Account {
        reply: oneshot::Sender<Result<NoteAccount>>,
    },
    Publish {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<Commit>>,
    },
    Commits {
        rev: Option<u64>,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<Commit>>>,
    },
}

/// Authoritative commit history of one address.
pub struct NoteActor {
    address: Address,
    scope: String,
    store: Arc<dyn KvStore>,
    index: Arc<dyn IndexStore>,
    content: Arc<dyn ContentFetcher>,
}

impl NoteActor {
    pub fn new(
        address: Address,
        store: Arc<dyn KvStore>,
        index: Arc<dyn IndexStore>,
        content: Arc<dyn ContentFetcher>,
    ) -> Self {
        Self {
            address,
            scope: scope(&address),
            store,
            index,
            content,
        }
    }

    async fn publish(&mut self, bytes: &[u8], alarm: &mut Alarm) -> Result<Commit> {
        let commit = Commit::decode(bytes)?;
        self.store
            .put(&self.scope, &commit_key(commit.rev), &commit.encode())
            .await?;
        tracing::debug!(address = %self.address, rev = commit.rev, "commit stored");
        alarm.schedule().await?;
        Ok(commit)
    }

    /// Newest commits at or before `rev` (default now).
    async fn commits(&self, rev: Option<u64>, limit: usize) -> Result<Vec<Commit>> {
        let rev = rev.unwrap_or_else(now_millis);
        let mut options = ListOptions::prefix(COMMIT_PREFIX).reverse().limit(limit);
        if let Some(end) = rev.checked_add(1) {
            options = options.end(commit_key(end));
        }
        let mut commits = Vec::new();
        for (_, bytes) in self.store.list(&self.scope, &options).await? {
            commits.push(Commit::decode(&bytes)?);
        }
        Ok(commits)
    }

    /// Newest commit that is not future-dated.
    async fn current(&self) -> Result<Option<Commit>> {
        Ok(self.commits(None, 1).await?.into_iter().next())
    }

    async fn account(&self) -> Result<NoteAccount> {
        Ok(NoteAccount {
            id: format!("account:{}", self.address),
            address: self.address,
            publickey: self.current().await?.map(|c| c.iss),
        })
    }
}

#[async_trait]
impl Actor for NoteActor {
    type Message = NoteMessage;

    async fn handle(&mut self, message: NoteMessage, alarm: &mut Alarm) {
        match message {
            NoteMessage::Account { reply } => {
                let _ = reply.send(self.account().await);
            }
            NoteMessage::Publish { bytes, reply } => {
                let _ = reply.send(self.publish(&bytes, alarm).await);
            }
            NoteMessage::Commits { rev, limit, reply } => {
                let _ = reply.send(self.commits(rev, limit).await);
            }
        }
    }

    async fn project(&mut self) -> Result<()> {
        let Some(commit) = self.current().await? else {
            return Ok(());
        };
        let addr = self.address;
        let channel = commit.channel();

        let entry: NoteEntry = (commit.ptr.to_string(), commit.rev, channel);
        self.index.put_json(&keys::note(addr), &entry, None).await?;
        self.index
            .put(&keys::account(addr), commit.iss.to_hex().as_bytes(), None)
            .await?;

        let (Some(topic), Some(channel)) = (commit.sub.as_deref(), channel) else {
            tracing::debug!(address = %addr, rev = commit.rev, "note projected");
            return Ok(());
        };
        let signer = match commit.signer() {
            Ok(signer) => signer,
            Err(error) => {
                tracing::debug!(address = %addr, %error, "no recoverable signer, skipping channel entries");
                return Ok(());
            }
        };
        let act = signer.address();
        let metadata = serde_json::to_value(AddrMetadata { addr })?;
        let addr_hex = addr.to_hex();

        self.index
            .put(&keys::accounts(channel, act), addr_hex.as_bytes(), Some(&metadata))
            .await?;
        self.index
            .put(&keys::account(act), signer.to_hex().as_bytes(), None)
            .await?;
        self.index
            .put(&keys::channels(act, channel), addr_hex.as_bytes(), Some(&metadata))
            .await?;
        self.index
            .put(&keys::channel(channel), topic.as_bytes(), None)
            .await?;

        match self.content.fetch(&commit.ptr).await {
            Ok(Some(content)) => {
                self.index
                    .put(&keys::metadata(act, channel), &content, None)
                    .await?;
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(address = %addr, ptr = %commit.ptr, %error, "content fetch failed");
            }
        }

        tracing::debug!(address = %addr, rev = commit.rev, %channel, signer = %act, "note projected");
        Ok(())
    }
}

/// Address of a note actor.
#[derive(Clone)]
pub struct NoteHandle {
    address: Address,
    inner: ActorHandle<NoteMessage>,
}

impl NoteHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn account(&self) -> Result<NoteAccount> {
        self.inner.request(|reply| NoteMessage::Account { reply }).await?
    }

    /// Store an encoded commit issued by this note's address.
    pub async fn publish(&self, bytes: impl Into<Vec<u8>>) -> Result<Commit> {
        let bytes = bytes.into();
        self.inner
            .request(|reply| NoteMessage::Publish { bytes, reply })
            .await?
    }

    /// Newest commit at or before `rev`.
    pub async fn commit(&self, rev: Option<u64>) -> Result<Option<Commit>> {
        Ok(self.commits(rev, 1).await?.into_iter().next())
    }

    /// Newest commits at or before `rev`, newest first.
    pub async fn commits(&self, rev: Option<u64>, limit: usize) -> Result<Vec<Commit>> {
        self.inner
            .request(|reply| NoteMessage::Commits { rev, limit, reply })
            .await?
    }

    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// Every note actor, spawned on demand.
#[derive(Clone)]
pub struct Notes {
    inner: Arc<NotesInner>,
}

struct NotesInner {
    store: Arc<dyn KvStore>,
    index: Arc<dyn IndexStore>,
    content: Arc<dyn ContentFetcher>,
    config: GraphConfig,
    directory: Directory<Address, NoteMessage>,
}

impl Notes {
    pub fn new(
        store: Arc<dyn KvStore>,
        index: Arc<dyn IndexStore>,
        content: Arc<dyn ContentFetcher>,
        config: GraphConfig,
    ) -> Self {
        Self {
            inner: Arc::new(NotesInner {
                store,
                index,
                content,
                config,
                directory: Directory::new(),
            }),
        }
    }

    /// The actor for `address`.
    pub async fn get(&self, address: Address) -> Result<NoteHandle> {
        let inner = &self.inner;
        let handle = inner
            .directory
            .get_or_spawn(&address, || async {
                let actor = NoteActor::new(
                    address,
                    inner.store.clone(),
                    inner.index.clone(),
                    inner.content.clone(),
                );
                let scope = scope(&address);
                let alarm =
                    Alarm::load(inner.store.clone(), &scope, inner.config.projection_delay).await?;
                Ok(actor::spawn(scope, actor, alarm, &inner.config))
            })
            .await?;
        Ok(NoteHandle {
            address,
            inner: handle,
        })
    }

    pub async fn flush_all(&self) -> Result<()> {
        self.inner.directory.flush_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContent;
    use crate::error::GraphError;
    use crate::resolver::Resolver;
    use namegraph_core::{namehash, Keypair, Pointer};
    use namegraph_store::{MemoryIndex, MemoryStore};

    const CID: &str = "bafybeihe67oiezjclcok2toyvbypldy4rhe4jybc6kydf75cnvvu2424zu";

    struct Fixture {
        notes: Notes,
        index: Arc<MemoryIndex>,
        content: Arc<MemoryContent>,
    }

    fn fixture() -> Fixture {
        let index = Arc::new(MemoryIndex::new());
        let content = Arc::new(MemoryContent::new());
        let notes = Notes::new(
            Arc::new(MemoryStore::new()),
            index.clone(),
            content.clone(),
            GraphConfig::default(),
        );
        Fixture {
            notes,
            index,
            content,
        }
    }

    fn signed(keypair: &Keypair, rev: u64, topic: Option<&str>) -> Commit {
        let ptr = Pointer::parse(CID).unwrap();
        let mut commit = Commit::create(&keypair.public_key(), ptr, rev, topic).unwrap();
        commit.sign_with(keypair, topic).unwrap();
        commit
    }

    #[tokio::test]
    async fn test_publish_and_list_commits() {
        let f = fixture();
        let keypair = Keypair::from_seed(&[1; 32]);
        let note = f.notes.get(keypair.address()).await.unwrap();

        for rev in [1000, 3000, 2000] {
            note.publish(signed(&keypair, rev, None).encode()).await.unwrap();
        }

        let revs: Vec<u64> = note
            .commits(None, 10)
            .await
            .unwrap()
            .iter()
            .map(|c| c.rev)
            .collect();
        assert_eq!(revs, vec![3000, 2000, 1000]);

        assert_eq!(note.commit(Some(2500)).await.unwrap().unwrap().rev, 2000);
        assert_eq!(note.commit(Some(2000)).await.unwrap().unwrap().rev, 2000);
        assert!(note.commit(Some(999)).await.unwrap().is_none());

        let account = note.account().await.unwrap();
        assert_eq!(account.id, format!("account:{}", keypair.address()));
        assert_eq!(account.publickey, Some(keypair.public_key()));
    }

    #[tokio::test]
    async fn test_publish_rejects_garbage() {
        let f = fixture();
        let keypair = Keypair::from_seed(&[1; 32]);
        let note = f.notes.get(keypair.address()).await.unwrap();

        assert!(matches!(
            note.publish(vec![0xff, 0x00]).await,
            Err(GraphError::Core(_))
        ));
        assert!(note.commits(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_future_revision_is_not_current() {
        let f = fixture();
        let keypair = Keypair::from_seed(&[1; 32]);
        let note = f.notes.get(keypair.address()).await.unwrap();

        note.publish(signed(&keypair, 1000, None).encode()).await.unwrap();
        let future = now_millis() + 3_600_000;
        note.publish(signed(&keypair, future, None).encode()).await.unwrap();
        note.flush().await.unwrap();

        assert_eq!(note.commits(Some(u64::MAX), 10).await.unwrap().len(), 2);
        assert_eq!(note.commit(None).await.unwrap().unwrap().rev, 1000);
        assert_eq!(
            note.account().await.unwrap().publickey,
            Some(keypair.public_key())
        );

        let resolver = Resolver::new(f.index.clone());
        let view = resolver.get_note(&keypair.address(), None).await.unwrap().unwrap();
        assert_eq!(view.rev, Some(1000));
    }

    #[tokio::test]
    async fn test_unsigned_commit_is_stored() {
        let f = fixture();
        let keypair = Keypair::from_seed(&[1; 32]);
        let ptr = Pointer::parse(CID).unwrap();
        let commit = Commit::create(&keypair.public_key(), ptr, 5, None).unwrap();
        let note = f.notes.get(keypair.address()).await.unwrap();

        note.publish(commit.encode()).await.unwrap();
        note.flush().await.unwrap();

        let resolver = Resolver::new(f.index.clone());
        let view = resolver.get_note(&keypair.address(), None).await.unwrap().unwrap();
        assert_eq!(view.rev, Some(5));
        assert_eq!(view.ptr.as_deref(), Some(CID));
    }

    #[tokio::test]
    async fn test_channel_projection() {
        let f = fixture();
        let keypair = Keypair::from_seed(&[7; 32]);
        let commit = signed(&keypair, 1000, Some("profile.social"));
        f.content.insert(&commit.ptr, br#"{"name":"alice"}"#.to_vec());

        let note = f.notes.get(commit.addr()).await.unwrap();
        note.publish(commit.encode()).await.unwrap();
        note.flush().await.unwrap();

        let channel = namehash("profile.social");
        let act = keypair.address();
        let resolver = Resolver::new(f.index.clone());

        let view = resolver.get_note(&act, Some(&channel)).await.unwrap().unwrap();
        assert_eq!(view.address, commit.addr());
        assert_eq!(view.channel, Some(channel));
        assert_eq!(
            resolver.get_channel(&channel).await.unwrap().as_deref(),
            Some("profile.social")
        );
        assert_eq!(
            resolver.get_account(&act).await.unwrap().publickey,
            Some(keypair.public_key().to_hex())
        );
        assert_eq!(
            resolver.get_account(&commit.addr()).await.unwrap().publickey,
            Some(commit.iss.to_hex())
        );
        let notes = resolver
            .get_notes("accounts", &channel.to_string())
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);

        let layer = resolver.get_metadata_layer(&act, &channel).await.unwrap();
        assert_eq!(layer.get("name").and_then(|v| v.as_str()), Some("alice"));
    }

    #[tokio::test]
    async fn test_content_failure_does_not_fail_projection() {
        let f = fixture();
        let keypair = Keypair::from_seed(&[7; 32]);
        let commit = signed(&keypair, 1000, Some("profile"));
        f.content.set_failing(true);

        let note = f.notes.get(commit.addr()).await.unwrap();
        note.publish(commit.encode()).await.unwrap();
        note.flush().await.unwrap();

        let channel = namehash("profile");
        assert!(f
            .index
            .get(&keys::channels(keypair.address(), channel))
            .await
            .unwrap()
            .is_some());
        assert!(f
            .index
            .get(&keys::metadata(keypair.address(), channel))
            .await
            .unwrap()
            .is_none());
    }
}
