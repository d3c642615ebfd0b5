//! Lookup of live actors by stable id, spawning them on first use.
//!
//! The directory only keeps weak references: an actor stops once the last
//! caller drops its handle, and the next lookup loads it again from storage.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::actor::{ActorHandle, WeakActorHandle};
use crate::error::Result;

/// Entry count below which stopped entries are not pruned.
const PRUNE_FLOOR: usize = 256;

type Slot<M> = Arc<Mutex<Option<WeakActorHandle<M>>>>;

struct Slots<K, M> {
    map: HashMap<K, Slot<M>>,
    prune_at: usize,
}

impl<K, M> Slots<K, M> {
    /// Drop entries nobody is looking up whose actor has finished.
    fn prune(&mut self) {
        self.map.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot
                    .try_lock()
                    .map_or(true, |entry| entry.as_ref().is_some_and(|w| w.is_running()))
        });
        self.prune_at = (self.map.len() * 2).max(PRUNE_FLOOR);
    }
}

/// Actors of one kind, keyed by identity.
pub struct Directory<K, M> {
    slots: Mutex<Slots<K, M>>,
}

impl<K, M> Default for Directory<K, M> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                prune_at: PRUNE_FLOOR,
            }),
        }
    }
}

impl<K, M> Directory<K, M>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    M: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// The live actor for `key`, spawning it with `spawn` if needed.
    ///
    /// Lookups of one key are serialized, so at most one actor ever runs per
    /// key; lookups of other keys do not wait. An actor that is still
    /// firing its final projection is awaited before its successor loads.
    pub async fn get_or_spawn<F, Fut>(&self, key: &K, spawn: F) -> Result<ActorHandle<M>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ActorHandle<M>>>,
    {
        let slot = self.slot(key).await;
        let mut entry = slot.lock().await;

        if let Some(previous) = entry.as_ref() {
            if let Some(handle) = previous.upgrade() {
                if !handle.is_closed() {
                    return Ok(handle);
                }
            }
            previous.stopped().await;
        }

        match spawn().await {
            Ok(handle) => {
                *entry = Some(handle.downgrade());
                Ok(handle)
            }
            Err(error) => {
                tracing::error!(actor = %key, %error, "failed to load actor");
                Err(error)
            }
        }
    }

    async fn slot(&self, key: &K) -> Slot<M> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.map.get(key) {
            return slot.clone();
        }

        if slots.map.len() >= slots.prune_at {
            slots.prune();
        }

        let slot: Slot<M> = Arc::new(Mutex::new(None));
        slots.map.insert(key.clone(), slot.clone());
        slot
    }

    async fn entries(&self) -> Vec<WeakActorHandle<M>> {
        let slots: Vec<Slot<M>> = self.slots.lock().await.map.values().cloned().collect();
        let mut entries = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(weak) = slot.lock().await.as_ref() {
                entries.push(weak.clone());
            }
        }
        entries
    }

    /// Handles of every actor someone still holds.
    pub async fn handles(&self) -> Vec<ActorHandle<M>> {
        self.entries()
            .await
            .iter()
            .filter_map(|weak| weak.upgrade())
            .filter(|h| !h.is_closed())
            .collect()
    }

    /// Number of actor tasks still running.
    pub async fn live(&self) -> usize {
        self.entries()
            .await
            .iter()
            .filter(|weak| weak.is_running())
            .count()
    }

    /// Flush every held actor and wait for released ones to finish their
    /// final projection. Returns the first failure.
    pub async fn flush_all(&self) -> Result<()> {
        let mut first_error = None;
        for weak in self.entries().await {
            match weak.upgrade() {
                Some(handle) if !handle.is_closed() => {
                    if let Err(error) = handle.flush().await {
                        first_error.get_or_insert(error);
                    }
                }
                _ => weak.stopped().await,
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{self, Actor, Alarm};
    use crate::config::GraphConfig;
    use async_trait::async_trait;
    use namegraph_store::{KvStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Schedules a projection on every touch; projecting is slow.
    struct Recorder {
        projections: Arc<AtomicUsize>,
    }

    enum RecorderMessage {
        Touch(oneshot::Sender<Result<()>>),
    }

    #[async_trait]
    impl Actor for Recorder {
        type Message = RecorderMessage;

        async fn handle(&mut self, message: RecorderMessage, alarm: &mut Alarm) {
            match message {
                RecorderMessage::Touch(reply) => {
                    let _ = reply.send(alarm.schedule().await);
                }
            }
        }

        async fn project(&mut self) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.projections.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        store: Arc<dyn KvStore>,
        config: GraphConfig,
        projections: Arc<AtomicUsize>,
        spawned: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                config: GraphConfig {
                    projection_delay: Duration::from_secs(3600),
                    ..GraphConfig::default()
                },
                projections: Arc::new(AtomicUsize::new(0)),
                spawned: Arc::new(AtomicUsize::new(0)),
            }
        }

        async fn start(&self, key: u32) -> Result<ActorHandle<RecorderMessage>> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let scope = format!("recorder:{}", key);
            let alarm = Alarm::load(self.store.clone(), &scope, self.config.projection_delay).await?;
            let actor = Recorder {
                projections: self.projections.clone(),
            };
            Ok(actor::spawn(scope, actor, alarm, &self.config))
        }
    }

    #[tokio::test]
    async fn test_released_actors_stop() {
        let h = Harness::new();
        let directory = Directory::<u32, RecorderMessage>::new();

        let held = directory.get_or_spawn(&0, || h.start(0)).await.unwrap();
        for key in 1..2000 {
            directory.get_or_spawn(&key, || h.start(key)).await.unwrap();
        }
        directory.flush_all().await.unwrap();

        assert_eq!(directory.live().await, 1);
        assert_eq!(directory.handles().await.len(), 1);
        drop(held);
        directory.flush_all().await.unwrap();
        assert_eq!(directory.live().await, 0);

        let mut slots = directory.slots.lock().await;
        slots.prune();
        assert!(slots.map.is_empty());
        assert_eq!(slots.prune_at, PRUNE_FLOOR);
    }

    #[tokio::test]
    async fn test_one_actor_per_key() {
        let h = Harness::new();
        let directory = Directory::<u32, RecorderMessage>::new();

        let (a, b) = tokio::join!(
            directory.get_or_spawn(&7, || h.start(7)),
            directory.get_or_spawn(&7, || h.start(7)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(h.spawned.load(Ordering::SeqCst), 1);
        assert_eq!(a.name(), b.name());
        assert_eq!(directory.live().await, 1);
    }

    #[tokio::test]
    async fn test_cold_load_does_not_block_other_keys() {
        let h = Arc::new(Harness::new());
        let directory = Arc::new(Directory::<u32, RecorderMessage>::new());
        let (release, gate) = oneshot::channel::<()>();

        let slow = {
            let h = h.clone();
            let directory = directory.clone();
            tokio::spawn(async move {
                directory
                    .get_or_spawn(&1, || async move {
                        let _ = gate.await;
                        h.start(1).await
                    })
                    .await
                    .map(|handle| handle.name().to_string())
            })
        };
        tokio::task::yield_now().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(5),
            directory.get_or_spawn(&2, || h.start(2)),
        )
        .await
        .expect("another key's load must not wait")
        .unwrap();
        assert_eq!(fast.name(), "recorder:2");

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap(), "recorder:1");
    }

    #[tokio::test]
    async fn test_successor_waits_for_final_projection() {
        let h = Harness::new();
        let directory = Directory::<u32, RecorderMessage>::new();

        let first = directory.get_or_spawn(&3, || h.start(3)).await.unwrap();
        first.request(RecorderMessage::Touch).await.unwrap().unwrap();
        drop(first);

        let projections = h.projections.clone();
        directory
            .get_or_spawn(&3, || async {
                assert_eq!(projections.load(Ordering::SeqCst), 1);
                h.start(3).await
            })
            .await
            .unwrap();
        assert_eq!(h.spawned.load(Ordering::SeqCst), 2);
    }
}
