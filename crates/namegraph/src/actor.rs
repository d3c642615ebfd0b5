//! Actor runtime.
//!
//! Every entity (domain, note, zone) is a tokio task that owns its state
//! exclusively. Callers talk to it through an [`ActorHandle`]: requests go
//! through a bounded mailbox and answers come back on a oneshot channel, so
//! operations on one entity run strictly one at a time while distinct
//! entities run concurrently.
//!
//! Each actor also owns a single-slot [`Alarm`]. Scheduling while an alarm
//! is pending moves the deadline (latest wins). The deadline is persisted in
//! the actor's scope, so an actor restarted after a crash fires the
//! projection it missed. When the last handle is dropped the actor fires
//! any pending alarm and stops; a [`WeakActorHandle`] does not keep it
//! alive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use namegraph_core::now_millis;
use namegraph_store::{KvStore, KvStoreExt};

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};

/// Key holding the persisted alarm deadline inside an actor's scope.
pub const ALARM_KEY: &str = "alarm";

/// Behaviour of one actor kind.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Requests this actor accepts.
    type Message: Send + 'static;

    /// Serve one request. Replies travel inside the message.
    async fn handle(&mut self, message: Self::Message, alarm: &mut Alarm);

    /// Push derived state to the index. Called when the alarm fires.
    async fn project(&mut self) -> Result<()>;
}

/// What travels through a mailbox.
pub enum Envelope<M> {
    Message(M),
    /// Run any pending projection now and report its outcome.
    Flush(oneshot::Sender<Result<()>>),
}

/// A single-slot, persisted wake-up.
pub struct Alarm {
    store: Arc<dyn KvStore>,
    scope: String,
    delay: Duration,
    /// Deadline in unix milliseconds.
    deadline: Option<u64>,
}

impl Alarm {
    /// Load the alarm persisted in `scope`, if any.
    pub async fn load(store: Arc<dyn KvStore>, scope: impl Into<String>, delay: Duration) -> Result<Self> {
        let scope = scope.into();
        let deadline = store.get_json::<u64>(&scope, ALARM_KEY).await?;
        Ok(Self {
            store,
            scope,
            delay,
            deadline,
        })
    }

    /// Schedule after the configured debounce delay.
    pub async fn schedule(&mut self) -> Result<()> {
        self.schedule_in(self.delay).await
    }

    /// Schedule after `delay`, replacing any pending deadline.
    pub async fn schedule_in(&mut self, delay: Duration) -> Result<()> {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let deadline = now_millis().saturating_add(delay_ms);
        self.store.put_json(&self.scope, ALARM_KEY, &deadline).await?;
        self.deadline = Some(deadline);
        Ok(())
    }

    /// Drop the pending deadline.
    pub async fn clear(&mut self) -> Result<()> {
        if self.deadline.take().is_some() {
            self.store.delete(&self.scope, ALARM_KEY).await?;
        }
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.deadline.is_some()
    }

    /// Deadline in unix milliseconds.
    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    fn instant(&self) -> Option<Instant> {
        self.deadline.map(|deadline| {
            let wait = deadline.saturating_sub(now_millis());
            Instant::now() + Duration::from_millis(wait)
        })
    }
}

/// Cloneable address of a running actor. The actor lives as long as any
/// handle does.
pub struct ActorHandle<M> {
    name: Arc<str>,
    tx: mpsc::Sender<Envelope<M>>,
    stopped: watch::Receiver<()>,
}

impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<M: Send + 'static> ActorHandle<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A reference that does not keep the actor alive.
    pub fn downgrade(&self) -> WeakActorHandle<M> {
        WeakActorHandle {
            name: self.name.clone(),
            tx: self.tx.downgrade(),
            stopped: self.stopped.clone(),
        }
    }

    /// Send a request built around a reply channel and wait for the answer.
    pub async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> M) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Message(make(reply)))
            .await
            .map_err(|_| self.stopped_error())?;
        rx.await.map_err(|_| self.stopped_error())
    }

    /// Run any pending projection now.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Flush(reply))
            .await
            .map_err(|_| self.stopped_error())?;
        rx.await.map_err(|_| self.stopped_error())?
    }

    fn stopped_error(&self) -> GraphError {
        GraphError::ActorStopped(self.name.to_string())
    }
}

/// Address of an actor that may have stopped.
pub struct WeakActorHandle<M> {
    name: Arc<str>,
    tx: mpsc::WeakSender<Envelope<M>>,
    stopped: watch::Receiver<()>,
}

impl<M> Clone for WeakActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<M> WeakActorHandle<M> {
    /// A handle, unless every strong handle is already gone.
    pub fn upgrade(&self) -> Option<ActorHandle<M>> {
        self.tx.upgrade().map(|tx| ActorHandle {
            name: self.name.clone(),
            tx,
            stopped: self.stopped.clone(),
        })
    }

    /// Whether the actor task is still running, possibly firing its final
    /// projection.
    pub fn is_running(&self) -> bool {
        self.stopped.has_changed().is_ok()
    }

    /// Wait until the actor task has finished.
    pub async fn stopped(&self) {
        let mut stopped = self.stopped.clone();
        while stopped.changed().await.is_ok() {}
    }
}

/// Start `actor` on its own task.
pub fn spawn<A: Actor>(
    name: impl Into<String>,
    actor: A,
    alarm: Alarm,
    config: &GraphConfig,
) -> ActorHandle<A::Message> {
    let name: Arc<str> = Arc::from(name.into());
    let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
    let (running, stopped) = watch::channel(());
    let task_name = name.clone();
    let retry_delay = config.retry_delay;
    tokio::spawn(async move {
        run(actor, alarm, rx, task_name, retry_delay).await;
        drop(running);
    });
    ActorHandle { name, tx, stopped }
}

async fn run<A: Actor>(
    mut actor: A,
    mut alarm: Alarm,
    mut rx: mpsc::Receiver<Envelope<A::Message>>,
    name: Arc<str>,
    retry_delay: Duration,
) {
    tracing::debug!(actor = %name, "actor started");

    loop {
        let deadline = alarm.instant();
        let wake = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            biased;

            envelope = rx.recv() => match envelope {
                Some(Envelope::Message(message)) => actor.handle(message, &mut alarm).await,
                Some(Envelope::Flush(reply)) => {
                    let outcome = if alarm.is_set() {
                        fire(&mut actor, &mut alarm, &name, retry_delay).await
                    } else {
                        Ok(())
                    };
                    let _ = reply.send(outcome);
                }
                None => break,
            },

            _ = wake, if deadline.is_some() => {
                let _ = fire(&mut actor, &mut alarm, &name, retry_delay).await;
            }
        }
    }

    if alarm.is_set() {
        let _ = fire(&mut actor, &mut alarm, &name, retry_delay).await;
    }
    tracing::debug!(actor = %name, "actor stopped");
}

/// Run the projection; clear the alarm on success, reschedule on failure.
async fn fire<A: Actor>(
    actor: &mut A,
    alarm: &mut Alarm,
    name: &str,
    retry_delay: Duration,
) -> Result<()> {
    match actor.project().await {
        Ok(()) => alarm.clear().await,
        Err(error) => {
            tracing::warn!(actor = %name, %error, ?retry_delay, "projection failed, rescheduling");
            if let Err(store_error) = alarm.schedule_in(retry_delay).await {
                tracing::error!(actor = %name, error = %store_error, "failed to reschedule projection");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use namegraph_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts projections; fails while `failures` is positive.
    struct Counter {
        projections: Arc<AtomicUsize>,
        failures: usize,
    }

    enum CounterMessage {
        Touch(oneshot::Sender<Result<()>>),
        Ping(oneshot::Sender<u32>),
    }

    #[async_trait]
    impl Actor for Counter {
        type Message = CounterMessage;

        async fn handle(&mut self, message: CounterMessage, alarm: &mut Alarm) {
            match message {
                CounterMessage::Touch(reply) => {
                    let _ = reply.send(alarm.schedule().await);
                }
                CounterMessage::Ping(reply) => {
                    let _ = reply.send(7);
                }
            }
        }

        async fn project(&mut self) -> Result<()> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(GraphError::Content("unavailable".into()));
            }
            self.projections.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(delay: Duration) -> GraphConfig {
        GraphConfig {
            projection_delay: delay,
            retry_delay: Duration::from_secs(3600),
            ..GraphConfig::default()
        }
    }

    async fn start(
        store: Arc<dyn KvStore>,
        failures: usize,
        delay: Duration,
    ) -> (ActorHandle<CounterMessage>, Arc<AtomicUsize>) {
        let projections = Arc::new(AtomicUsize::new(0));
        let actor = Counter {
            projections: projections.clone(),
            failures,
        };
        let config = config(delay);
        let alarm = Alarm::load(store, "counter", config.projection_delay).await.unwrap();
        (spawn("counter", actor, alarm, &config), projections)
    }

    #[tokio::test]
    async fn test_request_reply() {
        let (handle, _) = start(Arc::new(MemoryStore::new()), 0, Duration::ZERO).await;
        assert_eq!(handle.request(CounterMessage::Ping).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_debounced_alarm_fires_once_on_flush() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (handle, projections) = start(store.clone(), 0, Duration::from_secs(3600)).await;

        for _ in 0..3 {
            handle.request(CounterMessage::Touch).await.unwrap().unwrap();
        }
        assert!(store.get("counter", ALARM_KEY).await.unwrap().is_some());

        handle.flush().await.unwrap();
        assert_eq!(projections.load(Ordering::SeqCst), 1);
        assert!(store.get("counter", ALARM_KEY).await.unwrap().is_none());

        // Nothing pending: flush is a no-op.
        handle.flush().await.unwrap();
        assert_eq!(projections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_projection_is_rescheduled() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (handle, projections) = start(store.clone(), 1, Duration::from_secs(3600)).await;

        handle.request(CounterMessage::Touch).await.unwrap().unwrap();
        assert!(handle.flush().await.is_err());
        assert!(store.get("counter", ALARM_KEY).await.unwrap().is_some());

        handle.flush().await.unwrap();
        assert_eq!(projections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persisted_alarm_fires_after_restart() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        store.put_json("counter", ALARM_KEY, &0u64).await.unwrap();

        let (handle, projections) = start(store.clone(), 0, Duration::from_secs(3600)).await;
        handle.flush().await.unwrap();
        assert_eq!(projections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_delay_alarm_fires_without_flush() {
        let (handle, projections) = start(Arc::new(MemoryStore::new()), 0, Duration::ZERO).await;
        handle.request(CounterMessage::Touch).await.unwrap().unwrap();

        for _ in 0..100 {
            if projections.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(projections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_weak_handle_does_not_keep_actor_alive() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (handle, projections) = start(store.clone(), 0, Duration::from_secs(3600)).await;
        handle.request(CounterMessage::Touch).await.unwrap().unwrap();

        let weak = handle.downgrade();
        assert!(weak.is_running());
        assert!(weak.upgrade().is_some());
        drop(handle);

        weak.stopped().await;
        assert!(!weak.is_running());
        assert!(weak.upgrade().is_none());
        // The final projection ran before the task finished.
        assert_eq!(projections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pending_alarm_fires_on_shutdown() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (handle, projections) = start(store.clone(), 0, Duration::from_secs(3600)).await;
        handle.request(CounterMessage::Touch).await.unwrap().unwrap();
        drop(handle);

        for _ in 0..100 {
            if projections.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(projections.load(Ordering::SeqCst), 1);
        assert!(store.get("counter", ALARM_KEY).await.unwrap().is_none());
    }
}
