//! Event Store facade
//!
//! Ties body storage, the position log, the index, the lock manager and the
//! dispatcher together behind `write` / `read` / `subscribe`.

use crate::append::Appender;
use crate::config::StoreConfig;
use crate::dispatch::{AsyncSubscriber, Dispatcher};
use crate::index::Index;
use crate::lock::{LockGuard, LockKey, LockManager};
use crate::position_log::PositionLog;
use crate::query::QueryEngine;
use crate::storage::EventBodies;
use crate::types::{EventLogError, Result};
use kroniko_domain::{
    AppendCondition, DomainError, Event, EventId, Position, Query, ReadOptions, SequencedEvent,
    StoredEvent,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File-backed event store
pub struct EventStore {
    config: StoreConfig,
    bodies: EventBodies,
    log: PositionLog,
    index: Index,
    locks: LockManager,
    dispatcher: Dispatcher,
}

impl EventStore {
    /// Open (or create) a store under `config.base_dir`.
    ///
    /// Logged events whose postings were lost to a crash are re-indexed
    /// before the store is returned.
    ///
    /// Must be called inside a Tokio runtime: the asynchronous dispatch
    /// worker is spawned here.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        for dir in [
            config.events_dir(),
            config.log_dir(),
            config.index_dir(),
            config.locks_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let log = PositionLog::open(config.log_path(), config.sync_writes).await?;
        let bodies = EventBodies::new(config.events_dir(), config.sync_writes);
        let index = Index::new(config.index_dir(), config.sync_writes);

        let reindexed = Appender {
            bodies: &bodies,
            log: &log,
            index: &index,
        }
        .reindex_unposted()
        .await?;

        info!(
            base_dir = %config.base_dir.display(),
            head = log.head(),
            reindexed,
            "Event store opened"
        );

        Ok(Self {
            bodies,
            index,
            locks: LockManager::new(
                config.locks_dir(),
                config.lock_retry_attempts,
                config.lock_retry_delay,
            ),
            dispatcher: Dispatcher::start(),
            log,
            config,
        })
    }

    /// Append a batch, optionally guarded by an append condition.
    ///
    /// Every stored event is dispatched to subscribers after the batch is
    /// durable and the guard lock is released.
    ///
    /// A batch that fails partway is not rolled back: the events committed
    /// before the failure are dispatched, then the error is returned.
    ///
    /// # Errors
    /// - `Validation` for an empty batch
    /// - `AppendConditionFailed` if the guard matched; nothing is written
    /// - `LockAcquisitionFailed` once every backoff attempt timed out
    /// - `Io` / `Serialization` from storage, possibly after a prefix of
    ///   the batch was committed
    pub async fn write(
        &self,
        events: Vec<Event>,
        condition: Option<AppendCondition>,
    ) -> Result<Vec<StoredEvent>> {
        if events.is_empty() {
            return Err(DomainError::EmptyBatch.into());
        }

        let requested = events.len();
        let batch = match condition {
            Some(condition) => {
                let _guard = self.lock_guard(&condition.fail_if_events_match).await?;
                self.appender().append_batch(events, Some(&condition)).await
            }
            None => self.appender().append_batch(events, None).await,
        };

        for event in &batch.stored {
            self.dispatcher.dispatch(event);
        }

        if let Some(error) = &batch.failure {
            if !batch.stored.is_empty() {
                warn!(
                    committed = batch.stored.len(),
                    requested,
                    error = %error,
                    "Batch failed partway; committed events were dispatched"
                );
            }
        }
        batch.into_result()
    }

    /// Append a single event
    pub async fn write_one(
        &self,
        event: Event,
        condition: Option<AppendCondition>,
    ) -> Result<StoredEvent> {
        let mut stored = self.write(vec![event], condition).await?;
        stored
            .pop()
            .ok_or_else(|| EventLogError::Corrupted("append returned no event".to_string()))
    }

    /// Events matching `query`, ordered and bounded by `options`.
    ///
    /// Ids whose body is missing are dropped from the result.
    pub async fn read(&self, query: &Query, options: ReadOptions) -> Result<Vec<SequencedEvent>> {
        let mut sequenced = QueryEngine::new(&self.index, &self.log)
            .resolve_sequenced(query)
            .await?;

        sequenced.retain(|(position, _)| options.admits(*position));
        if options.backwards {
            sequenced.reverse();
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        let mut events = Vec::with_capacity(sequenced.len().min(limit));
        for (position, id) in sequenced {
            if events.len() >= limit {
                break;
            }
            match self.bodies.load(&id).await? {
                Some(event) => events.push(SequencedEvent { event, position }),
                None => debug!(event_id = %id, position, "Dropping logged event without a body"),
            }
        }
        Ok(events)
    }

    /// One event by id, if it is logged and its body exists
    pub async fn get(&self, id: &EventId) -> Result<Option<SequencedEvent>> {
        let Some(position) = self.log.position_of(id) else {
            return Ok(None);
        };
        Ok(self
            .bodies
            .load(id)
            .await?
            .map(|event| SequencedEvent { event, position }))
    }

    /// Position of a logged event
    pub fn position_of(&self, id: &EventId) -> Option<Position> {
        self.log.position_of(id)
    }

    /// Highest assigned position (0 when empty)
    pub fn head(&self) -> Position {
        self.log.head()
    }

    /// Register a subscriber that runs inline before `write()` returns
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&StoredEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(handler);
    }

    /// Register a subscriber served by the background worker
    pub fn subscribe_async<F, Fut>(&self, handler: F)
    where
        F: Fn(StoredEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.subscribe_async(handler);
    }

    /// Register an [`AsyncSubscriber`] object
    pub fn subscribe_handler(&self, handler: Arc<dyn AsyncSubscriber>) {
        self.dispatcher.subscribe_handler(handler);
    }

    /// Drain pending asynchronous deliveries and stop the worker
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        info!(head = self.log.head(), "Event store shut down");
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn appender(&self) -> Appender<'_> {
        Appender {
            bodies: &self.bodies,
            log: &self.log,
            index: &self.index,
        }
    }

    /// Take the guard's lock, backing off exponentially between timed-out
    /// acquisitions.
    async fn lock_guard(&self, guard: &Query) -> Result<LockGuard> {
        let key = LockKey::for_query(guard);
        let max_attempts = self.config.write_max_attempts;

        let mut attempt = 1;
        loop {
            match self.locks.acquire(&key).await {
                Ok(lock) => return Ok(lock),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.config.backoff_for(attempt);
                    warn!(
                        lock_key = %key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Guard lock busy, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!(lock_key = %key, attempts = attempt, "Giving up on guard lock");
                    return Err(EventLogError::LockAcquisitionFailed {
                        key: key.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
