//! Event Appending with Append Conditions
//!
//! An append runs in three steps:
//! 1. Check the guard query against events after the watermark
//! 2. Persist each body (id assigned here)
//! 3. Append the id to the position log, then post it to the index
//!
//! The caller holds the guard's lock across all three steps, so no other
//! conditioned writer with the same guard shape can slip in between the
//! check and the commit.
//!
//! An event is committed once its id is in the position log. A batch that
//! fails partway keeps the events committed before the failure (and the
//! failing one, if its log line made it); [`BatchAppend`] reports both.
//! Postings lost to a crash are rebuilt by [`Appender::reindex_unposted`].

use crate::index::Index;
use crate::position_log::PositionLog;
use crate::query::QueryEngine;
use crate::storage::EventBodies;
use crate::types::{EventLogError, Result};
use kroniko_domain::{AppendCondition, Event, EventId, Position, StoredEvent};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Outcome of a batch append
#[derive(Debug, Default)]
pub struct BatchAppend {
    /// Events that reached the position log, in order
    pub stored: Vec<StoredEvent>,
    /// Why the batch stopped early, if it did
    pub failure: Option<EventLogError>,
}

impl BatchAppend {
    fn fail(mut self, error: EventLogError) -> Self {
        self.failure = Some(error);
        self
    }

    /// The stored events, or the failure that stopped the batch
    pub fn into_result(self) -> Result<Vec<StoredEvent>> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.stored),
        }
    }
}

/// Storage components touched by an append
pub struct Appender<'a> {
    pub bodies: &'a EventBodies,
    pub log: &'a PositionLog,
    pub index: &'a Index,
}

impl<'a> Appender<'a> {
    /// Fail if the guard matches any event after its watermark
    ///
    /// # Errors
    /// - `AppendConditionFailed` when at least one event matches
    pub async fn check(&self, condition: &AppendCondition) -> Result<()> {
        let after = condition.after.unwrap_or(0);
        let matches = QueryEngine::new(self.index, self.log)
            .resolve_sequenced(&condition.fail_if_events_match)
            .await?
            .into_iter()
            .filter(|(position, _)| *position > after)
            .count();

        if matches > 0 {
            warn!(
                after = ?condition.after,
                matches,
                "Append condition matched existing events"
            );
            return Err(EventLogError::AppendConditionFailed {
                after: condition.after,
                matches,
            });
        }
        Ok(())
    }

    /// Persist one event and return it with its assigned position
    pub async fn append(&self, event: Event) -> Result<(StoredEvent, Position)> {
        let stored = event.into_stored(EventId::generate());
        let position = self.commit(&stored).await?;
        self.index.index_event(&stored).await?;
        Ok((stored, position))
    }

    /// Check the optional condition, then persist the batch in order.
    ///
    /// Stops at the first failure. Nothing is written when the condition
    /// fails.
    pub async fn append_batch(
        &self,
        events: Vec<Event>,
        condition: Option<&AppendCondition>,
    ) -> BatchAppend {
        let mut batch = BatchAppend {
            stored: Vec::with_capacity(events.len()),
            failure: None,
        };

        if let Some(condition) = condition {
            if let Err(e) = self.check(condition).await {
                return batch.fail(e);
            }
        }

        for event in events {
            let stored = event.into_stored(EventId::generate());
            if let Err(e) = self.commit(&stored).await {
                return batch.fail(e);
            }

            let indexed = self.index.index_event(&stored).await;
            batch.stored.push(stored);
            if let Err(e) = indexed {
                return batch.fail(e);
            }
        }
        batch
    }

    /// Re-post logged events that have no type posting.
    ///
    /// Returns how many events were re-indexed. Attribute postings an
    /// interrupted append already wrote are posted again; lookups
    /// deduplicate them.
    pub async fn reindex_unposted(&self) -> Result<usize> {
        let typed: HashSet<EventId> = self.index.typed_ids().await?.into_iter().collect();

        let mut repaired = 0;
        for id in self.log.ids() {
            if typed.contains(&id) {
                continue;
            }
            match self.bodies.load(&id).await {
                Ok(Some(event)) => {
                    self.index.index_event(&event).await?;
                    repaired += 1;
                }
                Ok(None) => debug!(event_id = %id, "Logged event has no body to index"),
                Err(EventLogError::Corrupted(reason)) => {
                    warn!(event_id = %id, reason = %reason, "Skipping unreadable body")
                }
                Err(e) => return Err(e),
            }
        }

        if repaired > 0 {
            warn!(repaired, "Re-indexed logged events missing from the index");
        }
        Ok(repaired)
    }

    /// Body, then log line. Once this returns the event is committed.
    async fn commit(&self, stored: &StoredEvent) -> Result<Position> {
        self.bodies.persist(stored).await?;
        let position = self.log.append(&stored.id).await?;

        debug!(
            event_id = %stored.id,
            position,
            event_type = %stored.event_type,
            "Event appended"
        );
        Ok(position)
    }
}
