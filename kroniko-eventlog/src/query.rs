//! Query resolution
//!
//! Expands a [`Query`] into match clauses, resolves each condition to a
//! candidate id set through the [`Index`], intersects within a clause and
//! unions across clauses. Ids are then placed on the [`PositionLog`]; ids
//! the log does not know are dropped.

use crate::index::Index;
use crate::position_log::PositionLog;
use crate::types::Result;
use kroniko_domain::{Condition, EventId, MatchClause, Position, Query, TYPE_INDEX_KEY};
use std::collections::HashSet;
use tracing::debug;

/// Resolves queries against the index and the position log
pub struct QueryEngine<'a> {
    index: &'a Index,
    log: &'a PositionLog,
}

impl<'a> QueryEngine<'a> {
    pub fn new(index: &'a Index, log: &'a PositionLog) -> Self {
        Self { index, log }
    }

    /// Matching ids, unordered and deduplicated.
    ///
    /// The empty query bypasses the index and returns every logged id.
    pub async fn resolve(&self, query: &Query) -> Result<Vec<EventId>> {
        if query.is_all() {
            return Ok(self.log.ids());
        }

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for clause in query.to_match_variants() {
            for id in self.resolve_clause(&clause).await? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Matching `(position, id)` pairs in ascending position order
    pub async fn resolve_sequenced(&self, query: &Query) -> Result<Vec<(Position, EventId)>> {
        let ids = self.resolve(query).await?;
        let candidates = ids.len();

        let mut sequenced: Vec<(Position, EventId)> = ids
            .into_iter()
            .filter_map(|id| self.log.position_of(&id).map(|position| (position, id)))
            .collect();
        sequenced.sort_by_key(|(position, _)| *position);

        if sequenced.len() < candidates {
            debug!(
                dropped = candidates - sequenced.len(),
                "Dropped indexed ids missing from the position log"
            );
        }
        Ok(sequenced)
    }

    /// AND of the clause's conditions. A clause without conditions matches
    /// nothing.
    async fn resolve_clause(&self, clause: &MatchClause) -> Result<Vec<EventId>> {
        if clause.is_empty() {
            return Ok(Vec::new());
        }

        let mut matched: Option<Vec<EventId>> = None;
        for condition in &clause.conditions {
            let candidates = self.resolve_condition(condition).await?;
            if candidates.is_empty() {
                return Ok(Vec::new());
            }

            let next = match matched {
                None => {
                    let mut seen = HashSet::new();
                    candidates
                        .into_iter()
                        .filter(|id| seen.insert(id.clone()))
                        .collect()
                }
                Some(previous) => {
                    let allowed: HashSet<EventId> = candidates.into_iter().collect();
                    previous
                        .into_iter()
                        .filter(|id| allowed.contains(id))
                        .collect::<Vec<_>>()
                }
            };

            if next.is_empty() {
                return Ok(Vec::new());
            }
            matched = Some(next);
        }

        Ok(matched.unwrap_or_default())
    }

    async fn resolve_condition(&self, condition: &Condition) -> Result<Vec<EventId>> {
        match condition {
            Condition::Equals { value, .. } => {
                self.index.lookup_exact(&condition.index_key(), value).await
            }
            Condition::TypeIn(_) => {
                self.index
                    .lookup_where(TYPE_INDEX_KEY, |name| condition.matches_type(name))
                    .await
            }
        }
    }
}
