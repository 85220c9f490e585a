//! Append conditions and read options

use crate::event::Position;
use crate::query::Query;
use serde::{Deserialize, Serialize};

/// Guard evaluated before an append.
///
/// The append fails if `fail_if_events_match`, restricted to positions
/// strictly greater than `after` (or unrestricted when absent), matches at
/// least one stored event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppendCondition {
    /// Query that must yield no events
    pub fail_if_events_match: Query,
    /// Watermark: only events after this position count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Position>,
}

impl AppendCondition {
    /// Condition without a watermark
    pub fn new(fail_if_events_match: Query) -> Self {
        Self {
            fail_if_events_match,
            after: None,
        }
    }

    /// Ignore events at or before `position`
    pub fn after(mut self, position: Position) -> Self {
        self.after = Some(position);
        self
    }
}

/// Direction and bounds of a read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Forward: keep positions >= `from`. Backwards: keep positions <= `from`.
    #[serde(default)]
    pub from: Option<Position>,
    /// Return results in descending position order
    #[serde(default)]
    pub backwards: bool,
    /// Maximum number of events returned
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ReadOptions {
    /// Forward read from the start
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the read at `position`
    pub fn from(mut self, position: Position) -> Self {
        self.from = Some(position);
        self
    }

    /// Read in descending order
    pub fn backwards(mut self) -> Self {
        self.backwards = true;
        self
    }

    /// Cap the number of results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a position passes the `from` bound
    pub fn admits(&self, position: Position) -> bool {
        match (self.from, self.backwards) {
            (None, _) => true,
            (Some(from), false) => position >= from,
            (Some(from), true) => position <= from,
        }
    }
}
