//! Position Log
//!
//! Newline-delimited event ids in write order (`log/append.log`). The
//! 1-based line number of an id is its position. The log is the authority
//! for existence and order; an in-memory id→position map is rebuilt from
//! it on open and extended on every append.

use crate::types::Result;
use kroniko_domain::{EventId, Position};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Default)]
struct LogState {
    ids: Vec<EventId>,
    positions: HashMap<EventId, Position>,
}

impl LogState {
    fn push(&mut self, id: EventId) -> Position {
        self.ids.push(id.clone());
        let position = self.ids.len() as Position;
        self.positions.entry(id).or_insert(position);
        position
    }
}

/// Append-only ledger of event ids
pub struct PositionLog {
    path: PathBuf,
    sync_writes: bool,
    writer: Mutex<File>,
    state: RwLock<LogState>,
}

impl PositionLog {
    /// Open or create the log, rebuilding positions from its contents.
    ///
    /// A trailing fragment without a newline is a torn append: it is
    /// truncated away before any new line is written.
    pub async fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let contents = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let complete_len = contents
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);

        if complete_len < contents.len() {
            warn!(
                path = %path.display(),
                torn_bytes = contents.len() - complete_len,
                "Truncating torn tail of position log"
            );
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(complete_len as u64).await?;
            file.sync_all().await?;
        }

        let mut state = LogState::default();
        for line in String::from_utf8_lossy(&contents[..complete_len]).lines() {
            let line = line.trim();
            if !line.is_empty() {
                state.push(EventId::from(line));
            }
        }

        info!(path = %path.display(), events = state.ids.len(), "Position log opened");

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            sync_writes,
            writer: Mutex::new(writer),
            state: RwLock::new(state),
        })
    }

    /// Append one id and return the position it was assigned.
    ///
    /// Appends are serialized so the returned position always equals the
    /// id's line number.
    pub async fn append(&self, id: &EventId) -> Result<Position> {
        let mut writer = self.writer.lock().await;

        let line = format!("{}\n", id);
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        if self.sync_writes {
            writer.sync_data().await?;
        }

        let position = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.clone());
        Ok(position)
    }

    /// Position of an id, if it has been logged
    pub fn position_of(&self, id: &EventId) -> Option<Position> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .positions
            .get(id)
            .copied()
    }

    /// Highest assigned position (0 when empty)
    pub fn head(&self) -> Position {
        self.state.read().unwrap_or_else(PoisonError::into_inner).ids.len() as Position
    }

    /// Snapshot of every logged id in position order
    pub fn ids(&self) -> Vec<EventId> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).ids.clone()
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
