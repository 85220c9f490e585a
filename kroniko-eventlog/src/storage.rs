//! Event body storage
//!
//! One pretty-printed JSON document per event at `events/<id>.json`. Bodies
//! are written to a temporary file and renamed into place, so a reader sees
//! either nothing or the complete document.

use crate::types::{EventLogError, Result};
use kroniko_domain::{EventId, StoredEvent};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Write-once store of event bodies keyed by id
pub struct EventBodies {
    dir: PathBuf,
    sync_writes: bool,
}

impl EventBodies {
    /// Bodies under `dir` (must already exist)
    pub fn new(dir: impl Into<PathBuf>, sync_writes: bool) -> Self {
        Self {
            dir: dir.into(),
            sync_writes,
        }
    }

    /// Persist a body
    pub async fn persist(&self, event: &StoredEvent) -> Result<()> {
        let path = self.path_for(&event.id).ok_or_else(|| {
            EventLogError::Corrupted(format!("unusable event id: {:?}", event.id.as_str()))
        })?;
        let tmp_path = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(event)?;
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.flush().await?;
            if self.sync_writes {
                file.sync_all().await?;
            }
        }

        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// Load a body; `None` when no document exists for the id
    pub async fn load(&self, id: &EventId) -> Result<Option<StoredEvent>> {
        let Some(path) = self.path_for(id) else {
            warn!(event_id = %id, "Ignoring id that cannot name a body file");
            return Ok(None);
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let event: StoredEvent = serde_json::from_slice(&bytes).map_err(|e| {
            EventLogError::Corrupted(format!("{}: {}", path.display(), e))
        })?;
        Ok(Some(event))
    }

    /// Directory of bodies
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &EventId) -> Option<PathBuf> {
        let name = id.as_str();
        let usable = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && !name.chars().any(char::is_control);
        usable.then(|| self.dir.join(format!("{}.json", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroniko_domain::Event;
    use serde_json::json;
    use tempfile::TempDir;

    fn stored(id: &str) -> StoredEvent {
        Event::with_value("ItemAdded", json!({"cart_id": "42", "price": 10}))
            .unwrap()
            .into_stored(EventId::from(id))
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let dir = TempDir::new().unwrap();
        let bodies = EventBodies::new(dir.path(), false);

        let event = stored("e1");
        bodies.persist(&event).await.unwrap();

        let loaded = bodies.load(&EventId::from("e1")).await.unwrap();
        assert_eq!(loaded, Some(event));
        assert!(!dir.path().join("e1.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_body_document_shape() {
        let dir = TempDir::new().unwrap();
        let bodies = EventBodies::new(dir.path(), false);
        bodies.persist(&stored("e2")).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("e2.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            doc,
            json!({"id": "e2", "type": "ItemAdded", "data": {"cart_id": "42", "price": 10}})
        );
        assert!(doc.get("position").is_none());
    }

    #[tokio::test]
    async fn test_missing_body_is_none() {
        let dir = TempDir::new().unwrap();
        let bodies = EventBodies::new(dir.path(), false);

        assert!(bodies.load(&EventId::from("absent")).await.unwrap().is_none());
        assert!(bodies.load(&EventId::from("../escape")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unparseable_body_is_corrupted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let bodies = EventBodies::new(dir.path(), false);

        let result = bodies.load(&EventId::from("bad")).await;
        assert!(matches!(result, Err(EventLogError::Corrupted(_))));
    }
}
