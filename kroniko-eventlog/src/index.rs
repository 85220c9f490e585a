//! Secondary index
//!
//! Posting lists live at `index/<indexKey>/<value>.jsonl`, one event id per
//! line, appended in write order and never rewritten. Every persisted event
//! posts each payload attribute under `data.<attribute>` and then its type
//! under `type`. The type posting comes last, so an event that has one is
//! fully indexed.
//!
//! Key and value names are percent-encoded into safe file names. Values
//! whose encoded name would be too long are stored under a SHA-256 digest
//! name instead; such names are not recoverable by [`Index::lookup_where`].

use crate::types::Result;
use kroniko_domain::{data_index_key, value_text, EventId, StoredEvent, TYPE_INDEX_KEY};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const POSTING_SUFFIX: &str = ".jsonl";
const DIGEST_PREFIX: char = '~';
const MAX_ENCODED_NAME: usize = 240;

/// File-backed posting lists
pub struct Index {
    dir: PathBuf,
    sync_writes: bool,
}

impl Index {
    /// Index rooted at `dir` (must already exist)
    pub fn new(dir: impl Into<PathBuf>, sync_writes: bool) -> Self {
        Self {
            dir: dir.into(),
            sync_writes,
        }
    }

    /// Post an event under every payload attribute, then its type
    pub async fn index_event(&self, event: &StoredEvent) -> Result<()> {
        for (attribute, value) in &event.data {
            self.post(&data_index_key(attribute), &value_text(value), &event.id)
                .await?;
        }
        self.post(TYPE_INDEX_KEY, &event.event_type, &event.id).await
    }

    /// Every id with a type posting
    pub async fn typed_ids(&self) -> Result<Vec<EventId>> {
        self.lookup_where(TYPE_INDEX_KEY, |_| true).await
    }

    /// Ids posted under exactly `key` = `value`, in posting order
    pub async fn lookup_exact(&self, key: &str, value: &str) -> Result<Vec<EventId>> {
        read_postings(&self.posting_path(key, value)).await
    }

    /// Union of the posting lists under `key` whose value name satisfies
    /// `predicate`, deduplicated.
    ///
    /// Scans the value names present under the key; there is no dedicated
    /// set index.
    pub async fn lookup_where<F>(&self, key: &str, predicate: F) -> Result<Vec<EventId>>
    where
        F: Fn(&str) -> bool,
    {
        let key_dir = self.dir.join(encode_name(key));
        let mut entries = match tokio::fs::read_dir(&key_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut matching = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(POSTING_SUFFIX)) else {
                continue;
            };
            if let Some(value) = decode_name(stem) {
                if predicate(&value) {
                    matching.push(entry.path());
                }
            }
        }
        matching.sort();

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for path in matching {
            for id in read_postings(&path).await? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn posting_path(&self, key: &str, value: &str) -> PathBuf {
        self.dir
            .join(encode_name(key))
            .join(format!("{}{}", encode_name(value), POSTING_SUFFIX))
    }

    async fn post(&self, key: &str, value: &str, id: &EventId) -> Result<()> {
        let path = self.posting_path(key, value);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(format!("{}\n", id).as_bytes()).await?;
        file.flush().await?;
        if self.sync_writes {
            file.sync_data().await?;
        }
        Ok(())
    }
}

/// Read complete lines of a posting file. A final fragment without a
/// newline belongs to an append still in flight and is skipped.
async fn read_postings(path: &Path) -> Result<Vec<EventId>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let complete = match contents.rfind('\n') {
        Some(i) => &contents[..=i],
        None => "",
    };

    Ok(complete
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(EventId::from)
        .collect())
}

/// Percent-encode a key or value into a file name.
///
/// `[A-Za-z0-9_-]` pass through, `.` passes through except in first
/// position, every other byte becomes `%XX`.
pub fn encode_name(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for (i, byte) in raw.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || (byte == b'.' && i > 0);
        if keep {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    if encoded.len() > MAX_ENCODED_NAME {
        let digest = Sha256::digest(raw.as_bytes());
        format!("{}{}", DIGEST_PREFIX, hex::encode(digest))
    } else {
        encoded
    }
}

/// Inverse of [`encode_name`]; `None` for digest names and malformed input
pub fn decode_name(encoded: &str) -> Option<String> {
    if encoded.starts_with(DIGEST_PREFIX) {
        return None;
    }

    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex_pair = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex_pair, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
