//! Persistence backends for the selector store
//!
//! A backend only has to persist whole records keyed by (domain, role). The
//! store serializes writes per key, so backends never see two concurrent
//! writes for the same key.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::SelectorError;
use crate::types::{RecordKey, SelectorRecord};

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Every persisted record, read once when the store opens
    async fn load_all(&self) -> Result<Vec<SelectorRecord>, SelectorError>;

    /// Insert or replace the record under its key
    async fn save(&self, record: &SelectorRecord) -> Result<(), SelectorError>;

    /// Delete the record under `key`; deleting a missing key succeeds
    async fn remove(&self, key: &RecordKey) -> Result<(), SelectorError>;

    /// Make all completed writes durable
    async fn flush(&self) -> Result<(), SelectorError> {
        Ok(())
    }
}

/// Non-durable backend for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryBackend {
    records: DashMap<RecordKey, SelectorRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate, as if the records had been persisted by an earlier run
    pub fn with_records(records: impl IntoIterator<Item = SelectorRecord>) -> Self {
        let backend = Self::new();
        for record in records {
            backend.records.insert(record.key(), record);
        }
        backend
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load_all(&self) -> Result<Vec<SelectorRecord>, SelectorError> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }

    async fn save(&self, record: &SelectorRecord) -> Result<(), SelectorError> {
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &RecordKey) -> Result<(), SelectorError> {
        self.records.remove(key);
        Ok(())
    }
}

/// One pretty-printed JSON file per record under a directory
///
/// Files are replaced atomically (write and sync `*.tmp`, then rename), so a
/// crash mid-write leaves the previous version intact. [`StorageBackend::flush`]
/// syncs the directory itself.
pub struct JsonDirBackend {
    dir: PathBuf,
}

impl JsonDirBackend {
    /// Open (creating if needed) a record directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, SelectorError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Default location: `~/.webselect/selectors`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".webselect").join("selectors"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

/// Injective, filesystem-safe file name for a key
///
/// ASCII alphanumerics, `.` and `-` pass through; every other byte becomes
/// `_xx` hex. Domain and role are joined by `@`, which is always escaped
/// inside either part.
pub fn file_stem(key: &RecordKey) -> String {
    fn encode(part: &str, out: &mut String) {
        for byte in part.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
                out.push(byte as char);
            } else {
                out.push_str(&format!("_{byte:02x}"));
            }
        }
    }

    let mut stem = String::new();
    encode(&key.domain, &mut stem);
    stem.push('@');
    encode(key.role.as_str(), &mut stem);
    stem
}

#[async_trait]
impl StorageBackend for JsonDirBackend {
    async fn load_all(&self) -> Result<Vec<SelectorRecord>, SelectorError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<SelectorRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    // A corrupt file must not take the whole cache down; the
                    // key will simply be rediscovered.
                    warn!("Skipping unreadable selector record {}: {}", path.display(), e);
                }
            }
        }

        debug!("Loaded {} selector record(s) from {}", records.len(), self.dir.display());
        Ok(records)
    }

    async fn save(&self, record: &SelectorRecord) -> Result<(), SelectorError> {
        let path = self.path_for(&record.key());
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(json.as_bytes()).await?;
        // contents must be on disk before the rename makes them visible
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &RecordKey) -> Result<(), SelectorError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Sync the directory so completed renames and removals survive a crash
    async fn flush(&self) -> Result<(), SelectorError> {
        #[cfg(unix)]
        tokio::fs::File::open(&self.dir).await?.sync_all().await?;
        debug!("Synced {}", self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
#[path = "backend_test.rs"]
mod backend_test;
