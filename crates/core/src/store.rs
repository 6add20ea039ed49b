// crates/core/src/store.rs
//! Durable key-value storage for subject timelines.
//!
//! One record per subject, keyed `timeline:<subject-id>`, holding the full
//! ordered frame array. No schema versioning beyond "array of frames".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::PersistenceError;
use crate::frame::Frame;

/// Storage key for a subject's timeline record.
pub fn timeline_key(subject_id: &str) -> String {
    format!("timeline:{subject_id}")
}

/// A durable key-value store of frame arrays.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// `Ok(None)` when no record exists for `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<Frame>>, PersistenceError>;

    async fn set(&self, key: &str, frames: &[Frame]) -> Result<(), PersistenceError>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, key: &str) -> Result<(), PersistenceError>;
}

/// One JSON file per key inside a directory.
///
/// File names are the hex-encoded key so arbitrary subject ids are safe on
/// every filesystem. Keys too long for a file name keep a hex prefix and
/// append the SHA-256 of the whole key. Writes go to a temp file first and are renamed into
/// place, so a crash mid-write never leaves a truncated record.
pub struct FileTimelineStore {
    dir: PathBuf,
}

impl FileTimelineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under [`crate::paths::timeline_dir`].
    pub fn open_default() -> Result<Self, PersistenceError> {
        crate::paths::timeline_dir()
            .map(Self::new)
            .ok_or_else(|| PersistenceError::StorageUnavailable {
                path: PathBuf::from("<cache dir>"),
            })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

/// Longest hex stem used verbatim. Leaves room for `.json.tmp` under the
/// common 255-byte file name limit.
const MAX_HEX_STEM: usize = 200;
const HASHED_PREFIX: usize = 64;

fn file_stem(key: &str) -> String {
    let encoded = hex::encode(key.as_bytes());
    if encoded.len() <= MAX_HEX_STEM {
        return encoded;
    }
    let digest = Sha256::digest(key.as_bytes());
    format!("{}-{}", &encoded[..HASHED_PREFIX], hex::encode(digest))
}

#[async_trait]
impl TimelineStore for FileTimelineStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<Frame>>, PersistenceError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(path, e)),
        };
        serde_json::from_slice::<Vec<Frame>>(&bytes)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    async fn set(&self, key: &str, frames: &[Frame]) -> Result<(), PersistenceError> {
        let content = serde_json::to_vec(frames).map_err(|e| PersistenceError::Serialize {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?;

        // Write atomically (temp file + rename)
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content)
            .await
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }
}

/// Process-local store. Records vanish with the process.
#[derive(Default)]
pub struct MemoryTimelineStore {
    records: Mutex<HashMap<String, Vec<Frame>>>,
}

impl MemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        match self.records.lock() {
            Ok(records) => records.contains_key(key),
            Err(e) => {
                tracing::error!("Mutex poisoned reading timeline records: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl TimelineStore for MemoryTimelineStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<Frame>>, PersistenceError> {
        let records = self.records.lock().map_err(|e| PersistenceError::Rejected {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(records.get(key).cloned())
    }

    async fn set(&self, key: &str, frames: &[Frame]) -> Result<(), PersistenceError> {
        let mut records = self.records.lock().map_err(|e| PersistenceError::Rejected {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        records.insert(key.to_string(), frames.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let mut records = self.records.lock().map_err(|e| PersistenceError::Rejected {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        records.remove(key);
        Ok(())
    }
}
