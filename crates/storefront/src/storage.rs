//! Namespaced key-value store backed by JSON files.
//!
//! Each entry lives in `<dir>/<namespace>/<key>.json` and carries an
//! optional expiry. Expired entries read as absent and are removed on read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the local store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid TTL: {0:?}")]
    InvalidTtl(Duration),
}

#[derive(Serialize, Deserialize)]
struct Entry<T> {
    value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct EntryHeader {
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// A namespaced, file-backed key-value store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
    namespace: String,
}

impl LocalStore {
    /// Open a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, namespace: &str) -> Self {
        Self {
            dir: dir.into(),
            namespace: sanitize_namespace(namespace),
        }
    }

    /// A store sharing this one's directory under another namespace.
    #[must_use]
    pub fn with_namespace(&self, namespace: &str) -> Self {
        Self::new(self.dir.clone(), namespace)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn namespace_dir(&self) -> PathBuf {
        self.dir.join(&self.namespace)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.namespace_dir()
            .join(format!("{}.json", sanitize_key(key)))
    }

    /// Read a value. Missing, expired and unreadable entries read as `None`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the file exists but cannot be read.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: Entry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable stored entry");
                remove_file(&path).await?;
                return Ok(None);
            }
        };

        if entry.expires_at.is_some_and(|exp| exp <= Utc::now()) {
            debug!(key, "stored entry expired");
            remove_file(&path).await?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    /// Write a value, optionally expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized or written.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let expires_at = match ttl {
            Some(ttl) => Some(
                chrono::TimeDelta::from_std(ttl)
                    .ok()
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or(StorageError::InvalidTtl(ttl))?,
            ),
            None => None,
        };
        let bytes = serde_json::to_vec(&Entry { value, expires_at })?;

        tokio::fs::create_dir_all(self.namespace_dir()).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed.
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        remove_file(&self.path_for(key)).await
    }

    /// Delete every expired entry in this namespace. Returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be listed.
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        let mut entries = match tokio::fs::read_dir(self.namespace_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(entry.path()).await else {
                continue;
            };
            let expired = serde_json::from_slice::<EntryHeader>(&bytes)
                .map(|h| h.expires_at.is_some_and(|exp| exp <= now))
                .unwrap_or(true);
            if expired {
                remove_file(&entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(namespace = %self.namespace, removed, "purged expired entries");
        }
        Ok(removed)
    }
}

async fn remove_file(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Namespaces name a directory, so dots go too.
fn sanitize_namespace(namespace: &str) -> String {
    sanitize_key(namespace).replace('.', "_")
}

/// Map a key onto a safe file name component: `[A-Za-z0-9_.-]` is kept,
/// everything else becomes `_`.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
