//! # Object Store Contract
//!
//! The persistence boundary: a key→blob store with conditional, versioned
//! writes. The case store and the slot registry both sit on this trait, each
//! in its own key namespace. Production deployments plug a cloud blob store
//! in behind it; [`InMemoryObjectStore`] backs tests and development.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque version number supplied by the backing store, used for
/// optimistic-concurrency (compare-and-swap) writes. Storage metadata, not
/// part of any document's own fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the object store and the stores built on top of it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object exists under the key
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// The conditional write lost: someone else wrote since the read
    #[error("version conflict writing {key}")]
    VersionConflict { key: String },

    /// The backing store cannot be reached at all
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    /// A document failed to serialize or deserialize
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for the conflict class that callers retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Key→blob store with conditional writes. All methods are suspension points.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object and its current version.
    async fn get(&self, key: &str) -> Result<(Vec<u8>, Version), StoreError>;

    /// Write an object. With `expected = Some(v)` the write only succeeds if
    /// the stored version is still `v`; `None` writes unconditionally
    /// (create or overwrite). Returns the new version.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StoreError>;

    /// List keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete an object. Returns whether anything was deleted.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// In-memory object store with a process-wide monotonic generation counter.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, (Version, Vec<u8>)>,
    generation: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> Version {
        Version(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<(Vec<u8>, Version), StoreError> {
        match self.objects.get(key) {
            Some(entry) => {
                let (version, bytes) = entry.value();
                Ok((bytes.clone(), *version))
            }
            None => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StoreError> {
        use dashmap::mapref::entry::Entry;

        // Entry-based access keeps the compare-and-swap atomic per key.
        match self.objects.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Some(expected) = expected {
                    if occupied.get().0 != expected {
                        return Err(StoreError::VersionConflict {
                            key: key.to_string(),
                        });
                    }
                }
                let version = self.next_version();
                occupied.insert((version, bytes));
                Ok(version)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Err(StoreError::VersionConflict {
                        key: key.to_string(),
                    });
                }
                let version = self.next_version();
                vacant.insert((version, bytes));
                Ok(version)
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.remove(key).is_some())
    }
}
