//! In-memory artifact store for finished Markdown and OCR'd PDFs.
//!
//! Artifacts are immutable byte blobs addressed by a freshly generated
//! [`ArtifactId`]. Nothing expires on its own: the caller must
//! [`delete`](ArtifactStore::delete) an artifact once it is no longer needed,
//! otherwise it lives until the process exits. Nothing survives a restart.

use crate::error::Ocr2MdError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Opaque identifier of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ArtifactId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Concurrent map of [`ArtifactId`] → immutable bytes.
///
/// Blobs are held as `Arc<[u8]>`, so [`get`](ArtifactStore::get) hands out a
/// cheap shared handle and never copies a multi-megabyte PDF.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    blobs: Mutex<HashMap<ArtifactId, Arc<[u8]>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ArtifactId, Arc<[u8]>>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `bytes` under a new unique id.
    pub fn put(&self, bytes: impl Into<Arc<[u8]>>) -> ArtifactId {
        let bytes = bytes.into();
        let mut blobs = self.lock();
        let id = loop {
            let candidate = ArtifactId(Uuid::new_v4());
            if !blobs.contains_key(&candidate) {
                break candidate;
            }
        };
        debug!("Artifact {}: stored {} bytes", id, bytes.len());
        blobs.insert(id, bytes);
        id
    }

    /// Fetch the bytes stored under `id`.
    pub fn get(&self, id: &ArtifactId) -> Result<Arc<[u8]>, Ocr2MdError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Ocr2MdError::ArtifactNotFound { id: id.to_string() })
    }

    /// Remove the artifact. Returns `false` when it did not exist.
    pub fn delete(&self, id: &ArtifactId) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            debug!("Artifact {}: deleted", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all stored blob sizes.
    pub fn total_bytes(&self) -> usize {
        self.lock().values().map(|b| b.len()).sum()
    }
}
