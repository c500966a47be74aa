//! Enrollment store — the persistent name → reference-embedding mapping.
//!
//! The live gallery sits behind `RwLock<Arc<Vec<IdentityRecord>>>`: readers
//! clone the `Arc` and keep matching against that snapshot; writers build
//! the replacement vector off to the side and swap the reference, so a
//! reload is atomic from every reader's perspective. Records stay sorted
//! by name to keep matcher iteration order stable.
//!
//! On disk the store is a single self-describing JSON document, replaced
//! wholesale on every save (temp file + rename, no partial updates).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Embedding, IdentityRecord};

/// On-disk format version. Bumped on incompatible schema changes.
const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("enrollment batch contained no valid samples")]
    NoValidSamples,
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("corrupt enrollment store at {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialized store document.
#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    /// Embedding dimensionality shared by every record; absent when empty.
    dimension: Option<usize>,
    identities: Vec<IdentityRecord>,
}

/// In-memory enrollment store with atomic-swap reload semantics.
#[derive(Debug)]
pub struct EnrollmentStore {
    gallery: RwLock<Arc<Vec<IdentityRecord>>>,
}

impl Default for EnrollmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EnrollmentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            gallery: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Load a store from disk.
    ///
    /// A missing file yields an empty store (first run, nothing enrolled
    /// yet); an existing file that cannot be read, parsed, or validated is
    /// [`StoreError::Corrupt`] — callers must treat that as fatal rather
    /// than silently serving an empty gallery.
    pub fn load_from(path: &Path) -> Result<Self, StoreError> {
        let store = Self::new();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "no enrollment store on disk; starting empty");
            return Ok(store);
        }
        let gallery = read_gallery(path)?;
        tracing::info!(
            path = %path.display(),
            identities = gallery.len(),
            "enrollment store loaded"
        );
        *store.gallery.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(gallery);
        Ok(store)
    }

    /// Re-read the store from disk, replacing the live gallery atomically.
    ///
    /// The new gallery is fully constructed and validated before the swap;
    /// on any error the previous gallery stays in place untouched.
    /// Returns the number of identities after the reload.
    pub fn reload_from(&self, path: &Path) -> Result<usize, StoreError> {
        let gallery = if path.exists() {
            read_gallery(path)?
        } else {
            tracing::warn!(path = %path.display(), "store file missing on reload; now empty");
            Vec::new()
        };
        let count = gallery.len();
        *self.gallery.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(gallery);
        tracing::info!(identities = count, "enrollment store reloaded");
        Ok(count)
    }

    /// Persist the current gallery wholesale.
    ///
    /// Writes a sibling temp file and renames it into place so readers of
    /// the file never observe a half-written document.
    pub fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.snapshot();
        let doc = StoreFile {
            version: STORE_FORMAT_VERSION,
            dimension: snapshot.first().map(|r| r.reference.dim()),
            identities: snapshot.as_ref().clone(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp: PathBuf = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&doc).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: format!("serialize: {e}"),
        })?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), identities = doc.identities.len(), "store saved");
        Ok(())
    }

    /// Register (or replace) an identity from a batch of valid samples.
    ///
    /// Stores the element-wise mean of the samples as the reference.
    /// Enrollment is idempotent per name: a second enrollment replaces the
    /// prior record rather than adding to it. Degenerate samples (images
    /// where the producer found no face) must be filtered out upstream;
    /// an empty batch here is [`StoreError::NoValidSamples`].
    pub fn enroll(
        &self,
        name: &str,
        greeting: Option<String>,
        samples: &[Embedding],
    ) -> Result<IdentityRecord, StoreError> {
        if samples.is_empty() {
            return Err(StoreError::NoValidSamples);
        }
        let expected = samples[0].dim();
        for sample in samples {
            if sample.dim() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: sample.dim(),
                });
            }
        }
        if let Some(dim) = self.dimension() {
            if expected != dim {
                return Err(StoreError::DimensionMismatch {
                    expected: dim,
                    got: expected,
                });
            }
        }

        // mean() only fails on empty or mixed-dimension input, both
        // rejected above.
        let reference = Embedding::mean(samples).ok_or(StoreError::NoValidSamples)?;
        let record = IdentityRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            reference,
            sample_count: samples.len(),
            greeting,
            created_at: Utc::now(),
        };

        let mut guard = self.gallery.write().unwrap_or_else(|e| e.into_inner());
        let mut next: Vec<IdentityRecord> = guard.as_ref().clone();
        next.retain(|r| r.name != name);
        next.push(record.clone());
        next.sort_by(|a, b| a.name.cmp(&b.name));
        *guard = Arc::new(next);

        tracing::info!(name, samples = record.sample_count, "identity enrolled");
        Ok(record)
    }

    /// Remove an identity by name. Returns whether a record existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut guard = self.gallery.write().unwrap_or_else(|e| e.into_inner());
        if !guard.iter().any(|r| r.name == name) {
            return false;
        }
        let mut next: Vec<IdentityRecord> = guard.as_ref().clone();
        next.retain(|r| r.name != name);
        *guard = Arc::new(next);
        tracing::info!(name, "identity removed");
        true
    }

    /// Cheap point-in-time view of the gallery, sorted by name.
    pub fn snapshot(&self) -> Arc<Vec<IdentityRecord>> {
        self.gallery
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Look up a single record by name.
    pub fn get(&self, name: &str) -> Option<IdentityRecord> {
        self.snapshot().iter().find(|r| r.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Embedding dimensionality established by the first enrolled record.
    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().first().map(|r| r.reference.dim())
    }
}

/// Read and validate a store document from disk.
fn read_gallery(path: &Path) -> Result<Vec<IdentityRecord>, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.display().to_string(),
        reason,
    };

    let raw = fs::read(path).map_err(|e| corrupt(format!("read: {e}")))?;
    let doc: StoreFile =
        serde_json::from_slice(&raw).map_err(|e| corrupt(format!("parse: {e}")))?;

    if doc.version != STORE_FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format version {} (expected {STORE_FORMAT_VERSION})",
            doc.version
        )));
    }

    let declared = doc.dimension;
    for record in &doc.identities {
        let dim = record.reference.dim();
        if dim == 0 {
            return Err(corrupt(format!("identity '{}' has an empty reference", record.name)));
        }
        if declared.is_some_and(|d| d != dim) {
            return Err(corrupt(format!(
                "identity '{}' has dimension {dim}, store declares {}",
                record.name,
                declared.unwrap_or(0)
            )));
        }
    }

    let mut gallery = doc.identities;
    gallery.sort_by(|a, b| a.name.cmp(&b.name));
    if gallery.windows(2).any(|w| w[0].name == w[1].name) {
        return Err(corrupt("duplicate identity names".into()));
    }
    Ok(gallery)
}
