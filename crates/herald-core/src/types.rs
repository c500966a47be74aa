use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bounding box for a detected face, in image coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face embedding vector (typically 512-dimensional).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "vggface2").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// Uses constant-time computation: always processes all dimensions.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        // Constant-time: always compute, use conditional assignment
        // rather than early return to avoid timing side-channel.
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise mean of a batch of embeddings.
    ///
    /// Returns `None` on an empty batch or when the batch mixes
    /// dimensionalities. The model version is carried over from the first
    /// sample.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.dim();
        if samples.iter().any(|s| s.dim() != dim) {
            return None;
        }

        let mut acc = vec![0.0f32; dim];
        for sample in samples {
            for (slot, v) in acc.iter_mut().zip(sample.values.iter()) {
                *slot += v;
            }
        }
        let n = samples.len() as f32;
        for slot in acc.iter_mut() {
            *slot /= n;
        }

        Some(Embedding {
            values: acc,
            model_version: first.model_version.clone(),
        })
    }
}

/// A stored identity with its aggregated reference embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: Uuid,
    /// Unique identity name — the primary key of the enrollment store.
    pub name: String,
    /// Element-wise mean of the enrollment samples.
    pub reference: Embedding,
    /// Number of valid samples that went into the reference.
    pub sample_count: usize,
    /// Formal greeting override (e.g., "Dr. Manoj Goel, our Director").
    pub greeting: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One query embedding for one detected face within a tick. Not persisted.
#[derive(Debug, Clone)]
pub struct Query {
    pub embedding: Embedding,
    pub region: Option<BoundingBox>,
    /// Producer-assigned index of this face within the frame/request.
    pub face_index: usize,
}

/// Result of matching a probe embedding against the enrolled gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Best-matching identity name; `None` means "unknown".
    pub identity: Option<String>,
    /// Best score in the deployed metric. Higher is better
    /// (cosine similarity, or negated Euclidean distance).
    pub score: f32,
    pub passed_threshold: bool,
}

impl MatchResult {
    pub fn unknown(score: f32) -> Self {
        Self {
            identity: None,
            score,
            passed_threshold: false,
        }
    }
}

/// Label shown for queries that matched nothing.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Display annotation for one query, for the external renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Matched identity name, if the match cleared the threshold.
    pub identity: Option<String>,
    /// Identity name or "Unknown".
    pub label: String,
    /// Display confidence in [0, 1], derived by the deployed matcher.
    pub confidence: f32,
    pub region: Option<BoundingBox>,
    pub face_index: usize,
}
