//! Seam for the external detection/embedding producer.
//!
//! Herald never runs inference itself; it consumes a producer that turns an
//! encoded image into zero or more fixed-dimension face embeddings. The
//! producer must return vectors that are directly comparable under the
//! deployed scoring policy (already L2-normalized for the Euclidean
//! policy).

use thiserror::Error;

use crate::types::{BoundingBox, Embedding};

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding producer failed: {0}")]
    Producer(String),
    #[error("embedding producer returned invalid output: {0}")]
    InvalidOutput(String),
    #[error("embedding producer timed out")]
    Timeout,
}

/// One face found by the producer in a single image.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub embedding: Embedding,
    pub region: Option<BoundingBox>,
}

/// External face detector + embedder, consumed as a black box.
///
/// An empty result means no face was found — expected data, not an error.
pub trait FaceEmbedder: Send {
    fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>, EmbedError>;
}
