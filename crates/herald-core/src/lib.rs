//! herald-core — Identity matching engine.
//!
//! Compares face embeddings from an external producer against a small
//! enrolled gallery and gates downstream greeting actions behind a
//! per-identity cooldown. Detection and embedding extraction are consumed
//! as a black box via [`FaceEmbedder`].

pub mod cooldown;
pub mod embedder;
pub mod matcher;
pub mod session;
pub mod store;
pub mod types;

pub use cooldown::CooldownDispatcher;
pub use embedder::{DetectedFace, EmbedError, FaceEmbedder};
pub use matcher::{CosineMatcher, EuclideanMatcher, Matcher};
pub use session::{Notifier, NotifyError, RecognitionSession};
pub use store::{EnrollmentStore, StoreError};
pub use types::{Annotation, BoundingBox, Embedding, IdentityRecord, MatchResult, Query};
