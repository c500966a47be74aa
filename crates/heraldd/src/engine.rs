use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use herald_core::{
    Annotation, EmbedError, EnrollmentStore, FaceEmbedder, Notifier, Query, RecognitionSession,
    StoreError,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Boundary classification of one recognize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizeStatus {
    /// At least one face cleared the threshold.
    Recognized,
    /// Faces were found but none cleared the threshold.
    Unknown,
    /// The producer found no face in the image.
    NoFace,
    /// Nothing is enrolled; every query is unknown by definition.
    StoreEmpty,
}

impl RecognizeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recognized => "recognized",
            Self::Unknown => "unknown",
            Self::NoFace => "no_face",
            Self::StoreEmpty => "store_empty",
        }
    }
}

/// Result of a recognize operation.
pub struct RecognizeOutcome {
    pub status: RecognizeStatus,
    /// Best passing match: identity name and display confidence.
    pub best: Option<(String, f32)>,
    /// One annotation per detected face, matched or not.
    pub annotations: Vec<Annotation>,
}

/// Result of an enrollment operation.
#[derive(Debug)]
pub struct EnrollOutcome {
    pub name: String,
    /// Images that yielded a usable face embedding.
    pub samples_used: usize,
    /// Images the producer found no face in.
    pub samples_skipped: usize,
    pub total_identities: usize,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<RecognizeOutcome, EngineError>>,
    },
    Enroll {
        name: String,
        greeting: Option<String>,
        images: Vec<Vec<u8>>,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request recognition: embed the image externally, match every face,
    /// dispatch cooldown-gated greetings.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<RecognizeOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request enrollment: embed each image, average the usable samples,
    /// persist the store.
    pub async fn enroll(
        &self,
        name: String,
        greeting: Option<String>,
        images: Vec<Vec<u8>>,
    ) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                name,
                greeting,
                images,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Remove an identity and persist the store. Returns whether it
    /// existed.
    pub async fn remove(&self, name: String) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Remove {
                name,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Re-read the store from disk. Returns the identity count afterwards.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Reload { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The engine owns the embedding producer, the recognition session, and
/// the notifier, and is the single writer for the enrollment store.
/// Requests are served strictly in order: one tick fully completes before
/// the next begins.
pub fn spawn_engine(
    embedder: Box<dyn FaceEmbedder>,
    mut session: RecognitionSession,
    store_path: PathBuf,
    notifier: Box<dyn Notifier + Send>,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("herald-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { image, reply } => {
                        let result =
                            run_recognize(embedder.as_ref(), &mut session, notifier.as_ref(), &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll {
                        name,
                        greeting,
                        images,
                        reply,
                    } => {
                        let result = run_enroll(
                            embedder.as_ref(),
                            &session,
                            &store_path,
                            &name,
                            greeting,
                            &images,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Remove { name, reply } => {
                        let result = run_remove(&session, &store_path, &name);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Reload { reply } => {
                        let result = session.reload(&store_path).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

/// Embed the image, run one tick through the session, classify the
/// outcome.
fn run_recognize(
    embedder: &dyn FaceEmbedder,
    session: &mut RecognitionSession,
    notifier: &dyn Notifier,
    image: &[u8],
) -> Result<RecognizeOutcome, EngineError> {
    let faces = embedder.detect_and_embed(image)?;
    tracing::debug!(faces = faces.len(), "recognize: producer returned");

    if faces.is_empty() {
        return Ok(RecognizeOutcome {
            status: RecognizeStatus::NoFace,
            best: None,
            annotations: Vec::new(),
        });
    }

    let store_empty = session.store().is_empty();

    let queries: Vec<Query> = faces
        .into_iter()
        .enumerate()
        .map(|(i, face)| Query {
            embedding: face.embedding,
            region: face.region,
            face_index: i,
        })
        .collect();

    let annotations = session.process_tick(&queries, Instant::now(), notifier);

    let best = annotations
        .iter()
        .filter(|a| a.identity.is_some())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|a| (a.label.clone(), a.confidence));

    let status = if store_empty {
        RecognizeStatus::StoreEmpty
    } else if best.is_some() {
        RecognizeStatus::Recognized
    } else {
        RecognizeStatus::Unknown
    };

    Ok(RecognizeOutcome {
        status,
        best,
        annotations,
    })
}

/// Embed every enrollment image, skip the ones with no detectable face,
/// store the mean of the rest, persist.
fn run_enroll(
    embedder: &dyn FaceEmbedder,
    session: &RecognitionSession,
    store_path: &Path,
    name: &str,
    greeting: Option<String>,
    images: &[Vec<u8>],
) -> Result<EnrollOutcome, EngineError> {
    let mut samples = Vec::with_capacity(images.len());
    let mut skipped = 0usize;

    for (i, image) in images.iter().enumerate() {
        let faces = embedder.detect_and_embed(image)?;
        match faces.into_iter().next() {
            Some(face) => samples.push(face.embedding),
            None => {
                tracing::debug!(image = i, "enroll: no face detected, skipping sample");
                skipped += 1;
            }
        }
    }

    let store = session.store();
    store.enroll(name, greeting, &samples)?;
    store.save_to(store_path)?;

    Ok(EnrollOutcome {
        name: name.to_string(),
        samples_used: samples.len(),
        samples_skipped: skipped,
        total_identities: store.len(),
    })
}

fn run_remove(
    session: &RecognitionSession,
    store_path: &Path,
    name: &str,
) -> Result<bool, EngineError> {
    let store = session.store();
    let existed = store.remove(name);
    if existed {
        store.save_to(store_path)?;
    }
    Ok(existed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{
        CooldownDispatcher, CosineMatcher, DetectedFace, Embedding, NotifyError,
    };
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Embedder stub: parses the "image" as a comma-separated f32 vector,
    /// one face per non-empty payload.
    struct CsvEmbedder;

    impl FaceEmbedder for CsvEmbedder {
        fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>, EmbedError> {
            let text = std::str::from_utf8(image)
                .map_err(|e| EmbedError::InvalidOutput(e.to_string()))?;
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            let values: Vec<f32> = text
                .split(',')
                .map(|v| v.trim().parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|e| EmbedError::InvalidOutput(e.to_string()))?;
            Ok(vec![DetectedFace {
                embedding: Embedding::new(values),
                region: None,
            }])
        }
    }

    struct CollectingNotifier(Arc<Mutex<Vec<String>>>);

    impl Notifier for CollectingNotifier {
        fn notify(&self, name: &str, _message: &str) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    fn spawn_test_engine(dir: &tempfile::TempDir) -> (EngineHandle, Arc<Mutex<Vec<String>>>) {
        let store_path = dir.path().join("identities.json");
        let greeted = Arc::new(Mutex::new(Vec::new()));
        let session = RecognitionSession::new(
            Arc::new(EnrollmentStore::new()),
            Box::new(CosineMatcher),
            CooldownDispatcher::new(Duration::from_secs(300)),
            0.55,
        );
        let handle = spawn_engine(
            Box::new(CsvEmbedder),
            session,
            store_path,
            Box::new(CollectingNotifier(greeted.clone())),
        );
        (handle, greeted)
    }

    #[tokio::test]
    async fn test_recognize_no_face() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = spawn_test_engine(&dir);

        let outcome = engine.recognize(b"".to_vec()).await.unwrap();
        assert_eq!(outcome.status, RecognizeStatus::NoFace);
        assert!(outcome.annotations.is_empty());
    }

    #[tokio::test]
    async fn test_recognize_against_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, greeted) = spawn_test_engine(&dir);

        let outcome = engine.recognize(b"1.0,0.0".to_vec()).await.unwrap();
        assert_eq!(outcome.status, RecognizeStatus::StoreEmpty);
        assert_eq!(outcome.annotations.len(), 1);
        assert_eq!(outcome.annotations[0].label, "Unknown");
        assert!(greeted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_then_recognize_dispatches_once() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, greeted) = spawn_test_engine(&dir);

        let enrolled = engine
            .enroll(
                "Alice".into(),
                None,
                vec![b"1.0,0.0".to_vec(), b"".to_vec(), b"1.0,0.1".to_vec()],
            )
            .await
            .unwrap();
        assert_eq!(enrolled.samples_used, 2);
        assert_eq!(enrolled.samples_skipped, 1);
        assert_eq!(enrolled.total_identities, 1);
        assert!(dir.path().join("identities.json").exists());

        let outcome = engine.recognize(b"1.0,0.05".to_vec()).await.unwrap();
        assert_eq!(outcome.status, RecognizeStatus::Recognized);
        let (name, confidence) = outcome.best.unwrap();
        assert_eq!(name, "Alice");
        assert!(confidence > 0.99);

        // Second sighting inside the cooldown window: matched, not greeted
        // again.
        let again = engine.recognize(b"1.0,0.05".to_vec()).await.unwrap();
        assert_eq!(again.status, RecognizeStatus::Recognized);
        assert_eq!(*greeted.lock().unwrap(), vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_enroll_all_samples_degenerate() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = spawn_test_engine(&dir);

        let err = engine
            .enroll("Ghost".into(), None, vec![b"".to_vec(), b"".to_vec()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(StoreError::NoValidSamples)
        ));
    }

    #[tokio::test]
    async fn test_remove_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = spawn_test_engine(&dir);

        engine
            .enroll("Alice".into(), None, vec![b"1.0,0.0".to_vec()])
            .await
            .unwrap();
        assert!(engine.remove("Alice".into()).await.unwrap());
        assert!(!engine.remove("Alice".into()).await.unwrap());

        // The persisted store is now empty; reload agrees.
        assert_eq!(engine.reload().await.unwrap(), 0);
    }
}
