//! Recognition session — orchestrates query embeddings through the matcher
//! and the cooldown dispatcher, one tick at a time.
//!
//! A tick is whatever unit the host deals in (one processed video frame,
//! one API request). Ticks run sequentially; within a tick every query is
//! matched against a single store snapshot, so a concurrent reload is
//! observed either fully-old or fully-new, never mixed.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::cooldown::CooldownDispatcher;
use crate::matcher::Matcher;
use crate::store::{EnrollmentStore, StoreError};
use crate::types::{Annotation, IdentityRecord, Query, UNKNOWN_LABEL};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification timed out")]
    Timeout,
    #[error("notification failed: {0}")]
    Failed(String),
}

/// Downstream action consumer (greeting API, TTS bridge, signal emitter).
///
/// Must be latency-bounded and safe to call again after a failure.
pub trait Notifier {
    fn notify(&self, name: &str, message: &str) -> Result<(), NotifyError>;
}

/// Greeting used when an identity carries no formal override.
fn default_greeting(name: &str) -> String {
    format!("Hello {name}, how are you? How can I assist you today?")
}

fn greeting_for(gallery: &[IdentityRecord], name: &str) -> String {
    gallery
        .iter()
        .find(|r| r.name == name)
        .and_then(|r| r.greeting.clone())
        .unwrap_or_else(|| default_greeting(name))
}

/// Per-session state: a store handle, the deployed matcher, the cooldown
/// dispatcher, and the operating threshold. Constructed explicitly by the
/// host; independent sessions never share cooldown state.
pub struct RecognitionSession {
    store: Arc<EnrollmentStore>,
    matcher: Box<dyn Matcher>,
    dispatcher: CooldownDispatcher,
    threshold: f32,
}

impl RecognitionSession {
    pub fn new(
        store: Arc<EnrollmentStore>,
        matcher: Box<dyn Matcher>,
        dispatcher: CooldownDispatcher,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            matcher,
            dispatcher,
            threshold,
        }
    }

    pub fn store(&self) -> &Arc<EnrollmentStore> {
        &self.store
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Map a raw match score to the display confidence of the deployed
    /// policy.
    pub fn display_confidence(&self, score: f32) -> f32 {
        self.matcher.display_confidence(score)
    }

    /// Run one batch of query embeddings through match → dispatch →
    /// annotate.
    ///
    /// Every query gets an annotation, matched or not. For each match that
    /// cleared the threshold and is outside its cooldown window, the
    /// notifier is invoked; the dispatch is recorded only when it returns
    /// `Ok`, so a failed action is retried on the next recognized
    /// occurrence.
    pub fn process_tick(
        &mut self,
        queries: &[Query],
        now: Instant,
        notifier: &dyn Notifier,
    ) -> Vec<Annotation> {
        // One snapshot for the whole tick.
        let gallery = self.store.snapshot();
        let mut annotations = Vec::with_capacity(queries.len());

        for query in queries {
            let result = self
                .matcher
                .compare(&query.embedding, &gallery, self.threshold);

            if let Some(name) = result.identity.as_deref() {
                if self.dispatcher.should_dispatch(name, now) {
                    let message = greeting_for(&gallery, name);
                    match notifier.notify(name, &message) {
                        Ok(()) => {
                            self.dispatcher.record_dispatch(name, now);
                            tracing::info!(name, score = result.score, "greeting dispatched");
                        }
                        Err(err) => {
                            // Cooldown state untouched: retry next tick.
                            tracing::warn!(name, error = %err, "greeting dispatch failed");
                        }
                    }
                }
            }

            annotations.push(Annotation {
                label: result
                    .identity
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
                confidence: self.matcher.display_confidence(result.score),
                identity: result.identity,
                region: query.region.clone(),
                face_index: query.face_index,
            });
        }

        annotations
    }

    /// Hot-reload the store between ticks. In-flight snapshots are
    /// unaffected; the next tick sees the new gallery.
    pub fn reload(&mut self, path: &std::path::Path) -> Result<usize, StoreError> {
        self.store.reload_from(path)
    }

    /// Clear cooldown history (e.g., after a session restart request).
    pub fn reset_cooldowns(&mut self) {
        self.dispatcher.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::CosineMatcher;
    use crate::types::Embedding;
    use std::cell::RefCell;
    use std::time::Duration;

    /// Notifier that records calls and fails the first `fail_first` of
    /// them.
    struct ScriptedNotifier {
        calls: RefCell<Vec<(String, String)>>,
        fail_first: RefCell<usize>,
    }

    impl ScriptedNotifier {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail_first: RefCell::new(0),
            }
        }

        fn failing(n: usize) -> Self {
            let s = Self::new();
            *s.fail_first.borrow_mut() = n;
            s
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.borrow().clone()
        }
    }

    impl Notifier for ScriptedNotifier {
        fn notify(&self, name: &str, message: &str) -> Result<(), NotifyError> {
            self.calls
                .borrow_mut()
                .push((name.to_string(), message.to_string()));
            let mut remaining = self.fail_first.borrow_mut();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NotifyError::Failed("greeting endpoint unreachable".into()));
            }
            Ok(())
        }
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn query(values: &[f32], face_index: usize) -> Query {
        Query {
            embedding: emb(values),
            region: None,
            face_index,
        }
    }

    fn session_with(store: EnrollmentStore, cooldown: Duration) -> RecognitionSession {
        RecognitionSession::new(
            Arc::new(store),
            Box::new(CosineMatcher),
            CooldownDispatcher::new(cooldown),
            0.55,
        )
    }

    #[test]
    fn test_empty_store_annotates_everything_unknown() {
        let mut session = session_with(EnrollmentStore::new(), Duration::from_secs(300));
        let notifier = ScriptedNotifier::new();

        let annotations =
            session.process_tick(&[query(&[1.0, 0.0], 0)], Instant::now(), &notifier);

        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].label, "Unknown");
        assert!(annotations[0].identity.is_none());
        assert!(notifier.calls().is_empty());
    }

    #[test]
    fn test_match_dispatches_default_greeting() {
        let store = EnrollmentStore::new();
        store.enroll("Alice", None, &[emb(&[1.0, 0.0])]).unwrap();
        let mut session = session_with(store, Duration::from_secs(300));
        let notifier = ScriptedNotifier::new();

        let annotations =
            session.process_tick(&[query(&[1.0, 0.0], 0)], Instant::now(), &notifier);

        assert_eq!(annotations[0].label, "Alice");
        assert!((annotations[0].confidence - 1.0).abs() < 1e-6);
        assert_eq!(
            notifier.calls(),
            vec![(
                "Alice".to_string(),
                "Hello Alice, how are you? How can I assist you today?".to_string()
            )]
        );
    }

    #[test]
    fn test_formal_greeting_override_used() {
        let store = EnrollmentStore::new();
        store
            .enroll(
                "Manoj",
                Some("Dr. Manoj Goel, our Director".into()),
                &[emb(&[0.0, 1.0])],
            )
            .unwrap();
        let mut session = session_with(store, Duration::from_secs(300));
        let notifier = ScriptedNotifier::new();

        session.process_tick(&[query(&[0.0, 1.0], 0)], Instant::now(), &notifier);

        assert_eq!(
            notifier.calls()[0].1,
            "Dr. Manoj Goel, our Director".to_string()
        );
    }

    #[test]
    fn test_cooldown_suppresses_repeat_dispatch_across_ticks() {
        let store = EnrollmentStore::new();
        store.enroll("Alice", None, &[emb(&[1.0, 0.0])]).unwrap();
        let mut session = session_with(store, Duration::from_secs(300));
        let notifier = ScriptedNotifier::new();

        let t0 = Instant::now();
        session.process_tick(&[query(&[1.0, 0.0], 0)], t0, &notifier);
        session.process_tick(&[query(&[1.0, 0.0], 0)], t0 + Duration::from_secs(10), &notifier);
        assert_eq!(notifier.calls().len(), 1);

        // Window elapsed: dispatch again.
        session.process_tick(&[query(&[1.0, 0.0], 0)], t0 + Duration::from_secs(301), &notifier);
        assert_eq!(notifier.calls().len(), 2);
    }

    #[test]
    fn test_failed_dispatch_is_retried_next_tick() {
        let store = EnrollmentStore::new();
        store.enroll("Alice", None, &[emb(&[1.0, 0.0])]).unwrap();
        let mut session = session_with(store, Duration::from_secs(300));
        let notifier = ScriptedNotifier::failing(1);

        let t0 = Instant::now();
        session.process_tick(&[query(&[1.0, 0.0], 0)], t0, &notifier);
        // First call failed — no dispatch recorded, next tick retries.
        session.process_tick(&[query(&[1.0, 0.0], 0)], t0 + Duration::from_secs(1), &notifier);
        assert_eq!(notifier.calls().len(), 2);

        // Second call succeeded — now the window holds.
        session.process_tick(&[query(&[1.0, 0.0], 0)], t0 + Duration::from_secs(2), &notifier);
        assert_eq!(notifier.calls().len(), 2);
    }

    #[test]
    fn test_mixed_batch_annotates_every_query() {
        let store = EnrollmentStore::new();
        store.enroll("Alice", None, &[emb(&[1.0, 0.0])]).unwrap();
        let mut session = session_with(store, Duration::from_secs(300));
        let notifier = ScriptedNotifier::new();

        let annotations = session.process_tick(
            &[query(&[1.0, 0.0], 0), query(&[-1.0, 0.1], 1)],
            Instant::now(),
            &notifier,
        );

        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].label, "Alice");
        assert_eq!(annotations[0].face_index, 0);
        assert_eq!(annotations[1].label, "Unknown");
        assert_eq!(annotations[1].face_index, 1);
        assert_eq!(notifier.calls().len(), 1);
    }

    #[test]
    fn test_reload_takes_effect_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.json");

        let writer = EnrollmentStore::new();
        writer.enroll("Bob", None, &[emb(&[1.0, 0.0])]).unwrap();
        writer.save_to(&path).unwrap();

        let store = EnrollmentStore::new();
        store.enroll("Alice", None, &[emb(&[1.0, 0.0])]).unwrap();
        let mut session = session_with(store, Duration::from_secs(300));
        let notifier = ScriptedNotifier::new();

        let before = session.process_tick(&[query(&[1.0, 0.0], 0)], Instant::now(), &notifier);
        assert_eq!(before[0].label, "Alice");

        session.reload(&path).unwrap();
        let after = session.process_tick(&[query(&[1.0, 0.0], 0)], Instant::now(), &notifier);
        assert_eq!(after[0].label, "Bob");
    }
}
