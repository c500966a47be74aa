use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use zbus::interface;
use zbus::object_server::SignalEmitter;

use herald_core::EnrollmentStore;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle, RecognizeOutcome, RecognizeStatus};

/// D-Bus interface for the Herald greeting daemon.
///
/// Bus name: org.herald.Identity1
/// Object path: /org/herald/Identity1
pub struct HeraldService {
    engine: EngineHandle,
    store: Arc<EnrollmentStore>,
    policy: &'static str,
    threshold: f32,
    cooldown_secs: u64,
    store_path: String,
}

impl HeraldService {
    pub fn new(engine: EngineHandle, store: Arc<EnrollmentStore>, config: &Config) -> Self {
        Self {
            engine,
            store,
            policy: config.match_policy.as_str(),
            threshold: config.threshold,
            cooldown_secs: config.cooldown.as_secs(),
            store_path: config.store_path.display().to_string(),
        }
    }
}

/// Human-readable reason per recognize status.
fn status_message(outcome: &RecognizeOutcome) -> String {
    match outcome.status {
        RecognizeStatus::Recognized => match &outcome.best {
            Some((name, _)) => format!("Recognized {name}"),
            None => "Recognized".to_string(),
        },
        RecognizeStatus::Unknown => "Unknown face".to_string(),
        RecognizeStatus::NoFace => "No face detected".to_string(),
        RecognizeStatus::StoreEmpty => "Face database is empty".to_string(),
    }
}

fn outcome_json(outcome: &RecognizeOutcome) -> serde_json::Value {
    let mut body = serde_json::json!({
        "success": outcome.status == RecognizeStatus::Recognized,
        "status": outcome.status.as_str(),
        "message": status_message(outcome),
        "faces": &outcome.annotations,
    });
    if let Some((name, confidence)) = &outcome.best {
        body["name"] = serde_json::json!(name);
        body["confidence"] = serde_json::json!(confidence);
    } else if let Some(best_attempt) = outcome
        .annotations
        .iter()
        .map(|a| a.confidence)
        .max_by(f32::total_cmp)
    {
        // Below-threshold confidence, the way the original API reported it.
        body["confidence"] = serde_json::json!(best_attempt);
    }
    body
}

fn decode_image(raw: &str) -> zbus::fdo::Result<Vec<u8>> {
    // Tolerate data-URL prefixes ("data:image/jpeg;base64,...").
    let trimmed = raw.rsplit(',').next().unwrap_or(raw).trim();
    BASE64
        .decode(trimmed)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("image is not valid base64: {e}")))
}

fn engine_failure(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.herald.Identity1")]
impl HeraldService {
    /// Recognize faces in a base64-encoded image.
    ///
    /// Returns a JSON envelope: `{success, status, name?, confidence?,
    /// message, faces}` with status one of recognized / unknown / no_face
    /// / store_empty. Matched dignitaries outside their cooldown window
    /// are greeted via the `DignitaryRecognized` signal as a side effect.
    async fn recognize(&self, image: &str) -> zbus::fdo::Result<String> {
        let bytes = decode_image(image)?;
        let outcome = self.engine.recognize(bytes).await.map_err(engine_failure)?;
        tracing::info!(
            status = outcome.status.as_str(),
            faces = outcome.annotations.len(),
            "recognize completed"
        );
        Ok(outcome_json(&outcome).to_string())
    }

    /// Enroll an identity from base64-encoded images.
    ///
    /// Images where the producer finds no face are skipped; the remaining
    /// embeddings are averaged into the reference. An empty greeting means
    /// "use the default template". Re-enrolling a name replaces its
    /// record.
    async fn enroll(
        &self,
        name: &str,
        greeting: &str,
        images: Vec<String>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(name, images = images.len(), "enroll requested");
        let mut decoded = Vec::with_capacity(images.len());
        for image in &images {
            decoded.push(decode_image(image)?);
        }
        let greeting = if greeting.is_empty() {
            None
        } else {
            Some(greeting.to_string())
        };

        match self.engine.enroll(name.to_string(), greeting, decoded).await {
            Ok(outcome) => Ok(serde_json::json!({
                "success": true,
                "name": outcome.name,
                "samples_used": outcome.samples_used,
                "samples_skipped": outcome.samples_skipped,
                "identities": outcome.total_identities,
            })
            .to_string()),
            // Structured failure, not a bus error: bad enrollment input is
            // an expected condition the caller must be able to read.
            Err(EngineError::Store(err)) => Ok(serde_json::json!({
                "success": false,
                "message": err.to_string(),
            })
            .to_string()),
            Err(err) => Err(engine_failure(err)),
        }
    }

    /// Remove an enrolled identity by name.
    async fn remove_identity(&self, name: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(name, "remove requested");
        self.engine
            .remove(name.to_string())
            .await
            .map_err(engine_failure)
    }

    /// Re-read the enrollment store from disk. Returns the identity count.
    async fn reload(&self) -> zbus::fdo::Result<u32> {
        let count = self.engine.reload().await.map_err(engine_failure)?;
        Ok(count as u32)
    }

    /// List enrolled identities (metadata only, no embeddings).
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let summaries: Vec<serde_json::Value> = self
            .store
            .snapshot()
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "name": r.name,
                    "samples": r.sample_count,
                    "greeting": r.greeting,
                    "created_at": r.created_at.to_rfc3339(),
                })
            })
            .collect();
        Ok(serde_json::json!(summaries).to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities": self.store.len(),
            "dimension": self.store.dimension(),
            "policy": self.policy,
            "threshold": self.threshold,
            "cooldown_secs": self.cooldown_secs,
            "store_path": self.store_path,
        })
        .to_string())
    }

    /// Emitted once per identity per cooldown window when a match clears
    /// the threshold.
    #[zbus(signal)]
    pub async fn dignitary_recognized(
        emitter: &SignalEmitter<'_>,
        name: &str,
        message: &str,
    ) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::Annotation;

    #[test]
    fn test_decode_image_plain_and_data_url() {
        let plain = BASE64.encode(b"jpegbytes");
        assert_eq!(decode_image(&plain).unwrap(), b"jpegbytes");

        let data_url = format!("data:image/jpeg;base64,{plain}");
        assert_eq!(decode_image(&data_url).unwrap(), b"jpegbytes");

        assert!(decode_image("%%%").is_err());
    }

    #[test]
    fn test_outcome_json_recognized() {
        let outcome = RecognizeOutcome {
            status: RecognizeStatus::Recognized,
            best: Some(("Manoj".into(), 0.91)),
            annotations: vec![Annotation {
                identity: Some("Manoj".into()),
                label: "Manoj".into(),
                confidence: 0.91,
                region: None,
                face_index: 0,
            }],
        };
        let body = outcome_json(&outcome);
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "recognized");
        assert_eq!(body["name"], "Manoj");
        assert_eq!(body["faces"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_outcome_json_unknown_carries_best_attempt_confidence() {
        let outcome = RecognizeOutcome {
            status: RecognizeStatus::Unknown,
            best: None,
            annotations: vec![Annotation {
                identity: None,
                label: "Unknown".into(),
                confidence: 0.31,
                region: None,
                face_index: 0,
            }],
        };
        let body = outcome_json(&outcome);
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], "unknown");
        assert!(body.get("name").is_none());
        assert!((body["confidence"].as_f64().unwrap() - 0.31).abs() < 1e-6);
    }

    #[test]
    fn test_outcome_json_no_face() {
        let outcome = RecognizeOutcome {
            status: RecognizeStatus::NoFace,
            best: None,
            annotations: Vec::new(),
        };
        let body = outcome_json(&outcome);
        assert_eq!(body["status"], "no_face");
        assert_eq!(body["message"], "No face detected");
        assert!(body.get("confidence").is_none());
    }
}
