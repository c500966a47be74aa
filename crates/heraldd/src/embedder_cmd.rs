//! Subprocess adapter for the external embedding producer.
//!
//! The producer is any command that reads one base64-encoded image on
//! stdin and writes a JSON array of detected faces on stdout:
//!
//! ```json
//! [{"embedding": [0.1, ...], "box": {"x": 12.0, "y": 8.0, "width": 96.0,
//!   "height": 110.0, "confidence": 0.98}}]
//! ```
//!
//! An empty array means no face. The command is run via `sh -c` under a
//! deadline; on timeout the child is killed and the request fails without
//! touching cooldown state.

use std::process::Stdio;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use herald_core::{BoundingBox, DetectedFace, EmbedError, Embedding, FaceEmbedder};

#[derive(Deserialize)]
struct WireBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    #[serde(default)]
    confidence: f32,
}

#[derive(Deserialize)]
struct WireFace {
    embedding: Vec<f32>,
    #[serde(default, rename = "box")]
    region: Option<WireBox>,
    #[serde(default)]
    model_version: Option<String>,
}

/// Parse the producer's stdout into detected faces.
///
/// Rejects embedding-free entries and mixed dimensionalities — the
/// producer contract guarantees fixed-shape vectors, and a violation must
/// surface rather than corrupt the gallery.
pub(crate) fn parse_faces(raw: &[u8]) -> Result<Vec<DetectedFace>, EmbedError> {
    let wire: Vec<WireFace> =
        serde_json::from_slice(raw).map_err(|e| EmbedError::InvalidOutput(e.to_string()))?;

    let dim = wire.first().map(|f| f.embedding.len());
    let mut faces = Vec::with_capacity(wire.len());
    for (i, face) in wire.into_iter().enumerate() {
        if face.embedding.is_empty() {
            return Err(EmbedError::InvalidOutput(format!(
                "face {i} has an empty embedding"
            )));
        }
        if Some(face.embedding.len()) != dim {
            return Err(EmbedError::InvalidOutput(format!(
                "face {i} has dimension {}, face 0 has {}",
                face.embedding.len(),
                dim.unwrap_or(0)
            )));
        }
        faces.push(DetectedFace {
            embedding: Embedding {
                values: face.embedding,
                model_version: face.model_version,
            },
            region: face.region.map(|b| BoundingBox {
                x: b.x,
                y: b.y,
                width: b.width,
                height: b.height,
                confidence: b.confidence,
            }),
        });
    }
    Ok(faces)
}

/// [`FaceEmbedder`] backed by an external command.
pub struct CommandEmbedder {
    command: String,
    timeout: Duration,
    runtime: tokio::runtime::Handle,
}

impl CommandEmbedder {
    pub fn new(command: String, timeout: Duration, runtime: tokio::runtime::Handle) -> Self {
        Self {
            command,
            timeout,
            runtime,
        }
    }

    async fn invoke(&self, payload: String) -> Result<Vec<DetectedFace>, EmbedError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EmbedError::Producer(format!("spawn '{}': {e}", self.command)))?;

        // stdin is piped above, so take() cannot return None.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| EmbedError::Producer(format!("write stdin: {e}")))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| EmbedError::Producer(format!("write stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EmbedError::Producer(format!("wait: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EmbedError::Producer(format!(
                "exit {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_faces(&output.stdout)
    }
}

impl FaceEmbedder for CommandEmbedder {
    fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>, EmbedError> {
        let payload = BASE64.encode(image);
        self.runtime.block_on(async {
            match tokio::time::timeout(self.timeout, self.invoke(payload)).await {
                Ok(result) => result,
                // timeout drops the in-flight future; kill_on_drop reaps
                // the child.
                Err(_) => {
                    tracing::warn!(command = %self.command, "embedding producer timed out");
                    Err(EmbedError::Timeout)
                }
            }
        })
    }
}
