use std::path::PathBuf;
use std::time::Duration;

use herald_core::matcher::{
    CosineMatcher, EuclideanMatcher, Matcher, DEFAULT_COSINE_THRESHOLD,
    DEFAULT_EUCLIDEAN_THRESHOLD,
};

/// Scoring policy deployed for the daemon's lifetime.
///
/// The two policies carry different threshold conventions (minimum cosine
/// similarity vs. maximum Euclidean distance), so the operating threshold
/// defaults per policy and the numbers never transfer between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    Cosine,
    Euclidean,
}

impl MatchPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "euclidean" => Some(Self::Euclidean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
        }
    }

    pub fn matcher(&self) -> Box<dyn Matcher> {
        match self {
            Self::Cosine => Box::new(CosineMatcher),
            Self::Euclidean => Box::new(EuclideanMatcher),
        }
    }

    pub fn default_threshold(&self) -> f32 {
        match self {
            Self::Cosine => DEFAULT_COSINE_THRESHOLD,
            Self::Euclidean => DEFAULT_EUCLIDEAN_THRESHOLD,
        }
    }
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the persisted enrollment store (JSON).
    pub store_path: PathBuf,
    /// Deployed scoring policy.
    pub match_policy: MatchPolicy,
    /// Operating threshold in the deployed policy's convention.
    pub threshold: f32,
    /// Minimum interval between two dispatched greetings per identity.
    pub cooldown: Duration,
    /// Deadline for one greeting dispatch (signal emission + ack).
    pub notify_timeout: Duration,
    /// External embedding producer command, run via `sh -c`.
    pub embedder_cmd: Option<String>,
    /// Deadline for one producer invocation.
    pub embed_timeout: Duration,
}

impl Config {
    /// Load configuration from `HERALD_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("herald");

        let store_path = std::env::var("HERALD_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("identities.json"));

        let match_policy = match std::env::var("HERALD_MATCH_POLICY") {
            Ok(raw) => MatchPolicy::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(raw = %raw, "unknown HERALD_MATCH_POLICY; using cosine");
                MatchPolicy::Cosine
            }),
            Err(_) => MatchPolicy::Cosine,
        };

        Self {
            store_path,
            match_policy,
            threshold: env_f32("HERALD_MATCH_THRESHOLD", match_policy.default_threshold()),
            cooldown: Duration::from_secs(env_u64("HERALD_COOLDOWN_SECS", 300)),
            notify_timeout: Duration::from_secs(env_u64("HERALD_NOTIFY_TIMEOUT_SECS", 5)),
            embedder_cmd: std::env::var("HERALD_EMBEDDER_CMD").ok(),
            embed_timeout: Duration::from_secs(env_u64("HERALD_EMBED_TIMEOUT_SECS", 10)),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
