use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use herald_core::{CooldownDispatcher, EnrollmentStore, RecognitionSession};

mod config;
mod dbus_interface;
mod embedder_cmd;
mod engine;
mod notify;

use config::Config;
use dbus_interface::HeraldService;
use embedder_cmd::CommandEmbedder;
use notify::SignalNotifier;

const BUS_NAME: &str = "org.herald.Identity1";
const OBJECT_PATH: &str = "/org/herald/Identity1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("heraldd starting");

    let config = Config::from_env();
    tracing::info!(
        store = %config.store_path.display(),
        policy = config.match_policy.as_str(),
        threshold = config.threshold,
        cooldown_secs = config.cooldown.as_secs(),
        "configuration loaded"
    );

    let embedder_cmd = config
        .embedder_cmd
        .clone()
        .context("HERALD_EMBEDDER_CMD is not set; an external embedding producer is required")?;

    // A corrupt store is fatal: refuse to serve rather than silently
    // degrade to an empty gallery.
    let store = Arc::new(
        EnrollmentStore::load_from(&config.store_path)
            .context("enrollment store unusable; refusing to start")?,
    );
    tracing::info!(
        identities = store.len(),
        dimension = ?store.dimension(),
        "enrollment store ready"
    );

    let embedder = CommandEmbedder::new(
        embedder_cmd,
        config.embed_timeout,
        tokio::runtime::Handle::current(),
    );

    let (greet_tx, mut greet_rx) = tokio::sync::mpsc::channel(16);
    let notifier = SignalNotifier::new(greet_tx, config.notify_timeout);

    let session = RecognitionSession::new(
        store.clone(),
        config.match_policy.matcher(),
        CooldownDispatcher::new(config.cooldown),
        config.threshold,
    );

    let engine = engine::spawn_engine(
        Box::new(embedder),
        session,
        config.store_path.clone(),
        Box::new(notifier),
    );

    let service = HeraldService::new(engine, store, &config);
    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    // Greeting pump: emits DignitaryRecognized for events coming off the
    // engine thread and acks the emission outcome back to it.
    let iface = connection
        .object_server()
        .interface::<_, HeraldService>(OBJECT_PATH)
        .await?;
    tokio::spawn(async move {
        while let Some(event) = greet_rx.recv().await {
            let emitted = HeraldService::dignitary_recognized(
                iface.signal_emitter(),
                &event.name,
                &event.message,
            )
            .await;
            if let Err(err) = &emitted {
                tracing::warn!(name = %event.name, error = %err, "greeting signal emission failed");
            }
            let _ = event.ack.send(emitted.is_ok());
        }
    });

    tracing::info!(bus = BUS_NAME, "heraldd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("heraldd shutting down");

    Ok(())
}
