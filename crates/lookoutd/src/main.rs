use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use lookout_core::import::CsvImporter;
use lookout_core::matcher::SimilarityMatcher;
use lookout_core::notify::{attach_debouncer, NotificationDebouncer};
use lookout_core::store::EventKind;
use lookout_core::{CaptureGuard, EventLog, IdentityResolver, SessionManager, VisualContextBus};
use lookout_store::{FsBlobStore, SqliteStore};

mod config;
mod dbus_interface;
mod embedder;
mod engine;

use config::Config;
use dbus_interface::{LookoutService, BUS_NAME, OBJECT_PATH};
use embedder::DbusEmbeddingProvider;
use engine::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("lookoutd starting");
    let config = Config::from_env();

    let store = Arc::new(SqliteStore::open(&config.db_path).await?);
    tracing::info!(db = %config.db_path.display(), "store opened");

    let blobs = Arc::new(FsBlobStore::new(
        &config.headshot_dir,
        &config.headshot_base_url,
    ));

    let matcher = SimilarityMatcher::new(
        store.clone(),
        config.match_threshold,
        Duration::from_secs(config.store_timeout_secs),
    );
    tracing::info!(threshold = config.match_threshold, "matcher configured");

    let resolver = IdentityResolver::new(
        store.clone(),
        SessionManager::new(store.clone()),
        EventLog::new(store.clone()),
        matcher,
    );
    let capture = CaptureGuard::new(store.clone(), blobs);
    let bus = VisualContextBus::new();

    let pipeline = Arc::new(Pipeline::new(resolver, capture, bus.clone()));
    let handle = engine::spawn_pipeline(pipeline, config.frame_queue_depth);

    // Debounced agent notifications flow through a channel into the D-Bus
    // signal emitter below; the bus fan-out itself never blocks.
    let debouncer = Arc::new(NotificationDebouncer::new(Duration::from_secs(
        config.notify_interval_secs,
    )));
    let (notify_tx, mut notify_rx) = tokio::sync::mpsc::channel::<String>(16);
    let _notify_sub = attach_debouncer(&bus, debouncer, notify_tx);

    let connection = zbus::Connection::session().await?;

    let embedder = Arc::new(DbusEmbeddingProvider::connect(&connection).await?);
    let importer = Arc::new(CsvImporter::new(store.clone(), embedder));

    let service = LookoutService::new(
        handle,
        bus.clone(),
        store.clone(),
        EventLog::new(store.clone()),
        importer,
    );
    connection.object_server().at(OBJECT_PATH, service).await?;
    connection.request_name(BUS_NAME).await?;
    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    let iface = connection
        .object_server()
        .interface::<_, LookoutService>(OBJECT_PATH)
        .await?;
    let whisper_log = EventLog::new(store.clone());
    tokio::spawn(async move {
        while let Some(message) = notify_rx.recv().await {
            if let Err(err) =
                LookoutService::context_update(iface.signal_emitter(), &message).await
            {
                tracing::warn!(error = %err, "failed to emit context update signal");
            }
            // The forwarded instruction is part of the audit trail.
            if let Err(err) = whisper_log
                .append(None, EventKind::AgentWhisper, message, None)
                .await
            {
                tracing::warn!(error = %err, "failed to record agent whisper");
            }
        }
    });

    tracing::info!("lookoutd ready");
    tokio::signal::ctrl_c().await?;

    tracing::info!("lookoutd shutting down");
    if let Err(err) = SessionManager::new(store.clone()).end_active().await {
        tracing::warn!(error = %err, "failed to close active session");
    }

    Ok(())
}
