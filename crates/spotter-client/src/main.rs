//! `spotter-sync`: runs the sync engine headless against a chat backend and
//! logs what it does.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use spotter_client::{init_tracing, ChannelNotifier, ClientConfig, EngineBuilder};
use spotter_net::{spawn_monitor, ChatApi, HttpChatApi};
use spotter_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = ClientConfig::from_env();
    info!(api = %config.api_base_url, sender = %config.sender_id, "Starting spotter-sync");

    let api: Arc<dyn ChatApi> = Arc::new(
        HttpChatApi::new(&config.api_base_url, config.send_timeout)
            .context("invalid SPOTTER_API_URL")?,
    );

    let (notifier, mut notifications) = ChannelNotifier::new();
    let mut builder = EngineBuilder::new(Arc::clone(&api), config.clone()).notifier(Arc::new(notifier));
    if let Some(path) = &config.queue_journal {
        let db = Database::open_at(path)
            .with_context(|| format!("failed to open queue journal at {}", path.display()))?;
        builder = builder.journal(db);
    }
    let engine = builder.spawn();

    let mut monitor = spawn_monitor(Arc::clone(&api), config.health.clone());
    let bridge = engine.clone();
    tokio::spawn(async move {
        while let Some(transition) = monitor.transitions.recv().await {
            if bridge.connectivity_changed(transition.state()).await.is_err() {
                break;
            }
        }
        monitor.task.abort();
    });

    match engine.load_rooms().await {
        Ok(n) => info!(rooms = n, "Loaded conversations"),
        Err(e) => warn!(error = %e, "Initial room load failed"),
    }

    let mut events = engine.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(event = %json, "Engine event"),
                    Err(e) => warn!(error = %e, "Failed to encode engine event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
                Err(RecvError::Closed) => break,
            },
            Some(n) = notifications.recv() => {
                info!(kind = ?n.kind, message = %n.message, "Notification");
            }
            _ = &mut shutdown => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    engine.shutdown().await.ok();
    Ok(())
}
