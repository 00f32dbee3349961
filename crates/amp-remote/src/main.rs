use std::sync::Arc;

use amp_remote::core::{self, Backends, CoreBroadcast, RemoteCore};
use amp_remote::http::HttpBackend;
use amp_remote::{channel, console};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = amp_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("remote.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // stdout belongs to the console.
    eprintln!("amp-remote log: {}", log_path.display());

    tracing::info!("amp-remote starting");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match amp_proto::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("config unreadable, using defaults: {}", e);
            amp_proto::config::Config::default()
        }
    };

    // ── Channels ─────────────────────────────────────────────────────────────
    let (broadcast_tx, _) = broadcast::channel::<CoreBroadcast>(1024);
    let (event_tx, event_rx) = mpsc::channel::<core::CoreEvent>(1024);
    let (requests_tx, requests_rx) = mpsc::channel(64);

    // ── HTTP command API ─────────────────────────────────────────────────────
    let http = Arc::new(HttpBackend::from_config(&config.backend)?);
    let backends = Backends {
        volume: http.clone(),
        settings: http,
    };

    // ── Build RemoteCore ─────────────────────────────────────────────────────
    let remote_core = RemoteCore::new(
        &config,
        backends,
        requests_tx,
        event_tx.clone(),
        broadcast_tx,
    );
    let handle = remote_core.handle();

    // ── Event channel ────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let channel_task = channel::start(
        config.backend.event_address(),
        config.backend.reconnect_delay(),
        event_tx,
        requests_rx,
        cancel.clone(),
    );

    // ── Spawn RemoteCore event loop ──────────────────────────────────────────
    let core_task = tokio::spawn(async move {
        if let Err(e) = remote_core.run(event_rx).await {
            tracing::error!("RemoteCore exited with error: {}", e);
        }
    });

    // ── Run console ──────────────────────────────────────────────────────────
    let result = console::run(handle.clone()).await;

    cancel.cancel();
    handle.shutdown().await;
    let _ = core_task.await;
    let _ = channel_task.await;
    tracing::info!("amp-remote stopped");

    result
}
