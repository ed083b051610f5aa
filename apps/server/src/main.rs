use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use circlevault_server::bootstrap::initialize;
use circlevault_server::config::ServerConfig;
use circlevault_server::sanity::SanityEngine;
use circlevault_server::shutdown::shutdown_signal;
use circlevault_server::tasks::sanity_scan::spawn_sanity_task;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let startup_scan = config.sanity.startup_scan;
    let scan_every = Duration::from_secs(config.sanity.scan_every_minutes.max(1) * 60);
    let state = initialize(config).await?;
    if !state.is_ready() {
        tracing::error!("vault started without a master key; operations will fail with NOT_READY");
    }

    let engine = Arc::new(SanityEngine::new(&state));
    if startup_scan && state.settings.snapshot().sanity_enabled {
        let startup = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || startup.scan_all(&AtomicBool::new(false))).await??;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let scan_task = spawn_sanity_task(engine, scan_every, shutdown_rx);
    tracing::info!(every = ?scan_every, "circlevault running");

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    scan_task.await?;

    tracing::info!("circlevault stopped");
    Ok(())
}
