use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::sanity::SanityEngine;

/// Spawns the periodic sanity scan. Each scan runs on the blocking pool; a
/// shutdown signal sets the cancel flag so an in-flight scan stops at the
/// next record.
pub fn spawn_sanity_task(
    engine: Arc<SanityEngine>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(60));
    tokio::spawn(async move {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // skip immediate first tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let engine = Arc::clone(&engine);
                    let flag = Arc::clone(&cancel);
                    let mut scan = tokio::task::spawn_blocking(move || engine.scan(Utc::now(), &flag));
                    let result = tokio::select! {
                        result = &mut scan => result,
                        _ = shutdown.recv() => {
                            cancel.store(true, Ordering::Relaxed);
                            let _ = scan.await;
                            tracing::info!("sanity scan task shutting down");
                            break;
                        }
                    };
                    match result {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::error!(error = %e, "sanity scan failed"),
                        Err(e) => tracing::error!(error = %e, "sanity scan task panicked"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("sanity scan task shutting down");
                    break;
                }
            }
        }
    })
}
