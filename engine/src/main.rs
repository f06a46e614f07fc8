use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use netsched::config::SchedulerConfig;
use netsched::queue::QueueRegistry;
use netsched::telemetry;

const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Global shutdown flag for graceful shutdown
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "Failed to install Ctrl+C handler, continuing without it");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, continuing without it");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
    SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    let _ = shutdown_tx.send(());
}

/// Configuration path from the first argument or `NETSCHED_CONFIG`.
fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("NETSCHED_CONFIG").map(PathBuf::from))
}

fn load_config() -> netsched::Result<SchedulerConfig> {
    match config_path() {
        Some(path) => SchedulerConfig::load(&path),
        None => {
            let mut config = SchedulerConfig::default();
            config.apply_env();
            warn!("No configuration file given, starting without queue classes");
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();

    let config = load_config()?;
    let data_dir = config.storage.data_dir.clone();
    let registry = tokio::task::spawn_blocking(move || QueueRegistry::open(config)).await??;

    info!(
        data_dir = %data_dir.display(),
        queues = ?registry.queue_names(),
        "netschedd started"
    );

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(shutdown_signal(shutdown_tx));

    let background = tokio::spawn(Arc::clone(&registry).background_tasks());

    let _ = shutdown_rx.recv().await;
    if !SHUTDOWN_FLAG.load(Ordering::Relaxed) {
        warn!("Shutdown channel closed unexpectedly");
    }
    registry.shutdown();

    // The background loop only checks the flag between ticks.
    background.abort();
    match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), background).await {
        Ok(Err(e)) if !e.is_cancelled() => error!(error = %e, "Background task failed"),
        Err(_) => warn!("Background task did not stop in time"),
        _ => {}
    }

    info!("Shutdown complete");
    Ok(())
}
