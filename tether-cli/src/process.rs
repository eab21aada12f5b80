//! Drive a maintainer as the body of the process.
//!
//! SIGINT and SIGTERM cancel the maintainer's shutdown token; the process
//! exits once `run` returns.

use anyhow::Result;
use tether_core::{ReadySignal, Runner};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run `runner` until it returns, cancelling it on SIGINT or SIGTERM.
pub async fn run_until_signal<R: Runner>(runner: R) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(shutdown.clone()));

    let result = supervise(runner, shutdown).await;
    signals.abort();
    result
}

/// Run `runner` with `shutdown` as its stop signal, logging readiness.
pub async fn supervise<R: Runner>(runner: R, shutdown: CancellationToken) -> Result<()> {
    let name = runner.name();
    let (ready, ready_rx) = ReadySignal::channel();

    let ready_log = tokio::spawn(async move {
        if ready_rx.await.is_ok() {
            info!(maintainer = name, "Maintainer ready");
        }
    });

    info!(maintainer = name, "Starting maintainer");
    let result = runner.run(shutdown, ready).await;
    ready_log.abort();

    match &result {
        Ok(()) => info!(maintainer = name, "Maintainer stopped"),
        Err(e) => warn!(maintainer = name, error = %e, "Maintainer failed"),
    }
    Ok(result?)
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    wait_for_signal().await;
    info!("Shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
