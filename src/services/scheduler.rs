//! Interval loop around [`RunCoordinator::run_once`].

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::coordinator::{RunCoordinator, RunOptions};

/// Runs the coordinator on a fixed interval until cancelled.
///
/// The first run starts immediately. Each run is awaited before the next
/// tick, so runs never overlap; ticks missed during a long run are delayed
/// rather than fired back to back.
pub struct Scheduler {
    coordinator: Arc<RunCoordinator>,
    options: RunOptions,
    interval: Duration,
}

impl Scheduler {
    pub fn new(coordinator: Arc<RunCoordinator>, options: RunOptions, interval: Duration) -> Self {
        Self {
            coordinator,
            options,
            interval,
        }
    }

    /// Loops until `shutdown` is cancelled. Returns the number of runs started.
    ///
    /// Cancellation is only observed between runs; an in-flight run always
    /// completes. A run that panics is logged and the loop carries on.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(runs, "Scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    runs += 1;
                    self.run_one().await;
                }
            }
        }

        runs
    }

    async fn run_one(&self) {
        let coordinator = Arc::clone(&self.coordinator);
        let options = self.options.clone();

        let handle = tokio::spawn(async move { coordinator.run_once(&options).await });

        match handle.await {
            Ok(report) => tracing::info!(
                run_id = %report.run_id,
                duration_ms = report.duration_ms,
                "Scheduled run finished: {}",
                report.stats
            ),
            Err(e) if e.is_panic() => tracing::error!("Scheduled run panicked: {}", e),
            Err(e) => tracing::error!("Scheduled run was cancelled: {}", e),
        }
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
///
/// If a handler cannot be installed that signal is ignored and the other one
/// still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
