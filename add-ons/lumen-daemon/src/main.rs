//! Lumen reconciliation daemon.
//!
//! A long-running service that runs the scheduled reconciliation and decay
//! sweep against the aggregate store on a fixed interval, without requiring
//! the ingestion path to be online.

use chrono::Utc;
use lumen_insights::{AggregateStore, InsightsConfig, ReconciliationJob};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_STORE_PATH: &str = "lumen_aggregates";

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[lumen-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = InsightsConfig::default();
    // NOTE: sled is single-writer; the ingestion service and this daemon must
    // not open the same DB path concurrently unless they share a process.
    let store_path = std::env::var("LUMEN_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH));

    let store = match AggregateStore::open_path(&store_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(path = %store_path.display(), error = %e, "failed to open aggregate store");
            std::process::exit(1);
        }
    };

    let interval = config.sweep_interval;
    let job = Arc::new(ReconciliationJob::new(store, config));

    tracing::info!(
        interval_secs = interval.as_secs(),
        store_path = %store_path.display(),
        "Lumen daemon started"
    );

    let mut ticker = tokio::time::interval(interval);
    let mut cycle: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cycle += 1;
                let job = Arc::clone(&job);
                let swept = tokio::task::spawn_blocking(move || job.run_sweep(Utc::now())).await;
                match swept {
                    Ok(Ok(report)) => {
                        tracing::info!(
                            cycle,
                            considered = report.users_considered,
                            swept = report.users_swept,
                            failed = report.users_failed,
                            drift_repairs = report.drift_repairs,
                            decays = report.decays_applied,
                            entities_pruned = report.entities_pruned,
                            "sweep complete"
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(cycle, error = %e, "sweep failed");
                    }
                    Err(e) => {
                        tracing::warn!(cycle, error = %e, "sweep task panicked");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down daemon");
                break;
            }
        }
    }
}
