//! Wires a validated [`Config`] into a running search.

use crate::aggregator::ResultAggregator;
use crate::config::Config;
use crate::orchestrator::{RunSummary, SearchOrchestrator};
use anyhow::{Context, Result};
use std::future::Future;
use tokio::sync::watch;
use tracing::{info, warn};

/// Runs the search until Ctrl-C, the batch limit or a fatal error.
pub async fn run_search(config: &Config) -> Result<RunSummary> {
    let task = config.search_task();
    info!(
        chains = config.chains,
        workers = config.worker_count(),
        initial_states = task.initial_states.len(),
        samples = task.time_grid.len(),
        confidence = task.classifier.confidence,
        log_dir = %config.log_dir.display(),
        "starting search"
    );

    let mut aggregator = ResultAggregator::create(&config.log_dir, config.log_mode)
        .context("failed to prepare result logs")?;
    let orchestrator = SearchOrchestrator::new(task, config.orchestrator_settings());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signals = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, finishing in-flight tasks");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for interrupt");
                // Keep the sender alive so the search is not stopped by the drop.
                std::future::pending::<()>().await;
            }
        }
    });

    let outcome = orchestrator.run(&mut aggregator, shutdown_rx).await;
    signals.abort();
    // Leave the status line intact.
    println!();

    let summary = outcome?;
    let counters = aggregator.counters();
    info!(
        batches = summary.completed,
        failed = summary.failed,
        skipped = summary.skipped,
        systems = counters.total,
        cycles = counters.cycles,
        strange_attractors = counters.strange_attractors,
        "search finished"
    );
    Ok(summary)
}

/// Drives `search` on a multi-threaded runtime whose blocking pool holds
/// `workers` threads.
///
/// Blocking workers cannot be cancelled. When the search fails, or when
/// `abandon` is set, the runtime is shut down in the background so that
/// tasks still integrating do not hold the process open.
pub fn block_on_search<F, T>(workers: usize, abandon: bool, search: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(workers)
        .build()
        .context("failed to start async runtime")?;

    let outcome = runtime.block_on(search);
    if abandon || outcome.is_err() {
        runtime.shutdown_background();
    }
    outcome
}
