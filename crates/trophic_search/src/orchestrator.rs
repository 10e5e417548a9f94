//! Keeps a fixed number of search chains in flight.
//!
//! Each chain is a slot that cycles through issue, await and reissue. Worker
//! computation runs on the blocking pool; everything else, including handing
//! results to the sink, runs on the single task that drives [`SearchOrchestrator::run`].

use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use trophic_core::task::{SearchResult, SearchTask, TaskError};

/// Pure, CPU-bound unit of work executed on a worker thread.
pub trait SearchJob: Send + Sync + 'static {
    fn run(&self) -> Result<SearchResult, TaskError>;
}

impl SearchJob for SearchTask {
    fn run(&self) -> Result<SearchResult, TaskError> {
        SearchTask::run(self)
    }
}

/// Snapshot of the pipeline when a result is handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub in_flight: usize,
    pub completed: u64,
}

/// Receives complete results, one at a time, in completion order.
pub trait ResultSink {
    fn record(&mut self, result: SearchResult, progress: Progress) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Number of chains kept in flight.
    pub chains: usize,
    /// Consecutive worker failures tolerated per chain before the run stops.
    pub max_chain_failures: usize,
    /// Stop issuing once this many results are completed or in flight.
    pub max_batches: Option<u64>,
    /// Wait for in-flight tasks after shutdown and record their results.
    pub drain_on_shutdown: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            chains: 2,
            max_chain_failures: 3,
            max_batches: None,
            drain_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub issued: u64,
    pub completed: u64,
    pub failed: u64,
    /// Parameter vectors dropped because the solver could not follow them.
    pub skipped: u64,
}

type Completion = (usize, Result<SearchResult, TaskError>);

pub struct SearchOrchestrator<J> {
    job: Arc<J>,
    settings: OrchestratorSettings,
}

struct RunState {
    in_flight: JoinSet<Completion>,
    failures: Vec<usize>,
    summary: RunSummary,
}

impl<J: SearchJob> SearchOrchestrator<J> {
    pub fn new(job: J, settings: OrchestratorSettings) -> Self {
        Self::with_shared(Arc::new(job), settings)
    }

    pub fn with_shared(job: Arc<J>, settings: OrchestratorSettings) -> Self {
        Self { job, settings }
    }

    /// Runs until `shutdown` turns true (or its sender is dropped), the batch
    /// limit is reached, or a task fails fatally.
    pub async fn run<S: ResultSink>(&self, sink: &mut S, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        if self.settings.chains == 0 {
            bail!("at least one search chain is required");
        }

        let mut state = RunState {
            in_flight: JoinSet::new(),
            failures: vec![0; self.settings.chains],
            summary: RunSummary::default(),
        };
        for slot in 0..self.settings.chains {
            self.issue(&mut state, slot);
        }
        info!(chains = self.settings.chains, "search started");

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, no further tasks will be issued");
                break;
            }
            if state.in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("shutdown handle dropped, no further tasks will be issued");
                        break;
                    }
                }
                joined = state.in_flight.join_next() => {
                    let Some(joined) = joined else { break };
                    if let Err(err) = self.settle(&mut state, sink, joined, true) {
                        state.in_flight.abort_all();
                        return Err(err);
                    }
                }
            }
        }

        if self.settings.drain_on_shutdown {
            debug!(in_flight = state.in_flight.len(), "draining in-flight tasks");
            while let Some(joined) = state.in_flight.join_next().await {
                self.settle(&mut state, sink, joined, false)?;
            }
        } else if !state.in_flight.is_empty() {
            debug!(in_flight = state.in_flight.len(), "abandoning in-flight tasks");
            state.in_flight.abort_all();
        }

        let summary = state.summary;
        info!(
            issued = summary.issued,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "search stopped"
        );
        Ok(summary)
    }

    fn issue(&self, state: &mut RunState, slot: usize) {
        if let Some(limit) = self.settings.max_batches {
            if state.summary.completed + state.in_flight.len() as u64 >= limit {
                debug!(slot, limit, "batch limit reached, chain retired");
                return;
            }
        }

        let job = Arc::clone(&self.job);
        state.in_flight.spawn(async move {
            let outcome = match tokio::task::spawn_blocking(move || job.run()).await {
                Ok(outcome) => outcome,
                Err(err) => Err(TaskError::Worker(describe_join_error(err))),
            };
            (slot, outcome)
        });
        state.summary.issued += 1;
        debug!(slot, issued = state.summary.issued, "issued search task");
    }

    /// Handles one finished chain. The replacement task is issued before the
    /// result reaches the sink.
    fn settle<S: ResultSink>(
        &self,
        state: &mut RunState,
        sink: &mut S,
        joined: Result<Completion, JoinError>,
        reissue: bool,
    ) -> Result<()> {
        let (slot, outcome) = joined.map_err(|err| anyhow!("chain driver failed: {}", describe_join_error(err)))?;

        match outcome {
            Ok(result) => {
                state.failures[slot] = 0;
                state.summary.completed += 1;
                if reissue {
                    self.issue(state, slot);
                }
                let progress = Progress {
                    in_flight: state.in_flight.len(),
                    completed: state.summary.completed,
                };
                sink.record(result, progress).context("failed to record search result")
            }
            Err(err) if err.is_fatal() => {
                error!(slot, error = %err, "search task failed");
                Err(anyhow!(err).context(format!("search chain {slot} failed")))
            }
            Err(err) if err.is_numerical() => {
                state.summary.skipped += 1;
                warn!(slot, error = %err, "parameter vector skipped, reissuing");
                if reissue {
                    self.issue(state, slot);
                }
                Ok(())
            }
            Err(err) => {
                state.summary.failed += 1;
                state.failures[slot] += 1;
                let failures = state.failures[slot];
                if failures > self.settings.max_chain_failures {
                    error!(slot, failures, error = %err, "search chain keeps failing");
                    return Err(anyhow!(err)
                        .context(format!("search chain {slot} failed {failures} consecutive times")));
                }
                warn!(slot, failures, error = %err, "search task failed, reissuing");
                if reissue {
                    self.issue(state, slot);
                }
                Ok(())
            }
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .map_or_else(|| "task panicked".to_string(), |msg| format!("task panicked: {msg}")),
        Err(err) => err.to_string(),
    }
}
