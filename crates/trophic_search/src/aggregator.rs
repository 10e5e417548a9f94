//! Folds search results into running counters, category logs and the
//! console status line.

use crate::orchestrator::{Progress, ResultSink};
use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Stdout, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use trophic_core::classify::EndBehaviour;
use trophic_core::task::SearchResult;

pub const GENERAL_LOG: &str = "general.log";
pub const CYCLES_LOG: &str = "cycles.log";
pub const STRANGE_ATTRACTORS_LOG: &str = "strange-attractors.log";

/// How each log file treats its previous content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// The file only ever holds the latest record.
    #[default]
    Overwrite,
    /// One record per line, accumulated over the run.
    Append,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounters {
    pub total: u64,
    pub cycles: u64,
    pub strange_attractors: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct LogRecord<'a> {
    time: &'a str,
    parameters: &'a [f64],
    initial_state: &'a [f64],
    #[serde(skip_serializing_if = "Option::is_none")]
    end_behaviour: Option<EndBehaviour>,
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    mode: LogMode,
}

impl LogFile {
    fn new(dir: &Path, name: &str, mode: LogMode) -> Self {
        Self {
            path: dir.join(name),
            mode,
        }
    }

    fn write(&self, line: &str) -> Result<()> {
        match self.mode {
            LogMode::Overwrite => fs::write(&self.path, format!("{line}\n")),
            LogMode::Append => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .and_then(|mut file| writeln!(file, "{line}")),
        }
        .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

type CounterSlot = fn(&mut AggregateCounters) -> &mut u64;

fn cycles_slot(counters: &mut AggregateCounters) -> &mut u64 {
    &mut counters.cycles
}

fn strange_slot(counters: &mut AggregateCounters) -> &mut u64 {
    &mut counters.strange_attractors
}

/// Dedicated log and counter for one end behaviour.
#[derive(Debug)]
struct Channel {
    log: LogFile,
    counter: CounterSlot,
}

/// Sole owner of the counters and the log files. Must only be driven from a
/// single thread of control.
pub struct ResultAggregator<W: Write = Stdout> {
    counters: AggregateCounters,
    general: LogFile,
    channels: BTreeMap<EndBehaviour, Channel>,
    console: W,
}

impl ResultAggregator<Stdout> {
    pub fn create(log_dir: &Path, mode: LogMode) -> Result<Self> {
        Self::with_console(log_dir, mode, io::stdout())
    }
}

impl<W: Write> ResultAggregator<W> {
    /// Creates `log_dir` if needed and writes status lines to `console`.
    pub fn with_console(log_dir: &Path, mode: LogMode, console: W) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

        let mut channels = BTreeMap::new();
        channels.insert(
            EndBehaviour::LimitCycle,
            Channel {
                log: LogFile::new(log_dir, CYCLES_LOG, mode),
                counter: cycles_slot as CounterSlot,
            },
        );
        channels.insert(
            EndBehaviour::StrangeAttractor,
            Channel {
                log: LogFile::new(log_dir, STRANGE_ATTRACTORS_LOG, mode),
                counter: strange_slot as CounterSlot,
            },
        );

        Ok(Self {
            counters: AggregateCounters::default(),
            general: LogFile::new(log_dir, GENERAL_LOG, mode),
            channels,
            console,
        })
    }

    pub fn counters(&self) -> AggregateCounters {
        self.counters
    }

    pub fn console(&self) -> &W {
        &self.console
    }

    /// Logs every (initial state, behaviour) pair of `result`, then prints one
    /// status line for the whole batch. Counters are only committed once all
    /// records of the batch are written.
    pub fn record(&mut self, result: &SearchResult) -> Result<()> {
        let mut counters = self.counters;

        for (state, behaviour) in result.iter() {
            let time = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            let record = LogRecord {
                time: &time,
                parameters: result.params().as_slice(),
                initial_state: state.as_slice(),
                end_behaviour: Some(behaviour),
            };
            self.general
                .write(&serde_json::to_string(&record).context("failed to serialize log record")?)?;
            counters.total += 1;

            if let Some(channel) = self.channels.get(&behaviour) {
                let record = LogRecord {
                    end_behaviour: None,
                    ..record
                };
                channel
                    .log
                    .write(&serde_json::to_string(&record).context("failed to serialize log record")?)?;
                *(channel.counter)(&mut counters) += 1;
            }
        }

        self.counters = counters;
        write!(
            self.console,
            "\rSystems in total: {}; cycles: {}, strange attractors: {}.",
            counters.total, counters.cycles, counters.strange_attractors
        )
        .and_then(|()| self.console.flush())
        .context("failed to write status line")
    }
}

impl<W: Write> ResultSink for ResultAggregator<W> {
    fn record(&mut self, result: SearchResult, progress: Progress) -> Result<()> {
        ResultAggregator::record(self, &result)?;
        debug!(
            systems = result.len(),
            in_flight = progress.in_flight,
            completed = progress.completed,
            total = self.counters.total,
            "recorded batch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trophic_core::model::ParameterVector;
    use trophic_core::trajectory::StateVector;

    fn result(params: f64, behaviours: Vec<EndBehaviour>) -> SearchResult {
        let states = (0..behaviours.len())
            .map(|i| StateVector::new(0.1 * (i + 1) as f64, 0.4, 0.7))
            .collect();
        SearchResult::new(ParameterVector([params; 8]), Arc::new(states), behaviours).expect("lengths match")
    }

    fn read(dir: &Path, name: &str) -> String {
        fs::read_to_string(dir.join(name)).expect("log file exists")
    }

    #[test]
    fn counters_partition_the_total() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut aggregator =
            ResultAggregator::with_console(dir.path(), LogMode::Overwrite, Vec::new()).expect("aggregator");
        let batch = vec![
            EndBehaviour::LimitPoint,
            EndBehaviour::LimitCycle,
            EndBehaviour::Infinity,
            EndBehaviour::StrangeAttractor,
            EndBehaviour::LimitCycle,
        ];
        for m in 0..4 {
            aggregator.record(&result(m as f64 + 1.0, batch.clone())).expect("record");
        }

        let counters = aggregator.counters();
        assert_eq!(counters.total, 4 * 5);
        assert_eq!(counters.cycles, 8);
        assert_eq!(counters.strange_attractors, 4);
        let others = 4 * 2;
        assert_eq!(counters.cycles + counters.strange_attractors + others, counters.total);
    }

    #[test]
    fn status_line_is_printed_once_per_batch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut aggregator =
            ResultAggregator::with_console(dir.path(), LogMode::Overwrite, Vec::new()).expect("aggregator");
        aggregator
            .record(&result(1.0, vec![EndBehaviour::LimitCycle, EndBehaviour::StrangeAttractor]))
            .expect("record");
        aggregator.record(&result(2.0, vec![EndBehaviour::LimitPoint])).expect("record");

        let console = String::from_utf8(aggregator.console().clone()).expect("utf8");
        assert_eq!(
            console,
            "\rSystems in total: 2; cycles: 1, strange attractors: 1.\
             \rSystems in total: 3; cycles: 1, strange attractors: 1."
        );
    }

    #[test]
    fn overwrite_keeps_only_the_latest_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut aggregator =
            ResultAggregator::with_console(dir.path(), LogMode::Overwrite, Vec::new()).expect("aggregator");
        aggregator.record(&result(1.0, vec![EndBehaviour::LimitCycle])).expect("record");
        aggregator
            .record(&result(2.0, vec![EndBehaviour::Infinity, EndBehaviour::StrangeAttractor]))
            .expect("record");

        let general = read(dir.path(), GENERAL_LOG);
        assert_eq!(general.lines().count(), 1);
        let latest: serde_json::Value = serde_json::from_str(general.trim()).expect("json record");
        assert_eq!(latest["end_behaviour"], "STRANGE_ATTRACTOR");
        assert_eq!(latest["parameters"][0], 2.0);
        assert_eq!(latest["initial_state"].as_array().map(Vec::len), Some(3));
        let time = latest["time"].as_str().expect("time string");
        assert_eq!(time.len(), "YYYY-MM-DD HH:MM:SS".len());

        let cycles: serde_json::Value =
            serde_json::from_str(read(dir.path(), CYCLES_LOG).trim()).expect("json record");
        assert_eq!(cycles["parameters"][0], 1.0);
        assert!(cycles.get("end_behaviour").is_none());
        assert!(dir.path().join(STRANGE_ATTRACTORS_LOG).exists());
    }

    #[test]
    fn append_accumulates_records() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut aggregator =
            ResultAggregator::with_console(dir.path(), LogMode::Append, Vec::new()).expect("aggregator");
        aggregator
            .record(&result(1.0, vec![EndBehaviour::LimitCycle, EndBehaviour::LimitPoint]))
            .expect("record");
        aggregator.record(&result(2.0, vec![EndBehaviour::LimitCycle])).expect("record");

        assert_eq!(read(dir.path(), GENERAL_LOG).lines().count(), 3);
        assert_eq!(read(dir.path(), CYCLES_LOG).lines().count(), 2);
        assert!(!dir.path().join(STRANGE_ATTRACTORS_LOG).exists());
    }

    #[test]
    fn log_directory_is_created() {
        let dir = tempfile::tempdir().expect("temp dir");
        let nested = dir.path().join("runs").join("first");
        let mut aggregator =
            ResultAggregator::with_console(&nested, LogMode::Overwrite, Vec::new()).expect("aggregator");
        aggregator.record(&result(1.0, vec![EndBehaviour::Infinity])).expect("record");
        assert!(nested.join(GENERAL_LOG).exists());
    }
}
