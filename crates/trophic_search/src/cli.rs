//! Command-line flags. Every flag overrides the matching config value.

use crate::aggregator::LogMode;
use crate::config::Config;
use crate::logging::LogFormat;
use clap::Parser;
use std::path::PathBuf;
use trophic_core::sampling::ParamBounds;
use trophic_core::solvers::SolverKind;

#[derive(Parser, Debug)]
#[command(name = "trophic-search")]
#[command(about = "Random search for cycles and strange attractors in a three-species food chain", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to a YAML config file (defaults to ./trophic.yaml when present)
    #[arg(short, long, env = "TROPHIC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of search chains kept in flight
    #[arg(short = 'k', long)]
    pub chains: Option<usize>,

    /// Size of the worker pool (at least the number of chains)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Lower sampling bound applied to all parameters
    #[arg(long, requires = "param_max")]
    pub param_min: Option<f64>,

    /// Upper sampling bound applied to all parameters
    #[arg(long, requires = "param_min")]
    pub param_max: Option<f64>,

    /// Consecutive samples the classifier checks
    #[arg(short = 'n', long)]
    pub confidence: Option<usize>,

    /// Distance under which two states count as equal
    #[arg(short, long)]
    pub tolerance: Option<f64>,

    /// Integration scheme (auto switches between tsit5 and rosenbrock23)
    #[arg(long, value_parser = ["auto", "tsit5", "rosenbrock23", "rk4"])]
    pub solver: Option<String>,

    /// Relative tolerance of the adaptive solvers
    #[arg(long)]
    pub rtol: Option<f64>,

    /// Absolute tolerance of the adaptive solvers
    #[arg(long)]
    pub atol: Option<f64>,

    /// Directory receiving general.log, cycles.log and strange-attractors.log
    #[arg(short, long)]
    pub log_dir: Option<PathBuf>,

    /// Append records to the log files instead of overwriting them
    #[arg(long)]
    pub append: bool,

    /// Stop after this many parameter vectors
    #[arg(long)]
    pub max_batches: Option<u64>,

    /// Diagnostic log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit diagnostics as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) {
        if let Some(chains) = self.chains {
            config.chains = chains;
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let (Some(min), Some(max)) = (self.param_min, self.param_max) {
            let bounds = ParamBounds::uniform(min, max);
            config.param_min = bounds.min;
            config.param_max = bounds.max;
        }
        if let Some(confidence) = self.confidence {
            config.classifier.confidence = confidence;
        }
        if let Some(tolerance) = self.tolerance {
            config.classifier.tolerance = tolerance;
        }
        match self.solver.as_deref() {
            Some("auto") => config.integrator.solver = SolverKind::Auto,
            Some("tsit5") => config.integrator.solver = SolverKind::Tsit5,
            Some("rosenbrock23") => config.integrator.solver = SolverKind::Rosenbrock23,
            Some("rk4") => config.integrator.solver = SolverKind::Rk4,
            _ => {}
        }
        if let Some(rtol) = self.rtol {
            config.integrator.rtol = rtol;
        }
        if let Some(atol) = self.atol {
            config.integrator.atol = atol;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir.clone_from(dir);
        }
        if self.append {
            config.log_mode = LogMode::Append;
        }
        if self.max_batches.is_some() {
            config.max_batches = self.max_batches;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.json_logs {
            config.logging.format = LogFormat::Json;
        }
    }
}
