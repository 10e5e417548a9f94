use crate::aggregator::LogMode;
use crate::logging::{parse_log_level, LoggingConfig};
use crate::orchestrator::OrchestratorSettings;
use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use trophic_core::classify::{ClassifierSettings, ClassifyError};
use trophic_core::integrate::{IntegrationError, IntegratorSettings, TimeGrid};
use trophic_core::model::PARAM_COUNT;
use trophic_core::sampling::{ParamBounds, SamplingError};
use trophic_core::task::{initial_state_grid, SearchTask};

/// Project config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "trophic.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid chains: {0}. Must be at least 1")]
    InvalidChains(usize),

    #[error("Invalid workers: {workers}. Must be at least the number of chains ({chains})")]
    InvalidWorkers { workers: usize, chains: usize },

    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(#[from] SamplingError),

    #[error("Invalid integration settings: {0}")]
    InvalidIntegration(#[from] IntegrationError),

    #[error("Invalid classifier settings: {0}")]
    InvalidClassifier(#[from] ClassifyError),

    #[error("Initial axis must contain at least one finite non-zero value")]
    EmptyInitialGrid,

    #[error("Invalid max_batches: 0. Omit it to run until interrupted")]
    ZeroMaxBatches,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lower sampling bound per parameter.
    pub param_min: [f64; PARAM_COUNT],
    /// Upper sampling bound per parameter.
    pub param_max: [f64; PARAM_COUNT],
    /// Search chains kept in flight.
    pub chains: usize,
    /// Size of the blocking worker pool; defaults to `chains`.
    pub workers: Option<usize>,
    /// Values combined per species into the initial-state grid.
    pub initial_axis: Vec<f64>,
    pub time: TimeGrid,
    pub classifier: ClassifierSettings,
    pub integrator: IntegratorSettings,
    pub log_dir: PathBuf,
    pub log_mode: LogMode,
    pub max_chain_failures: usize,
    pub max_batches: Option<u64>,
    pub drain_on_shutdown: bool,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        let bounds = ParamBounds::default();
        let orchestrator = OrchestratorSettings::default();
        Self {
            param_min: bounds.min,
            param_max: bounds.max,
            chains: orchestrator.chains,
            workers: None,
            initial_axis: vec![0.1, 0.4, 0.7, 1.0],
            time: TimeGrid::default(),
            classifier: ClassifierSettings::default(),
            integrator: IntegratorSettings::default(),
            log_dir: PathBuf::from("."),
            log_mode: LogMode::default(),
            max_chain_failures: orchestrator.max_chain_failures,
            max_batches: orchestrator.max_batches,
            drain_on_shutdown: orchestrator.drain_on_shutdown,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn bounds(&self) -> ParamBounds {
        ParamBounds {
            min: self.param_min,
            max: self.param_max,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(self.chains)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            chains: self.chains,
            max_chain_failures: self.max_chain_failures,
            max_batches: self.max_batches,
            drain_on_shutdown: self.drain_on_shutdown,
        }
    }

    pub fn search_task(&self) -> SearchTask {
        SearchTask {
            bounds: self.bounds(),
            initial_states: Arc::new(initial_state_grid(&self.initial_axis)),
            time_grid: self.time,
            classifier: self.classifier,
            integrator: self.integrator,
        }
    }
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `path`, or `trophic.yaml` in the working directory (optional)
    /// 3. Environment variables (`TROPHIC_` prefix, `__` separates nested keys)
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("config file {} does not exist", path.display());
            }
        }

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(file))
            .merge(Env::prefixed("TROPHIC_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration (file: {})", file.display()))
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.chains == 0 {
            return Err(ConfigError::InvalidChains(config.chains));
        }
        if let Some(workers) = config.workers {
            if workers < config.chains {
                return Err(ConfigError::InvalidWorkers {
                    workers,
                    chains: config.chains,
                });
            }
        }

        config.bounds().validate()?;
        config.time.validate()?;
        config.integrator.validate()?;
        config.classifier.validate()?;

        if !config.initial_axis.iter().all(|v| v.is_finite())
            || !config.initial_axis.iter().any(|&v| v != 0.0)
        {
            return Err(ConfigError::EmptyInitialGrid);
        }
        if config.max_batches == Some(0) {
            return Err(ConfigError::ZeroMaxBatches);
        }
        if parse_log_level(&config.logging.level).is_err() {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use std::io::Write;
    use trophic_core::solvers::SolverKind;
    use trophic_core::trajectory::Norm;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chains, 2);
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.param_min, [0.1; PARAM_COUNT]);
        assert_eq!(config.param_max, [100.0; PARAM_COUNT]);
        assert_eq!(config.classifier.confidence, 20);
        assert!((config.classifier.tolerance - 0.001).abs() < f64::EPSILON);
        assert_eq!(config.log_mode, LogMode::Overwrite);
        assert_eq!(config.search_task().initial_states.len(), 64);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
chains: 4
workers: 6
initial_axis: [0.5, 1.5]
time:
  end: 50.0
classifier:
  confidence: 10
  norm: maximum
integrator:
  solver: tsit5
  rtol: 1.0e-8
log_mode: append
max_batches: 100
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.chains, 4);
        assert_eq!(config.worker_count(), 6);
        assert_eq!(config.search_task().initial_states.len(), 8);
        assert!((config.time.end - 50.0).abs() < f64::EPSILON);
        assert!((config.time.step - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.classifier.confidence, 10);
        assert_eq!(config.classifier.norm, Norm::Maximum);
        assert!((config.classifier.tolerance - 0.001).abs() < f64::EPSILON);
        assert_eq!(config.integrator.solver, SolverKind::Tsit5);
        assert!((config.integrator.rtol - 1e-8).abs() < f64::EPSILON);
        assert_eq!(config.integrator.max_steps, IntegratorSettings::default().max_steps);
        assert_eq!(config.log_mode, LogMode::Append);
        assert_eq!(config.max_batches, Some(100));
        assert_eq!(config.logging.format, LogFormat::Json);
        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn test_load_from_file_merges_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().expect("temp file");
        writeln!(file, "chains: 3\nparam_max: [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0]").expect("write config");

        let config = ConfigLoader::load(Some(file.path())).expect("config loads");

        assert_eq!(config.chains, 3);
        assert_eq!(config.param_max, [10.0; PARAM_COUNT]);
        assert_eq!(config.param_min, [0.1; PARAM_COUNT]);
        assert_eq!(config.integrator, IntegratorSettings::default());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("nope.yaml");
        assert!(ConfigLoader::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config {
            chains: 0,
            ..Config::default()
        };
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidChains(0))));

        config = Config {
            workers: Some(1),
            ..Config::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWorkers { workers: 1, chains: 2 })
        ));

        config = Config::default();
        config.param_min[2] = 200.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBounds(SamplingError::MalformedBounds { index: 2, .. }))
        ));

        config = Config::default();
        config.time.step = -0.1;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidIntegration(_))));

        config = Config::default();
        config.integrator.substeps = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidIntegration(IntegrationError::ZeroSubsteps))
        ));

        config = Config::default();
        config.integrator.atol = -1.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidIntegration(IntegrationError::InvalidSettings(_)))
        ));

        config = Config::default();
        config.classifier.tolerance = 0.0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidClassifier(_))));

        config = Config {
            initial_axis: vec![0.0],
            ..Config::default()
        };
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyInitialGrid)));

        config = Config {
            max_batches: Some(0),
            ..Config::default()
        };
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::ZeroMaxBatches)));

        config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }
}
