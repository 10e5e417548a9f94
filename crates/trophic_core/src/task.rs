//! One unit of search work: sample parameters, integrate every initial state,
//! classify every trajectory. Pure computation, safe to run on any worker.

use crate::classify::{classify_with, ClassifierSettings, ClassifyError, EndBehaviour};
use crate::integrate::{integrate, IntegrationError, IntegratorSettings, TimeGrid};
use crate::model::{ParameterVector, TritrophicModel};
use crate::sampling::{ParamBounds, SamplingError};
use crate::trajectory::StateVector;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    #[error(transparent)]
    Classification(#[from] ClassifyError),
    #[error("worker failed: {0}")]
    Worker(String),
}

impl TaskError {
    /// Fatal errors come from the configuration and would recur on every
    /// retry. Worker failures and numerical failures are worth reissuing.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TaskError::Worker(_)) && !self.is_numerical()
    }

    /// The solver could not follow the flow under the sampled parameters.
    pub fn is_numerical(&self) -> bool {
        matches!(self, TaskError::Integration(err) if err.is_numerical())
    }
}

/// Outcome of one task: one behaviour per initial state, all under `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    params: ParameterVector,
    initial_states: Arc<Vec<StateVector>>,
    behaviours: Vec<EndBehaviour>,
}

impl SearchResult {
    /// Returns `None` unless there is exactly one behaviour per initial state.
    pub fn new(
        params: ParameterVector,
        initial_states: Arc<Vec<StateVector>>,
        behaviours: Vec<EndBehaviour>,
    ) -> Option<Self> {
        (initial_states.len() == behaviours.len()).then_some(Self {
            params,
            initial_states,
            behaviours,
        })
    }

    pub fn params(&self) -> &ParameterVector {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.behaviours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviours.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateVector, EndBehaviour)> + '_ {
        self.initial_states.iter().zip(self.behaviours.iter().copied())
    }

    pub fn behaviours(&self) -> &[EndBehaviour] {
        &self.behaviours
    }
}

/// Cartesian product of `axis` over the three species, without the origin.
///
/// The origin is an equilibrium for every parameter vector, so it never
/// tells anything about the parameters.
pub fn initial_state_grid(axis: &[f64]) -> Vec<StateVector> {
    let mut states = Vec::with_capacity(axis.len().pow(3));
    for &x in axis {
        for &y in axis {
            for &z in axis {
                let state = StateVector::new(x, y, z);
                if state != StateVector::zeros() {
                    states.push(state);
                }
            }
        }
    }
    states
}

/// Everything a worker needs to run one search step. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SearchTask {
    pub bounds: ParamBounds,
    pub initial_states: Arc<Vec<StateVector>>,
    pub time_grid: TimeGrid,
    pub classifier: ClassifierSettings,
    pub integrator: IntegratorSettings,
}

impl SearchTask {
    /// Draws a parameter vector with `rng` and classifies every initial state.
    pub fn run_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<SearchResult, TaskError> {
        let params = self.bounds.sample(rng)?;
        self.run_for(params)
    }

    /// Classifies every initial state under a fixed parameter vector.
    pub fn run_for(&self, params: ParameterVector) -> Result<SearchResult, TaskError> {
        let model = TritrophicModel::new(params);
        let mut behaviours = Vec::with_capacity(self.initial_states.len());

        for initial in self.initial_states.iter() {
            let behaviour = match integrate(&model, initial, &self.time_grid, &self.integrator) {
                Ok(trajectory) => classify_with(&trajectory, &self.classifier)?,
                Err(IntegrationError::Escaped { .. }) => EndBehaviour::Infinity,
                Err(err) => return Err(err.into()),
            };
            behaviours.push(behaviour);
        }

        SearchResult::new(params, Arc::clone(&self.initial_states), behaviours)
            .ok_or_else(|| TaskError::Worker("behaviour count does not match initial states".to_string()))
    }

    pub fn run(&self) -> Result<SearchResult, TaskError> {
        self.run_with(&mut rand::thread_rng())
    }
}
