use crate::model::{ParameterVector, PARAM_COUNT};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplingError {
    #[error("malformed bounds for parameter {index}: min {min} must be finite and below max {max}")]
    MalformedBounds { index: usize, min: f64, max: f64 },
}

/// Per-component sampling range for the parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub min: [f64; PARAM_COUNT],
    pub max: [f64; PARAM_COUNT],
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self::uniform(0.1, 100.0)
    }
}

impl ParamBounds {
    /// Same range for every component.
    pub fn uniform(min: f64, max: f64) -> Self {
        Self {
            min: [min; PARAM_COUNT],
            max: [max; PARAM_COUNT],
        }
    }

    /// Rejects inverted, zero-width or non-finite ranges.
    pub fn validate(&self) -> Result<(), SamplingError> {
        for (index, (&min, &max)) in self.min.iter().zip(self.max.iter()).enumerate() {
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(SamplingError::MalformedBounds { index, min, max });
            }
        }
        Ok(())
    }

    /// Draws every component uniformly from `[min_i, max_i)`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ParameterVector, SamplingError> {
        self.validate()?;
        let mut params = [0.0; PARAM_COUNT];
        for (i, value) in params.iter_mut().enumerate() {
            *value = rng.gen_range(self.min[i]..self.max[i]);
        }
        Ok(ParameterVector(params))
    }
}
