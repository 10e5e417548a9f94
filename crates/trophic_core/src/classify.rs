//! End-behaviour classification of an integrated trajectory.
//!
//! The checks run in a fixed order and the first one that succeeds wins:
//! limit point, divergence to infinity, limit cycle. Anything else is reported
//! as a strange attractor. These are heuristics over the tail of a finite
//! trajectory, not rigorous tests.

use crate::trajectory::{Norm, Trajectory};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIDENCE: usize = 20;
pub const DEFAULT_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndBehaviour {
    LimitPoint,
    LimitCycle,
    Infinity,
    StrangeAttractor,
}

impl std::fmt::Display for EndBehaviour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EndBehaviour::LimitPoint => "LIMIT_POINT",
            EndBehaviour::LimitCycle => "LIMIT_CYCLE",
            EndBehaviour::Infinity => "INFINITY",
            EndBehaviour::StrangeAttractor => "STRANGE_ATTRACTOR",
        };
        f.write_str(label)
    }
}

/// The sub-check that ran out of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    LimitPoint,
    Infinity,
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Check::LimitPoint => f.write_str("limit point"),
            Check::Infinity => f.write_str("infinity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifyError {
    #[error(
        "trajectory of {available} points is too short for the {check} check with confidence n={confidence} (needs {required})"
    )]
    InsufficientData {
        check: Check,
        confidence: usize,
        required: usize,
        available: usize,
    },
    #[error("invalid classifier settings: {0}")]
    InvalidSettings(String),
}

/// Confidence window, closeness tolerance and distance norm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Number of trailing points that must agree with a hypothesis.
    pub confidence: usize,
    /// Distance under which two states count as coincident.
    pub tolerance: f64,
    pub norm: Norm,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            tolerance: DEFAULT_TOLERANCE,
            norm: Norm::Euclidean,
        }
    }
}

impl ClassifierSettings {
    pub fn validate(&self) -> Result<(), ClassifyError> {
        if self.confidence == 0 {
            return Err(ClassifyError::InvalidSettings(
                "confidence must be at least 1".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ClassifyError::InvalidSettings(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Classifies with the given settings.
pub fn classify_with(
    trajectory: &Trajectory,
    settings: &ClassifierSettings,
) -> Result<EndBehaviour, ClassifyError> {
    classify(trajectory, settings.norm, settings.confidence, settings.tolerance)
}

/// Determines the end behaviour of `trajectory`.
///
/// `n` is the confidence window and `eps` the closeness tolerance under
/// `norm`. Fails with [`ClassifyError::InsufficientData`] when the trajectory
/// cannot support a window of `n` for the limit point or infinity checks.
pub fn classify(
    trajectory: &Trajectory,
    norm: Norm,
    n: usize,
    eps: f64,
) -> Result<EndBehaviour, ClassifyError> {
    ClassifierSettings {
        confidence: n,
        tolerance: eps,
        norm,
    }
    .validate()?;

    if goes_to_limit_point(trajectory, norm, n, eps)? {
        return Ok(EndBehaviour::LimitPoint);
    }
    if goes_to_infinity(trajectory, norm, n)? {
        return Ok(EndBehaviour::Infinity);
    }
    if goes_to_limit_cycle(trajectory, norm, n, eps) {
        return Ok(EndBehaviour::LimitCycle);
    }
    Ok(EndBehaviour::StrangeAttractor)
}

/// True when the `n` points before the last one all lie within `eps` of it.
pub fn goes_to_limit_point(
    trajectory: &Trajectory,
    norm: Norm,
    n: usize,
    eps: f64,
) -> Result<bool, ClassifyError> {
    let points = trajectory.points();
    let required = n + 1;
    if points.len() < required {
        return Err(ClassifyError::InsufficientData {
            check: Check::LimitPoint,
            confidence: n,
            required,
            available: points.len(),
        });
    }

    let limit = trajectory.last();
    let close = points[..points.len() - 1]
        .iter()
        .rev()
        .take(n)
        .all(|p| norm.distance(limit, p) <= eps);
    Ok(close)
}

/// True when the step lengths grow strictly for the last `n` steps.
///
/// Walks backward and stops at the first step that is not shorter than the
/// one after it, so a short trajectory only fails when every step it has
/// agrees with divergence.
pub fn goes_to_infinity(trajectory: &Trajectory, norm: Norm, n: usize) -> Result<bool, ClassifyError> {
    let points = trajectory.points();
    let insufficient = || ClassifyError::InsufficientData {
        check: Check::Infinity,
        confidence: n,
        required: n + 2,
        available: points.len(),
    };
    if points.len() < 2 {
        return Err(insufficient());
    }

    let mut steps = points
        .windows(2)
        .rev()
        .map(|pair| norm.distance(&pair[1], &pair[0]));
    let mut next = steps.next().ok_or_else(insufficient)?;
    let mut successes = 0usize;
    for current in steps {
        if current >= next {
            return Ok(false);
        }
        successes += 1;
        if successes == n {
            return Ok(true);
        }
        next = current;
    }
    Err(insufficient())
}

/// Period search: true once `n` near-recurrences have been confirmed.
///
/// Every pair `j < i` closer than `eps` proposes the period `i - j`, which is
/// confirmed when the states at `j, j - T, j - 2T, ...` stay within `eps` of
/// each other. Both scans stay within the valid index range.
pub fn goes_to_limit_cycle(trajectory: &Trajectory, norm: Norm, n: usize, eps: f64) -> bool {
    let points = trajectory.points();
    let mut successes = 0usize;

    for i in (0..points.len()).rev() {
        for j in (0..i).rev() {
            if norm.distance(&points[i], &points[j]) >= eps {
                continue;
            }
            let period = i - j;
            if stride_is_periodic(points, norm, eps, j, period) {
                successes += 1;
                if successes >= n {
                    return true;
                }
            }
        }
    }
    false
}

fn stride_is_periodic(
    points: &[crate::trajectory::StateVector],
    norm: Norm,
    eps: f64,
    start: usize,
    period: usize,
) -> bool {
    let mut current = start;
    while let Some(previous) = current.checked_sub(period) {
        if norm.distance(&points[current], &points[previous]) > eps {
            return false;
        }
        current = previous;
    }
    true
}
