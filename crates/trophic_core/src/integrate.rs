use crate::solvers::{Rosenbrock23, RungeKutta, SolverKind};
use crate::traits::{AdaptiveSteppable, DynamicalSystem, Steppable};
use crate::trajectory::{StateVector, Trajectory, STATE_DIM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First trial step as a fraction of the sampling interval.
const INITIAL_STEP_FRACTION: f64 = 0.01;
const SAFETY: f64 = 0.9;
const MAX_GROWTH: f64 = 5.0;
const MAX_SHRINK: f64 = 0.2;
/// Smallest usable step relative to the current time.
const MIN_STEP_SCALE: f64 = 16.0 * f64::EPSILON;
/// `dt * lipschitz` above which an explicit step is stability bound.
const STIFF_LIMIT: f64 = 2.5;
/// `dt * |J|` below which the implicit step is accuracy bound.
const CALM_LIMIT: f64 = 1.0;
const STIFF_STREAK: usize = 15;
const CALM_STREAK: usize = 25;
/// Calm explicit steps that cancel a building stiff streak.
const STIFF_RESET: usize = 6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    #[error("invalid time grid: {0}")]
    InvalidTimeGrid(String),
    #[error("invalid integrator settings: {0}")]
    InvalidSettings(String),
    #[error("system has dimension {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("substeps must be at least 1")]
    ZeroSubsteps,
    #[error("solution became non-finite at t = {time}")]
    NonFinite { time: f64 },
    #[error("step size underflow at t = {time}")]
    StepSizeUnderflow { time: f64 },
    #[error("step budget of {steps} exhausted at t = {time}")]
    StepLimit { time: f64, steps: usize },
    #[error("solution left the escape radius at t = {time}")]
    Escaped { time: f64 },
}

impl IntegrationError {
    /// The solver gave up on this particular flow. Other flows may integrate
    /// fine with the same settings.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            IntegrationError::NonFinite { .. }
                | IntegrationError::StepSizeUnderflow { .. }
                | IntegrationError::StepLimit { .. }
        )
    }
}

/// Sample times `start, start + step, ...` strictly below `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeGrid {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl Default for TimeGrid {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 100.0,
            step: 0.1,
        }
    }
}

impl TimeGrid {
    pub fn validate(&self) -> Result<(), IntegrationError> {
        if !(self.start.is_finite() && self.end.is_finite() && self.step.is_finite()) {
            return Err(IntegrationError::InvalidTimeGrid(
                "bounds and step must be finite".to_string(),
            ));
        }
        if self.step <= 0.0 {
            return Err(IntegrationError::InvalidTimeGrid(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        if self.end <= self.start {
            return Err(IntegrationError::InvalidTimeGrid(format!(
                "end {} must exceed start {}",
                self.end, self.start
            )));
        }
        Ok(())
    }

    /// Number of samples, `ceil((end - start) / step)`.
    pub fn len(&self) -> usize {
        ((self.end - self.start) / self.step).ceil().max(0.0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub solver: SolverKind,
    /// Fixed steps between two samples. Only `rk4` uses it.
    pub substeps: usize,
    pub rtol: f64,
    pub atol: f64,
    /// Attempted steps allowed for one trajectory, rejected ones included.
    pub max_steps: usize,
    /// States farther than this from the origin have escaped to infinity.
    pub escape_radius: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            solver: SolverKind::Auto,
            substeps: 10,
            rtol: 1e-6,
            atol: 1e-9,
            max_steps: 500_000,
            escape_radius: 1e12,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<(), IntegrationError> {
        if self.substeps == 0 {
            return Err(IntegrationError::ZeroSubsteps);
        }
        for (name, value) in [("rtol", self.rtol), ("atol", self.atol), ("escape_radius", self.escape_radius)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(IntegrationError::InvalidSettings(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if self.max_steps == 0 {
            return Err(IntegrationError::InvalidSettings("max_steps must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Integrates `system` from `initial` and samples it on `grid`.
///
/// The first sample is `initial` itself and a successful run always covers the
/// whole grid. Leaving `escape_radius` ends the run with
/// [`IntegrationError::Escaped`]; a solver that cannot follow the flow ends it
/// with one of the [numerical](IntegrationError::is_numerical) errors.
pub fn integrate<S>(
    system: &S,
    initial: &StateVector,
    grid: &TimeGrid,
    settings: &IntegratorSettings,
) -> Result<Trajectory, IntegrationError>
where
    S: DynamicalSystem<f64>,
{
    grid.validate()?;
    settings.validate()?;
    if system.dimension() != STATE_DIM {
        return Err(IntegrationError::DimensionMismatch {
            expected: STATE_DIM,
            found: system.dimension(),
        });
    }
    check_state(initial, grid.start, settings.escape_radius)?;

    let points = match settings.solver {
        SolverKind::Rk4 => fixed_steps(system, initial, grid, settings)?,
        kind => adaptive_steps(system, initial, grid, settings, kind)?,
    };

    Trajectory::new(points)
        .ok_or_else(|| IntegrationError::InvalidTimeGrid("grid produced no samples".to_string()))
}

fn check_state(state: &StateVector, time: f64, escape_radius: f64) -> Result<(), IntegrationError> {
    if !state.iter().all(|v| v.is_finite()) {
        return Err(IntegrationError::NonFinite { time });
    }
    if state.norm() > escape_radius {
        return Err(IntegrationError::Escaped { time });
    }
    Ok(())
}

fn fixed_steps<S: DynamicalSystem<f64>>(
    system: &S,
    initial: &StateVector,
    grid: &TimeGrid,
    settings: &IntegratorSettings,
) -> Result<Vec<StateVector>, IntegrationError> {
    let samples = grid.len();
    let mut stepper = RungeKutta::<f64>::rk4(STATE_DIM);
    let dt = grid.step / settings.substeps as f64;
    let mut state = *initial;
    let mut points = Vec::with_capacity(samples);
    points.push(state);

    for index in 1..samples {
        let mut t = grid.time_at(index - 1);
        for _ in 0..settings.substeps {
            stepper.step(system, &mut t, state.as_mut_slice(), dt);
            check_state(&state, t, settings.escape_radius)?;
        }
        points.push(state);
    }
    Ok(points)
}

/// Weighted RMS of the local error. Non-finite candidates count as infinitely
/// wrong so the controller shrinks the step.
fn error_norm(error: &StateVector, state: &StateVector, next: &StateVector, settings: &IntegratorSettings) -> f64 {
    let mut sum = 0.0;
    for i in 0..STATE_DIM {
        let scale = settings.atol + settings.rtol * state[i].abs().max(next[i].abs());
        sum += (error[i] / scale).powi(2);
    }
    let norm = (sum / STATE_DIM as f64).sqrt();
    if norm.is_finite() && next.iter().all(|v| v.is_finite()) {
        norm
    } else {
        f64::INFINITY
    }
}

fn step_factor(err: f64, order: usize, ceiling: f64) -> f64 {
    if err == 0.0 {
        return ceiling;
    }
    (SAFETY * err.powf(-1.0 / (order as f64 + 1.0))).clamp(MAX_SHRINK, ceiling)
}

/// Tracks whether the flow currently calls for the implicit stepper.
struct Stiffness {
    switching: bool,
    stiff: bool,
    streak: usize,
    calm: usize,
}

impl Stiffness {
    fn observe(&mut self, stiffness: f64) {
        if !self.switching {
            return;
        }
        if self.stiff {
            self.streak = if stiffness < CALM_LIMIT { self.streak + 1 } else { 0 };
            if self.streak >= CALM_STREAK {
                self.stiff = false;
                self.streak = 0;
            }
        } else if stiffness > STIFF_LIMIT {
            self.streak += 1;
            self.calm = 0;
            if self.streak >= STIFF_STREAK {
                self.stiff = true;
                self.streak = 0;
            }
        } else {
            self.calm += 1;
            if self.calm >= STIFF_RESET {
                self.streak = 0;
            }
        }
    }
}

fn adaptive_steps<S: DynamicalSystem<f64>>(
    system: &S,
    initial: &StateVector,
    grid: &TimeGrid,
    settings: &IntegratorSettings,
    kind: SolverKind,
) -> Result<Vec<StateVector>, IntegrationError> {
    let samples = grid.len();
    let mut explicit = RungeKutta::<f64>::tsit5(STATE_DIM);
    let mut implicit = Rosenbrock23::new(STATE_DIM);
    let mut mode = Stiffness {
        switching: kind == SolverKind::Auto,
        stiff: kind == SolverKind::Rosenbrock23,
        streak: 0,
        calm: 0,
    };

    let mut state = *initial;
    let mut next = StateVector::zeros();
    let mut error = StateVector::zeros();
    let mut t = grid.start;
    let mut h = grid.step * INITIAL_STEP_FRACTION;
    let mut steps = 0;
    let mut points = Vec::with_capacity(samples);
    points.push(state);

    for index in 1..samples {
        let target = grid.time_at(index);
        loop {
            let remaining = target - t;
            let min_step = MIN_STEP_SCALE * t.abs().max(1.0);
            if remaining <= min_step {
                t = target;
                break;
            }
            if steps >= settings.max_steps {
                return Err(IntegrationError::StepLimit { time: t, steps });
            }
            let dt = h.min(remaining);
            if dt < min_step {
                return Err(IntegrationError::StepSizeUnderflow { time: t });
            }
            steps += 1;

            let (formed, order, stiffness) = if mode.stiff {
                let formed = implicit.attempt(system, t, state.as_slice(), dt, next.as_mut_slice(), error.as_mut_slice());
                (formed, implicit.order(), implicit.stiffness())
            } else {
                let formed = explicit.attempt(system, t, state.as_slice(), dt, next.as_mut_slice(), error.as_mut_slice());
                (formed, explicit.order(), explicit.stiffness())
            };
            let err = if formed {
                error_norm(&error, &state, &next, settings)
            } else {
                f64::INFINITY
            };

            if err <= 1.0 {
                let clipped = dt < h;
                t = if dt >= remaining { target } else { t + dt };
                state = next;
                check_state(&state, t, settings.escape_radius)?;
                let grown = dt * step_factor(err, order, MAX_GROWTH);
                h = if clipped { h.max(grown) } else { grown };
                mode.observe(stiffness);
            } else {
                h = dt * step_factor(err, order, 1.0);
            }
        }
        points.push(state);
    }
    Ok(points)
}
