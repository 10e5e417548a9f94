use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Numeric types the model and the integrators are generic over.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// An autonomous or non-autonomous flow `dx/dt = f(t, x)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field at `(t, x)` into `out`.
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A fixed-step integrator.
pub trait Steppable<T: Scalar> {
    /// Advances `state` from `t` to `t + dt`, updating both in place.
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// An integrator with an embedded error estimate, driven by a step-size
/// controller that decides whether each attempt is kept.
pub trait AdaptiveSteppable {
    /// Order of the error estimate's reference solution. Step changes scale
    /// with `err^(-1 / (order + 1))`.
    fn order(&self) -> usize;

    /// Attempts one step of size `dt` from `(t, state)`, writing the candidate
    /// into `next` and the local error estimate into `error`. Returns false
    /// when no candidate could be formed.
    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> bool;

    /// `dt` times the local Lipschitz constant seen on the last attempt.
    fn stiffness(&self) -> f64;
}
