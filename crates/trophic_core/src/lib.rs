pub mod classify;
pub mod integrate;
pub mod model;
pub mod sampling;
pub mod solvers;
pub mod task;
pub mod trajectory;
/// The `trophic_core` crate holds the numerics of the end-behaviour search.
/// Nothing in here performs I/O, so every piece can run on a worker thread.
///
/// Key components:
/// - **Traits**: `Scalar`, `DynamicalSystem` (vector fields), `Steppable` and `AdaptiveSteppable` (solvers).
/// - **Solvers**: Runge-Kutta tableaus (RK4, Tsit5) and the linearly implicit Rosenbrock23.
/// - **Model**: the three-species vector field and its parameter vector.
/// - **Integrate**: error-controlled stepping onto a time grid, switching to Rosenbrock23 on stiff stretches.
/// - **Classify**: limit point / infinity / limit cycle / strange attractor heuristics.
/// - **Sampling** and **Task**: random parameters and the per-worker unit of work.
pub mod traits;
