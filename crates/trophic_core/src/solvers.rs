use crate::traits::{AdaptiveSteppable, DynamicalSystem, Scalar, Steppable};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Butcher tableau of an explicit Runge-Kutta method.
/// Row `i` of `a` holds the `i` coefficients applied to the earlier stages.
/// An embedded pair appends the FSAL stage as an extra row of `a` and lists
/// the error weights `b - b_hat` in `e`, one per stage including the FSAL one.
struct Tableau {
    c: &'static [f64],
    a: &'static [&'static [f64]],
    b: &'static [f64],
    e: &'static [f64],
    error_order: usize,
}

static RK4_TABLEAU: Tableau = Tableau {
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    e: &[],
    error_order: 0,
};

const TSIT5_B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436081,
    2.324710524099774,
];

// Tsitouras 5(4).
static TSIT5_TABLEAU: Tableau = Tableau {
    c: &[0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
    a: &[
        &[],
        &[0.161],
        &[-0.008480655492356989, 0.335480655492357],
        &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
        &[
            5.325864828439257,
            -11.748883564062828,
            7.4955393428898365,
            -0.09249506636175525,
        ],
        &[
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.028269050394068383,
        ],
        &TSIT5_B,
    ],
    b: &TSIT5_B,
    e: &[
        -0.00178001105222577714,
        -0.0008164344596567469,
        0.007880878010261995,
        -0.1447110071732629,
        0.5823571654525552,
        -0.45808210592918697,
        0.015151515151515152,
    ],
    error_order: 4,
};

/// Integration scheme used between grid samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    /// Adaptive Tsit5, handing over to Rosenbrock23 while the flow is stiff.
    #[default]
    Auto,
    /// Adaptive Tsitouras 5(4).
    Tsit5,
    /// Adaptive, L-stable Rosenbrock 2(3).
    Rosenbrock23,
    /// Classic fourth-order Runge-Kutta with a fixed number of substeps.
    Rk4,
}

/// Explicit Runge-Kutta stepper driven by a static tableau.
/// Stage buffers are allocated once per stepper and reused on every step.
pub struct RungeKutta<T: Scalar> {
    tableau: &'static Tableau,
    stages: Vec<Vec<T>>,
    tmp: Vec<T>,
    before_last: Vec<T>,
    stiffness: f64,
}

impl<T: Scalar> RungeKutta<T> {
    /// Classic fourth-order Runge-Kutta.
    pub fn rk4(dim: usize) -> Self {
        Self::with_tableau(&RK4_TABLEAU, dim)
    }

    /// Tsitouras 5(4) with its embedded error estimate.
    pub fn tsit5(dim: usize) -> Self {
        Self::with_tableau(&TSIT5_TABLEAU, dim)
    }

    fn with_tableau(tableau: &'static Tableau, dim: usize) -> Self {
        let zero = T::zero();
        Self {
            tableau,
            stages: vec![vec![zero; dim]; tableau.a.len()],
            tmp: vec![zero; dim],
            before_last: vec![zero; dim],
            stiffness: 0.0,
        }
    }

    /// Evaluates the stages that feed the solution weights `b`.
    fn eval_stages(&mut self, system: &impl DynamicalSystem<T>, t0: T, state: &[T], dt: T) {
        let tableau = self.tableau;
        let count = tableau.b.len();

        for stage in 0..count {
            for i in 0..state.len() {
                let mut acc = T::zero();
                for (prev, &coeff) in tableau.a[stage].iter().enumerate() {
                    acc = acc + constant::<T>(coeff) * self.stages[prev][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            if stage + 1 == count {
                self.before_last.copy_from_slice(&self.tmp);
            }
            let ts = t0 + constant::<T>(tableau.c[stage]) * dt;
            system.apply(ts, &self.tmp, &mut self.stages[stage]);
        }
    }

    /// `dt` times the weighted slope of component `i`.
    fn increment(&self, i: usize, dt: T) -> T {
        let mut acc = T::zero();
        for (stage, &weight) in self.tableau.b.iter().enumerate() {
            acc = acc + constant::<T>(weight) * self.stages[stage][i];
        }
        dt * acc
    }
}

fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

impl<T: Scalar> Steppable<T> for RungeKutta<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        self.eval_stages(system, t0, state, dt);
        for i in 0..state.len() {
            state[i] = state[i] + self.increment(i, dt);
        }
        *t = t0 + dt;
    }
}

impl AdaptiveSteppable for RungeKutta<f64> {
    fn order(&self) -> usize {
        self.tableau.error_order
    }

    /// Tableaus without error weights cannot form an estimate and always
    /// report failure.
    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> bool {
        let tableau = self.tableau;
        if tableau.e.is_empty() {
            return false;
        }

        self.eval_stages(system, t, state, dt);
        for i in 0..state.len() {
            next[i] = state[i] + self.increment(i, dt);
        }
        let fsal = tableau.b.len();
        system.apply(t + dt, next, &mut self.stages[fsal]);

        for i in 0..state.len() {
            let mut acc = 0.0;
            for (stage, &weight) in tableau.e.iter().enumerate() {
                acc += weight * self.stages[stage][i];
            }
            error[i] = dt * acc;
        }

        // Local Lipschitz estimate from the last two stages.
        let mut slope = 0.0;
        let mut spread = 0.0;
        for i in 0..state.len() {
            slope += (self.stages[fsal][i] - self.stages[fsal - 1][i]).powi(2);
            spread += (next[i] - self.before_last[i]).powi(2);
        }
        self.stiffness = if spread > 0.0 { dt * (slope / spread).sqrt() } else { 0.0 };
        true
    }

    fn stiffness(&self) -> f64 {
        self.stiffness
    }
}

const ROSENBROCK_D: f64 = 1.0 / (2.0 + std::f64::consts::SQRT_2);
const ROSENBROCK_E32: f64 = 6.0 + std::f64::consts::SQRT_2;

/// Rosenbrock 2(3) as used by `ode23s`. L-stable, so stiff flows do not force
/// tiny steps. The Jacobian comes from forward differences.
pub struct Rosenbrock23 {
    jacobian: DMatrix<f64>,
    f0: Vec<f64>,
    f1: Vec<f64>,
    f2: Vec<f64>,
    shifted: Vec<f64>,
    stiffness: f64,
}

impl Rosenbrock23 {
    pub fn new(dim: usize) -> Self {
        Self {
            jacobian: DMatrix::zeros(dim, dim),
            f0: vec![0.0; dim],
            f1: vec![0.0; dim],
            f2: vec![0.0; dim],
            shifted: vec![0.0; dim],
            stiffness: 0.0,
        }
    }

    fn update_jacobian(&mut self, system: &impl DynamicalSystem<f64>, t: f64, state: &[f64]) {
        let root_eps = f64::EPSILON.sqrt();
        self.shifted.copy_from_slice(state);
        for j in 0..state.len() {
            let delta = root_eps * state[j].abs().max(1.0);
            self.shifted[j] = state[j] + delta;
            system.apply(t, &self.shifted, &mut self.f1);
            for i in 0..state.len() {
                self.jacobian[(i, j)] = (self.f1[i] - self.f0[i]) / delta;
            }
            self.shifted[j] = state[j];
        }
    }
}

impl AdaptiveSteppable for Rosenbrock23 {
    fn order(&self) -> usize {
        2
    }

    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> bool {
        let dim = state.len();
        system.apply(t, state, &mut self.f0);
        self.update_jacobian(system, t, state);

        let t_delta = f64::EPSILON.sqrt() * t.abs().max(1.0);
        system.apply(t + t_delta, state, &mut self.f1);
        let f0 = DVector::from_column_slice(&self.f0);
        let dfdt = (DVector::from_column_slice(&self.f1) - &f0) / t_delta;
        let hd_dfdt = &dfdt * (dt * ROSENBROCK_D);

        let jacobian_norm = self
            .jacobian
            .row_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0_f64, f64::max);
        self.stiffness = dt * jacobian_norm;

        let w = DMatrix::<f64>::identity(dim, dim) - &self.jacobian * (dt * ROSENBROCK_D);
        let lu = w.lu();

        let Some(k1) = lu.solve(&(&f0 + &hd_dfdt)) else {
            return false;
        };

        for i in 0..dim {
            self.shifted[i] = state[i] + 0.5 * dt * k1[i];
        }
        system.apply(t + 0.5 * dt, &self.shifted, &mut self.f1);
        let f1 = DVector::from_column_slice(&self.f1);
        let Some(k2) = lu.solve(&(&f1 - &k1)).map(|v| v + &k1) else {
            return false;
        };

        for i in 0..dim {
            next[i] = state[i] + dt * k2[i];
        }
        system.apply(t + dt, next, &mut self.f2);
        let f2 = DVector::from_column_slice(&self.f2);
        let rhs = &f2 - (&k2 - &f1) * ROSENBROCK_E32 - (&k1 - &f0) * 2.0 + &hd_dfdt;
        let Some(k3) = lu.solve(&rhs) else {
            return false;
        };

        for i in 0..dim {
            error[i] = dt / 6.0 * (k1[i] - 2.0 * k2[i] + k3[i]);
        }
        true
    }

    fn stiffness(&self) -> f64 {
        self.stiffness
    }
}

#[cfg(test)]
mod tests {
    use super::{Rosenbrock23, RungeKutta};
    use crate::traits::{AdaptiveSteppable, DynamicalSystem, Steppable};

    struct Decay;

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -x[0];
        }
    }

    struct Clock;

    impl DynamicalSystem<f64> for Clock {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = 3.0 * t * t;
        }
    }

    /// x' = -1000 (x - 1)
    struct Relaxation;

    impl DynamicalSystem<f64> for Relaxation {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -1000.0 * (x[0] - 1.0);
        }
    }

    fn run_fixed(mut stepper: RungeKutta<f64>, system: &impl DynamicalSystem<f64>, x0: f64, steps: usize, dt: f64) -> (f64, f64) {
        let mut t = 0.0;
        let mut state = [x0];
        for _ in 0..steps {
            stepper.step(system, &mut t, &mut state, dt);
        }
        (t, state[0])
    }

    /// Chains accepted-size attempts without step control.
    fn run_attempts(stepper: &mut impl AdaptiveSteppable, system: &impl DynamicalSystem<f64>, x0: f64, steps: usize, dt: f64) -> f64 {
        let mut t = 0.0;
        let mut state = [x0];
        let mut next = [0.0];
        let mut error = [0.0];
        for _ in 0..steps {
            assert!(stepper.attempt(system, t, &state, dt, &mut next, &mut error));
            state = next;
            t += dt;
        }
        state[0]
    }

    #[test]
    fn rk4_tracks_exponential_decay() {
        let (t, x) = run_fixed(RungeKutta::rk4(1), &Decay, 1.0, 100, 0.01);
        assert!((t - 1.0).abs() < 1e-12);
        assert!((x - (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn tsit5_tracks_exponential_decay() {
        let (_, x) = run_fixed(RungeKutta::tsit5(1), &Decay, 2.0, 50, 0.02);
        assert!((x - 2.0 * (-1.0_f64).exp()).abs() < 1e-10);
    }

    #[test]
    fn tsit5_converges_at_fifth_order() {
        let exact = (-1.0_f64).exp();
        let (_, coarse) = run_fixed(RungeKutta::tsit5(1), &Decay, 1.0, 10, 0.1);
        let (_, fine) = run_fixed(RungeKutta::tsit5(1), &Decay, 1.0, 20, 0.05);
        let ratio = (coarse - exact).abs() / (fine - exact).abs();
        // Halving the step divides a fifth-order global error by about 32.
        assert!(ratio > 20.0, "error ratio {ratio}");
    }

    #[test]
    fn stages_see_intermediate_times() {
        // x' = 3t^2 is a cubic, which both schemes integrate exactly.
        for stepper in [RungeKutta::rk4(1), RungeKutta::tsit5(1)] {
            let (_, x) = run_fixed(stepper, &Clock, 0.0, 4, 0.5);
            assert!((x - 8.0).abs() < 1e-9, "gave {x}");
        }
    }

    #[test]
    fn tsit5_error_estimate_shrinks_with_the_step() {
        let mut stepper = RungeKutta::<f64>::tsit5(1);
        let mut next = [0.0];
        let mut coarse = [0.0];
        let mut fine = [0.0];
        assert!(stepper.attempt(&Decay, 0.0, &[1.0], 0.2, &mut next, &mut coarse));
        assert!((next[0] - (-0.2_f64).exp()).abs() < 1e-7);
        assert!(stepper.attempt(&Decay, 0.0, &[1.0], 0.1, &mut next, &mut fine));
        assert!(coarse[0].abs() > 0.0);
        assert!(fine[0].abs() < coarse[0].abs() / 8.0);
    }

    #[test]
    fn fixed_tableau_cannot_estimate_error() {
        let mut stepper = RungeKutta::<f64>::rk4(1);
        let mut next = [0.0];
        let mut error = [0.0];
        assert!(!stepper.attempt(&Decay, 0.0, &[1.0], 0.1, &mut next, &mut error));
    }

    #[test]
    fn tsit5_sees_stiffness() {
        let mut stepper = RungeKutta::<f64>::tsit5(1);
        let mut next = [0.0];
        let mut error = [0.0];
        assert!(stepper.attempt(&Relaxation, 0.0, &[0.0], 0.01, &mut next, &mut error));
        // Linear flow, so the estimate recovers |lambda| * dt exactly.
        assert!((stepper.stiffness() - 10.0).abs() < 1e-6, "{}", stepper.stiffness());
    }

    #[test]
    fn rosenbrock_tracks_exponential_decay() {
        let mut stepper = Rosenbrock23::new(1);
        let x = run_attempts(&mut stepper, &Decay, 1.0, 1000, 0.001);
        assert!((x - (-1.0_f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn rosenbrock_is_stable_on_stiff_relaxation() {
        let mut stepper = Rosenbrock23::new(1);
        // dt * lambda = 100 is far outside any explicit stability region.
        let x = run_attempts(&mut stepper, &Relaxation, 0.0, 50, 0.1);
        assert!((x - 1.0).abs() < 1e-6, "got {x}");
        assert!(stepper.stiffness() > 50.0);

        let mut explicit = RungeKutta::<f64>::tsit5(1);
        let blown = run_attempts(&mut explicit, &Relaxation, 0.0, 50, 0.1);
        assert!(!blown.is_finite() || (blown - 1.0).abs() > 1.0);
    }
}
