use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

/// Number of model parameters.
pub const PARAM_COUNT: usize = 8;

/// Model parameters, in order:
///
/// | index | symbol      |
/// |-------|-------------|
/// | 0     | `epsilon_1` |
/// | 1     | `gamma_1`   |
/// | 2     | `d`         |
/// | 3     | `L`         |
/// | 4     | `K`         |
/// | 5     | `alpha`     |
/// | 6     | `epsilon_3` |
/// | 7     | `k`         |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector(pub [f64; PARAM_COUNT]);

impl ParameterVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Three-species population model. `N1` and `N2` exchange individuals at rate
/// `d`, `N2` grows with threshold `L` and capacity `K`, and `N3` feeds on `N2`.
#[derive(Debug, Clone, Copy)]
pub struct TritrophicModel {
    params: ParameterVector,
}

impl TritrophicModel {
    pub fn new(params: ParameterVector) -> Self {
        Self { params }
    }
}

impl<T: Scalar> DynamicalSystem<T> for TritrophicModel {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let a: [T; PARAM_COUNT] = self.params.0.map(|v| T::from_f64(v).unwrap_or_else(T::nan));
        let (n1, n2, n3) = (x[0], x[1], x[2]);
        let dispersal = a[2] * (n1 - n2);

        out[0] = (a[0] - a[1] * n1) * n1 - dispersal;
        out[1] = a[0] * n2 * (n2 - a[3]) * (a[4] - n2) / a[4] - a[5] * n2 * n3 + dispersal;
        out[2] = -a[6] * n3 + a[7] * a[5] * n2 * n3;
    }
}

#[cfg(test)]
mod tests {
    use super::{ParameterVector, TritrophicModel};
    use crate::traits::DynamicalSystem;

    fn model() -> TritrophicModel {
        TritrophicModel::new(ParameterVector([1.0, 2.0, 0.5, 0.2, 4.0, 3.0, 0.7, 0.9]))
    }

    #[test]
    fn derivative_matches_hand_computation() {
        let mut out = [0.0_f64; 3];
        model().apply(0.0, &[1.0, 2.0, 0.5], &mut out);

        // dN1 = (1 - 2*1)*1 - 0.5*(1 - 2)
        assert!((out[0] - (-0.5)).abs() < 1e-12);
        // dN2 = 1*2*(2 - 0.2)*(4 - 2)/4 - 3*2*0.5 + 0.5*(1 - 2)
        assert!((out[1] - (1.8 - 3.0 - 0.5)).abs() < 1e-12);
        // dN3 = -0.7*0.5 + 0.9*3*2*0.5
        assert!((out[2] - (-0.35 + 2.7)).abs() < 1e-12);
    }

    #[test]
    fn origin_is_an_equilibrium() {
        let mut out = [1.0_f64; 3];
        model().apply(0.0, &[0.0, 0.0, 0.0], &mut out);
        assert_eq!(out, [0.0, 0.0, 0.0]);
    }
}
