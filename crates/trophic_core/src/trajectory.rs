use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Population sizes of the three species at one instant.
pub type StateVector = Vector3<f64>;

/// Number of species in the food chain.
pub const STATE_DIM: usize = 3;

/// Time-ordered samples of one integration run. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    points: Vec<StateVector>,
}

impl Trajectory {
    /// Wraps `points`, refusing an empty sequence.
    pub fn new(points: Vec<StateVector>) -> Option<Self> {
        if points.is_empty() {
            None
        } else {
            Some(Self { points })
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[StateVector] {
        &self.points
    }

    pub fn last(&self) -> &StateVector {
        &self.points[self.points.len() - 1]
    }
}

/// Vector norm used to measure the distance between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    #[default]
    Euclidean,
    Manhattan,
    Maximum,
}

impl Norm {
    pub fn distance(self, a: &StateVector, b: &StateVector) -> f64 {
        let diff = a - b;
        match self {
            Norm::Euclidean => diff.norm(),
            Norm::Manhattan => diff.lp_norm(1),
            Norm::Maximum => diff.amax(),
        }
    }
}
