//! U-space samples and their limit-state evaluations

use serde::{Deserialize, Serialize};

/// A coordinate vector in U-space with its evaluated limit-state value
///
/// `z` is `NaN` until the sample has been evaluated, and stays `NaN` when the
/// model could not produce a result for it. Z < 0 denotes failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// U values, one per (varying) stochast
    pub values: Vec<f64>,

    /// Limit-state value
    pub z: f64,

    /// Weight of the sample in the owning estimator
    pub weight: f64,

    /// Iteration (or loop) that produced the sample, -1 when untagged
    pub iteration_index: i32,
}

impl Sample {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            z: f64::NAN,
            weight: 1.0,
            iteration_index: -1,
        }
    }

    /// Sample at the origin
    pub fn origin(dimension: usize) -> Self {
        Self::new(vec![0.0; dimension])
    }

    pub fn with_iteration(mut self, iteration_index: i32) -> Self {
        self.iteration_index = iteration_index;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Distance to the origin
    pub fn beta(&self) -> f64 {
        self.values.iter().map(|u| u * u).sum::<f64>().sqrt()
    }

    pub fn is_evaluated(&self) -> bool {
        !self.z.is_nan()
    }

    pub fn is_failing(&self) -> bool {
        self.z < 0.0
    }

    /// Sample moved along its own direction to the given distance from the origin
    pub fn scaled_to(&self, beta: f64) -> Sample {
        let norm = self.beta();
        let factor = if norm > 0.0 { beta / norm } else { 0.0 };
        Sample::new(self.values.iter().map(|u| u * factor).collect())
            .with_iteration(self.iteration_index)
            .with_weight(self.weight)
    }

    pub fn squared_distance(&self, other: &Sample) -> f64 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b).powi(2))
            .sum()
    }

    pub fn distance(&self, other: &Sample) -> f64 {
        self.squared_distance(other).sqrt()
    }
}
