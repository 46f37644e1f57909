//! Design point location from failing samples

use serde::{Deserialize, Serialize};

use crate::model::Sample;

/// How a design point is derived from the failing samples of a sampling run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DesignPointMethod {
    /// Failing sample closest to the origin (highest density)
    #[default]
    NearestToMean,

    /// Weighted mean of the failing samples
    CenterOfGravity,

    /// Weighted mean of the unit directions of the failing samples
    CenterOfAngles,
}

/// Accumulates failing samples and yields the design point direction
///
/// Only running sums are kept, so samples can be added one batch at a time.
#[derive(Debug, Clone)]
pub struct DesignPointBuilder {
    method: DesignPointMethod,
    nearest: Option<(f64, Vec<f64>)>,
    sum_values: Vec<f64>,
    sum_directions: Vec<f64>,
    total_weight: f64,
    count: usize,
}

impl DesignPointBuilder {
    pub fn new(method: DesignPointMethod, dimension: usize) -> Self {
        Self {
            method,
            nearest: None,
            sum_values: vec![0.0; dimension],
            sum_directions: vec![0.0; dimension],
            total_weight: 0.0,
            count: 0,
        }
    }

    /// Add a sample; samples that do not fail (or are undefined) are ignored
    pub fn add(&mut self, sample: &Sample) {
        if !sample.is_failing() {
            return;
        }
        self.add_weighted(&sample.values, sample.weight);
    }

    /// Add a failing point with an explicit weight
    pub fn add_weighted(&mut self, values: &[f64], weight: f64) {
        if weight <= 0.0 || !weight.is_finite() {
            return;
        }

        let distance = values.iter().map(|u| u * u).sum::<f64>().sqrt();
        if self.nearest.as_ref().map_or(true, |(d, _)| distance < *d) {
            self.nearest = Some((distance, values.to_vec()));
        }

        for (sum, u) in self.sum_values.iter_mut().zip(values) {
            *sum += weight * u;
        }
        if distance > 0.0 {
            for (sum, u) in self.sum_directions.iter_mut().zip(values) {
                *sum += weight * u / distance;
            }
        }
        self.total_weight += weight;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Representative failing point, `None` when nothing failed
    ///
    /// For center of angles only the direction is meaningful; the caller
    /// scales the result to the reliability index.
    pub fn point(&self) -> Option<Vec<f64>> {
        if self.count == 0 {
            return None;
        }

        match self.method {
            DesignPointMethod::NearestToMean => self.nearest.as_ref().map(|(_, values)| values.clone()),
            DesignPointMethod::CenterOfGravity => {
                Some(self.sum_values.iter().map(|s| s / self.total_weight).collect())
            }
            DesignPointMethod::CenterOfAngles => {
                Some(self.sum_directions.iter().map(|s| s / self.total_weight).collect())
            }
        }
    }
}
