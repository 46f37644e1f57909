//! Numerical Integration
//!
//! Fixed grid quadrature of U-space. Every varying stochast is divided into
//! `intervals` equal intervals between its minimum and maximum U value; the
//! outer intervals also carry the tail mass beyond the bounds. Every grid
//! cell is evaluated at its center and counts with its full probability
//! mass. The cost is the product of the interval counts, so the method only
//! suits a few stochasts.

use log::warn;
use serde::{Deserialize, Serialize};

use super::design_point_builder::{DesignPointBuilder, DesignPointMethod};
use super::validation::ValidationReport;
use super::{sampling_design_point, ReliabilityAlgorithm};
use crate::error::Result;
use crate::model::{ConvergenceReport, DesignPoint, ModelRunner, Sample, StopReason};
use crate::statistics::StandardNormal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericalIntegrationSettings {
    /// Largest grid the method accepts
    pub maximum_grid_points: usize,

    pub design_point_method: DesignPointMethod,
}

impl Default for NumericalIntegrationSettings {
    fn default() -> Self {
        Self {
            maximum_grid_points: 10_000_000,
            design_point_method: DesignPointMethod::NearestToMean,
        }
    }
}

/// Centers and masses of the intervals of one axis
#[derive(Debug, Clone)]
struct Axis {
    centers: Vec<f64>,
    masses: Vec<f64>,
}

impl Axis {
    fn new(min_value: f64, max_value: f64, intervals: usize) -> Self {
        let intervals = intervals.max(1);
        let width = (max_value - min_value) / intervals as f64;
        let edges: Vec<f64> = (0..=intervals).map(|k| min_value + k as f64 * width).collect();

        let below = |k: usize| {
            if k == 0 {
                0.0
            } else if k == intervals {
                1.0
            } else {
                StandardNormal::get_p_from_u(edges[k])
            }
        };
        let above = |k: usize| {
            if k == 0 {
                1.0
            } else if k == intervals {
                0.0
            } else {
                StandardNormal::get_q_from_u(edges[k])
            }
        };

        let centers = (0..intervals).map(|k| 0.5 * (edges[k] + edges[k + 1])).collect();
        let masses = (0..intervals)
            .map(|k| {
                // Tail side differences keep the accuracy of small masses
                let mass = if edges[k] >= 0.0 { above(k) - above(k + 1) } else { below(k + 1) - below(k) };
                mass.max(0.0)
            })
            .collect();
        Self { centers, masses }
    }

    fn len(&self) -> usize {
        self.centers.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NumericalIntegration {
    settings: NumericalIntegrationSettings,
}

impl NumericalIntegration {
    pub fn new(settings: NumericalIntegrationSettings) -> Self {
        Self { settings }
    }

    /// Center and mass of grid cell `index`, the first axis varies fastest
    fn cell(axes: &[Axis], mut index: usize) -> (Vec<f64>, f64) {
        let mut values = Vec::with_capacity(axes.len());
        let mut mass = 1.0;
        for axis in axes {
            let k = index % axis.len();
            index /= axis.len();
            values.push(axis.centers[k]);
            mass *= axis.masses[k];
        }
        (values, mass)
    }
}

impl ReliabilityAlgorithm for NumericalIntegration {
    fn validate(&self, report: &mut ValidationReport) {
        report.check(
            self.settings.maximum_grid_points >= 1,
            "numerical integration",
            "maximum grid points must be at least 1",
        );
    }

    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let s = &self.settings;
        let axes: Vec<Axis> = runner
            .varying_settings()
            .iter()
            .map(|v| Axis::new(v.min_value, v.max_value, v.intervals))
            .collect();
        let dimension = axes.len();

        let grid_points = axes.iter().try_fold(1usize, |total, axis| total.checked_mul(axis.len()));
        let mut report = ConvergenceReport::default();
        let grid_points = match grid_points {
            Some(n) if n <= s.maximum_grid_points => n,
            _ => {
                warn!("numerical integration: grid exceeds {} points", s.maximum_grid_points);
                report.finish(StopReason::MaximumSamples, f64::INFINITY);
                let builder = DesignPointBuilder::new(s.design_point_method, dimension);
                return Ok(sampling_design_point(runner, "Numerical Integration", 0.0, &builder, report));
            }
        };

        let mut builder = DesignPointBuilder::new(s.design_point_method, dimension);
        let batch_size = runner.run_settings().max_chunk_size.max(1);
        let mut failing_mass = 0.0;
        let mut excluded_mass = 0.0;
        let mut done = 0;
        let mut step = 0;

        let stop_reason = loop {
            if done == grid_points {
                break StopReason::Converged;
            }
            if runner.is_cancelled() {
                break StopReason::Cancelled;
            }

            let end = (done + batch_size).min(grid_points);
            let (mut samples, masses): (Vec<Sample>, Vec<f64>) = (done..end)
                .map(|index| {
                    let (values, mass) = Self::cell(&axes, index);
                    (Sample::new(values).with_iteration(step as i32).with_weight(mass), mass)
                })
                .unzip();
            runner.evaluate(&mut samples)?;

            for (sample, mass) in samples.iter().zip(masses) {
                if !sample.is_evaluated() {
                    excluded_mass += mass;
                    report.excluded_samples += 1;
                } else if sample.is_failing() {
                    failing_mass += mass;
                    report.failed_samples += 1;
                    builder.add(sample);
                }
            }
            done = end;
            step += 1;

            let defined = 1.0 - excluded_mass;
            let probability = if defined > 0.0 { failing_mass / defined } else { 0.0 };
            runner.report(step, StandardNormal::get_u_from_q(probability), 1.0 - done as f64 / grid_points as f64);
        };

        let defined = 1.0 - excluded_mass;
        report.total_iterations = step;
        let probability = if defined > 0.0 {
            (failing_mass / defined).min(1.0)
        } else {
            report.finish(StopReason::UndefinedResult, f64::INFINITY);
            return Ok(sampling_design_point(runner, "Numerical Integration", 0.0, &builder, report));
        };

        if failing_mass <= 0.0 && stop_reason == StopReason::Converged {
            report.finish(StopReason::NoFailingSamples, 0.0);
        } else {
            let remaining = 1.0 - done as f64 / grid_points as f64;
            report.finish(stop_reason, remaining);
        }
        Ok(sampling_design_point(runner, "Numerical Integration", probability, &builder, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunSettings, StochastSettings, StochastSettingsSet, Stochast};
    use std::sync::Arc;

    fn standard_normals(n: usize) -> Vec<Arc<Stochast>> {
        (0..n).map(|i| Arc::new(Stochast::standard_normal(format!("u{}", i + 1)))).collect()
    }

    #[test]
    fn test_axis_masses_sum_to_one() {
        let axis = Axis::new(-8.0, 8.0, 200);
        let total: f64 = axis.masses.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(axis.masses.iter().all(|&m| m >= 0.0));
    }

    #[test]
    fn test_half_space() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| 1.9 - x[0], &standard_normals(2)).unwrap();
        let point = NumericalIntegration::default().run(&mut runner).unwrap();

        // Grid resolution 0.08
        assert!(point.is_converged());
        assert!((point.beta - 1.9).abs() < 0.05, "beta {}", point.beta);
        assert!(point.alphas[0].alpha < -0.9);
        assert_eq!(runner.model_runs(), 40_000);
    }

    #[test]
    fn test_tail_mass_beyond_bounds() {
        // Bounds at +-3: the outer interval carries the mass beyond u = 3
        let settings = StochastSettingsSet {
            stochast_settings: vec![StochastSettings::new(Arc::new(Stochast::standard_normal("u"))).with_bounds(-3.0, 3.0)],
        };
        let mut runner =
            ModelRunner::new(Arc::new(|x: &[f64]| if x[0] > 2.9 { -1.0 } else { 1.0 }), settings, RunSettings::default())
                .unwrap();
        let point = NumericalIntegration::default().run(&mut runner).unwrap();

        // Intervals from [2.91, 2.94) up to the outer one [2.97, inf) fail
        let expected = StandardNormal::get_q_from_u(2.91);
        assert!((point.probability_of_failure() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_grid_too_large() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| 3.0 - x[0], &standard_normals(4)).unwrap();
        let settings = NumericalIntegrationSettings { maximum_grid_points: 1000, ..Default::default() };
        let point = NumericalIntegration::new(settings).run(&mut runner).unwrap();

        assert_eq!(point.convergence_report.stop_reason, StopReason::MaximumSamples);
        assert_eq!(runner.model_runs(), 0);
    }
}
