//! Crude Monte Carlo
//!
//! Independent standard-normal draws; the probability of failure is the
//! fraction of failing samples. Samples with an undefined limit state are
//! left out of both counts.

use log::warn;
use serde::{Deserialize, Serialize};

use super::design_point_builder::{DesignPointBuilder, DesignPointMethod};
use super::validation::ValidationReport;
use super::{sampling_design_point, ReliabilityAlgorithm};
use crate::error::Result;
use crate::model::{ConvergenceReport, DesignPoint, ModelRunner, Sample, StopReason};
use crate::statistics::{RandomGenerator, RandomSettings, RandomSource, StandardNormal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrudeMonteCarloSettings {
    /// Samples drawn before convergence is checked
    pub minimum_samples: usize,

    pub maximum_samples: usize,

    /// Target coefficient of variation of the failure probability
    pub variation_coefficient: f64,

    pub random: RandomSettings,

    pub design_point_method: DesignPointMethod,
}

impl Default for CrudeMonteCarloSettings {
    fn default() -> Self {
        Self {
            minimum_samples: 1000,
            maximum_samples: 100_000,
            variation_coefficient: 0.05,
            random: RandomSettings::default(),
            design_point_method: DesignPointMethod::CenterOfGravity,
        }
    }
}

/// Coefficient of variation of a binomial frequency estimate
pub(crate) fn binomial_variation(probability: f64, samples: usize) -> f64 {
    if samples == 0 || probability <= 0.0 {
        f64::INFINITY
    } else {
        ((1.0 - probability) / (samples as f64 * probability)).sqrt()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrudeMonteCarlo {
    settings: CrudeMonteCarloSettings,
}

impl CrudeMonteCarlo {
    pub fn new(settings: CrudeMonteCarloSettings) -> Self {
        Self { settings }
    }
}

impl ReliabilityAlgorithm for CrudeMonteCarlo {
    fn validate(&self, report: &mut ValidationReport) {
        let s = &self.settings;
        report.check(s.maximum_samples >= 1, "crude Monte Carlo", "maximum samples must be at least 1");
        report.check(
            s.minimum_samples <= s.maximum_samples,
            "crude Monte Carlo",
            "minimum samples must not exceed maximum samples",
        );
        report.check(s.variation_coefficient > 0.0, "crude Monte Carlo", "variation coefficient must be positive");
    }

    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let s = &self.settings;
        let mut random = RandomGenerator::from_settings(&s.random)?;
        let dimension = runner.dimension();
        let batch_size = runner.run_settings().max_chunk_size.max(1);

        let mut builder = DesignPointBuilder::new(s.design_point_method, dimension);
        let mut report = ConvergenceReport::default();
        let mut drawn = 0;
        let mut counted = 0;
        let mut failed = 0;
        let mut probability = 0.0;
        let mut variation = f64::INFINITY;
        let mut step = 0;

        let stop_reason = loop {
            if runner.is_cancelled() {
                break StopReason::Cancelled;
            }
            let batch = batch_size.min(s.maximum_samples - drawn);
            if batch == 0 {
                break StopReason::MaximumSamples;
            }

            let mut samples: Vec<Sample> = (0..batch)
                .map(|_| Sample::new(random.next_standard_normals(dimension)).with_iteration(step as i32))
                .collect();
            runner.evaluate(&mut samples)?;
            drawn += batch;

            for sample in &samples {
                if !sample.is_evaluated() {
                    report.excluded_samples += 1;
                    continue;
                }
                counted += 1;
                if sample.is_failing() {
                    failed += 1;
                    builder.add(sample);
                }
            }

            probability = if counted > 0 { failed as f64 / counted as f64 } else { 0.0 };
            variation = binomial_variation(probability, counted);
            step += 1;
            runner.report(step, StandardNormal::get_u_from_q(probability), variation);

            if drawn >= s.minimum_samples && variation <= s.variation_coefficient {
                break StopReason::Converged;
            }
        };

        report.total_iterations = step;
        report.failed_samples = failed;
        if failed == 0 && stop_reason != StopReason::Cancelled {
            warn!("crude Monte Carlo found no failing samples in {} draws", drawn);
            report.finish(StopReason::NoFailingSamples, variation);
        } else {
            report.finish(stop_reason, variation);
        }

        Ok(sampling_design_point(runner, "Crude Monte Carlo", probability, &builder, report))
    }
}
