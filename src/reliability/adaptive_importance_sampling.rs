//! Adaptive Importance Sampling
//!
//! Variance loops adapt the sampling density before the final estimate:
//!
//! 1. Draw `minimum_samples` from the current density
//! 2. Cluster the failing samples (K-Means++, weighted by their importance weight)
//! 3. Replace the density by a mixture centered at the cluster centers, so
//!    separate failure modes each get their own component
//!
//! Looping stops once at least `minimum_variance_loops` loops ran and the last
//! one produced `minimum_failed_samples` failures, or `maximum_variance_loops`
//! is reached. The final loop then samples the mixture until the target
//! variation coefficient is met.
//!
//! A loop without failures doubles the deviations of the density and is
//! repeated when `auto_maximum_samples_no_result` is set, otherwise the run
//! stops without a result. With `auto_maximum_samples` the sample cap of the
//! final loop is derived from the variation reached in the last variance loop.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::design_point_builder::{DesignPointBuilder, DesignPointMethod};
use super::importance_sampling::{sample_loop, LoopLimits, Proposal};
use super::validation::ValidationReport;
use super::{sampling_design_point, ReliabilityAlgorithm};
use crate::clustering::{ClusterSettings, KMeans};
use crate::error::Result;
use crate::model::{ConvergenceReport, DesignPoint, ModelRunner, Sample, StopReason};
use crate::statistics::{RandomGenerator, RandomSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveImportanceSamplingSettings {
    /// Samples per variance loop, and minimum of the final loop
    pub minimum_samples: usize,

    /// Sample cap of the final loop
    pub maximum_samples: usize,

    /// Target coefficient of variation of the failure probability
    pub variation_coefficient: f64,

    pub minimum_variance_loops: usize,

    pub maximum_variance_loops: usize,

    /// Failures a variance loop needs before the density is trusted
    pub minimum_failed_samples: usize,

    /// Derive the final sample cap from the variation of the last variance loop
    pub auto_maximum_samples: bool,

    /// Widen the density and retry when a loop finds no failures
    pub auto_maximum_samples_no_result: bool,

    pub clustering: ClusterSettings,

    pub random: RandomSettings,

    pub design_point_method: DesignPointMethod,
}

impl Default for AdaptiveImportanceSamplingSettings {
    fn default() -> Self {
        Self {
            minimum_samples: 1000,
            maximum_samples: 100_000,
            variation_coefficient: 0.05,
            minimum_variance_loops: 1,
            maximum_variance_loops: 10,
            minimum_failed_samples: 10,
            auto_maximum_samples: false,
            auto_maximum_samples_no_result: true,
            clustering: ClusterSettings {
                max_clusters: 3,
                optimize_number_of_clusters: true,
                ..Default::default()
            },
            random: RandomSettings::default(),
            design_point_method: DesignPointMethod::CenterOfGravity,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveImportanceSampling {
    settings: AdaptiveImportanceSamplingSettings,
}

impl AdaptiveImportanceSampling {
    pub fn new(settings: AdaptiveImportanceSamplingSettings) -> Self {
        Self { settings }
    }

    /// Mixture centered at the clusters of the failing samples
    fn adapt(&self, failing: &[Sample], deviations: &[f64], random: &mut RandomGenerator) -> Proposal {
        let clusters = KMeans::new(self.settings.clustering.clone()).cluster(failing, random);
        debug!("adaptive importance sampling: {} clusters of failing samples", clusters.len());
        Proposal::mixture(
            clusters.into_iter().map(|c| (c.weight, c.center.values)).collect(),
            deviations.to_vec(),
        )
    }

    /// Final loop sample cap
    fn final_sample_cap(&self, counted: usize, variation: f64) -> usize {
        let s = &self.settings;
        if !s.auto_maximum_samples || !variation.is_finite() {
            return s.maximum_samples;
        }
        let needed = counted as f64 * (variation / s.variation_coefficient).powi(2);
        (needed.ceil() as usize).clamp(s.minimum_samples, s.maximum_samples)
    }
}

impl ReliabilityAlgorithm for AdaptiveImportanceSampling {
    fn validate(&self, report: &mut ValidationReport) {
        let s = &self.settings;
        let subject = "adaptive importance sampling";
        report.check(s.minimum_samples >= 1, subject, "minimum samples must be at least 1");
        report.check(
            s.minimum_samples <= s.maximum_samples,
            subject,
            "minimum samples must not exceed maximum samples",
        );
        report.check(s.variation_coefficient > 0.0, subject, "variation coefficient must be positive");
        report.check(s.maximum_variance_loops >= 1, subject, "maximum variance loops must be at least 1");
        report.check(
            s.minimum_variance_loops <= s.maximum_variance_loops,
            subject,
            "minimum variance loops must not exceed maximum variance loops",
        );
        s.clustering.validate(report);
    }

    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let s = &self.settings;
        let mut random = RandomGenerator::from_settings(&s.random)?;
        let dimension = runner.dimension();
        let varying = runner.varying_settings();
        let deviations: Vec<f64> = varying.iter().map(|v| v.variance_factor).collect();
        let mut proposal = Proposal::single(varying.iter().map(|v| v.start_value).collect(), deviations.clone());

        let mut report = ConvergenceReport::default();
        let mut step = 0;
        let mut loops = 0;
        let mut last_counted = 0;
        let mut last_variation = f64::INFINITY;

        let exploration_limits = LoopLimits {
            minimum_samples: s.minimum_samples,
            maximum_samples: s.minimum_samples,
            variation_coefficient: 0.0,
        };

        // Variance loops
        while loops < s.maximum_variance_loops {
            if runner.is_cancelled() {
                break;
            }
            loops += 1;

            let mut failing = Vec::new();
            let mut scratch = DesignPointBuilder::new(s.design_point_method, dimension);
            let (estimate, _) = sample_loop(
                runner,
                &proposal,
                &mut random,
                &exploration_limits,
                &mut scratch,
                Some(&mut failing),
                loops as i32,
                &mut step,
            )?;
            report.excluded_samples += estimate.excluded;

            if failing.is_empty() {
                if s.auto_maximum_samples_no_result {
                    proposal.scale_deviations(2.0);
                    info!("adaptive importance sampling: no failures in loop {}, widening the density", loops);
                    continue;
                }
                break;
            }

            last_counted = estimate.counted;
            last_variation = estimate.variation();
            proposal = self.adapt(&failing, &deviations, &mut random);

            if loops >= s.minimum_variance_loops && failing.len() >= s.minimum_failed_samples {
                break;
            }
        }

        let mut builder = DesignPointBuilder::new(s.design_point_method, dimension);
        if last_counted == 0 {
            // The density never reached the failure region
            let stop_reason = if runner.is_cancelled() { StopReason::Cancelled } else { StopReason::NoFailingSamples };
            warn!("adaptive importance sampling found no failing samples in {} loops", loops);
            report.total_iterations = loops;
            report.finish(stop_reason, f64::INFINITY);
            return Ok(sampling_design_point(runner, "Adaptive Importance Sampling", 0.0, &builder, report));
        }

        let limits = LoopLimits {
            minimum_samples: s.minimum_samples,
            maximum_samples: self.final_sample_cap(last_counted, last_variation),
            variation_coefficient: s.variation_coefficient,
        };
        let (estimate, stop_reason) = sample_loop(
            runner,
            &proposal,
            &mut random,
            &limits,
            &mut builder,
            None,
            (loops + 1) as i32,
            &mut step,
        )?;

        report.total_iterations = loops + 1;
        report.failed_samples = estimate.failed;
        report.excluded_samples += estimate.excluded;
        if estimate.failed == 0 && stop_reason != StopReason::Cancelled {
            report.finish(StopReason::NoFailingSamples, estimate.variation());
        } else {
            report.finish(stop_reason, estimate.variation());
        }

        Ok(sampling_design_point(
            runner,
            "Adaptive Importance Sampling",
            estimate.probability(),
            &builder,
            report,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunSettings, StochastSettings, StochastSettingsSet, Stochast};
    use crate::statistics::StandardNormal;
    use std::sync::Arc;

    fn runner<F>(model: F, dimension: usize, variance_factor: f64) -> ModelRunner
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        let settings = StochastSettingsSet {
            stochast_settings: (0..dimension)
                .map(|i| {
                    StochastSettings::new(Arc::new(Stochast::standard_normal(format!("u{}", i + 1))))
                        .with_variance_factor(variance_factor)
                })
                .collect(),
        };
        ModelRunner::new(Arc::new(model), settings, RunSettings::default()).unwrap()
    }

    #[test]
    fn test_two_failure_modes() {
        let model = |x: &[f64]| (3.5 - x[0]).min(3.5 + x[0]);
        let mut runner = runner(model, 2, 2.0);
        let point = AdaptiveImportanceSampling::default().run(&mut runner).unwrap();

        let expected = StandardNormal::get_u_from_q(2.0 * StandardNormal::get_q_from_u(3.5));
        assert!(point.is_converged());
        assert!((point.beta - expected).abs() < 0.2, "beta {} vs {}", point.beta, expected);
    }

    #[test]
    fn test_widens_density_without_failures() {
        let mut runner = runner(|x: &[f64]| 5.0 - x[0], 1, 1.0);
        let point = AdaptiveImportanceSampling::default().run(&mut runner).unwrap();

        assert!(point.is_converged());
        assert!((point.beta - 5.0).abs() < 0.2, "beta {}", point.beta);
        assert!(point.alphas[0].alpha < 0.0);
    }

    #[test]
    fn test_no_result_without_widening() {
        let mut runner = runner(|x: &[f64]| 8.0 - x[0], 1, 1.0);
        let settings = AdaptiveImportanceSamplingSettings {
            auto_maximum_samples_no_result: false,
            ..Default::default()
        };
        let point = AdaptiveImportanceSampling::new(settings).run(&mut runner).unwrap();
        assert_eq!(point.convergence_report.stop_reason, StopReason::NoFailingSamples);
        assert!(!point.convergence_report.is_valid);
        assert_eq!(runner.model_runs(), 1000);
    }

    #[test]
    fn test_auto_maximum_samples() {
        let algorithm = AdaptiveImportanceSampling::new(AdaptiveImportanceSamplingSettings {
            auto_maximum_samples: true,
            ..Default::default()
        });
        // cov 0.1 after 1000 samples, target 0.05: four times as many
        assert_eq!(algorithm.final_sample_cap(1000, 0.1), 4000);
        assert_eq!(algorithm.final_sample_cap(1000, 0.01), 1000);
        assert_eq!(algorithm.final_sample_cap(1000, 100.0), 100_000);
    }

    #[test]
    fn test_final_loop_respects_derived_cap() {
        let mut runner = runner(|x: &[f64]| 2.0 - x[0], 1, 1.0);
        let settings = AdaptiveImportanceSamplingSettings {
            auto_maximum_samples: true,
            ..Default::default()
        };
        let algorithm = AdaptiveImportanceSampling::new(settings);
        let point = algorithm.run(&mut runner).unwrap();

        // One variance loop of 1000 samples, its last report carries the variation
        assert_eq!(point.convergence_report.total_iterations, 2);
        let variance_loop = point
            .reliability_results
            .iter()
            .find(|r| r.model_runs == 1000)
            .unwrap();
        let cap = algorithm.final_sample_cap(1000, variance_loop.convergence);
        assert!(cap < 100_000, "cap {}", cap);
        assert!(runner.model_runs() - 1000 <= cap);
        assert!((point.beta - 2.0).abs() < 0.2, "beta {}", point.beta);
    }
}
