//! Importance Sampling
//!
//! Samples are drawn from a normal density centered at the start values of
//! the stochast settings and scaled by their variance factors, and every
//! sample is re-weighted by φ(u) / h(u). The same estimator drives the
//! loops of Adaptive Importance Sampling, where h is a mixture of such
//! densities.

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
pub struct ImportanceSamplingSettings {
    pub minimum_samples: usize,

    pub maximum_samples: usize,

    /// Target coefficient of variation of the failure probability
    pub variation_coefficient: f64,

    pub random: RandomSettings,

    pub design_point_method: DesignPointMethod,
}

impl Default for ImportanceSamplingSettings {
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

/// Sampling density: a weighted mixture of normal components sharing one
/// deviation vector
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Proposal {
    /// (mixture weight, center), weights sum to one
    pub components: Vec<(f64, Vec<f64>)>,
    pub deviations: Vec<f64>,
}

impl Proposal {
    pub fn single(center: Vec<f64>, deviations: Vec<f64>) -> Self {
        Self {
            components: vec![(1.0, center)],
            deviations,
        }
    }

    /// Mixture with weights proportional to the given ones
    pub fn mixture(components: Vec<(f64, Vec<f64>)>, deviations: Vec<f64>) -> Self {
        let total: f64 = components.iter().map(|(w, _)| *w).sum();
        let count = components.len() as f64;
        let components = components
            .into_iter()
            .map(|(w, c)| (if total > 0.0 { w / total } else { 1.0 / count }, c))
            .collect();
        Self { components, deviations }
    }

    pub fn scale_deviations(&mut self, factor: f64) {
        self.deviations.iter_mut().for_each(|d| *d *= factor);
    }

    pub fn draw<R: RandomSource>(&self, random: &mut R) -> Vec<f64> {
        let center = &self.select_component(random.next()).1;
        center
            .iter()
            .zip(&self.deviations)
            .map(|(c, d)| c + d * random.next_standard_normal())
            .collect()
    }

    fn select_component(&self, uniform: f64) -> &(f64, Vec<f64>) {
        let mut cumulative = 0.0;
        for component in &self.components {
            cumulative += component.0;
            if uniform < cumulative {
                return component;
            }
        }
        &self.components[self.components.len() - 1]
    }

    /// ln(φ(u) / h(u)), the constant of the normal densities cancels
    pub fn log_weight(&self, u: &[f64]) -> f64 {
        let log_phi: f64 = u.iter().map(|v| -0.5 * v * v).sum();
        let log_norm: f64 = self.deviations.iter().map(|d| d.ln()).sum();

        let terms: Vec<f64> = self
            .components
            .iter()
            .map(|(w, center)| {
                let exponent: f64 = u
                    .iter()
                    .zip(center)
                    .zip(&self.deviations)
                    .map(|((v, c), d)| -0.5 * ((v - c) / d).powi(2))
                    .sum();
                w.ln() + exponent - log_norm
            })
            .collect();
        let max = terms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let log_h = max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln();

        log_phi - log_h
    }
}

/// Running weighted estimate of the failure probability
#[derive(Debug, Clone, Default)]
pub(crate) struct WeightedEstimate {
    pub drawn: usize,
    pub counted: usize,
    pub failed: usize,
    pub excluded: usize,
    sum: f64,
    sum_squares: f64,
}

impl WeightedEstimate {
    pub fn add(&mut self, sample: &Sample) {
        self.drawn += 1;
        if !sample.is_evaluated() {
            self.excluded += 1;
            return;
        }
        self.counted += 1;
        if sample.is_failing() {
            self.failed += 1;
            self.sum += sample.weight;
            self.sum_squares += sample.weight * sample.weight;
        }
    }

    pub fn probability(&self) -> f64 {
        if self.counted == 0 {
            0.0
        } else {
            (self.sum / self.counted as f64).min(1.0)
        }
    }

    pub fn variation(&self) -> f64 {
        let probability = self.probability();
        if self.counted == 0 || probability <= 0.0 {
            return f64::INFINITY;
        }
        let n = self.counted as f64;
        let variance = ((self.sum_squares / n - (self.sum / n).powi(2)) / n).max(0.0);
        variance.sqrt() / probability
    }
}

/// Limits of one importance sampling loop
pub(crate) struct LoopLimits {
    pub minimum_samples: usize,
    pub maximum_samples: usize,
    pub variation_coefficient: f64,
}

/// Draw from the proposal in batches until the variation target or the
/// sample cap is met; failing samples go into the builder with their weight
/// and, when requested, into `failing`
#[allow(clippy::too_many_arguments)]
pub(crate) fn sample_loop(
    runner: &mut ModelRunner,
    proposal: &Proposal,
    random: &mut RandomGenerator,
    limits: &LoopLimits,
    builder: &mut DesignPointBuilder,
    mut failing: Option<&mut Vec<Sample>>,
    iteration: i32,
    step: &mut usize,
) -> Result<(WeightedEstimate, StopReason)> {
    let batch_size = runner.run_settings().max_chunk_size.max(1);
    let mut estimate = WeightedEstimate::default();

    let stop_reason = loop {
        if runner.is_cancelled() {
            break StopReason::Cancelled;
        }
        let batch = batch_size.min(limits.maximum_samples - estimate.drawn);
        if batch == 0 {
            break StopReason::MaximumSamples;
        }

        let mut samples: Vec<Sample> = (0..batch)
            .map(|_| {
                let u = proposal.draw(random);
                let weight = proposal.log_weight(&u).exp();
                Sample::new(u).with_weight(weight).with_iteration(iteration)
            })
            .collect();
        runner.evaluate(&mut samples)?;

        for sample in &samples {
            estimate.add(sample);
            builder.add(sample);
        }
        if let Some(failing) = failing.as_deref_mut() {
            failing.extend(samples.into_iter().filter(|s| s.is_failing()));
        }

        *step += 1;
        let variation = estimate.variation();
        runner.report(*step, StandardNormal::get_u_from_q(estimate.probability()), variation);

        if estimate.drawn >= limits.minimum_samples && variation <= limits.variation_coefficient {
            break StopReason::Converged;
        }
    };

    Ok((estimate, stop_reason))
}

#[derive(Debug, Clone, Default)]
pub struct ImportanceSampling {
    settings: ImportanceSamplingSettings,
}

impl ImportanceSampling {
    pub fn new(settings: ImportanceSamplingSettings) -> Self {
        Self { settings }
    }
}

impl ReliabilityAlgorithm for ImportanceSampling {
    fn validate(&self, report: &mut ValidationReport) {
        let s = &self.settings;
        let subject = "importance sampling";
        report.check(s.maximum_samples >= 1, subject, "maximum samples must be at least 1");
        report.check(
            s.minimum_samples <= s.maximum_samples,
            subject,
            "minimum samples must not exceed maximum samples",
        );
        report.check(s.variation_coefficient > 0.0, subject, "variation coefficient must be positive");
    }

    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let s = &self.settings;
        let mut random = RandomGenerator::from_settings(&s.random)?;
        let varying = runner.varying_settings();
        let proposal = Proposal::single(
            varying.iter().map(|v| v.start_value).collect(),
            varying.iter().map(|v| v.variance_factor).collect(),
        );

        let mut builder = DesignPointBuilder::new(s.design_point_method, runner.dimension());
        let limits = LoopLimits {
            minimum_samples: s.minimum_samples,
            maximum_samples: s.maximum_samples,
            variation_coefficient: s.variation_coefficient,
        };
        let mut step = 0;
        let (estimate, stop_reason) = sample_loop(runner, &proposal, &mut random, &limits, &mut builder, None, 0, &mut step)?;

        let mut report = ConvergenceReport {
            total_iterations: step,
            failed_samples: estimate.failed,
            excluded_samples: estimate.excluded,
            ..Default::default()
        };
        if estimate.failed == 0 && stop_reason != StopReason::Cancelled {
            warn!("importance sampling found no failing samples in {} draws", estimate.drawn);
            report.finish(StopReason::NoFailingSamples, estimate.variation());
        } else {
            report.finish(stop_reason, estimate.variation());
        }

        Ok(sampling_design_point(runner, "Importance Sampling", estimate.probability(), &builder, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunSettings, StochastSettings, StochastSettingsSet, Stochast};
    use std::sync::Arc;

    fn shifted_runner(center: &[f64], variance_factor: f64) -> ModelRunner {
        let settings = StochastSettingsSet {
            stochast_settings: center
                .iter()
                .enumerate()
                .map(|(i, &c)| {
                    StochastSettings::new(Arc::new(Stochast::standard_normal(format!("u{}", i + 1))))
                        .with_start_value(c)
                        .with_variance_factor(variance_factor)
                })
                .collect(),
        };
        ModelRunner::new(Arc::new(|x: &[f64]| 4.0 - x[0]), settings, RunSettings::default()).unwrap()
    }

    #[test]
    fn test_shifted_center_finds_rare_event() {
        let mut runner = shifted_runner(&[4.0, 0.0], 1.0);
        let point = ImportanceSampling::default().run(&mut runner).unwrap();

        assert!(point.is_converged());
        assert!((point.beta - 4.0).abs() < 0.1, "beta {}", point.beta);
        assert!(point.alphas[0].alpha < -0.9);
        assert!(runner.model_runs() <= 10_000);
    }

    #[test]
    fn test_unit_proposal_weight_is_one() {
        let proposal = Proposal::single(vec![0.0, 0.0], vec![1.0, 1.0]);
        assert!(proposal.log_weight(&[0.7, -1.3]).abs() < 1e-12);
    }

    #[test]
    fn test_mixture_weight() {
        // h = 0.5 φ(u - 2) + 0.5 φ(u + 2)
        let proposal = Proposal::mixture(vec![(1.0, vec![2.0]), (1.0, vec![-2.0])], vec![1.0]);
        let u: f64 = 1.0;
        let expected = (-0.5 * u * u).exp() / (0.5 * (-0.5 * (u - 2.0).powi(2)).exp() + 0.5 * (-0.5 * (u + 2.0).powi(2)).exp());
        assert!((proposal.log_weight(&[u]).exp() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_estimate() {
        let mut estimate = WeightedEstimate::default();
        for (z, weight) in [(-1.0, 0.5), (1.0, 2.0), (f64::NAN, 1.0), (-2.0, 0.1)] {
            let mut sample = Sample::new(vec![0.0]).with_weight(weight);
            sample.z = z;
            estimate.add(&sample);
        }
        assert_eq!(estimate.excluded, 1);
        assert_eq!(estimate.failed, 2);
        assert!((estimate.probability() - 0.2).abs() < 1e-12);
    }
}
