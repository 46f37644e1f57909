//! Subset Simulation
//!
//! The failure event is reached through a chain of nested, more probable
//! events Z < b_1, Z < b_2, ... with b_k decreasing to 0. Each threshold is
//! the Z value of the `subset_fraction` quantile of the current population,
//! so every conditional probability equals the subset fraction except the
//! last one, which is counted directly.
//!
//! The population of the next level is grown from the samples below the
//! threshold with modified Metropolis chains: every component is perturbed
//! with `markov_chain_deviation` and accepted against the standard-normal
//! density, and the candidate is kept only when it stays below the threshold.
//! The chains of one level advance together, one model batch per step.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::design_point_builder::{DesignPointBuilder, DesignPointMethod};
use super::validation::ValidationReport;
use super::{sampling_design_point, ReliabilityAlgorithm};
use crate::error::Result;
use crate::model::{ConvergenceReport, DesignPoint, ModelRunner, Sample, StopReason};
use crate::statistics::{RandomGenerator, RandomSettings, RandomSource, StandardNormal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetSimulationSettings {
    /// Population size of every level
    pub samples_per_level: usize,

    /// Conditional probability targeted per level
    pub subset_fraction: f64,

    pub maximum_levels: usize,

    /// Deviation of the component-wise proposal of the Markov chains
    pub markov_chain_deviation: f64,

    pub random: RandomSettings,

    pub design_point_method: DesignPointMethod,
}

impl Default for SubsetSimulationSettings {
    fn default() -> Self {
        Self {
            samples_per_level: 1000,
            subset_fraction: 0.1,
            maximum_levels: 20,
            markov_chain_deviation: 1.0,
            random: RandomSettings::default(),
            design_point_method: DesignPointMethod::CenterOfGravity,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubsetSimulation {
    settings: SubsetSimulationSettings,
}

impl SubsetSimulation {
    pub fn new(settings: SubsetSimulationSettings) -> Self {
        Self { settings }
    }

    fn seed_count(&self) -> usize {
        let s = &self.settings;
        ((s.subset_fraction * s.samples_per_level as f64).round() as usize).max(1)
    }

    /// Component-wise Metropolis proposal around `current`
    fn propose<R: RandomSource>(&self, current: &[f64], random: &mut R) -> Vec<f64> {
        current
            .iter()
            .map(|&u| {
                let candidate = u + self.settings.markov_chain_deviation * random.next_standard_normal();
                let ratio = (-0.5 * (candidate * candidate - u * u)).exp();
                if random.next() < ratio.min(1.0) {
                    candidate
                } else {
                    u
                }
            })
            .collect()
    }

    /// Grow a population of `samples_per_level` from the seeds, staying below `threshold`
    fn grow(
        &self,
        runner: &mut ModelRunner,
        seeds: Vec<Sample>,
        threshold: f64,
        level: i32,
        random: &mut RandomGenerator,
    ) -> Result<Vec<Sample>> {
        let target = self.settings.samples_per_level;
        let mut chains = seeds;
        let mut population: Vec<Sample> = chains.clone();

        while population.len() < target {
            if runner.is_cancelled() {
                break;
            }
            let candidates: Vec<Vec<f64>> = chains.iter().map(|c| self.propose(&c.values, random)).collect();

            // Unchanged candidates need no model run
            let moved: Vec<usize> = (0..chains.len()).filter(|&i| candidates[i] != chains[i].values).collect();
            let mut samples: Vec<Sample> = moved
                .iter()
                .map(|&i| Sample::new(candidates[i].clone()).with_iteration(level))
                .collect();
            runner.evaluate(&mut samples)?;

            for (&i, sample) in moved.iter().zip(samples) {
                if sample.is_evaluated() && sample.z <= threshold {
                    chains[i] = sample;
                }
            }
            let room = target - population.len();
            population.extend(chains.iter().take(room).cloned());
        }
        Ok(population)
    }
}

/// Z for sorting, undefined results rank last
fn rank_z(sample: &Sample) -> f64 {
    if sample.is_evaluated() {
        sample.z
    } else {
        f64::INFINITY
    }
}

impl ReliabilityAlgorithm for SubsetSimulation {
    fn validate(&self, report: &mut ValidationReport) {
        let s = &self.settings;
        let subject = "subset simulation";
        report.check(s.samples_per_level >= 10, subject, "samples per level must be at least 10");
        report.check(
            s.subset_fraction > 0.0 && s.subset_fraction < 1.0,
            subject,
            "subset fraction must lie between 0 and 1",
        );
        report.check(s.maximum_levels >= 1, subject, "maximum levels must be at least 1");
        report.check(s.markov_chain_deviation > 0.0, subject, "Markov chain deviation must be positive");
    }

    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let s = &self.settings;
        let mut random = RandomGenerator::from_settings(&s.random)?;
        let dimension = runner.dimension();
        let seeds = self.seed_count();

        let mut population: Vec<Sample> = (0..s.samples_per_level)
            .map(|_| Sample::new(random.next_standard_normals(dimension)).with_iteration(0))
            .collect();
        runner.evaluate(&mut population)?;

        let mut report = ConvergenceReport::default();
        let mut probability = 1.0;
        let mut variance_sum = 0.0;
        let mut previous_threshold = f64::INFINITY;
        let mut level = 0;

        let stop_reason = loop {
            let n = population.len() as f64;
            report.excluded_samples += population.iter().filter(|p| !p.is_evaluated()).count();
            let failing = population.iter().filter(|p| p.is_failing()).count();

            if failing >= seeds || runner.is_cancelled() || level + 1 >= s.maximum_levels {
                // Last level: count the failures directly
                let fraction = failing as f64 / n;
                probability *= fraction;
                if fraction > 0.0 {
                    variance_sum += (1.0 - fraction) / (n * fraction);
                }
                report.failed_samples = failing;
                break if runner.is_cancelled() {
                    StopReason::Cancelled
                } else if failing == 0 {
                    StopReason::NoFailingSamples
                } else if failing >= seeds {
                    StopReason::Converged
                } else {
                    StopReason::MaximumIterations
                };
            }

            population.sort_by(|a, b| rank_z(a).total_cmp(&rank_z(b)));
            let threshold = rank_z(&population[seeds - 1]);
            if !threshold.is_finite() || threshold >= previous_threshold {
                warn!("subset simulation: threshold stalled at {} in level {}", threshold, level);
                report.failed_samples = failing;
                probability *= failing as f64 / n;
                break StopReason::NoFailingSamples;
            }

            let fraction = seeds as f64 / n;
            probability *= fraction;
            variance_sum += (1.0 - fraction) / (n * fraction);
            previous_threshold = threshold;
            level += 1;
            debug!("subset simulation: level {} threshold {:.4}", level, threshold);
            runner.report(level, StandardNormal::get_u_from_q(probability), variance_sum.sqrt());

            population.truncate(seeds);
            population = self.grow(runner, population, threshold, level as i32, &mut random)?;
        };

        let mut builder = DesignPointBuilder::new(s.design_point_method, dimension);
        for sample in &population {
            builder.add(sample);
        }

        let variation = if probability > 0.0 { variance_sum.sqrt() } else { f64::INFINITY };
        report.total_iterations = level + 1;
        report.finish(stop_reason, variation);
        Ok(sampling_design_point(runner, "Subset Simulation", probability, &builder, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stochast;
    use std::sync::Arc;

    fn standard_normals(n: usize) -> Vec<Arc<Stochast>> {
        (0..n).map(|i| Arc::new(Stochast::standard_normal(format!("u{}", i + 1)))).collect()
    }

    #[test]
    fn test_rare_event() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| 4.0 - x[0], &standard_normals(2)).unwrap();
        let settings = SubsetSimulationSettings { samples_per_level: 2000, ..Default::default() };
        let point = SubsetSimulation::new(settings).run(&mut runner).unwrap();

        assert!(point.is_converged());
        assert!((point.beta - 4.0).abs() < 0.3, "beta {}", point.beta);
        assert!(point.alphas[0].alpha < -0.9, "alpha {:?}", point.alpha_values());
        assert!(point.convergence_report.total_iterations >= 4, "pf 3e-5 needs several levels");
    }

    #[test]
    fn test_frequent_failure_needs_one_level() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| 0.5 - x[0], &standard_normals(1)).unwrap();
        let point = SubsetSimulation::default().run(&mut runner).unwrap();

        assert_eq!(point.convergence_report.total_iterations, 1);
        assert_eq!(runner.model_runs(), 1000);
        let expected = StandardNormal::get_q_from_u(0.5);
        assert!((point.probability_of_failure() - expected).abs() < 0.05);
    }

    #[test]
    fn test_constant_limit_state_stalls() {
        let mut runner = ModelRunner::from_fn(|_: &[f64]| 1.0, &standard_normals(2)).unwrap();
        let point = SubsetSimulation::default().run(&mut runner).unwrap();

        assert_eq!(point.convergence_report.stop_reason, StopReason::NoFailingSamples);
        assert_eq!(point.beta, 40.0);
    }

    #[test]
    fn test_proposal_keeps_dimension() {
        let algorithm = SubsetSimulation::default();
        let mut random = RandomGenerator::seeded(3).unwrap();
        let candidate = algorithm.propose(&[0.5, -1.0, 2.0], &mut random);
        assert_eq!(candidate.len(), 3);
    }
}
