//! Directional Sampling
//!
//! For every random unit direction the distance r to the limit state is
//! searched along the ray from the origin. The direction then contributes the
//! exact probability mass beyond r, P(χ²_n > r²), instead of a hit or miss.
//!
//! # Root search
//!
//! 1. Z is evaluated at steps of `step_size` along all rays of a batch at once
//! 2. The first sign change relative to the origin brackets the root
//! 3. The brackets are bisected (again batched over the rays) until narrower
//!    than `epsilon_u`, then the root is interpolated linearly
//!
//! A ray without a sign change up to `maximum_length` contributes nothing
//! (or everything when the origin itself fails).

use log::warn;
use serde::{Deserialize, Serialize};

use super::design_point_builder::{DesignPointBuilder, DesignPointMethod};
use super::validation::ValidationReport;
use super::{sampling_design_point, ReliabilityAlgorithm};
use crate::error::Result;
use crate::model::{ConvergenceReport, DesignPoint, ModelRunner, Sample, StopReason};
use crate::statistics::{chi_squared_exceedance, RandomGenerator, RandomSettings, RandomSource, StandardNormal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalSamplingSettings {
    pub minimum_directions: usize,

    pub maximum_directions: usize,

    /// Target coefficient of variation of the failure probability
    pub variation_coefficient: f64,

    /// Step along a ray during the bracket search
    pub step_size: f64,

    /// Length of the searched part of a ray
    pub maximum_length: f64,

    /// Bracket width at which the bisection stops
    pub epsilon_u: f64,

    /// Bisection steps per bracket
    pub maximum_iterations: usize,

    pub random: RandomSettings,

    pub design_point_method: DesignPointMethod,
}

impl Default for DirectionalSamplingSettings {
    fn default() -> Self {
        Self {
            minimum_directions: 100,
            maximum_directions: 10_000,
            variation_coefficient: 0.1,
            step_size: 1.0,
            maximum_length: 20.0,
            epsilon_u: 0.01,
            maximum_iterations: 50,
            random: RandomSettings::default(),
            design_point_method: DesignPointMethod::NearestToMean,
        }
    }
}

/// Search state of one ray
struct Ray {
    direction: Vec<f64>,
    bracket: Option<Bracket>,
    undefined: bool,
}

#[derive(Clone, Copy)]
struct Bracket {
    r_low: f64,
    z_low: f64,
    r_high: f64,
    z_high: f64,
}

impl Bracket {
    fn root(&self) -> f64 {
        let dz = self.z_low - self.z_high;
        if dz != 0.0 && dz.is_finite() {
            self.r_low + (self.r_high - self.r_low) * self.z_low / dz
        } else {
            0.5 * (self.r_low + self.r_high)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectionalSampling {
    settings: DirectionalSamplingSettings,
}

impl DirectionalSampling {
    pub fn new(settings: DirectionalSamplingSettings) -> Self {
        Self { settings }
    }

    fn steps_per_ray(&self) -> usize {
        (self.settings.maximum_length / self.settings.step_size).ceil().max(1.0) as usize
    }

    /// Bracket the first sign change along every ray
    fn bracket_rays(&self, runner: &mut ModelRunner, rays: &mut [Ray], z0: f64, step: i32) -> Result<()> {
        let steps = self.steps_per_ray();
        let du = self.settings.step_size;

        let mut samples: Vec<Sample> = rays
            .iter()
            .flat_map(|ray| {
                (1..=steps).map(move |k| {
                    let r = (k as f64 * du).min(self.settings.maximum_length);
                    Sample::new(ray.direction.iter().map(|d| d * r).collect()).with_iteration(step)
                })
            })
            .collect();
        runner.evaluate(&mut samples)?;

        let origin_fails = z0 < 0.0;
        for (ray, along) in rays.iter_mut().zip(samples.chunks(steps)) {
            let mut r_low = 0.0;
            let mut z_low = z0;
            for (k, sample) in along.iter().enumerate() {
                if !sample.is_evaluated() {
                    ray.undefined = true;
                    break;
                }
                let r = ((k + 1) as f64 * du).min(self.settings.maximum_length);
                if (sample.z < 0.0) != origin_fails {
                    ray.bracket = Some(Bracket { r_low, z_low, r_high: r, z_high: sample.z });
                    break;
                }
                r_low = r;
                z_low = sample.z;
            }
        }
        Ok(())
    }

    /// Bisect all brackets, one batch per bisection step
    fn refine_rays(&self, runner: &mut ModelRunner, rays: &mut [Ray], z0: f64, step: i32) -> Result<()> {
        let origin_fails = z0 < 0.0;
        for _ in 0..self.settings.maximum_iterations {
            let active: Vec<usize> = rays
                .iter()
                .enumerate()
                .filter(|(_, ray)| {
                    !ray.undefined
                        && ray.bracket.map_or(false, |b| b.r_high - b.r_low > self.settings.epsilon_u)
                })
                .map(|(i, _)| i)
                .collect();
            if active.is_empty() {
                break;
            }

            let mut samples: Vec<Sample> = active
                .iter()
                .filter_map(|&i| {
                    let bracket = rays[i].bracket?;
                    let r = 0.5 * (bracket.r_low + bracket.r_high);
                    Some(Sample::new(rays[i].direction.iter().map(|d| d * r).collect()).with_iteration(step))
                })
                .collect();
            runner.evaluate(&mut samples)?;

            for (&i, sample) in active.iter().zip(&samples) {
                let ray = &mut rays[i];
                let Some(bracket) = ray.bracket.as_mut() else { continue };
                if !sample.is_evaluated() {
                    ray.undefined = true;
                    continue;
                }
                let r = 0.5 * (bracket.r_low + bracket.r_high);
                if (sample.z < 0.0) == origin_fails {
                    bracket.r_low = r;
                    bracket.z_low = sample.z;
                } else {
                    bracket.r_high = r;
                    bracket.z_high = sample.z;
                }
            }
        }
        Ok(())
    }
}

impl ReliabilityAlgorithm for DirectionalSampling {
    fn validate(&self, report: &mut ValidationReport) {
        let s = &self.settings;
        let subject = "directional sampling";
        report.check(s.maximum_directions >= 1, subject, "maximum directions must be at least 1");
        report.check(
            s.minimum_directions <= s.maximum_directions,
            subject,
            "minimum directions must not exceed maximum directions",
        );
        report.check(s.variation_coefficient > 0.0, subject, "variation coefficient must be positive");
        report.check(s.step_size > 0.0, subject, "step size must be positive");
        report.check(s.maximum_length > s.step_size, subject, "maximum length must exceed the step size");
        report.check(s.epsilon_u > 0.0, subject, "epsilon u must be positive");
    }

    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let s = &self.settings;
        let mut random = RandomGenerator::from_settings(&s.random)?;
        let dimension = runner.dimension();
        let batch_size = (runner.run_settings().max_chunk_size / self.steps_per_ray()).max(1);

        let mut z0 = runner.z_at(&vec![0.0; dimension])?;
        if z0.is_nan() {
            warn!("directional sampling: undefined Z at the origin, origin treated as safe");
            z0 = 1.0;
        }
        let origin_fails = z0 < 0.0;

        let mut builder = DesignPointBuilder::new(s.design_point_method, dimension);
        let mut report = ConvergenceReport::default();
        let mut drawn = 0;
        let mut counted = 0;
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        let mut probability = 0.0;
        let mut variation = f64::INFINITY;
        let mut step = 0;

        let stop_reason = loop {
            if runner.is_cancelled() {
                break StopReason::Cancelled;
            }
            let batch = batch_size.min(s.maximum_directions - drawn);
            if batch == 0 {
                break StopReason::MaximumSamples;
            }

            let mut rays: Vec<Ray> = (0..batch)
                .map(|_| Ray { direction: random.next_direction(dimension), bracket: None, undefined: false })
                .collect();
            self.bracket_rays(runner, &mut rays, z0, step as i32)?;
            self.refine_rays(runner, &mut rays, z0, step as i32)?;
            drawn += batch;

            for ray in &rays {
                if ray.undefined {
                    report.excluded_samples += 1;
                    continue;
                }
                counted += 1;

                let contribution = match ray.bracket {
                    Some(bracket) => {
                        let r = bracket.root();
                        let beyond = chi_squared_exceedance(dimension, r);
                        let point: Vec<f64> = ray.direction.iter().map(|d| d * r).collect();
                        if origin_fails {
                            1.0 - beyond
                        } else {
                            builder.add_weighted(&point, beyond);
                            report.failed_samples += 1;
                            beyond
                        }
                    }
                    None if origin_fails => 1.0,
                    None => 0.0,
                };
                sum += contribution;
                sum_squares += contribution * contribution;
            }

            if counted > 0 {
                let n = counted as f64;
                probability = sum / n;
                let variance = ((sum_squares / n - probability * probability) / n).max(0.0);
                variation = if probability > 0.0 { variance.sqrt() / probability } else { f64::INFINITY };
            }
            step += 1;
            runner.report(step, StandardNormal::get_u_from_q(probability), variation);

            if drawn >= s.minimum_directions && variation <= s.variation_coefficient {
                break StopReason::Converged;
            }
        };

        report.total_iterations = drawn;
        if probability == 0.0 && stop_reason != StopReason::Cancelled {
            warn!("directional sampling found no failure within radius {}", s.maximum_length);
            report.finish(StopReason::NoFailingSamples, variation);
        } else {
            report.finish(stop_reason, variation);
        }

        Ok(sampling_design_point(runner, "Directional Sampling", probability, &builder, report))
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
    fn test_linear_two_dimensions() {
        let model = |x: &[f64]| 3.0 - (x[0] + x[1]) / 2.0_f64.sqrt();
        let mut runner = ModelRunner::from_fn(model, &standard_normals(2)).unwrap();
        let point = DirectionalSampling::default().run(&mut runner).unwrap();

        assert!(point.is_converged());
        assert!((point.beta - 3.0).abs() < 0.15, "beta {}", point.beta);
        assert!(point.alphas[0].alpha < 0.0 && point.alphas[1].alpha < 0.0);
    }

    #[test]
    fn test_sphere_is_exact() {
        // Failure outside a sphere: every direction contributes the same mass
        let radius = 3.0;
        let model = move |x: &[f64]| radius - x.iter().map(|v| v * v).sum::<f64>().sqrt();
        let mut runner = ModelRunner::from_fn(model, &standard_normals(3)).unwrap();
        let settings = DirectionalSamplingSettings { epsilon_u: 1e-6, ..Default::default() };
        let point = DirectionalSampling::new(settings).run(&mut runner).unwrap();

        let expected = chi_squared_exceedance(3, radius);
        assert!((point.probability_of_failure() - expected).abs() < 1e-4 * expected);
        assert!(point.is_converged());
        assert!(point.convergence_report.convergence < 1e-6);
    }

    #[test]
    fn test_failing_origin() {
        // Failure inside a sphere
        let model = |x: &[f64]| x.iter().map(|v| v * v).sum::<f64>().sqrt() - 1.0;
        let mut runner = ModelRunner::from_fn(model, &standard_normals(2)).unwrap();
        let point = DirectionalSampling::default().run(&mut runner).unwrap();

        let expected = 1.0 - (-0.5_f64).exp();
        assert!((point.probability_of_failure() - expected).abs() < 1e-3, "pf {}", point.probability_of_failure());
    }
}
