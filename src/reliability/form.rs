//! FORM (First Order Reliability Method)
//!
//! Hasofer-Lind / Rackwitz-Fiessler iteration: at the current point the limit
//! state is linearized with a finite-difference gradient and the point moves
//! to the root of the linearization closest to the origin,
//!
//! ```text
//! u(k+1) = ((∇z · u(k) - z) / |∇z|²) ∇z,     beta = (z - ∇z · u(k)) / |∇z|
//! ```
//!
//! The alpha vector is the normalized gradient, so the design point satisfies
//! u = -alpha · beta.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::validation::ValidationReport;
use super::ReliabilityAlgorithm;
use crate::error::Result;
use crate::model::{ConvergenceReport, DesignPoint, ModelRunner, Sample, StopReason};
use crate::statistics::U_MAX;

/// Start point of the iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartMethod {
    /// Origin of U-space
    #[default]
    Zero,
    /// Start values of the stochast settings
    GivenVector,
    /// First sign change of Z along the ray through the start values
    RaySearch,
}

/// Finite-difference scheme of the gradient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GradientType {
    #[default]
    OneSided,
    TwoSided,
}

/// Configuration of the FORM iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    pub start_method: StartMethod,

    pub gradient_type: GradientType,

    /// Finite-difference step in U-space
    pub step_size: f64,

    /// Damping applied to the step when beta oscillates (0 < f <= 1)
    pub relaxation_factor: f64,

    /// Iterations between oscillation checks
    pub relaxation_loops: usize,

    pub minimum_iterations: usize,

    pub maximum_iterations: usize,

    /// Factor by which the iteration cap is extended once when beta is
    /// still converging at the cap (1 disables the extension)
    pub maximum_iterations_growth_factor: f64,

    /// Convergence threshold on |Δbeta|
    pub epsilon_beta: f64,

    /// Convergence threshold on the U-space distance to the limit state, |z| / |∇z|
    pub epsilon_z: f64,

    /// Mark non-converged results as invalid
    pub filter_at_non_convergence: bool,

    /// Step along the ray for the ray search start
    pub ray_step: f64,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            start_method: StartMethod::Zero,
            gradient_type: GradientType::OneSided,
            step_size: 0.1,
            relaxation_factor: 0.75,
            relaxation_loops: 1,
            minimum_iterations: 1,
            maximum_iterations: 50,
            maximum_iterations_growth_factor: 1.0,
            epsilon_beta: 0.01,
            epsilon_z: 0.01,
            filter_at_non_convergence: false,
            ray_step: 0.5,
        }
    }
}

/// FORM solver
#[derive(Debug, Clone, Default)]
pub struct Form {
    settings: FormSettings,
}

impl Form {
    pub fn new(settings: FormSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FormSettings {
        &self.settings
    }

    /// Z and its finite-difference gradient at `u`, evaluated as one batch
    fn gradient(&self, runner: &mut ModelRunner, u: &[f64], iteration: i32) -> Result<(f64, Vec<f64>)> {
        let n = u.len();
        let h = self.settings.step_size;
        let two_sided = self.settings.gradient_type == GradientType::TwoSided;

        let mut samples = vec![Sample::new(u.to_vec()).with_iteration(iteration)];
        for i in 0..n {
            let mut forward = u.to_vec();
            forward[i] += h;
            samples.push(Sample::new(forward).with_iteration(iteration));
        }
        if two_sided {
            for i in 0..n {
                let mut backward = u.to_vec();
                backward[i] -= h;
                samples.push(Sample::new(backward).with_iteration(iteration));
            }
        }

        runner.evaluate(&mut samples)?;

        let z = samples[0].z;
        let gradient = (0..n)
            .map(|i| {
                if two_sided {
                    (samples[1 + i].z - samples[1 + n + i].z) / (2.0 * h)
                } else {
                    (samples[1 + i].z - z) / h
                }
            })
            .collect();

        Ok((z, gradient))
    }

    fn start_point(&self, runner: &mut ModelRunner) -> Result<Vec<f64>> {
        let n = runner.dimension();
        match self.settings.start_method {
            StartMethod::Zero => Ok(vec![0.0; n]),
            StartMethod::GivenVector => Ok(runner.start_vector()),
            StartMethod::RaySearch => {
                let start = runner.start_vector();
                let norm = start.iter().map(|u| u * u).sum::<f64>().sqrt();
                let direction: Vec<f64> = if norm > 0.0 {
                    start.iter().map(|u| u / norm).collect()
                } else {
                    vec![1.0 / (n as f64).sqrt(); n]
                };
                self.ray_search(runner, &direction)
            }
        }
    }

    /// Point of the first sign change of Z along a ray, origin when none is found
    fn ray_search(&self, runner: &mut ModelRunner, direction: &[f64]) -> Result<Vec<f64>> {
        let step = self.settings.ray_step;
        let steps = (U_MAX / step).ceil() as usize;
        let mut samples: Vec<Sample> = (0..=steps)
            .map(|k| Sample::new(direction.iter().map(|d| d * k as f64 * step).collect()).with_iteration(0))
            .collect();
        runner.evaluate(&mut samples)?;

        for pair in samples.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.is_evaluated() && b.is_evaluated() && (a.z < 0.0) != (b.z < 0.0) {
                let fraction = a.z / (a.z - b.z);
                let r = a.beta() + fraction * (b.beta() - a.beta());
                return Ok(direction.iter().map(|d| d * r).collect());
            }
        }

        warn!("FORM ray search found no sign change, starting at the origin");
        Ok(vec![0.0; direction.len()])
    }
}

impl ReliabilityAlgorithm for Form {
    fn validate(&self, report: &mut ValidationReport) {
        let s = &self.settings;
        report.check(s.step_size > 0.0, "FORM", "step size must be positive");
        report.check(
            s.relaxation_factor > 0.0 && s.relaxation_factor <= 1.0,
            "FORM",
            "relaxation factor must be in (0, 1]",
        );
        report.check(s.maximum_iterations >= 1, "FORM", "maximum iterations must be at least 1");
        report.check(
            s.minimum_iterations <= s.maximum_iterations,
            "FORM",
            "minimum iterations must not exceed maximum iterations",
        );
        report.check(
            s.maximum_iterations_growth_factor >= 1.0,
            "FORM",
            "iteration growth factor must be at least 1",
        );
        report.check(s.epsilon_beta > 0.0, "FORM", "epsilon beta must be positive");
        report.check(s.epsilon_z > 0.0, "FORM", "epsilon z must be positive");
        if s.start_method == StartMethod::RaySearch {
            report.check(s.ray_step > 0.0, "FORM", "ray step must be positive");
        }
    }

    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let s = &self.settings;
        let mut u = self.start_point(runner)?;

        let mut report = ConvergenceReport::default();
        let mut stop_reason = StopReason::MaximumIterations;
        let mut maximum_iterations = s.maximum_iterations;
        let mut extended = false;

        let mut beta = f64::NAN;
        let mut alphas: Vec<f64> = Vec::new();
        let mut delta = f64::INFINITY;
        let mut previous_delta = f64::INFINITY;
        let mut previous_beta: Option<f64> = None;
        let mut previous_direction = 0.0;
        let mut relaxation = 1.0;
        let mut iteration = 0;

        while iteration < maximum_iterations {
            if runner.is_cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }
            iteration += 1;

            let (z, gradient) = self.gradient(runner, &u, iteration as i32)?;
            let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
            if !z.is_finite() || !norm.is_finite() || norm == 0.0 {
                warn!("FORM: undefined Z or gradient in iteration {}", iteration);
                stop_reason = StopReason::UndefinedResult;
                break;
            }

            let dot: f64 = gradient.iter().zip(&u).map(|(g, v)| g * v).sum();
            let new_beta = (z - dot) / norm;
            let target: Vec<f64> = gradient.iter().map(|g| (dot - z) / (norm * norm) * g).collect();

            delta = previous_beta.map_or(f64::INFINITY, |b| (new_beta - b).abs());
            let distance = z.abs() / norm;
            beta = new_beta;
            alphas = gradient.iter().map(|g| g / norm).collect();

            runner.report(iteration, beta, delta);

            if iteration >= s.minimum_iterations && delta < s.epsilon_beta && distance < s.epsilon_z {
                stop_reason = StopReason::Converged;
                break;
            }

            // Oscillation: beta changes direction between checks
            if let Some(b) = previous_beta {
                let direction = (new_beta - b).signum();
                if s.relaxation_loops > 0
                    && iteration % s.relaxation_loops == 0
                    && direction * previous_direction < 0.0
                {
                    relaxation *= s.relaxation_factor;
                }
                previous_direction = direction;
            }

            for (v, t) in u.iter_mut().zip(&target) {
                *v += relaxation * (t - *v);
            }

            if iteration == maximum_iterations
                && !extended
                && s.maximum_iterations_growth_factor > 1.0
                && delta < previous_delta
            {
                maximum_iterations = (s.maximum_iterations as f64 * s.maximum_iterations_growth_factor).ceil() as usize;
                extended = true;
                info!("FORM still converging, iteration cap extended to {}", maximum_iterations);
            }

            previous_delta = delta;
            previous_beta = Some(beta);
        }

        if alphas.is_empty() {
            // No completed iteration: report the start point itself
            beta = u.iter().map(|v| v * v).sum::<f64>().sqrt();
            alphas = u.iter().map(|v| -v).collect();
        }

        report.total_iterations = iteration;
        report.finish(stop_reason, delta);
        if s.filter_at_non_convergence {
            report.filter_non_convergence();
        }

        Ok(runner.design_point_from_alphas("FORM", beta, &alphas, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Distribution, Stochast};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn standard_normals(n: usize) -> Vec<Arc<Stochast>> {
        (0..n).map(|i| Arc::new(Stochast::standard_normal(format!("u{}", i + 1)))).collect()
    }

    #[test]
    fn test_linear_converges_in_two_iterations() {
        let beta0 = 3.0;
        let mut runner = ModelRunner::from_fn(move |x: &[f64]| beta0 - x[0], &standard_normals(1)).unwrap();
        let point = Form::default().run(&mut runner).unwrap();

        assert!(point.is_converged());
        assert!(point.convergence_report.total_iterations <= 2);
        assert_abs_diff_eq!(point.beta, beta0, epsilon = 1e-9);
        assert_abs_diff_eq!(point.alphas[0].alpha.abs(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(point.alphas[0].u, -point.alphas[0].alpha * point.beta, epsilon = 1e-12);
        assert_eq!(point.reliability_results.len(), point.convergence_report.total_iterations);
    }

    #[test]
    fn test_resistance_has_positive_alpha() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| 2.5 + x[0], &standard_normals(1)).unwrap();
        let point = Form::default().run(&mut runner).unwrap();
        assert_abs_diff_eq!(point.beta, 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(point.alphas[0].alpha, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(point.alphas[0].u, -2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_linear_two_dimensions() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| 6.0 - 3.0 * x[0] - 4.0 * x[1], &standard_normals(2)).unwrap();
        let settings = FormSettings { gradient_type: GradientType::TwoSided, ..Default::default() };
        let point = Form::new(settings).run(&mut runner).unwrap();

        assert_abs_diff_eq!(point.beta, 1.2, epsilon = 1e-9);
        assert_abs_diff_eq!(point.alphas[0].alpha, -0.6, epsilon = 1e-9);
        assert_abs_diff_eq!(point.alphas[1].u, 0.96, epsilon = 1e-9);
    }

    #[test]
    fn test_resistance_minus_load() {
        let stochasts = vec![
            Arc::new(Stochast::normal("R", 10.0, 1.5)),
            Arc::new(Stochast::normal("S", 5.0, 2.0)),
        ];
        let mut runner = ModelRunner::from_fn(|x: &[f64]| x[0] - x[1], &stochasts).unwrap();
        let point = Form::default().run(&mut runner).unwrap();

        assert_abs_diff_eq!(point.beta, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(point.alpha_norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(point.alphas[0].alpha, 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(point.alphas[1].alpha, -0.8, epsilon = 1e-6);
        // Physical design point lies on the limit state
        assert_abs_diff_eq!(point.alphas[0].x, point.alphas[1].x, epsilon = 1e-6);
    }

    #[test]
    fn test_nonlinear_lognormal() {
        let (mean_r, dev_r, mean_s, dev_s) = (10.0_f64, 1.0_f64, 5.0_f64, 1.0_f64);
        let stochasts = vec![
            Arc::new(Stochast::new("R", Distribution::LogNormal { mean: mean_r, deviation: dev_r })),
            Arc::new(Stochast::new("S", Distribution::LogNormal { mean: mean_s, deviation: dev_s })),
        ];
        let mut runner = ModelRunner::from_fn(|x: &[f64]| x[0] - x[1], &stochasts).unwrap();
        let settings = FormSettings {
            gradient_type: GradientType::TwoSided,
            step_size: 0.01,
            relaxation_factor: 1.0,
            epsilon_beta: 1e-6,
            epsilon_z: 1e-6,
            ..Default::default()
        };
        let point = Form::new(settings).run(&mut runner).unwrap();

        // R = S is the same surface as ln R = ln S, which is linear in U
        let s2_r = (1.0 + (dev_r / mean_r).powi(2)).ln();
        let s2_s = (1.0 + (dev_s / mean_s).powi(2)).ln();
        let mu_r = mean_r.ln() - 0.5 * s2_r;
        let mu_s = mean_s.ln() - 0.5 * s2_s;
        let expected = (mu_r - mu_s) / (s2_r + s2_s).sqrt();

        assert!(point.is_converged());
        assert_abs_diff_eq!(point.beta, expected, epsilon = 1e-3);
    }

    #[test]
    fn test_relaxation_damps_oscillation() {
        // Undamped, the Newton-like steps on atan overshoot further every iteration
        let model = |x: &[f64]| (1.45 - x[0]).atan();

        let mut runner = ModelRunner::from_fn(model, &standard_normals(1)).unwrap();
        let undamped = FormSettings { relaxation_factor: 1.0, ..Default::default() };
        let point = Form::new(undamped).run(&mut runner).unwrap();
        assert!(!point.is_converged());

        let mut runner = ModelRunner::from_fn(model, &standard_normals(1)).unwrap();
        let point = Form::default().run(&mut runner).unwrap();
        assert!(point.is_converged());
        assert_abs_diff_eq!(point.beta, 1.45, epsilon = 1e-3);

        let betas: Vec<f64> = point.reliability_results.iter().map(|r| r.beta).collect();
        assert!(betas.windows(3).any(|w| (w[1] - w[0]) * (w[2] - w[1]) < 0.0), "betas {:?}", betas);
    }

    #[test]
    fn test_iteration_cap_grows_while_converging() {
        let model = |x: &[f64]| 3.0 - x[0] - 0.4 * x[1] * x[1];

        let mut runner = ModelRunner::from_fn(model, &standard_normals(2)).unwrap();
        let capped = FormSettings { maximum_iterations: 5, ..Default::default() };
        let point = Form::new(capped.clone()).run(&mut runner).unwrap();
        assert_eq!(point.convergence_report.stop_reason, StopReason::MaximumIterations);
        assert_eq!(point.convergence_report.total_iterations, 5);

        let mut runner = ModelRunner::from_fn(model, &standard_normals(2)).unwrap();
        let growing = FormSettings { maximum_iterations_growth_factor: 2.0, ..capped };
        let point = Form::new(growing).run(&mut runner).unwrap();
        assert!(point.is_converged());
        assert!(point.convergence_report.total_iterations > 5);
        assert!(point.convergence_report.total_iterations <= 10);
        // Closest point of u0 = 3 - 0.4 u1^2 lies at u1^2 = 4.375
        assert_abs_diff_eq!(point.beta, 5.9375_f64.sqrt(), epsilon = 0.01);
    }

    #[test]
    fn test_ray_search_start() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| 3.0 - x[0] - x[1], &standard_normals(2)).unwrap();
        let settings = FormSettings { start_method: StartMethod::RaySearch, ..Default::default() };
        let point = Form::new(settings).run(&mut runner).unwrap();
        assert_abs_diff_eq!(point.beta, 3.0 / 2.0_f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_undefined_result_is_reported() {
        let mut runner = ModelRunner::from_fn(|_: &[f64]| f64::NAN, &standard_normals(2)).unwrap();
        let point = Form::default().run(&mut runner).unwrap();
        assert!(!point.is_converged());
        assert_eq!(point.convergence_report.stop_reason, StopReason::UndefinedResult);
        assert!(!point.convergence_report.is_valid);
    }

    #[test]
    fn test_filter_at_non_convergence() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| 3.0 - x[0] - 0.3 * x[1] * x[1], &standard_normals(2)).unwrap();
        let settings = FormSettings {
            maximum_iterations: 1,
            filter_at_non_convergence: true,
            ..Default::default()
        };
        let point = Form::new(settings).run(&mut runner).unwrap();
        assert_eq!(point.convergence_report.stop_reason, StopReason::MaximumIterations);
        assert!(!point.convergence_report.is_valid);
    }
}
