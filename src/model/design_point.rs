//! Results of a reliability computation

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use super::progress::ReliabilityResult;
use super::stochast::Stochast;
use crate::statistics::StandardNormal;

/// Why an iterative method stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopReason {
    /// Run has not finished yet
    #[default]
    Running,
    /// Convergence criterion met
    Converged,
    /// Iteration (or loop) cap reached
    MaximumIterations,
    /// Sample cap reached
    MaximumSamples,
    /// Stop requested through the cancellation token
    Cancelled,
    /// No usable failing sample was found
    NoFailingSamples,
    /// Model result or gradient undefined at the current point
    UndefinedResult,
}

/// Convergence information of a run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConvergenceReport {
    /// Whether the convergence criterion was met
    pub is_converged: bool,

    /// Whether the caller may use the result
    /// (false when non-converged results are filtered)
    pub is_valid: bool,

    /// Why the run stopped
    pub stop_reason: StopReason,

    /// Achieved precision metric (|Δβ|, variation coefficient or bracket half-width)
    #[serde(deserialize_with = "nullable_f64")]
    pub convergence: f64,

    /// Iterations, loops, directions or levels completed
    pub total_iterations: usize,

    /// Number of limit-state evaluations
    pub total_model_runs: usize,

    /// Failing samples encountered
    pub failed_samples: usize,

    /// Samples whose limit state was undefined
    pub excluded_samples: usize,
}

impl ConvergenceReport {
    /// Close the report
    pub fn finish(&mut self, stop_reason: StopReason, convergence: f64) {
        self.stop_reason = stop_reason;
        self.is_converged = stop_reason == StopReason::Converged;
        self.is_valid = !matches!(stop_reason, StopReason::NoFailingSamples | StopReason::UndefinedResult);
        self.convergence = convergence;
    }

    /// Mark non-converged results as unusable
    pub fn filter_non_convergence(&mut self) {
        if !self.is_converged {
            self.is_valid = false;
        }
    }
}

/// One coordinate of a design point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StochastPointAlpha {
    /// Stochast the coordinate belongs to
    pub stochast: Arc<Stochast>,

    /// Normalized sensitivity (direction cosine)
    pub alpha: f64,

    /// U value, equal to -alpha * beta
    pub u: f64,

    /// Physical value belonging to `u`
    #[serde(deserialize_with = "nullable_f64")]
    pub x: f64,

    /// Squared alpha, the share of the variable in the total uncertainty
    pub influence_factor: f64,
}

/// Result of a reliability computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignPoint {
    /// Free text identification (method or combination)
    pub identifier: String,

    /// Reliability index
    pub beta: f64,

    /// One entry per stochast, alphas have unit Euclidean norm
    pub alphas: Vec<StochastPointAlpha>,

    /// Convergence of the run that produced the point
    pub convergence_report: ConvergenceReport,

    /// Progress reports emitted during the run
    pub reliability_results: Vec<ReliabilityResult>,

    /// Design points this point was derived from (combinations)
    pub contributing_design_points: Vec<DesignPoint>,
}

impl DesignPoint {
    /// Build a design point from a reliability index and raw alpha values
    ///
    /// The alphas are normalized to unit length; a zero vector falls back to
    /// the uniform direction 1/√n.
    pub fn from_alphas(
        identifier: impl Into<String>,
        beta: f64,
        stochasts: &[Arc<Stochast>],
        alphas: &[f64],
        convergence_report: ConvergenceReport,
    ) -> Self {
        let normalized = normalize_alphas(alphas);
        let alphas = stochasts
            .iter()
            .zip(normalized)
            .map(|(stochast, alpha)| {
                let u = -alpha * beta;
                StochastPointAlpha {
                    stochast: Arc::clone(stochast),
                    alpha,
                    u,
                    x: stochast.x_from_u(u),
                    influence_factor: alpha * alpha,
                }
            })
            .collect();

        Self {
            identifier: identifier.into(),
            beta,
            alphas,
            convergence_report,
            reliability_results: Vec::new(),
            contributing_design_points: Vec::new(),
        }
    }

    /// Build a design point located along a U-space direction
    ///
    /// The direction points from the origin toward the failure region, so the
    /// alphas are its negated unit vector.
    pub fn from_direction(
        identifier: impl Into<String>,
        beta: f64,
        stochasts: &[Arc<Stochast>],
        direction: &[f64],
        convergence_report: ConvergenceReport,
    ) -> Self {
        let alphas: Vec<f64> = direction.iter().map(|u| -u).collect();
        Self::from_alphas(identifier, beta, stochasts, &alphas, convergence_report)
    }

    /// Probability of failure belonging to beta
    pub fn probability_of_failure(&self) -> f64 {
        StandardNormal::get_q_from_u(self.beta)
    }

    /// Return period belonging to beta
    pub fn return_period(&self) -> f64 {
        StandardNormal::get_t_from_u(self.beta)
    }

    pub fn alpha_values(&self) -> Vec<f64> {
        self.alphas.iter().map(|a| a.alpha).collect()
    }

    pub fn u_values(&self) -> Vec<f64> {
        self.alphas.iter().map(|a| a.u).collect()
    }

    /// Euclidean norm of the alpha vector
    pub fn alpha_norm(&self) -> f64 {
        self.alphas.iter().map(|a| a.alpha * a.alpha).sum::<f64>().sqrt()
    }

    /// Alpha of the stochast with the given name
    pub fn alpha_of(&self, name: &str) -> Option<&StochastPointAlpha> {
        self.alphas.iter().find(|a| a.stochast.name == name)
    }

    pub fn is_converged(&self) -> bool {
        self.convergence_report.is_converged
    }
}

/// serde_json writes NaN and infinity as null; read null back as NaN
pub(crate) fn nullable_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Normalize to unit length, falling back to 1/√n for a zero vector
pub(crate) fn normalize_alphas(alphas: &[f64]) -> Vec<f64> {
    let norm = alphas.iter().map(|a| a * a).sum::<f64>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        alphas.iter().map(|a| a / norm).collect()
    } else if alphas.is_empty() {
        Vec::new()
    } else {
        let uniform = 1.0 / (alphas.len() as f64).sqrt();
        vec![uniform; alphas.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn stochasts(n: usize) -> Vec<Arc<Stochast>> {
        (0..n).map(|i| Arc::new(Stochast::standard_normal(format!("u{}", i + 1)))).collect()
    }

    #[test]
    fn test_identity_u_equals_minus_alpha_beta() {
        let point = DesignPoint::from_alphas("test", 3.0, &stochasts(3), &[1.0, -2.0, 2.0], ConvergenceReport::default());

        assert_abs_diff_eq!(point.alpha_norm(), 1.0, epsilon = 1e-12);
        for alpha in &point.alphas {
            assert_abs_diff_eq!(alpha.u, -alpha.alpha * point.beta, epsilon = 1e-12);
            assert_abs_diff_eq!(alpha.x, alpha.u, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(point.alphas[1].alpha, -2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_direction_points_to_failure() {
        let point = DesignPoint::from_direction("test", 2.0, &stochasts(2), &[0.0, 5.0], ConvergenceReport::default());
        assert_abs_diff_eq!(point.alphas[1].alpha, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(point.alphas[1].u, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_alphas_fall_back_to_uniform() {
        let point = DesignPoint::from_alphas("test", 1.0, &stochasts(4), &[0.0; 4], ConvergenceReport::default());
        for alpha in &point.alphas {
            assert_abs_diff_eq!(alpha.alpha, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_probability_of_failure() {
        let point = DesignPoint::from_alphas("test", 0.0, &stochasts(1), &[1.0], ConvergenceReport::default());
        assert_eq!(point.probability_of_failure(), 0.5);
    }

    #[test]
    fn test_unbounded_convergence_survives_json() {
        let mut report = ConvergenceReport::default();
        report.finish(StopReason::NoFailingSamples, f64::INFINITY);
        let point = DesignPoint::from_alphas("test", 40.0, &stochasts(1), &[-1.0], report);

        let json = serde_json::to_string(&point).unwrap();
        let back: DesignPoint = serde_json::from_str(&json).unwrap();
        assert!(back.convergence_report.convergence.is_nan());
        assert_eq!(back.beta, 40.0);
        assert_eq!(back.convergence_report.stop_reason, StopReason::NoFailingSamples);
    }

    #[test]
    fn test_report_finish() {
        let mut report = ConvergenceReport::default();
        report.finish(StopReason::MaximumIterations, 0.2);
        assert!(!report.is_converged);
        assert!(report.is_valid);

        report.filter_non_convergence();
        assert!(!report.is_valid);

        let mut report = ConvergenceReport::default();
        report.finish(StopReason::Converged, 0.001);
        report.filter_non_convergence();
        assert!(report.is_converged && report.is_valid);
    }
}
