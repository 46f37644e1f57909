//! Combination of design points into a system design point

use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::correlation::{same_stochast, SelfCorrelation};
use super::hohenbichler::{combined_beta, CombineType};
use crate::model::{ConvergenceReport, DesignPoint, Stochast, StopReason};
use crate::reliability::ValidationReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineSettings {
    pub combine_type: CombineType,

    pub self_correlation: SelfCorrelation,

    /// Shift of one input coordinate in the finite difference alphas
    pub perturbation: f64,
}

impl Default for CombineSettings {
    fn default() -> Self {
        Self {
            combine_type: CombineType::And,
            self_correlation: SelfCorrelation::default(),
            perturbation: 0.01,
        }
    }
}

impl CombineSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        self.self_correlation.validate(report);
        report.check(self.perturbation > 0.0, "combination", "perturbation must be positive");
    }
}

/// One stochast of the union of both design points
struct Coordinate {
    stochast: Arc<Stochast>,
    alpha1: f64,
    alpha2: f64,
    correlation: f64,
}

/// Combines design points with the Hohenbichler method
#[derive(Debug, Clone, Default)]
pub struct DesignPointCombiner {
    settings: CombineSettings,
}

impl DesignPointCombiner {
    pub fn new(settings: CombineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CombineSettings {
        &self.settings
    }

    fn coordinates(&self, dp1: &DesignPoint, dp2: &DesignPoint) -> Vec<Coordinate> {
        let mut coordinates: Vec<Coordinate> = dp1
            .alphas
            .iter()
            .map(|a| Coordinate {
                stochast: Arc::clone(&a.stochast),
                alpha1: a.alpha,
                alpha2: 0.0,
                correlation: 0.0,
            })
            .collect();

        for b in &dp2.alphas {
            match coordinates.iter_mut().find(|c| same_stochast(&c.stochast, &b.stochast)) {
                Some(shared) => {
                    shared.alpha2 = b.alpha;
                    // Unvalidated settings are pulled into [0, 1], NaN counts as 0
                    let correlation = self.settings.self_correlation.of(&b.stochast);
                    shared.correlation = if correlation.is_nan() { 0.0 } else { correlation.clamp(0.0, 1.0) };
                }
                None => coordinates.push(Coordinate {
                    stochast: Arc::clone(&b.stochast),
                    alpha1: 0.0,
                    alpha2: b.alpha,
                    correlation: 0.0,
                }),
            }
        }
        coordinates
    }

    /// Correlation between the two failure events
    pub fn event_correlation(&self, dp1: &DesignPoint, dp2: &DesignPoint) -> f64 {
        self.coordinates(dp1, dp2)
            .iter()
            .map(|c| c.alpha1 * c.alpha2 * c.correlation)
            .sum::<f64>()
            .clamp(-1.0, 1.0)
    }

    /// Central difference of the combined beta for a shift of the two event betas
    fn derivative(&self, beta1: f64, beta2: f64, rho: f64, shift1: f64, shift2: f64) -> f64 {
        let delta = self.settings.perturbation;
        let combine = self.settings.combine_type;
        let up = combined_beta(beta1 + shift1 * delta, beta2 + shift2 * delta, rho, combine);
        let down = combined_beta(beta1 - shift1 * delta, beta2 - shift2 * delta, rho, combine);
        (up - down) / (2.0 * delta)
    }

    /// Combine two design points into the AND or OR system design point
    pub fn combine_two(&self, dp1: &DesignPoint, dp2: &DesignPoint) -> DesignPoint {
        let coordinates = self.coordinates(dp1, dp2);
        let rho = self.event_correlation(dp1, dp2);
        let beta = combined_beta(dp1.beta, dp2.beta, rho, self.settings.combine_type);
        debug!("combining beta {:.4} and {:.4} with rho {:.4}: {:.4}", dp1.beta, dp2.beta, rho, beta);

        let signed_norm = |a: f64, b: f64| {
            let norm = a.hypot(b);
            if a.abs() >= b.abs() {
                norm.copysign(a)
            } else {
                norm.copysign(b)
            }
        };

        let alphas: Vec<f64> = coordinates
            .iter()
            .map(|c| {
                // Part shared by both events, then the parts drawn per event
                let shared = c.correlation.sqrt();
                let own = (1.0 - c.correlation).sqrt();
                let correlated = self.derivative(dp1.beta, dp2.beta, rho, c.alpha1 * shared, c.alpha2 * shared);
                let independent1 = self.derivative(dp1.beta, dp2.beta, rho, c.alpha1 * own, 0.0);
                let independent2 = self.derivative(dp1.beta, dp2.beta, rho, 0.0, c.alpha2 * own);
                signed_norm(correlated, signed_norm(independent1, independent2))
            })
            .collect();

        let stochasts: Vec<Arc<Stochast>> = coordinates.into_iter().map(|c| c.stochast).collect();
        let identifier = match self.settings.combine_type {
            CombineType::And => format!("{} and {}", dp1.identifier, dp2.identifier),
            CombineType::Or => format!("{} or {}", dp1.identifier, dp2.identifier),
        };

        let mut point = DesignPoint::from_alphas(identifier, beta, &stochasts, &alphas, combined_report(dp1, dp2));
        point.contributing_design_points = vec![dp1.clone(), dp2.clone()];
        point
    }

    /// Combine a series (OR) or parallel (AND) system pairwise from left to right
    ///
    /// Returns `None` for an empty slice.
    pub fn combine_multiple(&self, points: &[DesignPoint]) -> Option<DesignPoint> {
        let (first, rest) = points.split_first()?;
        let mut combined = rest.iter().fold(first.clone(), |acc, next| self.combine_two(&acc, next));
        if points.len() > 1 {
            combined.contributing_design_points = points.to_vec();
        }
        info!(
            "combined {} design points ({:?}): beta = {:.4}",
            points.len(),
            self.settings.combine_type,
            combined.beta
        );
        Some(combined)
    }
}

/// The combination inherits the weakest convergence of its inputs
fn combined_report(dp1: &DesignPoint, dp2: &DesignPoint) -> ConvergenceReport {
    let (r1, r2) = (&dp1.convergence_report, &dp2.convergence_report);
    let mut report = ConvergenceReport {
        total_model_runs: r1.total_model_runs + r2.total_model_runs,
        ..Default::default()
    };
    let stop_reason = if !r1.is_converged {
        r1.stop_reason
    } else if !r2.is_converged {
        r2.stop_reason
    } else {
        StopReason::Converged
    };
    report.finish(stop_reason, r1.convergence.max(r2.convergence));
    report.is_valid = r1.is_valid && r2.is_valid;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::StandardNormal;
    use approx::assert_abs_diff_eq;

    fn converged() -> ConvergenceReport {
        let mut report = ConvergenceReport::default();
        report.finish(StopReason::Converged, 0.0);
        report
    }

    fn point(identifier: &str, beta: f64, stochasts: &[Arc<Stochast>], alphas: &[f64]) -> DesignPoint {
        DesignPoint::from_alphas(identifier, beta, stochasts, alphas, converged())
    }

    fn and_or() -> [DesignPointCombiner; 2] {
        [CombineType::And, CombineType::Or].map(|combine_type| {
            DesignPointCombiner::new(CombineSettings { combine_type, ..Default::default() })
        })
    }

    #[test]
    fn test_identical_points_are_idempotent() {
        let stochasts = vec![Arc::new(Stochast::standard_normal("a")), Arc::new(Stochast::standard_normal("b"))];
        let dp = point("dp", 3.0, &stochasts, &[-0.6, -0.8]);

        for combiner in and_or() {
            let combined = combiner.combine_two(&dp, &dp);
            assert_abs_diff_eq!(combiner.event_correlation(&dp, &dp), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(combined.beta, 3.0, epsilon = 1e-9);
            assert_abs_diff_eq!(combined.alphas[0].alpha, -0.6, epsilon = 1e-6);
            assert_abs_diff_eq!(combined.alphas[1].alpha, -0.8, epsilon = 1e-6);
            assert_eq!(combined.contributing_design_points.len(), 2);
        }
    }

    #[test]
    fn test_independent_stochasts() {
        let dp1 = point("first", 2.0, &[Arc::new(Stochast::standard_normal("u1"))], &[-1.0]);
        let dp2 = point("second", 2.0, &[Arc::new(Stochast::standard_normal("u2"))], &[-1.0]);
        let q = StandardNormal::get_q_from_u(2.0);
        let [and, or] = and_or();

        let parallel = and.combine_two(&dp1, &dp2);
        assert_eq!(parallel.alphas.len(), 2);
        assert_abs_diff_eq!(parallel.probability_of_failure(), q * q, epsilon = 1e-9);
        // Symmetric events share the sensitivity
        let expected = -std::f64::consts::FRAC_1_SQRT_2;
        assert_abs_diff_eq!(parallel.alphas[0].alpha, expected, epsilon = 1e-4);
        assert_abs_diff_eq!(parallel.alphas[1].alpha, expected, epsilon = 1e-4);

        let series = or.combine_two(&dp1, &dp2);
        assert_abs_diff_eq!(series.probability_of_failure(), 2.0 * q - q * q, epsilon = 1e-9);
        assert!(series.beta < 2.0 && parallel.beta > 2.0);
    }

    #[test]
    fn test_uncorrelated_shared_stochast() {
        // The same load in two independent years
        let load = vec![Arc::new(Stochast::standard_normal("load"))];
        let dp = point("year", 2.5, &load, &[-1.0]);
        let combiner = DesignPointCombiner::new(CombineSettings {
            combine_type: CombineType::Or,
            self_correlation: SelfCorrelation::uniform(0.0),
            ..Default::default()
        });

        assert_eq!(combiner.event_correlation(&dp, &dp), 0.0);
        let q = StandardNormal::get_q_from_u(2.5);
        let combined = combiner.combine_two(&dp, &dp);
        assert_abs_diff_eq!(combined.probability_of_failure(), 2.0 * q - q * q, epsilon = 1e-9);
        assert_abs_diff_eq!(combined.alphas[0].alpha, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_self_correlation_outside_unit_interval_is_clamped() {
        let stochasts = vec![Arc::new(Stochast::standard_normal("a")), Arc::new(Stochast::standard_normal("b"))];
        let dp1 = point("first", 2.0, &stochasts, &[-0.6, -0.8]);
        let dp2 = point("second", 2.5, &stochasts, &[-0.8, -0.6]);
        let combiner = |rho: f64| {
            DesignPointCombiner::new(CombineSettings {
                combine_type: CombineType::And,
                self_correlation: SelfCorrelation::uniform(rho),
                ..Default::default()
            })
        };

        let above = combiner(1.5).combine_two(&dp1, &dp2);
        let full = combiner(1.0).combine_two(&dp1, &dp2);
        assert!(above.beta.is_finite());
        assert_abs_diff_eq!(above.beta, full.beta, epsilon = 1e-12);
        for (a, b) in above.alphas.iter().zip(&full.alphas) {
            assert!(a.alpha.is_finite());
            assert_abs_diff_eq!(a.alpha, b.alpha, epsilon = 1e-12);
        }

        let below = combiner(-0.5).combine_two(&dp1, &dp2);
        let none = combiner(0.0).combine_two(&dp1, &dp2);
        assert_abs_diff_eq!(below.beta, none.beta, epsilon = 1e-12);
    }

    #[test]
    fn test_combine_multiple() {
        let stochasts = vec![Arc::new(Stochast::standard_normal("u"))];
        let points: Vec<DesignPoint> = (0..3).map(|i| point(&format!("dp{}", i), 2.0, &stochasts, &[-1.0])).collect();
        let [and, _] = and_or();

        let combined = and.combine_multiple(&points).unwrap();
        assert_abs_diff_eq!(combined.beta, 2.0, epsilon = 1e-9);
        assert_eq!(combined.contributing_design_points.len(), 3);
        assert!(and.combine_multiple(&[]).is_none());
    }

    #[test]
    fn test_unconverged_input_is_reported() {
        let stochasts = vec![Arc::new(Stochast::standard_normal("u"))];
        let mut weak = point("weak", 2.0, &stochasts, &[-1.0]);
        weak.convergence_report.finish(StopReason::MaximumIterations, 0.2);
        let good = point("good", 2.0, &stochasts, &[-1.0]);

        let combined = DesignPointCombiner::default().combine_two(&good, &weak);
        assert!(!combined.is_converged());
        assert_eq!(combined.convergence_report.stop_reason, StopReason::MaximumIterations);
    }
}
