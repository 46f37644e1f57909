//! Joint failure probability of two correlated linear limit states

use serde::{Deserialize, Serialize};

use crate::statistics::{StandardNormal, U_MAX};

/// Grid density of the integration over the smaller event
const POINTS_PER_UNIT: f64 = 1000.0;

/// Correlations this close to +-1 use the closed forms
const RHO_TOLERANCE: f64 = 1e-10;

/// How two failure events form a system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CombineType {
    /// Parallel system, both events must occur
    #[default]
    And,
    /// Series system, either event suffices
    Or,
}

/// P(u_a > beta_a and u_b > beta_b) for standard normals with correlation `rho`
///
/// Integrates the conditional exceedance of `beta_a` over the tail beyond
/// `beta_b`, normalized by the integrated marginal of `beta_b` so the grid
/// error cancels. The window runs over [-(U_MAX + max(beta_b, 0)), -beta_b],
/// so it stays U_MAX wide for any positive `beta_b`, also beyond U_MAX.
pub fn joint_exceedance(beta_a: f64, beta_b: f64, rho: f64) -> f64 {
    let lower = -(U_MAX + beta_b.max(0.0));
    let upper = -beta_b;
    let steps = ((upper - lower) * POINTS_PER_UNIT).ceil().max(1.0) as usize;
    let h = (upper - lower) / steps as f64;
    let spread = (1.0 - rho * rho).sqrt();

    let mut conditional = 0.0;
    let mut marginal = 0.0;
    for k in 0..=steps {
        let w = lower + k as f64 * h;
        let factor = if k == 0 || k == steps { 0.5 } else { 1.0 };
        let density = StandardNormal::pdf(w);
        conditional += factor * density * StandardNormal::get_p_from_u((-beta_a - rho * w) / spread);
        marginal += factor * density;
    }

    if marginal <= 0.0 {
        return 0.0;
    }
    (conditional / marginal * StandardNormal::get_q_from_u(beta_b)).clamp(0.0, 1.0)
}

/// Reliability index of the AND or OR combination of two events with
/// reliability indices `beta1`, `beta2` and event correlation `rho`
pub fn combined_beta(beta1: f64, beta2: f64, rho: f64, combine_type: CombineType) -> f64 {
    // The integration runs over the smaller of the two events
    let (low, high) = if beta1 <= beta2 { (beta1, beta2) } else { (beta2, beta1) };
    let q_low = StandardNormal::get_q_from_u(low);
    let q_high = StandardNormal::get_q_from_u(high);

    let probability = if rho >= 1.0 - RHO_TOLERANCE {
        match combine_type {
            CombineType::And => q_high,
            CombineType::Or => q_low,
        }
    } else if rho <= -1.0 + RHO_TOLERANCE {
        match combine_type {
            CombineType::And => (q_low + q_high - 1.0).max(0.0),
            CombineType::Or => (q_low + q_high).min(1.0),
        }
    } else {
        let joint = joint_exceedance(low, high, rho);
        match combine_type {
            CombineType::And => joint,
            CombineType::Or => (q_low + q_high - joint).min(1.0),
        }
    };

    StandardNormal::get_u_from_q(probability)
}
