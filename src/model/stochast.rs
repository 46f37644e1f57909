//! Random input variables

use serde::{Deserialize, Serialize};

use crate::statistics::StandardNormal;

/// Distribution of a stochast, parameterized in physical (X) space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Distribution {
    /// Fixed value, never varied
    Deterministic { value: f64 },
    /// Normal with mean and standard deviation
    Normal { mean: f64, deviation: f64 },
    /// Log-normal, parameterized by the mean and deviation of X itself
    LogNormal { mean: f64, deviation: f64 },
    /// Uniform on [minimum, maximum]
    Uniform { minimum: f64, maximum: f64 },
    /// Gumbel (maxima) with location and scale
    Gumbel { location: f64, scale: f64 },
}

/// A random input variable
///
/// Stochasts are created once per configuration and shared read-only
/// (behind `Arc`) by settings, samples and design points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stochast {
    /// Name, used to match stochasts across design points
    pub name: String,

    /// Distribution of the variable
    pub distribution: Distribution,
}

impl Stochast {
    pub fn new(name: impl Into<String>, distribution: Distribution) -> Self {
        Self {
            name: name.into(),
            distribution,
        }
    }

    /// Stochast whose X value equals its U value
    pub fn standard_normal(name: impl Into<String>) -> Self {
        Self::new(name, Distribution::Normal { mean: 0.0, deviation: 1.0 })
    }

    pub fn normal(name: impl Into<String>, mean: f64, deviation: f64) -> Self {
        Self::new(name, Distribution::Normal { mean, deviation })
    }

    pub fn deterministic(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, Distribution::Deterministic { value })
    }

    /// Whether the variable has any spread at all
    pub fn is_varying(&self) -> bool {
        match self.distribution {
            Distribution::Deterministic { .. } => false,
            Distribution::Normal { deviation, .. } | Distribution::LogNormal { deviation, .. } => deviation > 0.0,
            Distribution::Uniform { minimum, maximum } => maximum > minimum,
            Distribution::Gumbel { scale, .. } => scale > 0.0,
        }
    }

    /// Physical value belonging to a U value
    pub fn x_from_u(&self, u: f64) -> f64 {
        match self.distribution {
            Distribution::Deterministic { value } => value,
            Distribution::Normal { mean, deviation } => mean + deviation * u,
            Distribution::LogNormal { mean, deviation } => {
                if mean <= 0.0 {
                    return f64::NAN;
                }
                let sigma2 = (1.0 + (deviation / mean).powi(2)).ln();
                let mu = mean.ln() - 0.5 * sigma2;
                (mu + sigma2.sqrt() * u).exp()
            }
            Distribution::Uniform { minimum, maximum } => {
                minimum + (maximum - minimum) * StandardNormal::get_p_from_u(u)
            }
            Distribution::Gumbel { location, scale } => {
                // -ln(p) computed from q to keep precision in the upper tail
                let q = StandardNormal::get_q_from_u(u);
                let minus_ln_p = -(-q).ln_1p();
                location - scale * minus_ln_p.ln()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normal_transform() {
        let stochast = Stochast::normal("load", 10.0, 2.0);
        assert_relative_eq!(stochast.x_from_u(1.5), 13.0);
        assert!(stochast.is_varying());
    }

    #[test]
    fn test_deterministic_is_not_varying() {
        let stochast = Stochast::deterministic("width", 4.0);
        assert!(!stochast.is_varying());
        assert_eq!(stochast.x_from_u(3.0), 4.0);
    }

    #[test]
    fn test_lognormal_median() {
        let stochast = Stochast::new("strength", Distribution::LogNormal { mean: 5.0, deviation: 1.0 });
        let sigma2 = (1.0 + 0.04_f64).ln();
        let median = (5.0_f64.ln() - 0.5 * sigma2).exp();
        assert_relative_eq!(stochast.x_from_u(0.0), median, max_relative = 1e-12);
        assert!(stochast.x_from_u(1.0) > stochast.x_from_u(0.0));
    }

    #[test]
    fn test_uniform_median() {
        let stochast = Stochast::new("angle", Distribution::Uniform { minimum: 2.0, maximum: 6.0 });
        assert_relative_eq!(stochast.x_from_u(0.0), 4.0);
    }

    #[test]
    fn test_gumbel_mode() {
        // F(location) = exp(-1)
        let stochast = Stochast::new("water level", Distribution::Gumbel { location: 3.0, scale: 0.5 });
        let u = StandardNormal::get_u_from_p((-1.0_f64).exp());
        assert_relative_eq!(stochast.x_from_u(u), 3.0, epsilon = 1e-9);
    }
}
