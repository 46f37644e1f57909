//! Exceedance probability of the chi-squared distribution
//!
//! In n-dimensional U-space the squared distance to the origin is chi-squared
//! distributed with n degrees of freedom, so P(|U| > r) = P(χ²_n > r²).

use super::standard_normal::StandardNormal;

/// P(χ²_n > r²), the probability mass of U-space beyond radius `r`
///
/// Uses the closed forms for integer degrees of freedom:
/// - even n: e^(-x) Σ_{k < n/2} x^k / k!, with x = r²/2
/// - odd n: 2(1 - Φ(r)) + 2φ(r) Σ_{k=1}^{(n-1)/2} r^(2k-1) / (1·3·…·(2k-1))
pub fn chi_squared_exceedance(dimension: usize, r: f64) -> f64 {
    if r.is_nan() {
        return f64::NAN;
    }
    if dimension == 0 || r <= 0.0 {
        return 1.0;
    }

    let probability = if dimension % 2 == 0 {
        let x = 0.5 * r * r;
        let mut term = 1.0;
        let mut sum = 1.0;
        for k in 1..dimension / 2 {
            term *= x / k as f64;
            sum += term;
        }
        (-x).exp() * sum
    } else {
        let mut probability = 2.0 * StandardNormal::get_q_from_u(r);
        let density = 2.0 * StandardNormal::pdf(r);
        let mut term = 1.0 / r;
        for k in 1..=(dimension - 1) / 2 {
            term *= r * r / (2 * k - 1) as f64;
            probability += density * term;
        }
        probability
    };

    probability.clamp(0.0, 1.0)
}
