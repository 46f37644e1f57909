//! Standard-normal transform between probabilities, reliability indices and
//! return periods
//!
//! Conventions:
//! - `p` is the non-exceedance probability Φ(u)
//! - `q` is the exceedance probability 1 - Φ(u), i.e. the probability of failure
//!   belonging to a reliability index u
//!
//! The forward transform uses Hart's double precision rational approximation of
//! the normal tail. The inverse uses Acklam's rational approximation refined by
//! one Halley step against the forward transform. Both are evaluated on the
//! smaller tail so that values are symmetric about u = 0.

use serde::{Deserialize, Serialize};

/// Numerical ceiling of the reliability index
pub const BETA_MAX: f64 = 40.0;

/// Half-width of the U-space domain used by integration based methods
pub const U_MAX: f64 = 8.0;

/// Smallest exceedance probability passed to the inverse transform
pub const Q_MIN: f64 = 1e-300;

const SQRT_2PI: f64 = 2.506_628_274_631_000_5;
const FRAC_1_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Beyond this |u| the tail probability underflows in the forward transform
const TAIL_CUTOFF: f64 = 37.0;

/// Non-exceedance and exceedance probability pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PQ {
    pub p: f64,
    pub q: f64,
}

/// Standard-normal conversions
pub struct StandardNormal;

impl StandardNormal {
    /// Probability density φ(u)
    pub fn pdf(u: f64) -> f64 {
        FRAC_1_SQRT_2PI * (-0.5 * u * u).exp()
    }

    /// Non-exceedance probability Φ(u)
    pub fn get_p_from_u(u: f64) -> f64 {
        Self::get_pq_from_u(u).p
    }

    /// Exceedance probability 1 - Φ(u)
    pub fn get_q_from_u(u: f64) -> f64 {
        Self::get_pq_from_u(u).q
    }

    /// Both probabilities, each computed from the accurate tail
    pub fn get_pq_from_u(u: f64) -> PQ {
        if u.is_nan() {
            return PQ { p: f64::NAN, q: f64::NAN };
        }
        if u == 0.0 {
            return PQ { p: 0.5, q: 0.5 };
        }

        let tail = lower_tail(-u.abs());
        if u > 0.0 {
            PQ { p: 1.0 - tail, q: tail }
        } else {
            PQ { p: tail, q: 1.0 - tail }
        }
    }

    /// Reliability index belonging to an exceedance probability
    ///
    /// `q <= 0` maps to [`BETA_MAX`], `q >= 1` to `-BETA_MAX`.
    pub fn get_u_from_q(q: f64) -> f64 {
        if q.is_nan() {
            return f64::NAN;
        }
        if q <= 0.0 {
            return BETA_MAX;
        }
        if q >= 1.0 {
            return -BETA_MAX;
        }

        if q <= 0.5 {
            upper_quantile(q)
        } else {
            -upper_quantile(1.0 - q)
        }
    }

    /// Reliability index belonging to a non-exceedance probability
    pub fn get_u_from_p(p: f64) -> f64 {
        -Self::get_u_from_q(p)
    }

    /// Return period (in periods) belonging to a reliability index
    ///
    /// The exceedance frequency is -ln(Φ(u)); the return period is its inverse.
    pub fn get_t_from_u(u: f64) -> f64 {
        let q = Self::get_q_from_u(u);
        if q.is_nan() {
            return f64::NAN;
        }
        if q <= 0.0 {
            return f64::INFINITY;
        }

        let frequency = -(-q).ln_1p();
        1.0 / frequency
    }

    /// Reliability index belonging to a return period
    pub fn get_u_from_t(t: f64) -> f64 {
        if t.is_nan() {
            return f64::NAN;
        }
        if t <= 0.0 {
            return -BETA_MAX;
        }
        if t.is_infinite() {
            return BETA_MAX;
        }

        let frequency = 1.0 / t;
        let q = -(-frequency).exp_m1();
        Self::get_u_from_q(q)
    }
}

/// Φ(x) for x <= 0 (Hart, as published by West 2005)
fn lower_tail(x: f64) -> f64 {
    let xabs = x.abs();
    if xabs > TAIL_CUTOFF {
        return 0.0;
    }

    let e = (-0.5 * xabs * xabs).exp();
    if xabs < 7.071_067_811_865_47 {
        let mut b = 3.526_249_659_989_11e-2 * xabs + 0.700_383_064_443_688;
        b = b * xabs + 6.373_962_203_531_65;
        b = b * xabs + 33.912_866_078_383;
        b = b * xabs + 112.079_291_497_871;
        b = b * xabs + 221.213_596_169_931;
        b = b * xabs + 220.206_867_912_376;
        let numerator = e * b;

        let mut b = 8.838_834_764_831_84e-2 * xabs + 1.755_667_163_182_64;
        b = b * xabs + 16.064_177_579_207;
        b = b * xabs + 86.780_732_202_946_1;
        b = b * xabs + 296.564_248_779_674;
        b = b * xabs + 637.333_633_378_831;
        b = b * xabs + 793.826_512_519_948;
        b = b * xabs + 440.413_735_824_752;
        numerator / b
    } else {
        let mut b = xabs + 0.65;
        b = xabs + 4.0 / b;
        b = xabs + 3.0 / b;
        b = xabs + 2.0 / b;
        b = xabs + 1.0 / b;
        e / b / SQRT_2PI
    }
}

/// u >= 0 with 1 - Φ(u) = q, for q in (0, 0.5]
fn upper_quantile(q: f64) -> f64 {
    let q = q.max(Q_MIN);
    let mut x = acklam_lower(q);

    // one Halley step against the forward transform
    if x.abs() < TAIL_CUTOFF {
        let e = lower_tail(x) - q;
        let u = e * SQRT_2PI * (0.5 * x * x).exp();
        x -= u / (1.0 + 0.5 * x * u);
    }

    (-x).min(BETA_MAX)
}

/// Acklam's rational approximation of Φ⁻¹(p) for p in (0, 0.5]
fn acklam_lower(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p < P_LOW {
        let t = (-2.0 * p.ln()).sqrt();
        (((((C[0] * t + C[1]) * t + C[2]) * t + C[3]) * t + C[4]) * t + C[5])
            / ((((D[0] * t + D[1]) * t + D[2]) * t + D[3]) * t + 1.0)
    } else {
        let t = p - 0.5;
        let r = t * t;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * t
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pq_at_zero_is_exact() {
        let pq = StandardNormal::get_pq_from_u(0.0);
        assert_eq!(pq, PQ { p: 0.5, q: 0.5 });
    }

    #[test]
    fn test_u_from_q_limits() {
        assert_eq!(StandardNormal::get_u_from_q(0.0), BETA_MAX);
        assert_eq!(StandardNormal::get_u_from_q(1.0), -BETA_MAX);
        assert_eq!(StandardNormal::get_u_from_p(0.0), -BETA_MAX);
        assert_eq!(StandardNormal::get_u_from_p(1.0), BETA_MAX);
    }

    #[test]
    fn test_reference_values() {
        assert_relative_eq!(StandardNormal::get_q_from_u(3.0), 0.0013498980316300946, max_relative = 1e-9);
        assert_relative_eq!(StandardNormal::get_p_from_u(-2.0), 0.02275013194817921, max_relative = 1e-9);
        assert_relative_eq!(StandardNormal::get_q_from_u(8.0), 6.22096057427178e-16, max_relative = 1e-6);
        assert_relative_eq!(StandardNormal::get_u_from_q(0.025), 1.959963984540054, max_relative = 1e-9);
    }

    #[test]
    fn test_round_trip() {
        let mut u = -7.0;
        while u <= 7.0 {
            let q = StandardNormal::get_q_from_u(u);
            let back = StandardNormal::get_u_from_q(q);
            assert!((back - u).abs() < 1e-2, "u={} q={} back={}", u, q, back);
            u += 0.05;
        }
    }

    #[test]
    fn test_symmetry() {
        for &u in &[0.3, 1.7, 4.2, 9.5, 20.0] {
            let upper = StandardNormal::get_pq_from_u(u);
            let lower = StandardNormal::get_pq_from_u(-u);
            assert_eq!(upper.p, lower.q);
            assert_eq!(upper.q, lower.p);
        }
        for &q in &[1e-12, 1e-5, 0.01, 0.3] {
            assert_eq!(StandardNormal::get_u_from_q(q), -StandardNormal::get_u_from_p(q));
        }
    }

    #[test]
    fn test_tiny_probabilities() {
        let u = StandardNormal::get_u_from_q(1e-200);
        assert!(u > 30.0 && u < BETA_MAX, "u = {}", u);

        // floor keeps the inverse finite below the smallest normal double
        let u = StandardNormal::get_u_from_q(1e-320);
        assert!(u.is_finite() && u <= BETA_MAX);

        let q = StandardNormal::get_q_from_u(20.0);
        assert_relative_eq!(StandardNormal::get_u_from_q(q), 20.0, max_relative = 1e-6);
    }

    #[test]
    fn test_nan_propagates() {
        assert!(StandardNormal::get_q_from_u(f64::NAN).is_nan());
        assert!(StandardNormal::get_p_from_u(f64::NAN).is_nan());
        assert!(StandardNormal::get_u_from_q(f64::NAN).is_nan());
        assert!(StandardNormal::get_t_from_u(f64::NAN).is_nan());
        assert!(StandardNormal::get_u_from_t(f64::NAN).is_nan());
    }

    #[test]
    fn test_return_period_round_trip() {
        for &t in &[2.0, 10.0, 1250.0, 1e6] {
            let u = StandardNormal::get_u_from_t(t);
            assert_relative_eq!(StandardNormal::get_t_from_u(u), t, max_relative = 1e-6);
        }

        // large return periods behave like 1 / q
        let u = StandardNormal::get_u_from_t(1e4);
        assert_relative_eq!(StandardNormal::get_q_from_u(u), 1e-4, max_relative = 1e-3);
    }
}
