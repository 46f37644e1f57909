//! Statistical primitives: the standard-normal transform, chi-squared
//! exceedance and the pluggable random sources used by the sampling methods

mod standard_normal;
mod chi_squared;
mod random;

pub use standard_normal::{StandardNormal, PQ, BETA_MAX, Q_MIN, U_MAX};
pub use chi_squared::chi_squared_exceedance;
pub use random::{
    GeneratorKind, RandomSettings, RandomSource, RandomGenerator, KnuthSubtractive,
    KNUTH_SEED_LIMIT,
};
