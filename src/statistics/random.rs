//! Random sources for the sampling methods
//!
//! Every run owns its generator: it is built from [`RandomSettings`] when the
//! run starts and dropped when the run returns. Nothing is shared between runs.

use rand::rngs::{SmallRng, StdRng};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::standard_normal::StandardNormal;
use crate::error::GeneratorError;

/// Exclusive upper bound of the Knuth subtractive seed
pub const KNUTH_SEED_LIMIT: i64 = 1_000_000_000;

/// Generator algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeneratorKind {
    /// Knuth's subtractive generator (seed in [0, 1e9))
    #[default]
    KnuthSubtractive,
    /// Xoshiro256++ via `rand::rngs::SmallRng`
    Xoshiro,
    /// ChaCha12 via `rand::rngs::StdRng`
    ChaCha,
}

/// Random generator configuration of a sampling method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSettings {
    /// Generator algorithm
    pub generator: GeneratorKind,

    /// Whether the same seed reproduces the same run
    pub is_repeatable_random: bool,

    /// Seed used when the run is repeatable
    pub seed: i64,
}

impl Default for RandomSettings {
    fn default() -> Self {
        Self {
            generator: GeneratorKind::KnuthSubtractive,
            is_repeatable_random: true,
            seed: 0,
        }
    }
}

/// Uniform random source
pub trait RandomSource {
    /// (Re)initialize the source; fails when the seed is not valid for the algorithm
    fn initialize(&mut self, repeatable: bool, seed: i64) -> Result<(), GeneratorError>;

    /// Next value in [0, 1)
    fn next(&mut self) -> f64;

    /// Standard-normal draw by inversion
    fn next_standard_normal(&mut self) -> f64 {
        StandardNormal::get_u_from_p(self.next())
    }

    /// Vector of independent standard-normal draws
    fn next_standard_normals(&mut self, dimension: usize) -> Vec<f64> {
        (0..dimension).map(|_| self.next_standard_normal()).collect()
    }

    /// Uniformly distributed unit direction, empty for dimension 0
    fn next_direction(&mut self, dimension: usize) -> Vec<f64> {
        if dimension == 0 {
            return Vec::new();
        }
        loop {
            let mut direction = self.next_standard_normals(dimension);
            let norm = direction.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 && norm.is_finite() {
                direction.iter_mut().for_each(|v| *v /= norm);
                return direction;
            }
        }
    }
}

/// Knuth's subtractive generator (Numerical Recipes `ran3`)
#[derive(Debug, Clone)]
pub struct KnuthSubtractive {
    state: [i64; 56],
    inext: usize,
    inextp: usize,
}

impl KnuthSubtractive {
    const MSEED: i64 = 161_803_398;

    pub fn new(seed: i64) -> Result<Self, GeneratorError> {
        let mut generator = Self {
            state: [0; 56],
            inext: 0,
            inextp: 31,
        };
        generator.seed(seed)?;
        Ok(generator)
    }

    fn seed(&mut self, seed: i64) -> Result<(), GeneratorError> {
        if !(0..KNUTH_SEED_LIMIT).contains(&seed) {
            return Err(GeneratorError::SeedOutOfRange {
                generator: GeneratorKind::KnuthSubtractive,
                seed,
                min: 0,
                max: KNUTH_SEED_LIMIT,
            });
        }

        let state = &mut self.state;
        let mut mj = (Self::MSEED - seed).abs() % KNUTH_SEED_LIMIT;
        state[55] = mj;
        let mut mk = 1;
        for i in 1..=54 {
            let ii = (21 * i) % 55;
            state[ii] = mk;
            mk = mj - mk;
            if mk < 0 {
                mk += KNUTH_SEED_LIMIT;
            }
            mj = state[ii];
        }
        for _ in 0..4 {
            for i in 1..=55 {
                state[i] -= state[1 + (i + 30) % 55];
                if state[i] < 0 {
                    state[i] += KNUTH_SEED_LIMIT;
                }
            }
        }

        self.inext = 0;
        self.inextp = 31;
        Ok(())
    }
}

impl RandomSource for KnuthSubtractive {
    fn initialize(&mut self, repeatable: bool, seed: i64) -> Result<(), GeneratorError> {
        if repeatable {
            self.seed(seed)
        } else {
            self.seed(rand::rng().random_range(0..KNUTH_SEED_LIMIT))
        }
    }

    fn next(&mut self) -> f64 {
        self.inext = if self.inext == 55 { 1 } else { self.inext + 1 };
        self.inextp = if self.inextp == 55 { 1 } else { self.inextp + 1 };

        let mut value = self.state[self.inext] - self.state[self.inextp];
        if value < 0 {
            value += KNUTH_SEED_LIMIT;
        }
        self.state[self.inext] = value;

        value as f64 / KNUTH_SEED_LIMIT as f64
    }
}

/// Run-owned generator of any supported kind
#[derive(Debug, Clone)]
pub enum RandomGenerator {
    Knuth(KnuthSubtractive),
    Xoshiro(SmallRng),
    ChaCha(StdRng),
}

impl RandomGenerator {
    /// Build and initialize a generator from settings
    pub fn from_settings(settings: &RandomSettings) -> Result<Self, GeneratorError> {
        let mut generator = match settings.generator {
            GeneratorKind::KnuthSubtractive => Self::Knuth(KnuthSubtractive::new(0)?),
            GeneratorKind::Xoshiro => Self::Xoshiro(SmallRng::seed_from_u64(0)),
            GeneratorKind::ChaCha => Self::ChaCha(StdRng::seed_from_u64(0)),
        };
        generator.initialize(settings.is_repeatable_random, settings.seed)?;
        Ok(generator)
    }

    /// Repeatable generator with the default algorithm
    pub fn seeded(seed: i64) -> Result<Self, GeneratorError> {
        Self::from_settings(&RandomSettings {
            seed,
            ..Default::default()
        })
    }

    pub fn kind(&self) -> GeneratorKind {
        match self {
            Self::Knuth(_) => GeneratorKind::KnuthSubtractive,
            Self::Xoshiro(_) => GeneratorKind::Xoshiro,
            Self::ChaCha(_) => GeneratorKind::ChaCha,
        }
    }
}

impl RandomSource for RandomGenerator {
    fn initialize(&mut self, repeatable: bool, seed: i64) -> Result<(), GeneratorError> {
        let generator = self.kind();
        if let Self::Knuth(knuth) = self {
            return knuth.initialize(repeatable, seed);
        }

        if seed < 0 {
            return Err(GeneratorError::SeedOutOfRange {
                generator,
                seed,
                min: 0,
                max: i64::MAX,
            });
        }

        match self {
            Self::Xoshiro(rng) => {
                *rng = if repeatable {
                    SmallRng::seed_from_u64(seed as u64)
                } else {
                    SmallRng::from_os_rng()
                };
            }
            Self::ChaCha(rng) => {
                *rng = if repeatable {
                    StdRng::seed_from_u64(seed as u64)
                } else {
                    StdRng::from_os_rng()
                };
            }
            Self::Knuth(_) => {}
        }
        Ok(())
    }

    fn next(&mut self) -> f64 {
        match self {
            Self::Knuth(knuth) => knuth.next(),
            Self::Xoshiro(rng) => rng.random::<f64>(),
            Self::ChaCha(rng) => rng.random::<f64>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kinds() -> [GeneratorKind; 3] {
        [GeneratorKind::KnuthSubtractive, GeneratorKind::Xoshiro, GeneratorKind::ChaCha]
    }

    #[test]
    fn test_values_in_unit_interval() {
        for kind in all_kinds() {
            let settings = RandomSettings { generator: kind, is_repeatable_random: true, seed: 17 };
            let mut generator = RandomGenerator::from_settings(&settings).unwrap();
            for _ in 0..10_000 {
                let value = generator.next();
                assert!((0.0..1.0).contains(&value), "{:?} produced {}", kind, value);
            }
        }
    }

    #[test]
    fn test_repeatable_sequences() {
        for kind in all_kinds() {
            let settings = RandomSettings { generator: kind, is_repeatable_random: true, seed: 1234 };
            let mut first = RandomGenerator::from_settings(&settings).unwrap();
            let mut second = RandomGenerator::from_settings(&settings).unwrap();
            let a: Vec<f64> = (0..100).map(|_| first.next()).collect();
            let b: Vec<f64> = (0..100).map(|_| second.next()).collect();
            assert_eq!(a, b, "{:?} must reproduce its sequence", kind);
        }
    }

    #[test]
    fn test_reinitialize_restarts_sequence() {
        let mut generator = RandomGenerator::seeded(99).unwrap();
        let a: Vec<f64> = (0..20).map(|_| generator.next()).collect();
        generator.initialize(true, 99).unwrap();
        let b: Vec<f64> = (0..20).map(|_| generator.next()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_seed_out_of_range() {
        assert!(matches!(
            KnuthSubtractive::new(KNUTH_SEED_LIMIT),
            Err(GeneratorError::SeedOutOfRange { .. })
        ));
        assert!(KnuthSubtractive::new(-1).is_err());

        let settings = RandomSettings { generator: GeneratorKind::ChaCha, is_repeatable_random: true, seed: -5 };
        assert!(RandomGenerator::from_settings(&settings).is_err());
    }

    #[test]
    fn test_moments() {
        let mut generator = RandomGenerator::seeded(2024).unwrap();
        let n = 50_000;
        let uniforms: Vec<f64> = (0..n).map(|_| generator.next()).collect();
        let mean = uniforms.iter().sum::<f64>() / n as f64;
        assert!((mean - 0.5).abs() < 0.01, "uniform mean {}", mean);

        let normals = generator.next_standard_normals(n);
        let mean = normals.iter().sum::<f64>() / n as f64;
        let variance = normals.iter().map(|u| (u - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.02, "normal mean {}", mean);
        assert!((variance - 1.0).abs() < 0.03, "normal variance {}", variance);
    }

    #[test]
    fn test_direction_is_unit_length() {
        let mut generator = RandomGenerator::seeded(3).unwrap();
        for dimension in 1..6 {
            let direction = generator.next_direction(dimension);
            let norm: f64 = direction.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_direction_without_dimensions_is_empty() {
        let mut generator = RandomGenerator::seeded(3).unwrap();
        assert!(generator.next_direction(0).is_empty());
    }
}
