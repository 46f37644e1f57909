//! Reliability Engine - Probability of failure and design points of limit-state functions
//!
//! This library provides:
//! - Standard-normal transforms and pluggable random sources
//! - Stochasts, model evaluation in parallel batches and design points
//! - FORM, Crude Monte Carlo, Directional Sampling, (Adaptive) Importance Sampling,
//!   Subset Simulation, Numerical Bisection and Numerical Integration
//! - Weighted K-Means++ clustering of failing samples
//! - Hohenbichler combination of design points into system design points

pub mod statistics;
pub mod model;
pub mod clustering;
pub mod reliability;
pub mod combine;
pub mod project;
pub mod error;

// Re-export commonly used types
pub use model::{DesignPoint, Distribution, LimitStateFunction, ModelRunner, Stochast};
pub use reliability::{ReliabilityAlgorithm, ReliabilityMethod};
pub use combine::{CombineType, DesignPointCombiner};
pub use project::Project;
pub use error::{ReliabilityError, Result};
