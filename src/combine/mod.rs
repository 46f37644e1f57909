//! System combination of design points
//!
//! Two failure events with design points (β₁, α₁) and (β₂, α₂) are combined
//! into the design point of their parallel (AND) or series (OR) system:
//! - **Event correlation**: ρ = Σ α₁ᵢ α₂ᵢ ρᵢ over the stochasts in both points,
//!   with ρᵢ the [`SelfCorrelation`] of stochast i
//! - **Reliability index**: Hohenbichler's integration of the conditional
//!   probability of one event over the other
//! - **Alphas**: central differences of the combined index per stochast
//!
//! # Example
//!
//! ```rust,ignore
//! use reliability_engine::combine::{CombineSettings, CombineType, DesignPointCombiner};
//!
//! let combiner = DesignPointCombiner::new(CombineSettings { combine_type: CombineType::Or, ..Default::default() });
//! let system = combiner.combine_two(&overtopping, &piping);
//! println!("system beta = {:.3}", system.beta);
//! ```

mod hohenbichler;
mod correlation;
mod combiner;

pub use hohenbichler::{combined_beta, joint_exceedance, CombineType};
pub use correlation::SelfCorrelation;
pub use combiner::{CombineSettings, DesignPointCombiner};
