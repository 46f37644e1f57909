//! Data model of a reliability run: stochasts, samples, design points,
//! run settings and the model runner

mod stochast;
mod sample;
mod design_point;
mod settings;
mod progress;
mod runner;

pub use stochast::{Distribution, Stochast};
pub use sample::Sample;
pub use design_point::{ConvergenceReport, DesignPoint, StochastPointAlpha, StopReason};
pub(crate) use design_point::normalize_alphas;
pub use settings::{RunSettings, StochastSettings, StochastSettingsSet};
pub use progress::{CancellationToken, CollectProgress, LogProgress, ProgressSink, ReliabilityResult};
pub use runner::{LimitStateFunction, ModelInput, ModelRunner};
