//! Reliability methods
//!
//! Every method estimates the probability of failure of a limit-state
//! function over the configured stochasts and returns a [`DesignPoint`]:
//! - **FORM**: gradient search for the most likely failure point
//! - **Crude Monte Carlo**: frequency of failing samples
//! - **Directional Sampling**: exact radial failure probability per random direction
//! - **Importance Sampling**: shifted and scaled sampling density with re-weighting
//! - **Adaptive Importance Sampling**: importance sampling around K-Means++ clusters of failing samples
//! - **Subset Simulation**: product of conditional probabilities over nested failure levels
//! - **Numerical Bisection**: adaptive cell refinement of U-space
//! - **Numerical Integration**: fixed grid quadrature of U-space
//!
//! # Example
//!
//! ```rust,ignore
//! use reliability_engine::model::{ModelRunner, Stochast};
//! use reliability_engine::reliability::{FormSettings, ReliabilityMethod};
//!
//! let stochasts = vec![Arc::new(Stochast::normal("R", 10.0, 1.5)), Arc::new(Stochast::normal("S", 5.0, 2.0))];
//! let mut runner = ModelRunner::from_fn(|x: &[f64]| x[0] - x[1], &stochasts)?;
//! let point = ReliabilityMethod::Form(FormSettings::default()).run(&mut runner)?;
//! println!("beta = {:.3}", point.beta);
//! ```

mod validation;
mod design_point_builder;
mod form;
mod crude_monte_carlo;
mod directional_sampling;
mod importance_sampling;
mod adaptive_importance_sampling;
mod subset_simulation;
mod numerical_bisection;
mod numerical_integration;

pub use validation::{Severity, ValidationMessage, ValidationReport};
pub use design_point_builder::{DesignPointBuilder, DesignPointMethod};
pub use form::{Form, FormSettings, GradientType, StartMethod};
pub use crude_monte_carlo::{CrudeMonteCarlo, CrudeMonteCarloSettings};
pub use directional_sampling::{DirectionalSampling, DirectionalSamplingSettings};
pub use importance_sampling::{ImportanceSampling, ImportanceSamplingSettings};
pub use adaptive_importance_sampling::{AdaptiveImportanceSampling, AdaptiveImportanceSamplingSettings};
pub use subset_simulation::{SubsetSimulation, SubsetSimulationSettings};
pub use numerical_bisection::{NumericalBisection, NumericalBisectionSettings};
pub use numerical_integration::{NumericalIntegration, NumericalIntegrationSettings};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ReliabilityError, Result};
use crate::model::{ConvergenceReport, DesignPoint, ModelRunner};
use crate::statistics::StandardNormal;

/// A reliability method
///
/// Implement this trait to add a method; [`ReliabilityMethod`] dispatches to
/// the built-in ones.
pub trait ReliabilityAlgorithm {
    /// Add findings about the method settings to the report
    fn validate(&self, report: &mut ValidationReport);

    /// Add findings that depend on the number of varying stochasts
    fn validate_dimension(&self, _dimension: usize, _report: &mut ValidationReport) {}

    /// Run the method; the settings are assumed to be valid
    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint>;
}

/// The built-in reliability methods with their settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "settings")]
pub enum ReliabilityMethod {
    Form(FormSettings),
    CrudeMonteCarlo(CrudeMonteCarloSettings),
    DirectionalSampling(DirectionalSamplingSettings),
    ImportanceSampling(ImportanceSamplingSettings),
    AdaptiveImportanceSampling(AdaptiveImportanceSamplingSettings),
    SubsetSimulation(SubsetSimulationSettings),
    NumericalBisection(NumericalBisectionSettings),
    NumericalIntegration(NumericalIntegrationSettings),
}

impl Default for ReliabilityMethod {
    fn default() -> Self {
        ReliabilityMethod::Form(FormSettings::default())
    }
}

impl ReliabilityMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ReliabilityMethod::Form(_) => "FORM",
            ReliabilityMethod::CrudeMonteCarlo(_) => "Crude Monte Carlo",
            ReliabilityMethod::DirectionalSampling(_) => "Directional Sampling",
            ReliabilityMethod::ImportanceSampling(_) => "Importance Sampling",
            ReliabilityMethod::AdaptiveImportanceSampling(_) => "Adaptive Importance Sampling",
            ReliabilityMethod::SubsetSimulation(_) => "Subset Simulation",
            ReliabilityMethod::NumericalBisection(_) => "Numerical Bisection",
            ReliabilityMethod::NumericalIntegration(_) => "Numerical Integration",
        }
    }

    fn algorithm(&self) -> Box<dyn ReliabilityAlgorithm> {
        match self {
            ReliabilityMethod::Form(s) => Box::new(Form::new(s.clone())),
            ReliabilityMethod::CrudeMonteCarlo(s) => Box::new(CrudeMonteCarlo::new(s.clone())),
            ReliabilityMethod::DirectionalSampling(s) => Box::new(DirectionalSampling::new(s.clone())),
            ReliabilityMethod::ImportanceSampling(s) => Box::new(ImportanceSampling::new(s.clone())),
            ReliabilityMethod::AdaptiveImportanceSampling(s) => Box::new(AdaptiveImportanceSampling::new(s.clone())),
            ReliabilityMethod::SubsetSimulation(s) => Box::new(SubsetSimulation::new(s.clone())),
            ReliabilityMethod::NumericalBisection(s) => Box::new(NumericalBisection::new(s.clone())),
            ReliabilityMethod::NumericalIntegration(s) => Box::new(NumericalIntegration::new(s.clone())),
        }
    }

    /// Validate the method settings together with the runner configuration
    pub fn validate(&self, runner: &ModelRunner) -> ValidationReport {
        let mut report = ValidationReport::default();
        runner.stochast_settings().validate(&mut report);
        runner.run_settings().validate(&mut report);
        let algorithm = self.algorithm();
        algorithm.validate(&mut report);
        algorithm.validate_dimension(runner.dimension(), &mut report);
        report
    }

    /// Validate, then run the method
    pub fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let validation = self.validate(runner);
        if !validation.is_valid() {
            return Err(ReliabilityError::InvalidSettings(validation));
        }
        for message in &validation.messages {
            warn!("{}: {}", message.subject, message.text);
        }

        info!("{}: starting with {} varying stochasts", self.name(), runner.dimension());
        let point = self.algorithm().run(runner)?;

        let report = &point.convergence_report;
        info!(
            "{}: beta = {:.4}, pf = {:.4e}, {} model runs",
            self.name(),
            point.beta,
            point.probability_of_failure(),
            report.total_model_runs
        );
        if !report.is_converged {
            warn!("{}: not converged ({:?}, convergence {:.3e})", self.name(), report.stop_reason, report.convergence);
        }
        Ok(point)
    }
}

/// Design point of a sampling method: beta from the probability of failure,
/// direction from the accumulated failing samples
pub(crate) fn sampling_design_point(
    runner: &mut ModelRunner,
    identifier: &str,
    probability: f64,
    builder: &DesignPointBuilder,
    report: ConvergenceReport,
) -> DesignPoint {
    let beta = StandardNormal::get_u_from_q(probability);
    let direction = builder.point().unwrap_or_else(|| vec![0.0; runner.dimension()]);
    runner.design_point_from_direction(identifier, beta, &direction, report)
}
