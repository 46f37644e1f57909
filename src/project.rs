//! Project files
//!
//! A project bundles the stochasts, a polynomial limit state, the reliability
//! method and the run settings in one JSON document:
//!
//! ```json
//! {
//!   "stochasts": [
//!     { "name": "R", "distribution": { "type": "Normal", "mean": 10.0, "deviation": 1.5 } },
//!     { "name": "S", "distribution": { "type": "Gumbel", "location": 4.0, "scale": 1.0 }, "start_value": 2.0 }
//!   ],
//!   "limit_state": { "constant": 0.0, "linear": [1.0, -1.0] },
//!   "method": { "method": "Form", "settings": { "maximum_iterations": 100 } },
//!   "run_settings": { "max_parallel_processes": 4 }
//! }
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ProjectError, ReliabilityError, Result};
use crate::model::{
    DesignPoint, LimitStateFunction, ModelInput, ModelRunner, RunSettings, Stochast, StochastSettings,
    StochastSettingsSet,
};
use crate::reliability::{ReliabilityMethod, ValidationReport};

/// Z = constant + Σ linear_i·x_i + Σ quadratic_i·x_i²
///
/// Missing coefficients count as zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolynomialLimitState {
    pub constant: f64,

    #[serde(default)]
    pub linear: Vec<f64>,

    #[serde(default)]
    pub quadratic: Vec<f64>,
}

impl PolynomialLimitState {
    pub fn z(&self, x: &[f64]) -> f64 {
        let linear: f64 = self.linear.iter().zip(x).map(|(a, x)| a * x).sum();
        let quadratic: f64 = self.quadratic.iter().zip(x).map(|(b, x)| b * x * x).sum();
        self.constant + linear + quadratic
    }
}

impl LimitStateFunction for PolynomialLimitState {
    fn evaluate(&self, input: &ModelInput) -> std::result::Result<f64, ModelError> {
        if self.linear.len() > input.values.len() || self.quadratic.len() > input.values.len() {
            return Err(ModelError::Failed {
                message: format!("polynomial has more coefficients than the {} inputs", input.values.len()),
            });
        }
        Ok(self.z(&input.values))
    }
}

/// A stochast with its optional run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStochast {
    #[serde(flatten)]
    pub stochast: Stochast,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_factor: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervals: Option<usize>,
}

impl ProjectStochast {
    fn settings(&self) -> StochastSettings {
        let mut settings = StochastSettings::new(Arc::new(self.stochast.clone()));
        if let Some(start_value) = self.start_value {
            settings.start_value = start_value;
        }
        if let Some(variance_factor) = self.variance_factor {
            settings.variance_factor = variance_factor;
        }
        if let Some(intervals) = self.intervals {
            settings.intervals = intervals;
        }
        settings
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub stochasts: Vec<ProjectStochast>,

    pub limit_state: PolynomialLimitState,

    #[serde(default)]
    pub method: ReliabilityMethod,

    #[serde(default)]
    pub run_settings: RunSettings,
}

impl Project {
    pub fn from_json(json: &str) -> std::result::Result<Self, ProjectError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ProjectError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn stochast_settings(&self) -> StochastSettingsSet {
        StochastSettingsSet {
            stochast_settings: self.stochasts.iter().map(ProjectStochast::settings).collect(),
        }
    }

    /// Consistency of the limit state with the stochasts
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let n = self.stochasts.len();
        report.check(n >= 1, "project", "at least one stochast is required");
        report.check(
            self.limit_state.linear.len() <= n,
            "limit state",
            "more linear coefficients than stochasts",
        );
        report.check(
            self.limit_state.quadratic.len() <= n,
            "limit state",
            "more quadratic coefficients than stochasts",
        );
        report
    }

    pub fn runner(&self) -> Result<ModelRunner> {
        let report = self.validate();
        if !report.is_valid() {
            return Err(ReliabilityError::InvalidSettings(report));
        }
        ModelRunner::new(
            Arc::new(self.limit_state.clone()),
            self.stochast_settings(),
            self.run_settings.clone(),
        )
    }

    /// Run the configured method on the project
    pub fn run(&self) -> Result<DesignPoint> {
        let mut runner = self.runner()?;
        self.method.run(&mut runner)
    }
}
