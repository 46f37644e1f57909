//! Per-run configuration of stochasts and model evaluation

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::stochast::Stochast;
use crate::reliability::ValidationReport;
use crate::statistics::U_MAX;

/// Run configuration of one stochast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StochastSettings {
    /// Stochast the settings apply to
    pub stochast: Arc<Stochast>,

    /// Lower bound in U-space
    pub min_value: f64,

    /// Upper bound in U-space
    pub max_value: f64,

    /// Start value in U-space (FORM start vector, importance sampling center,
    /// value used when the stochast is held fixed)
    pub start_value: f64,

    /// Whether the stochast may vary during the run
    pub is_varying: bool,

    /// Scale of the sampling density (importance sampling)
    pub variance_factor: f64,

    /// Number of grid intervals (numerical integration)
    pub intervals: usize,
}

impl StochastSettings {
    pub fn new(stochast: Arc<Stochast>) -> Self {
        let is_varying = stochast.is_varying();
        Self {
            stochast,
            min_value: -U_MAX,
            max_value: U_MAX,
            start_value: 0.0,
            is_varying,
            variance_factor: 1.0,
            intervals: 200,
        }
    }

    pub fn with_start_value(mut self, start_value: f64) -> Self {
        self.start_value = start_value;
        self
    }

    pub fn with_variance_factor(mut self, variance_factor: f64) -> Self {
        self.variance_factor = variance_factor;
        self
    }

    pub fn with_bounds(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn validate(&self, report: &mut ValidationReport) {
        let subject = self.stochast.name.as_str();
        report.check(self.min_value < self.max_value, subject, "minimum U value must be below the maximum U value");
        report.check(
            self.start_value.is_finite(),
            subject,
            "start value must be finite",
        );
        if self.is_varying {
            report.check(self.variance_factor > 0.0, subject, "variance factor must be positive");
            report.check(self.intervals >= 1, subject, "number of intervals must be at least 1");
        }
    }
}

/// Run configuration of all stochasts, in model input order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StochastSettingsSet {
    pub stochast_settings: Vec<StochastSettings>,
}

impl StochastSettingsSet {
    /// Default settings for each stochast
    pub fn from_stochasts(stochasts: &[Arc<Stochast>]) -> Self {
        Self {
            stochast_settings: stochasts.iter().cloned().map(StochastSettings::new).collect(),
        }
    }

    /// Number of stochasts (model inputs)
    pub fn len(&self) -> usize {
        self.stochast_settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stochast_settings.is_empty()
    }

    /// Indices of the stochasts that vary during the run
    pub fn varying_indices(&self) -> Vec<usize> {
        self.stochast_settings
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_varying)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn stochasts(&self) -> Vec<Arc<Stochast>> {
        self.stochast_settings.iter().map(|s| Arc::clone(&s.stochast)).collect()
    }

    /// Full start vector
    pub fn start_values(&self) -> Vec<f64> {
        self.stochast_settings.iter().map(|s| s.start_value).collect()
    }

    pub fn validate(&self, report: &mut ValidationReport) {
        report.check(!self.varying_indices().is_empty(), "stochasts", "at least one stochast must vary");
        for settings in &self.stochast_settings {
            settings.validate(report);
        }
    }
}

/// Settings of the model runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Worker threads used for model evaluation
    pub max_parallel_processes: usize,

    /// Samples handed to the model in one call
    pub max_chunk_size: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_parallel_processes: 1,
            max_chunk_size: 1000,
        }
    }
}

impl RunSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        report.check(self.max_parallel_processes >= 1, "run settings", "maximum parallel processes must be at least 1");
        report.check(self.max_chunk_size >= 1, "run settings", "maximum chunk size must be at least 1");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varying_indices_skip_deterministic() {
        let stochasts = vec![
            Arc::new(Stochast::standard_normal("a")),
            Arc::new(Stochast::deterministic("b", 2.0)),
            Arc::new(Stochast::normal("c", 1.0, 0.5)),
        ];
        let set = StochastSettingsSet::from_stochasts(&stochasts);
        assert_eq!(set.varying_indices(), vec![0, 2]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_inverted_bounds_are_invalid() {
        let settings = StochastSettings::new(Arc::new(Stochast::standard_normal("a"))).with_bounds(2.0, -2.0);
        let mut report = ValidationReport::default();
        settings.validate(&mut report);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_run_settings_defaults_deserialize() {
        let settings: RunSettings = serde_json::from_str(r#"{"max_parallel_processes": 4}"#).unwrap();
        assert_eq!(settings.max_parallel_processes, 4);
        assert_eq!(settings.max_chunk_size, 1000);
    }
}
