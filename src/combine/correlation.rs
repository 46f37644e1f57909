//! Correlation of stochasts shared by two design points

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::Stochast;
use crate::reliability::ValidationReport;

/// Correlation between the realizations of one stochast in two failure events
///
/// A stochast that is the same physical quantity in both events has
/// correlation 1 (the default); a quantity that is drawn independently per
/// event, like a yearly maximum in different years, has correlation 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfCorrelation {
    /// Correlation of stochasts without an override
    pub default: f64,

    /// Per stochast name
    pub overrides: HashMap<String, f64>,
}

impl Default for SelfCorrelation {
    fn default() -> Self {
        Self {
            default: 1.0,
            overrides: HashMap::new(),
        }
    }
}

impl SelfCorrelation {
    pub fn uniform(default: f64) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, name: impl Into<String>, correlation: f64) -> Self {
        self.overrides.insert(name.into(), correlation);
        self
    }

    pub fn of(&self, stochast: &Stochast) -> f64 {
        self.overrides.get(&stochast.name).copied().unwrap_or(self.default)
    }

    pub fn validate(&self, report: &mut ValidationReport) {
        let in_range = |r: f64| (0.0..=1.0).contains(&r);
        report.check(in_range(self.default), "self correlation", "default correlation must lie in [0, 1]");
        for (name, &correlation) in &self.overrides {
            report.check(in_range(correlation), name, "self correlation must lie in [0, 1]");
        }
    }
}

/// Whether two design point coordinates refer to the same stochast
pub(crate) fn same_stochast(a: &Arc<Stochast>, b: &Arc<Stochast>) -> bool {
    Arc::ptr_eq(a, b) || a.name == b.name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_by_name() {
        let correlation = SelfCorrelation::default().with_override("wind", 0.3);
        assert_eq!(correlation.of(&Stochast::standard_normal("wind")), 0.3);
        assert_eq!(correlation.of(&Stochast::standard_normal("strength")), 1.0);
    }

    #[test]
    fn test_out_of_range_is_invalid() {
        let mut report = ValidationReport::default();
        SelfCorrelation::uniform(1.5).validate(&mut report);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_same_stochast_by_name() {
        let a = Arc::new(Stochast::standard_normal("u"));
        let b = Arc::new(Stochast::standard_normal("u"));
        assert!(same_stochast(&a, &b));
        assert!(!same_stochast(&a, &Arc::new(Stochast::standard_normal("v"))));
    }
}
