//! Clusters and clustering settings

use serde::{Deserialize, Serialize};

use crate::model::Sample;
use crate::reliability::ValidationReport;

/// Configuration of the K-Means++ clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Cluster count (fixed) or upper bound of the search (optimized)
    pub max_clusters: usize,

    /// Select the cluster count by silhouette coefficient
    pub optimize_number_of_clusters: bool,

    /// Lloyd iterations per trial
    pub max_iterations: usize,

    /// Independent seedings per cluster count, the lowest inertia wins
    pub number_of_trials: usize,

    /// Stop a trial after this many iterations without inertia improvement
    pub max_unchanged_iterations: usize,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            max_clusters: 1,
            optimize_number_of_clusters: false,
            max_iterations: 50,
            number_of_trials: 10,
            max_unchanged_iterations: 5,
        }
    }
}

impl ClusterSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        report.check(self.max_clusters >= 1, "clustering", "cluster count must be at least 1");
        report.check(self.max_iterations >= 1, "clustering", "maximum iterations must be at least 1");
        report.check(self.number_of_trials >= 1, "clustering", "number of trials must be at least 1");
        report.check(
            self.max_unchanged_iterations >= 1,
            "clustering",
            "maximum unchanged iterations must be at least 1",
        );
    }
}

/// A cluster of samples
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Weighted mean of the members
    pub center: Sample,

    /// Indices of the member samples in the clustered slice
    pub members: Vec<usize>,

    /// Total weight of the members
    pub weight: f64,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member samples
    pub fn samples<'a>(&'a self, samples: &'a [Sample]) -> impl Iterator<Item = &'a Sample> + 'a {
        self.members.iter().map(move |&i| &samples[i])
    }
}
