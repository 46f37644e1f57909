//! Weighted K-Means++ clustering
//!
//! # Algorithm
//!
//! - Seeding: the first center is the weighted mean of all samples, every next
//!   center is a sample drawn by roulette wheel with probability proportional
//!   to w² · d², d being the distance to the nearest center chosen so far
//! - Refinement: Lloyd iterations (assign to the nearest center, move centers
//!   to the weighted member mean) until no sample moves, the inertia stops
//!   improving or the iteration cap is reached
//! - A reassignment that would leave a cluster empty is rejected and ends the
//!   refinement of that trial
//! - Several trials per cluster count, the lowest inertia wins
//!
//! With `optimize_number_of_clusters` the count is searched from 2 upward by
//! silhouette coefficient, stopping after two consecutive decreases. A best
//! score below 0.5 falls back to a single cluster.

use log::debug;

use super::cluster::{Cluster, ClusterSettings};
use crate::model::Sample;
use crate::statistics::RandomSource;

/// Silhouette score below which clustering is not considered meaningful
const MIN_SILHOUETTE: f64 = 0.5;

/// Relative inertia decrease that counts as an improvement
const INERTIA_TOLERANCE: f64 = 1e-12;

/// K-Means++ clustering of weighted samples
#[derive(Debug, Clone, Default)]
pub struct KMeans {
    settings: ClusterSettings,
}

/// Result of one seeding and refinement
struct Trial {
    assignment: Vec<usize>,
    centers: Vec<Vec<f64>>,
    inertia: f64,
}

impl KMeans {
    pub fn new(settings: ClusterSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// Cluster the samples according to the settings
    pub fn cluster<R: RandomSource>(&self, samples: &[Sample], random: &mut R) -> Vec<Cluster> {
        if samples.is_empty() {
            return Vec::new();
        }

        let max_clusters = self.settings.max_clusters.max(1).min(samples.len());
        if !self.settings.optimize_number_of_clusters || max_clusters == 1 {
            return self.cluster_fixed(samples, max_clusters, random);
        }

        let mut best: Option<(f64, Vec<Cluster>)> = None;
        let mut previous = f64::NEG_INFINITY;
        let mut decreases = 0;

        for k in 2..=max_clusters {
            let clusters = self.cluster_fixed(samples, k, random);
            let score = Self::silhouette(samples, &clusters);
            debug!("k-means: {} clusters, silhouette {:.4}", clusters.len(), score);

            if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                best = Some((score, clusters));
            }

            if score < previous {
                decreases += 1;
                if decreases >= 2 {
                    break;
                }
            } else {
                decreases = 0;
            }
            previous = score;
        }

        match best {
            Some((score, clusters)) if score >= MIN_SILHOUETTE => clusters,
            _ => self.cluster_fixed(samples, 1, random),
        }
    }

    /// Cluster into (at most) `k` clusters, keeping the best trial
    pub fn cluster_fixed<R: RandomSource>(&self, samples: &[Sample], k: usize, random: &mut R) -> Vec<Cluster> {
        if samples.is_empty() {
            return Vec::new();
        }

        let k = k.max(1).min(samples.len());
        let mut best: Option<Trial> = None;
        for _ in 0..self.settings.number_of_trials.max(1) {
            if let Some(trial) = self.trial(samples, k, random) {
                if best.as_ref().map_or(true, |b| trial.inertia < b.inertia) {
                    best = Some(trial);
                }
            }
        }

        match best {
            Some(trial) => Self::build_clusters(samples, &trial),
            // No trial could place k distinct centers
            None if k > 1 => self.cluster_fixed(samples, k - 1, random),
            None => Vec::new(),
        }
    }

    /// Mean silhouette coefficient over all samples
    ///
    /// Samples in singleton clusters score 0; a single cluster scores 0.
    pub fn silhouette(samples: &[Sample], clusters: &[Cluster]) -> f64 {
        if clusters.len() < 2 || samples.is_empty() {
            return 0.0;
        }

        let mut total = 0.0;
        let mut count = 0;
        for (c, cluster) in clusters.iter().enumerate() {
            for &i in &cluster.members {
                count += 1;
                if cluster.len() < 2 {
                    continue;
                }

                let a = mean_distance(samples, i, &cluster.members);
                let b = clusters
                    .iter()
                    .enumerate()
                    .filter(|(other, o)| *other != c && !o.is_empty())
                    .map(|(_, o)| mean_distance(samples, i, &o.members))
                    .fold(f64::INFINITY, f64::min);

                let denominator = a.max(b);
                if denominator > 0.0 {
                    total += (b - a) / denominator;
                }
            }
        }

        if count == 0 { 0.0 } else { total / count as f64 }
    }

    fn trial<R: RandomSource>(&self, samples: &[Sample], k: usize, random: &mut R) -> Option<Trial> {
        let mut centers = Self::seed(samples, k, random)?;

        let mut assignment = nearest_assignment(samples, &centers);
        if count_members(&assignment, k).contains(&0) {
            return None;
        }
        centers = weighted_centers(samples, &assignment, k);
        let mut inertia = total_inertia(samples, &assignment, &centers);
        let mut unchanged = 0;

        for _ in 0..self.settings.max_iterations {
            let candidate = nearest_assignment(samples, &centers);
            if candidate == assignment {
                break;
            }
            if count_members(&candidate, k).contains(&0) {
                break;
            }

            assignment = candidate;
            centers = weighted_centers(samples, &assignment, k);
            let new_inertia = total_inertia(samples, &assignment, &centers);
            let improved = new_inertia < inertia * (1.0 - INERTIA_TOLERANCE);
            inertia = new_inertia;
            if improved {
                unchanged = 0;
            } else {
                unchanged += 1;
                if unchanged >= self.settings.max_unchanged_iterations {
                    break;
                }
            }
        }

        Some(Trial { assignment, centers, inertia })
    }

    /// K-Means++ seeding, `None` when fewer than k distinct centers exist
    fn seed<R: RandomSource>(samples: &[Sample], k: usize, random: &mut R) -> Option<Vec<Vec<f64>>> {
        let all: Vec<usize> = (0..samples.len()).collect();
        let mut centers = vec![weighted_mean(samples, &all)];

        while centers.len() < k {
            let weights: Vec<f64> = samples
                .iter()
                .map(|s| {
                    let d2 = centers
                        .iter()
                        .map(|c| squared_distance(&s.values, c))
                        .fold(f64::INFINITY, f64::min);
                    s.weight * s.weight * d2
                })
                .collect();

            let index = roulette(&weights, random.next())?;
            centers.push(samples[index].values.clone());
        }

        Some(centers)
    }

    fn build_clusters(samples: &[Sample], trial: &Trial) -> Vec<Cluster> {
        trial
            .centers
            .iter()
            .enumerate()
            .map(|(c, center)| {
                let members: Vec<usize> = (0..samples.len()).filter(|&i| trial.assignment[i] == c).collect();
                let weight = members.iter().map(|&i| samples[i].weight).sum();
                Cluster {
                    center: Sample::new(center.clone()),
                    members,
                    weight,
                }
            })
            .collect()
    }
}

/// Index drawn with probability proportional to its weight, `None` when all weights are zero
fn roulette(weights: &[f64], uniform: f64) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let threshold = uniform * total;
    let mut cumulative = 0.0;
    let mut last = None;
    for (i, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            cumulative += w;
            last = Some(i);
            if cumulative > threshold {
                return Some(i);
            }
        }
    }
    last
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn weighted_mean(samples: &[Sample], members: &[usize]) -> Vec<f64> {
    let dimension = samples[members[0]].dimension();
    let mut mean = vec![0.0; dimension];
    let mut total = 0.0;
    for &i in members {
        let sample = &samples[i];
        total += sample.weight;
        for (m, v) in mean.iter_mut().zip(&sample.values) {
            *m += sample.weight * v;
        }
    }

    if total > 0.0 {
        mean.iter_mut().for_each(|m| *m /= total);
    } else {
        // Zero weights: plain mean
        mean = vec![0.0; dimension];
        for &i in members {
            for (m, v) in mean.iter_mut().zip(&samples[i].values) {
                *m += v / members.len() as f64;
            }
        }
    }
    mean
}

fn nearest_assignment(samples: &[Sample], centers: &[Vec<f64>]) -> Vec<usize> {
    samples
        .iter()
        .map(|s| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (c, center) in centers.iter().enumerate() {
                let d = squared_distance(&s.values, center);
                if d < best_distance {
                    best = c;
                    best_distance = d;
                }
            }
            best
        })
        .collect()
}

fn count_members(assignment: &[usize], k: usize) -> Vec<usize> {
    let mut counts = vec![0; k];
    for &c in assignment {
        counts[c] += 1;
    }
    counts
}

fn weighted_centers(samples: &[Sample], assignment: &[usize], k: usize) -> Vec<Vec<f64>> {
    (0..k)
        .map(|c| {
            let members: Vec<usize> = (0..samples.len()).filter(|&i| assignment[i] == c).collect();
            weighted_mean(samples, &members)
        })
        .collect()
}

fn total_inertia(samples: &[Sample], assignment: &[usize], centers: &[Vec<f64>]) -> f64 {
    samples
        .iter()
        .zip(assignment)
        .map(|(s, &c)| s.weight * squared_distance(&s.values, &centers[c]))
        .sum()
}

fn mean_distance(samples: &[Sample], i: usize, members: &[usize]) -> f64 {
    let others: Vec<f64> = members
        .iter()
        .filter(|&&j| j != i)
        .map(|&j| samples[i].distance(&samples[j]))
        .collect();
    if others.is_empty() {
        0.0
    } else {
        others.iter().sum::<f64>() / others.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::RandomGenerator;

    fn dataset() -> Vec<Sample> {
        [
            (0.65, 0.22), (0.73, 0.16),
            (0.760, 0.178), (0.750, 0.166), (0.740, 0.176), (0.758, 0.168), (0.752, 0.182), (0.746, 0.160),
            (0.590, 0.125), (0.610, 0.110), (0.605, 0.129), (0.595, 0.107), (0.614, 0.114), (0.592, 0.117),
            (0.690, 0.232), (0.680, 0.214), (0.670, 0.228), (0.685, 0.210), (0.665, 0.230), (0.685, 0.220),
        ]
        .iter()
        .map(|&(x, y)| Sample::new(vec![x, y]))
        .collect()
    }

    fn nearest_center(clusters: &[Cluster], target: (f64, f64)) -> (f64, f64) {
        clusters
            .iter()
            .map(|c| (c.center.values[0], c.center.values[1]))
            .min_by(|a, b| {
                let da = (a.0 - target.0).powi(2) + (a.1 - target.1).powi(2);
                let db = (b.0 - target.0).powi(2) + (b.1 - target.1).powi(2);
                da.total_cmp(&db)
            })
            .unwrap()
    }

    #[test]
    fn test_three_clusters_found() {
        let samples = dataset();
        let settings = ClusterSettings {
            max_clusters: 3,
            optimize_number_of_clusters: true,
            ..Default::default()
        };
        let mut random = RandomGenerator::seeded(0).unwrap();
        let clusters = KMeans::new(settings).cluster(&samples, &mut random);

        assert_eq!(clusters.len(), 3, "expected three clusters");
        for expected in [(0.748, 0.170), (0.601, 0.117), (0.675, 0.222)] {
            let center = nearest_center(&clusters, expected);
            assert!((center.0 - expected.0).abs() < 1e-2, "center {:?} vs {:?}", center, expected);
            assert!((center.1 - expected.1).abs() < 1e-2, "center {:?} vs {:?}", center, expected);
        }
        let total: usize = clusters.iter().map(|c| c.len()).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn test_no_empty_clusters() {
        let samples = dataset();
        let mut random = RandomGenerator::seeded(11).unwrap();
        let kmeans = KMeans::new(ClusterSettings { max_clusters: 6, ..Default::default() });
        let clusters = kmeans.cluster(&samples, &mut random);
        assert!(!clusters.is_empty());
        assert!(clusters.iter().all(|c| !c.is_empty()), "clusters must never be empty");
    }

    #[test]
    fn test_weak_structure_falls_back_to_one_cluster() {
        // Best silhouette is 1/6 for two clusters, 0 for three
        let samples: Vec<Sample> = (0..3).map(|i| Sample::new(vec![i as f64])).collect();
        let settings = ClusterSettings {
            max_clusters: 3,
            optimize_number_of_clusters: true,
            ..Default::default()
        };
        let mut random = RandomGenerator::seeded(5).unwrap();
        let clusters = KMeans::new(settings).cluster(&samples, &mut random);
        assert_eq!(clusters.len(), 1);
        assert!((clusters[0].center.values[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_identical_samples() {
        let samples = vec![Sample::new(vec![1.0, 1.0]); 4];
        let mut random = RandomGenerator::seeded(1).unwrap();
        let clusters = KMeans::new(ClusterSettings { max_clusters: 3, ..Default::default() })
            .cluster(&samples, &mut random);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 4);
    }

    #[test]
    fn test_weights_shift_the_center() {
        let samples = vec![
            Sample::new(vec![0.0]).with_weight(3.0),
            Sample::new(vec![4.0]).with_weight(1.0),
        ];
        let mut random = RandomGenerator::seeded(1).unwrap();
        let clusters = KMeans::default().cluster(&samples, &mut random);
        assert_eq!(clusters[0].center.values, vec![1.0]);
        assert_eq!(clusters[0].weight, 4.0);
    }

    #[test]
    fn test_roulette() {
        assert_eq!(roulette(&[0.0, 0.0], 0.3), None);
        assert_eq!(roulette(&[0.0, 1.0, 3.0], 0.1), Some(1));
        assert_eq!(roulette(&[0.0, 1.0, 3.0], 0.5), Some(2));
    }
}
