//! Weighted K-Means++ clustering used to find multiple failure modes

mod cluster;
mod kmeans;

pub use cluster::{Cluster, ClusterSettings};
pub use kmeans::KMeans;
