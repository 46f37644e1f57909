//! Iteration reports and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

/// Report emitted after every iteration, loop, direction batch or level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityResult {
    /// Step number, starting at 1
    pub step: usize,

    /// Index of the design point being computed (0 for single runs)
    pub index: usize,

    /// Current reliability index estimate
    #[serde(deserialize_with = "super::design_point::nullable_f64")]
    pub beta: f64,

    /// Current convergence metric
    #[serde(deserialize_with = "super::design_point::nullable_f64")]
    pub convergence: f64,

    /// Model evaluations so far
    pub model_runs: usize,
}

/// Receiver of iteration reports; has no influence on the computation
pub trait ProgressSink: Send {
    fn report(&mut self, result: &ReliabilityResult);
}

/// Default sink, writes each report to the debug log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, result: &ReliabilityResult) {
        debug!(
            "step {:>4}: beta = {:.6}, convergence = {:.3e}, model runs = {}",
            result.step, result.beta, result.convergence, result.model_runs
        );
    }
}

/// Sink that keeps every report, mostly for tests and post-processing
#[derive(Debug, Default, Clone)]
pub struct CollectProgress {
    results: Arc<std::sync::Mutex<Vec<ReliabilityResult>>>,
}

impl CollectProgress {
    pub fn results(&self) -> Vec<ReliabilityResult> {
        match self.results.lock() {
            Ok(results) => results.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for CollectProgress {
    fn report(&mut self, result: &ReliabilityResult) {
        match self.results.lock() {
            Ok(mut results) => results.push(result.clone()),
            Err(poisoned) => poisoned.into_inner().push(result.clone()),
        }
    }
}

/// Shared stop flag polled between evaluation batches
#[derive(Debug, Default, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
