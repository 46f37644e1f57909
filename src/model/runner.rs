//! Model evaluation
//!
//! The reliability methods work on reduced U vectors holding only the varying
//! stochasts. The runner expands them to the full input vector, transforms
//! them to physical values and hands them to the limit-state function in
//! chunks, fanned out over a rayon pool.

use std::sync::Arc;

use rayon::prelude::*;

use super::design_point::{normalize_alphas, ConvergenceReport, DesignPoint};
use super::progress::{CancellationToken, LogProgress, ProgressSink, ReliabilityResult};
use super::sample::Sample;
use super::settings::{RunSettings, StochastSettings, StochastSettingsSet};
use super::stochast::Stochast;
use crate::error::{ModelError, ReliabilityError, Result};

/// Physical input vector of one model evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    /// One value per stochast, in stochast order
    pub values: Vec<f64>,

    /// Iteration that produced the input, -1 when untagged
    pub iteration_index: i32,
}

/// Limit-state function supplied by the caller
///
/// Returns Z for physical input values; Z < 0 is failure and `NaN` marks an
/// undefined result. An `Err` aborts the whole run.
pub trait LimitStateFunction: Send + Sync {
    fn evaluate(&self, input: &ModelInput) -> std::result::Result<f64, ModelError>;

    /// Evaluate a batch, returning one value per input in input order
    fn evaluate_batch(&self, inputs: &[ModelInput]) -> std::result::Result<Vec<f64>, ModelError> {
        inputs.par_iter().map(|input| self.evaluate(input)).collect()
    }
}

impl<F> LimitStateFunction for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, input: &ModelInput) -> std::result::Result<f64, ModelError> {
        Ok(self(&input.values))
    }
}

/// Drives a limit-state function for one reliability run
pub struct ModelRunner {
    model: Arc<dyn LimitStateFunction>,
    settings: StochastSettingsSet,
    run_settings: RunSettings,
    varying: Vec<usize>,
    pool: rayon::ThreadPool,
    cancellation: CancellationToken,
    progress: Box<dyn ProgressSink>,
    results: Vec<ReliabilityResult>,
    index: usize,
    model_runs: usize,
}

impl ModelRunner {
    /// Create a runner with its own worker pool
    pub fn new(
        model: Arc<dyn LimitStateFunction>,
        settings: StochastSettingsSet,
        run_settings: RunSettings,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(run_settings.max_parallel_processes.max(1))
            .build()
            .map_err(|e| ReliabilityError::ThreadPool(e.to_string()))?;
        let varying = settings.varying_indices();

        Ok(Self {
            model,
            settings,
            run_settings,
            varying,
            pool,
            cancellation: CancellationToken::default(),
            progress: Box::new(LogProgress),
            results: Vec::new(),
            index: 0,
            model_runs: 0,
        })
    }

    /// Runner over a plain closure with default run settings
    pub fn from_fn<F>(function: F, stochasts: &[Arc<Stochast>]) -> Result<Self>
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self::new(
            Arc::new(function),
            StochastSettingsSet::from_stochasts(stochasts),
            RunSettings::default(),
        )
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Index reported with every iteration result
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Number of varying stochasts
    pub fn dimension(&self) -> usize {
        self.varying.len()
    }

    pub fn stochast_settings(&self) -> &StochastSettingsSet {
        &self.settings
    }

    pub fn run_settings(&self) -> &RunSettings {
        &self.run_settings
    }

    /// Settings of the varying stochasts, in reduced vector order
    pub fn varying_settings(&self) -> Vec<&StochastSettings> {
        self.varying.iter().map(|&i| &self.settings.stochast_settings[i]).collect()
    }

    pub fn stochasts(&self) -> Vec<Arc<Stochast>> {
        self.settings.stochasts()
    }

    /// Reduced start vector
    pub fn start_vector(&self) -> Vec<f64> {
        self.varying_settings().iter().map(|s| s.start_value).collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn model_runs(&self) -> usize {
        self.model_runs
    }

    /// Full U vector for a reduced one, fixed stochasts at their start value
    pub fn full_vector(&self, reduced: &[f64]) -> Vec<f64> {
        let mut full = self.settings.start_values();
        for (&index, &u) in self.varying.iter().zip(reduced) {
            full[index] = u;
        }
        full
    }

    /// Full vector of physical values for a reduced U vector
    pub fn physical_values(&self, reduced: &[f64]) -> Vec<f64> {
        self.full_vector(reduced)
            .iter()
            .zip(&self.settings.stochast_settings)
            .map(|(&u, s)| s.stochast.x_from_u(u))
            .collect()
    }

    /// Evaluate all samples, writing Z into each of them
    pub fn evaluate(&mut self, samples: &mut [Sample]) -> Result<()> {
        let chunk_size = self.run_settings.max_chunk_size.max(1);
        for chunk in samples.chunks_mut(chunk_size) {
            let inputs: Vec<ModelInput> = chunk
                .iter()
                .map(|sample| ModelInput {
                    values: self.physical_values(&sample.values),
                    iteration_index: sample.iteration_index,
                })
                .collect();

            let model = &self.model;
            let values = self.pool.install(|| model.evaluate_batch(&inputs))?;
            if values.len() != chunk.len() {
                return Err(ModelError::BatchSizeMismatch {
                    expected: chunk.len(),
                    actual: values.len(),
                }
                .into());
            }

            for (sample, z) in chunk.iter_mut().zip(values) {
                sample.z = z;
            }
            self.model_runs += chunk.len();
        }
        Ok(())
    }

    pub fn evaluate_one(&mut self, sample: &mut Sample) -> Result<f64> {
        self.evaluate(std::slice::from_mut(sample))?;
        Ok(sample.z)
    }

    /// Z at a reduced U vector
    pub fn z_at(&mut self, values: &[f64]) -> Result<f64> {
        let mut sample = Sample::new(values.to_vec());
        self.evaluate_one(&mut sample)
    }

    /// Publish the state after an iteration
    pub fn report(&mut self, step: usize, beta: f64, convergence: f64) {
        let result = ReliabilityResult {
            step,
            index: self.index,
            beta,
            convergence,
            model_runs: self.model_runs,
        };
        self.progress.report(&result);
        self.results.push(result);
    }

    /// Design point along a reduced U direction pointing toward failure
    pub fn design_point_from_direction(
        &mut self,
        identifier: &str,
        beta: f64,
        direction: &[f64],
        report: ConvergenceReport,
    ) -> DesignPoint {
        let alphas: Vec<f64> = direction.iter().map(|d| -d).collect();
        self.design_point_from_alphas(identifier, beta, &alphas, report)
    }

    /// Design point from reduced alphas; fixed stochasts get alpha 0
    pub fn design_point_from_alphas(
        &mut self,
        identifier: &str,
        beta: f64,
        alphas: &[f64],
        mut report: ConvergenceReport,
    ) -> DesignPoint {
        // Fixed stochasts keep alpha 0, also when the direction is undefined
        let alphas = normalize_alphas(alphas);
        let mut full = vec![0.0; self.settings.len()];
        for (&index, &alpha) in self.varying.iter().zip(&alphas) {
            full[index] = alpha;
        }
        report.total_model_runs = self.model_runs;

        let mut point = DesignPoint::from_alphas(identifier, beta, &self.stochasts(), &full, report);
        point.reliability_results = std::mem::take(&mut self.results);
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stochasts() -> Vec<Arc<Stochast>> {
        vec![
            Arc::new(Stochast::normal("resistance", 10.0, 1.0)),
            Arc::new(Stochast::deterministic("width", 2.0)),
            Arc::new(Stochast::standard_normal("load")),
        ]
    }

    #[test]
    fn test_reduced_vector_is_expanded() {
        let runner = ModelRunner::from_fn(|x: &[f64]| x[0] - x[2], &stochasts()).unwrap();
        assert_eq!(runner.dimension(), 2);
        assert_eq!(runner.physical_values(&[1.0, 3.0]), vec![11.0, 2.0, 3.0]);
    }

    #[test]
    fn test_batch_keeps_order_across_chunks() {
        let settings = StochastSettingsSet::from_stochasts(&stochasts());
        let run_settings = RunSettings { max_parallel_processes: 3, max_chunk_size: 4 };
        let model: Arc<dyn LimitStateFunction> = Arc::new(|x: &[f64]| x[0] * x[1] - x[2]);
        let mut runner = ModelRunner::new(model, settings, run_settings).unwrap();

        let mut samples: Vec<Sample> = (0..11).map(|i| Sample::new(vec![0.0, i as f64])).collect();
        runner.evaluate(&mut samples).unwrap();

        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(sample.z, 20.0 - i as f64);
        }
        assert_eq!(runner.model_runs(), 11);
    }

    struct Broken;

    impl LimitStateFunction for Broken {
        fn evaluate(&self, _input: &ModelInput) -> std::result::Result<f64, ModelError> {
            Err(ModelError::Failed { message: "solver crashed".to_string() })
        }
    }

    #[test]
    fn test_model_failure_aborts() {
        let settings = StochastSettingsSet::from_stochasts(&stochasts());
        let mut runner = ModelRunner::new(Arc::new(Broken), settings, RunSettings::default()).unwrap();
        let result = runner.z_at(&[0.0, 0.0]);
        assert!(matches!(result, Err(ReliabilityError::Model(ModelError::Failed { .. }))));
    }

    #[test]
    fn test_design_point_gets_zero_alpha_for_fixed() {
        let mut runner = ModelRunner::from_fn(|x: &[f64]| x[0] - x[2], &stochasts()).unwrap();
        runner.report(1, 2.0, 0.1);
        let point = runner.design_point_from_alphas("test", 2.0, &[0.6, -0.8], ConvergenceReport::default());
        assert_eq!(point.alphas[1].alpha, 0.0);
        assert!((point.alphas[2].alpha + 0.8).abs() < 1e-12);
        assert_eq!(point.reliability_results.len(), 1);
    }
}
