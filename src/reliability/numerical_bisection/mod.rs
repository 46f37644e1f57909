//! Numerical Bisection
//!
//! Deterministic adaptive integration for problems with few stochasts. The
//! domain [-U_MAX, U_MAX]^n starts as one cell; every step splits the unknown
//! cells (corners on both sides of the limit state) with the largest
//! probability mass into 2^n sub-cells. Cells whose corners all fail, or all
//! survive, are settled and contribute their mass.
//!
//! New corner points are interpolated from the two points enclosing them
//! along an axis when both have the same sign with a clear margin; the
//! others are evaluated in one batch per step. The number of cells split per
//! step is chosen so a step creates at most `maximum_points_per_step` points.
//! Runs where the root cell or a single split would already exceed that bound
//! are rejected as invalid settings.
//!
//! The reliability index is bracketed by the failing mass and by the failing
//! plus unknown mass, both relative to the defined (not excluded) mass.

mod domain;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use self::domain::{corners_per_cell, points_per_split, IntegrationDomain};
use super::design_point_builder::{DesignPointBuilder, DesignPointMethod};
use super::validation::ValidationReport;
use super::{sampling_design_point, ReliabilityAlgorithm};
use crate::error::{ReliabilityError, Result};
use crate::model::{ConvergenceReport, DesignPoint, ModelRunner, Sample, StopReason};
use crate::statistics::StandardNormal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericalBisectionSettings {
    pub minimum_iterations: usize,

    pub maximum_iterations: usize,

    /// Half-width of the reliability index bracket at which the run stops
    pub epsilon_beta: f64,

    /// Upper bound of the points created in one step
    pub maximum_points_per_step: usize,

    /// Relative position of the split point along every axis of a cell
    pub split_fraction: f64,

    /// Interpolated Z must be this fraction of the neighbor difference away from zero
    pub inference_margin: f64,

    pub design_point_method: DesignPointMethod,
}

impl Default for NumericalBisectionSettings {
    fn default() -> Self {
        Self {
            minimum_iterations: 1,
            maximum_iterations: 50,
            epsilon_beta: 0.01,
            maximum_points_per_step: 1000,
            split_fraction: 0.5,
            inference_margin: 0.25,
            design_point_method: DesignPointMethod::CenterOfGravity,
        }
    }
}

/// Probability of failure bounds of the current partition
#[derive(Debug, Clone, Copy)]
struct Bracket {
    lower: f64,
    upper: f64,
}

impl Bracket {
    fn of(domain: &IntegrationDomain) -> Option<Self> {
        let defined = 1.0 - domain.excluded_mass;
        if defined <= 0.0 {
            return None;
        }
        Some(Self {
            lower: (domain.failing_mass / defined).min(1.0),
            upper: ((domain.failing_mass + domain.unknown_mass()) / defined).min(1.0),
        })
    }

    fn probability(&self) -> f64 {
        0.5 * (self.lower + self.upper)
    }

    /// Half-width in reliability index
    fn half_width(&self) -> f64 {
        0.5 * (StandardNormal::get_u_from_q(self.lower) - StandardNormal::get_u_from_q(self.upper))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NumericalBisection {
    settings: NumericalBisectionSettings,
}

impl NumericalBisection {
    pub fn new(settings: NumericalBisectionSettings) -> Self {
        Self { settings }
    }

    /// Infer or evaluate all pending points, then settle the new cells
    fn resolve(&self, runner: &mut ModelRunner, domain: &mut IntegrationDomain, iteration: usize) -> Result<()> {
        let unresolved = domain.infer_pending(self.settings.inference_margin);
        let mut samples: Vec<Sample> = unresolved
            .iter()
            .map(|&id| Sample::new(domain.points[id].values.clone()).with_iteration(iteration as i32))
            .collect();
        runner.evaluate(&mut samples)?;

        for (&id, sample) in unresolved.iter().zip(&samples) {
            domain.set_evaluated(id, sample.z);
        }
        domain.settle();
        debug!(
            "numerical bisection: step {} evaluated {} points, {} unknown cells",
            iteration,
            samples.len(),
            domain.unknown.len()
        );
        Ok(())
    }

    fn design_point_builder(&self, domain: &IntegrationDomain, dimension: usize) -> DesignPointBuilder {
        let mut builder = DesignPointBuilder::new(self.settings.design_point_method, dimension);
        let density = |values: &[f64]| (-0.5 * values.iter().map(|u| u * u).sum::<f64>()).exp();

        for point in domain.boundary_points() {
            builder.add_weighted(&point.values, density(&point.values));
        }
        if builder.is_empty() {
            for point in domain.points.iter().filter(|p| p.is_failing()) {
                builder.add_weighted(&point.values, density(&point.values));
            }
        }
        builder
    }
}

impl ReliabilityAlgorithm for NumericalBisection {
    fn validate(&self, report: &mut ValidationReport) {
        let s = &self.settings;
        let subject = "numerical bisection";
        report.check(
            s.minimum_iterations <= s.maximum_iterations,
            subject,
            "minimum iterations must not exceed maximum iterations",
        );
        report.check(s.epsilon_beta > 0.0, subject, "epsilon beta must be positive");
        report.check(s.maximum_points_per_step >= 1, subject, "maximum points per step must be at least 1");
        report.check(
            s.split_fraction > 0.0 && s.split_fraction < 1.0,
            subject,
            "split fraction must lie between 0 and 1",
        );
        report.check(s.inference_margin >= 0.0, subject, "inference margin must not be negative");
    }

    /// The root cell and a single split must both fit in one step
    fn validate_dimension(&self, dimension: usize, report: &mut ValidationReport) {
        let limit = self.settings.maximum_points_per_step;
        let fits = |count: Option<usize>| count.is_some_and(|c| c <= limit);
        if !fits(corners_per_cell(dimension)) || !fits(points_per_split(dimension)) {
            report.error(
                "numerical bisection",
                &format!(
                    "{} varying stochasts need more than {} points per step, use fewer stochasts or another method",
                    dimension, limit
                ),
            );
        }
    }

    fn run(&self, runner: &mut ModelRunner) -> Result<DesignPoint> {
        let s = &self.settings;
        let dimension = runner.dimension();
        let mut validation = ValidationReport::default();
        self.validate_dimension(dimension, &mut validation);
        if !validation.is_valid() {
            return Err(ReliabilityError::InvalidSettings(validation));
        }

        let mut domain = IntegrationDomain::new(dimension, s.split_fraction);
        self.resolve(runner, &mut domain, 0)?;
        // Every split adds at most `new_points_per_split` points, shared points fewer
        let chunk = (s.maximum_points_per_step / domain.new_points_per_split().max(1)).max(1);

        let mut iteration = 0;
        let mut bracket = Bracket::of(&domain);
        let stop_reason = loop {
            let Some(current) = bracket else {
                break StopReason::UndefinedResult;
            };
            let half_width = current.half_width();
            runner.report(iteration, StandardNormal::get_u_from_q(current.probability()), half_width);

            if domain.unknown.is_empty() || (iteration >= s.minimum_iterations && half_width < s.epsilon_beta) {
                break StopReason::Converged;
            }
            if iteration >= s.maximum_iterations {
                break StopReason::MaximumIterations;
            }
            if runner.is_cancelled() {
                break StopReason::Cancelled;
            }

            iteration += 1;
            domain.split_largest(chunk);
            self.resolve(runner, &mut domain, iteration)?;
            bracket = Bracket::of(&domain);
        };

        let probability = bracket.map_or(0.0, |b| b.probability());
        let mut report = ConvergenceReport {
            total_iterations: iteration,
            failed_samples: domain.points.iter().filter(|p| p.is_failing()).count(),
            excluded_samples: domain.points.iter().filter(|p| p.z.is_nan()).count(),
            ..Default::default()
        };
        let convergence = bracket.map_or(f64::INFINITY, |b| b.half_width());
        if probability <= 0.0 && stop_reason == StopReason::Converged {
            warn!("numerical bisection found no failing cells");
            report.finish(StopReason::NoFailingSamples, convergence);
        } else {
            report.finish(stop_reason, convergence);
        }
        debug!(
            "numerical bisection: {} determined cells, excluded mass {:.3e}",
            domain.determined_cells, domain.excluded_mass
        );

        let builder = self.design_point_builder(&domain, dimension);
        Ok(sampling_design_point(runner, "Numerical Bisection", probability, &builder, report))
    }
}
