//! Cells and shared corner points of the bisection domain

use std::collections::HashMap;

use crate::statistics::{StandardNormal, U_MAX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PointState {
    /// Waiting for inference or evaluation
    Pending,
    Evaluated,
    /// Z interpolated from neighbors along an axis
    Inferred,
}

/// Corner point, shared by every cell that touches it
#[derive(Debug, Clone)]
pub(crate) struct IntegrationPoint {
    pub values: Vec<f64>,
    pub z: f64,
    pub state: PointState,
    /// Pairs of points enclosing this one along an axis, with the relative position between them
    neighbors: Vec<(usize, usize, f64)>,
}

impl IntegrationPoint {
    fn is_known(&self) -> bool {
        self.state != PointState::Pending
    }

    pub fn is_failing(&self) -> bool {
        self.is_known() && self.z < 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellState {
    /// Corners on both sides of the limit state
    Unknown,
    Failing,
    Safe,
    /// No corner with a model result
    Excluded,
}

#[derive(Debug, Clone)]
pub(crate) struct IntegrationCell {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Corner `b` takes the upper bound on axis `j` when bit `j` of `b` is set
    pub corners: Vec<usize>,
    pub mass: f64,
}

/// Probability mass of [lower, upper] on one axis; the outer cells extend to infinity
fn axis_mass(lower: f64, upper: f64) -> f64 {
    let below = |u: f64| if u >= U_MAX { 1.0 } else if u <= -U_MAX { 0.0 } else { StandardNormal::get_p_from_u(u) };
    let above = |u: f64| if u >= U_MAX { 0.0 } else if u <= -U_MAX { 1.0 } else { StandardNormal::get_q_from_u(u) };

    let mass = if lower >= 0.0 {
        above(lower) - above(upper)
    } else {
        below(upper) - below(lower)
    };
    mass.max(0.0)
}

pub(crate) fn cell_mass(lower: &[f64], upper: &[f64]) -> f64 {
    lower.iter().zip(upper).map(|(&l, &u)| axis_mass(l, u)).product()
}

/// Corners of one cell, `None` when the count does not fit in `usize`
pub(crate) fn corners_per_cell(dimension: usize) -> Option<usize> {
    2usize.checked_pow(u32::try_from(dimension).ok()?)
}

/// Points a split adds besides the corners of the parent: 3^n - 2^n
pub(crate) fn points_per_split(dimension: usize) -> Option<usize> {
    let grid = 3usize.checked_pow(u32::try_from(dimension).ok()?)?;
    Some(grid - corners_per_cell(dimension)?)
}

/// Coordinate identity of a point; -0.0 and 0.0 coincide
fn point_key(values: &[f64]) -> Vec<u64> {
    values.iter().map(|v| (v + 0.0).to_bits()).collect()
}

/// Adaptive partition of [-U_MAX, U_MAX]^n
///
/// Only unknown cells are kept; determined cells are folded into the mass
/// tallies as soon as all their corners are known.
#[derive(Debug)]
pub(crate) struct IntegrationDomain {
    dimension: usize,
    split_fraction: f64,
    pub points: Vec<IntegrationPoint>,
    index: HashMap<Vec<u64>, usize>,
    pub unknown: Vec<IntegrationCell>,
    fresh: Vec<IntegrationCell>,
    pending: Vec<usize>,
    pub failing_mass: f64,
    pub safe_mass: f64,
    pub excluded_mass: f64,
    pub determined_cells: usize,
}

impl IntegrationDomain {
    pub fn new(dimension: usize, split_fraction: f64) -> Self {
        let mut domain = Self {
            dimension,
            split_fraction,
            points: Vec::new(),
            index: HashMap::new(),
            unknown: Vec::new(),
            fresh: Vec::new(),
            pending: Vec::new(),
            failing_mass: 0.0,
            safe_mass: 0.0,
            excluded_mass: 0.0,
            determined_cells: 0,
        };
        let root = domain.cell(vec![-U_MAX; dimension], vec![U_MAX; dimension]);
        domain.fresh.push(root);
        domain
    }

    /// Points created per split that are not corners of the parent
    pub fn new_points_per_split(&self) -> usize {
        points_per_split(self.dimension).unwrap_or(usize::MAX)
    }

    pub fn unknown_mass(&self) -> f64 {
        self.unknown.iter().map(|c| c.mass).sum()
    }

    fn point(&mut self, values: Vec<f64>, neighbors: Vec<(usize, usize, f64)>) -> usize {
        let key = point_key(&values);
        if let Some(&existing) = self.index.get(&key) {
            return existing;
        }
        let id = self.points.len();
        self.points.push(IntegrationPoint { values, z: f64::NAN, state: PointState::Pending, neighbors });
        self.index.insert(key, id);
        self.pending.push(id);
        id
    }

    fn cell(&mut self, lower: Vec<f64>, upper: Vec<f64>) -> IntegrationCell {
        let corners = (0..1usize << self.dimension)
            .map(|b| {
                let values = (0..self.dimension)
                    .map(|j| if b >> j & 1 == 1 { upper[j] } else { lower[j] })
                    .collect();
                self.point(values, Vec::new())
            })
            .collect();
        let mass = cell_mass(&lower, &upper);
        IntegrationCell { lower, upper, corners, mass }
    }

    /// Split the `count` unknown cells with the largest mass into 2^n sub-cells
    pub fn split_largest(&mut self, count: usize) {
        self.unknown.sort_by(|a, b| b.mass.total_cmp(&a.mass));
        let count = count.min(self.unknown.len());
        let selected: Vec<IntegrationCell> = self.unknown.drain(..count).collect();

        for cell in selected {
            let n = self.dimension;
            let split: Vec<f64> = cell
                .lower
                .iter()
                .zip(&cell.upper)
                .map(|(l, u)| l + self.split_fraction * (u - l))
                .collect();
            let grid = |j: usize, level: usize| match level {
                0 => cell.lower[j],
                1 => split[j],
                _ => cell.upper[j],
            };

            // Grid points in order of the number of split coordinates, so the
            // neighbors of a point always exist before the point itself
            let mut levels: Vec<Vec<usize>> = (0..3usize.pow(n as u32))
                .map(|mut code| {
                    (0..n)
                        .map(|_| {
                            let level = code % 3;
                            code /= 3;
                            level
                        })
                        .collect()
                })
                .collect();
            levels.sort_by_key(|l| l.iter().filter(|&&v| v == 1).count());

            for level in levels {
                let values: Vec<f64> = (0..n).map(|j| grid(j, level[j])).collect();
                if self.index.contains_key(&point_key(&values)) {
                    continue;
                }
                let neighbors = (0..n)
                    .filter(|&j| level[j] == 1)
                    .filter_map(|j| {
                        let mut below = values.clone();
                        below[j] = cell.lower[j];
                        let mut above = values.clone();
                        above[j] = cell.upper[j];
                        Some((*self.index.get(&point_key(&below))?, *self.index.get(&point_key(&above))?, self.split_fraction))
                    })
                    .collect();
                self.point(values, neighbors);
            }

            for b in 0..1usize << n {
                let lower = (0..n).map(|j| if b >> j & 1 == 1 { split[j] } else { cell.lower[j] }).collect();
                let upper = (0..n).map(|j| if b >> j & 1 == 1 { cell.upper[j] } else { split[j] }).collect();
                let child = self.cell(lower, upper);
                self.fresh.push(child);
            }
        }
    }

    /// Resolve pending points from known neighbors where the sign is
    /// unambiguous; returns the points that still need a model run
    ///
    /// An interpolated Z is only trusted when it is at least `margin` times
    /// the difference between the neighbors away from zero.
    pub fn infer_pending(&mut self, margin: f64) -> Vec<usize> {
        let pending = std::mem::take(&mut self.pending);
        let mut unresolved = Vec::new();

        for id in pending {
            let inferred = self.points[id].neighbors.iter().find_map(|&(a, b, t)| {
                let (pa, pb) = (&self.points[a], &self.points[b]);
                if !pa.is_known() || !pb.is_known() || pa.z.is_nan() || pb.z.is_nan() {
                    return None;
                }
                if (pa.z < 0.0) != (pb.z < 0.0) {
                    return None;
                }
                let z = pa.z + t * (pb.z - pa.z);
                (z.abs() >= margin * (pb.z - pa.z).abs()).then_some(z)
            });

            match inferred {
                Some(z) => {
                    self.points[id].z = z;
                    self.points[id].state = PointState::Inferred;
                }
                None => unresolved.push(id),
            }
        }
        unresolved
    }

    pub fn set_evaluated(&mut self, id: usize, z: f64) {
        let point = &mut self.points[id];
        point.z = z;
        point.state = PointState::Evaluated;
    }

    fn cell_state(&self, cell: &IntegrationCell) -> CellState {
        let corners = cell.corners.iter().map(|&c| &self.points[c]);
        if corners.clone().all(|p| p.z.is_nan()) {
            CellState::Excluded
        } else if corners.clone().any(|p| p.z.is_nan()) {
            // Partly undefined, refine towards the edge of the defined region
            CellState::Unknown
        } else if corners.clone().all(|p| p.z < 0.0) {
            CellState::Failing
        } else if corners.clone().all(|p| p.z >= 0.0) {
            CellState::Safe
        } else {
            CellState::Unknown
        }
    }

    /// Classify the cells created since the last call, once their corners are known
    pub fn settle(&mut self) {
        for cell in std::mem::take(&mut self.fresh) {
            match self.cell_state(&cell) {
                CellState::Unknown => {
                    self.unknown.push(cell);
                    continue;
                }
                CellState::Failing => self.failing_mass += cell.mass,
                CellState::Safe => self.safe_mass += cell.mass,
                CellState::Excluded => self.excluded_mass += cell.mass,
            }
            self.determined_cells += 1;
        }
    }

    /// Failing corners of the unknown cells, the points next to the limit state
    pub fn boundary_points(&self) -> Vec<&IntegrationPoint> {
        let mut ids: Vec<usize> = self
            .unknown
            .iter()
            .flat_map(|c| c.corners.iter().copied())
            .filter(|&id| self.points[id].is_failing())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().map(|id| &self.points[id]).collect()
    }
}
