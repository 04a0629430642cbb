//! Runs captures under several prescaling strategies and weight vectors and tabulates the outcome.
//!
//! [`sweep`] instead scores a grid of weight vectors on one capture, by chi2, by how well the
//! first half of the capture predicts the second, or by ground truth.
//!
//! Every run builds its own graph from the capture, so runs share nothing mutable and are
//! executed in parallel when the `rayon` feature is enabled.

use crate::metrics::ground_truth_metric;
use crate::OptimizedMap;
use itertools::{iproduct, Itertools};
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tagmap_core::{parse_weight_list, Error, Pose, WeightPreset, WeightVector, WEIGHT_VECTOR_LEN};
use tagmap_graph::{BuildOptions, Capture, Graph, GraphBuilder, Prescaling, VertexKind};
use tagmap_optimize::{GraphOptimizer, OptimizationResult, OptimizerSettings};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Settings shared by every run of a comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSettings {
    #[serde(default)]
    pub build: BuildOptions,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    /// After the first optimization, drop tag observations whose chi2 exceeds this and
    /// optimize again.
    #[serde(default)]
    pub refine_threshold: Option<f64>,
}

/// A weight vector under test.
///
/// The values are only validated when a run starts, so a bad vector fails its own runs and
/// leaves the rest of the comparison alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedWeights {
    pub name: String,
    pub values: Vec<f64>,
}

impl NamedWeights {
    pub fn new(name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        Self {
            name: name.into(),
            values: values.into(),
        }
    }
}

impl From<WeightPreset> for NamedWeights {
    fn from(preset: WeightPreset) -> Self {
        Self::new(preset.name(), preset.weights())
    }
}

/// A preset name, or comma-separated weights named after the list itself.
impl FromStr for NamedWeights {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if let Ok(preset) = s.trim().parse::<WeightPreset>() {
            return Ok(preset.into());
        }
        Ok(Self::new(s.trim(), parse_weight_list(s)?))
    }
}

/// Identifies one run of a comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunKey {
    pub capture: String,
    pub prescaling: Prescaling,
    pub weights: String,
}

/// A run that produced estimates.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The graph at its optimized estimates, with refined-away observations removed.
    pub graph: Graph,
    pub result: OptimizationResult,
    pub removed_observations: usize,
}

impl RunOutcome {
    pub fn map(&self) -> OptimizedMap {
        OptimizedMap::extract(&self.graph, &self.result)
    }
}

/// Outcome of every run, keyed by capture, strategy and weight vector.
#[derive(Debug, Clone, Default)]
pub struct ComparisonTable {
    runs: BTreeMap<RunKey, Result<RunOutcome, Error>>,
}

impl ComparisonTable {
    pub fn get(&self, key: &RunKey) -> Option<&Result<RunOutcome, Error>> {
        self.runs.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RunKey, &Result<RunOutcome, Error>)> + '_ {
        self.runs.iter()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.runs.values().filter(|run| run.is_err()).count()
    }

    /// The converged run of `capture` with the lowest final chi2.
    pub fn best(&self, capture: &str) -> Option<(&RunKey, &RunOutcome)> {
        self.runs
            .iter()
            .filter(|(key, _)| key.capture == capture)
            .filter_map(|(key, run)| Some((key, run.as_ref().ok()?)))
            .filter(|(_, outcome)| outcome.result.converged())
            .min_by(|(_, a), (_, b)| a.result.final_chi2.total_cmp(&b.result.final_chi2))
    }
}

/// Builds and optimizes one capture under one strategy and weight vector.
pub fn run(
    capture: &Capture,
    prescaling: Prescaling,
    weights: &NamedWeights,
    settings: &ComparisonSettings,
) -> Result<RunOutcome, Error> {
    let weights = WeightVector::new(&weights.values)?;
    let mut graph = GraphBuilder::new(prescaling, weights)
        .options(settings.build)
        .build(capture)?;
    let optimizer = GraphOptimizer::new(settings.optimizer);
    let mut result = optimizer.optimize(&mut graph)?;

    let mut removed_observations = 0;
    if let Some(threshold) = settings.refine_threshold {
        removed_observations = graph.remove_observations_above(&result.edge_chi2, threshold);
        if removed_observations > 0 {
            let first_chi2 = result.final_chi2;
            result = optimizer.optimize(&mut graph)?;
            debug!(
                "refinement removed {} observations, chi2 {} -> {}",
                removed_observations, first_chi2, result.final_chi2
            );
        }
    }

    Ok(RunOutcome {
        graph,
        result,
        removed_observations,
    })
}

/// Runs every capture under every strategy and weight vector.
///
/// Failures are recorded per run; one capture or weight vector failing does not stop the others.
pub fn compare(
    captures: &[(String, Capture)],
    strategies: &[Prescaling],
    weights: &[NamedWeights],
    settings: &ComparisonSettings,
) -> ComparisonTable {
    let jobs = iproduct!(captures, strategies, weights).collect_vec();
    info!("running {} comparison runs", jobs.len());

    #[cfg(feature = "rayon")]
    let jobs = jobs.into_par_iter();
    #[cfg(not(feature = "rayon"))]
    let jobs = jobs.into_iter();

    let runs = jobs
        .map(|((name, capture), &prescaling, weights)| {
            let key = RunKey {
                capture: name.clone(),
                prescaling,
                weights: weights.name.clone(),
            };
            let outcome = run(capture, prescaling, weights, settings);
            match &outcome {
                Ok(outcome) => info!(
                    "{} {} {}: chi2 {} -> {} in {} iterations ({:?})",
                    key.capture,
                    key.prescaling,
                    key.weights,
                    outcome.result.initial_chi2,
                    outcome.result.final_chi2,
                    outcome.result.iterations,
                    outcome.result.convergence
                ),
                Err(e) => warn!(
                    "{} {} {}: {}",
                    key.capture, key.prescaling, key.weights, e
                ),
            }
            (key, outcome)
        })
        .collect();

    ComparisonTable { runs }
}

/// Optimizations of both halves of a capture.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub first: OptimizationResult,
    /// Run with the tags seen in the first half held at their first half estimates.
    pub second: OptimizationResult,
    pub transferred_tags: usize,
    /// Tags seen only in the second half, removed from it before its run.
    pub dropped_tags: usize,
}

/// Optimizes the first half of a capture, then the second half with the tags it shares with
/// the first half fixed at their optimized poses.
///
/// Tags the first half never saw are removed from the second half along with their
/// observations, so every tag left in the second run is pinned.
///
/// The final chi2 of the second half scores how well a weight vector generalizes beyond the
/// data it was tuned on.
pub fn split_comparison(
    capture: &Capture,
    prescaling: Prescaling,
    weights: &NamedWeights,
    settings: &ComparisonSettings,
) -> Result<SplitOutcome, Error> {
    let weights = WeightVector::new(&weights.values)?;
    let graph = GraphBuilder::new(prescaling, weights)
        .options(settings.build)
        .build(capture)?;
    let len = graph.odometry_path().len();
    if len < 2 {
        return Err(Error::MalformedCapture(format!(
            "splitting needs at least two odometry samples, got {}",
            len
        )));
    }
    let optimizer = GraphOptimizer::new(settings.optimizer);

    let mut first = graph.subgraph(0..len / 2);
    let first_result = optimizer.optimize(&mut first)?;

    let mut second = graph.subgraph(len / 2..len);
    let unshared = second
        .vertices_of_kind(VertexKind::Tag)
        .filter(|tag| first.vertex(tag.id).is_none())
        .map(|tag| tag.id)
        .collect_vec();
    if !unshared.is_empty() {
        let removed = second.remove_vertices(&unshared);
        warn!(
            "{} tags only seen in the second half were dropped with {} edges",
            unshared.len(),
            removed
        );
    }
    let transferred = second.transfer_estimates(&first, &[VertexKind::Tag]);
    second.set_vertices_fixed(&transferred, true);
    let second_result = optimizer.optimize(&mut second)?;
    debug!(
        "split at {}: first chi2 {}, second chi2 {} with {} transferred tags",
        len / 2,
        first_result.final_chi2,
        second_result.final_chi2,
        transferred.len()
    );

    Ok(SplitOutcome {
        first: first_result,
        second: second_result,
        transferred_tags: transferred.len(),
        dropped_tags: unshared.len(),
    })
}

/// What a sweep scores each weight vector by. Lower is better.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepMetric {
    /// Final chi2 of the whole capture.
    Chi2,
    /// Final chi2 of the second half of a [`split_comparison`].
    Split,
    /// [`ground_truth_metric`] of the optimized tags against these poses.
    GroundTruth(BTreeMap<u32, Pose>),
}

/// A grid of weight vectors around a base vector.
///
/// Each dimension is a set of weight components that always take the same value. Every
/// dimension takes every one of `values`, so the grid has `values.len()^dimensions.len()`
/// cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub base: NamedWeights,
    pub dimensions: Vec<Vec<usize>>,
    pub values: Vec<f64>,
}

impl Sweep {
    pub fn new(base: NamedWeights, dimensions: Vec<Vec<usize>>, values: Vec<f64>) -> Self {
        Self {
            base,
            dimensions,
            values,
        }
    }

    /// Every cell of the grid in row-major order, as indices into `values`.
    fn cells(&self) -> Vec<Vec<usize>> {
        self.dimensions
            .iter()
            .map(|_| 0..self.values.len())
            .multi_cartesian_product()
            .collect()
    }

    /// The base vector with each dimension set to the value at its index.
    fn weights(&self, cell: &[usize]) -> Vec<f64> {
        let mut weights = self.base.values.clone();
        for (components, &index) in self.dimensions.iter().zip(cell) {
            for &component in components {
                weights[component] = self.values[index];
            }
        }
        weights
    }

    fn validate(&self) -> Result<(), Error> {
        WeightVector::new(&self.base.values)?;
        if self.dimensions.is_empty() || self.values.is_empty() {
            return Err(Error::InvalidWeightVector(
                "a sweep needs at least one dimension and one value".to_string(),
            ));
        }
        if let Some(&component) = self
            .dimensions
            .iter()
            .flatten()
            .find(|&&c| c >= WEIGHT_VECTOR_LEN)
        {
            return Err(Error::InvalidWeightVector(format!(
                "component {} is out of range",
                component
            )));
        }
        if let Some(value) = self.values.iter().find(|v| !v.is_finite()) {
            return Err(Error::InvalidWeightVector(format!(
                "sweep value {} is not finite",
                value
            )));
        }
        Ok(())
    }
}

/// One weight vector of a sweep and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepCell {
    /// Index into the sweep values of every dimension.
    pub indices: Vec<usize>,
    pub weights: WeightVector,
    /// `None` when the run failed or the metric is undefined for it.
    pub metric: Option<f64>,
}

/// Every cell of a sweep, in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    pub values: Vec<f64>,
    pub cells: Vec<SweepCell>,
}

impl SweepResult {
    /// The cell with the lowest metric.
    pub fn best(&self) -> Option<&SweepCell> {
        self.cells
            .iter()
            .filter_map(|cell| Some((cell, cell.metric?)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(cell, _)| cell)
    }

    pub fn metric(&self, indices: &[usize]) -> Option<f64> {
        self.cells
            .iter()
            .find(|cell| cell.indices == indices)
            .and_then(|cell| cell.metric)
    }
}

/// Scores every weight vector of `sweep` on one capture.
///
/// Only an invalid sweep is an error. Runs that fail leave their cell without a metric.
pub fn sweep(
    capture: &Capture,
    prescaling: Prescaling,
    sweep: &Sweep,
    metric: &SweepMetric,
    settings: &ComparisonSettings,
) -> Result<SweepResult, Error> {
    sweep.validate()?;
    let cells = sweep.cells();
    info!(
        "sweeping {} weight vectors over {} dimensions",
        cells.len(),
        sweep.dimensions.len()
    );

    #[cfg(feature = "rayon")]
    let jobs = cells.into_par_iter();
    #[cfg(not(feature = "rayon"))]
    let jobs = cells.into_iter();

    let cells = jobs
        .map(|indices| {
            let values = sweep.weights(&indices);
            let named = NamedWeights::new(format!("{:?}", values), values);
            let scored = score(capture, prescaling, &named, metric, settings);
            if let Err(e) = &scored {
                debug!("{}: {}", named.name, e);
            }
            let value = scored.ok().flatten();
            trace!("{}: {:?}", named.name, value);
            Ok(SweepCell {
                indices,
                weights: WeightVector::new(&named.values)?,
                metric: value,
            })
        })
        .collect::<Result<Vec<SweepCell>, Error>>()?;

    let result = SweepResult {
        values: sweep.values.clone(),
        cells,
    };
    match result.best() {
        Some(best) => info!(
            "best sweep metric {} at {:?}",
            best.metric.unwrap_or(f64::NAN),
            best.indices
        ),
        None => warn!("no weight vector of the sweep produced a metric"),
    }
    Ok(result)
}

fn score(
    capture: &Capture,
    prescaling: Prescaling,
    weights: &NamedWeights,
    metric: &SweepMetric,
    settings: &ComparisonSettings,
) -> Result<Option<f64>, Error> {
    Ok(match metric {
        SweepMetric::Chi2 => Some(run(capture, prescaling, weights, settings)?.result.final_chi2),
        SweepMetric::Split => Some(
            split_comparison(capture, prescaling, weights, settings)?
                .second
                .final_chi2,
        ),
        SweepMetric::GroundTruth(truth) => {
            let outcome = run(capture, prescaling, weights, settings)?;
            ground_truth_metric(&outcome.map().tag_poses(), truth)
        }
    })
}
