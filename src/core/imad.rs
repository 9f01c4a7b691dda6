//! Iteratively re-weighted MAD accumulation
//!
//! The pairwise statistic is refined over a fixed number of passes. Each pass
//! is a pure step `(iteration, previous state) -> step output`; the fold that
//! threads the state through the passes lives here so it can be exercised
//! independently of any kernel.

use crate::types::{ChangeError, ChangeResult, Expr, Raster};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Result of one refinement pass
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub chi_square: Raster,
    pub change_metric: Raster,
    /// Canonical correlations of this pass (list-valued expression)
    pub correlations: Expr,
}

/// Accumulated state after `done` refinement passes.
///
/// Immutable: [`IterationState::advance`] returns a new state. The image and
/// the correlation history are shared graph nodes, so each pass adds a
/// constant number of nodes however many passes came before.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationState {
    done: u32,
    image: Raster,
    correlations: Vec<Expr>,
    /// `correlations` as one list-valued node, extended by one append per pass
    history: Expr,
    chi_square: Raster,
    change_metric: Raster,
}

impl IterationState {
    /// State before the first pass: the stacked pair, zero chi-square and MAD
    pub fn initial(image1: &Raster, image2: &Raster) -> Self {
        let image = image1.add_bands(image2);
        Self {
            done: 0,
            image: Raster::new(image.expr().clone().shared(), image.bands().to_vec()),
            correlations: Vec::new(),
            history: Expr::List { items: Vec::new() },
            chi_square: Raster::constant(0.0),
            change_metric: Raster::constant(0.0),
        }
    }

    /// Fold one pass into a new state
    pub fn advance(&self, output: StepOutput) -> Self {
        let mut correlations = self.correlations.clone();
        correlations.push(output.correlations.clone());
        Self {
            done: self.done + 1,
            image: self.image.clone(),
            correlations,
            history: self.history.append(output.correlations).shared(),
            chi_square: output.chi_square,
            change_metric: output.change_metric,
        }
    }

    pub fn done(&self) -> u32 {
        self.done
    }

    /// Both images, bands of the first followed by bands of the second
    pub fn image(&self) -> &Raster {
        &self.image
    }

    /// One correlation vector per completed pass, oldest first
    pub fn correlations(&self) -> &[Expr] {
        &self.correlations
    }

    pub fn chi_square(&self) -> &Raster {
        &self.chi_square
    }

    /// MAD variates
    pub fn change_metric(&self) -> &Raster {
        &self.change_metric
    }

    /// Correlation history as a single list-valued expression
    pub fn correlation_history(&self) -> Expr {
        Expr::List { items: self.correlations.clone() }
    }

    /// Dictionary form handed to remote kernels
    pub fn to_expr(&self) -> Expr {
        let mut entries = BTreeMap::new();
        entries.insert("done".to_string(), Expr::literal(self.done));
        entries.insert("image".to_string(), self.image.expr().clone());
        entries.insert("allrhos".to_string(), self.history.clone());
        entries.insert("chi2".to_string(), self.chi_square.expr().clone());
        entries.insert("MAD".to_string(), self.change_metric.expr().clone());
        Expr::Dict { entries }
    }
}

/// Pairwise iterative statistic kernel.
///
/// `step` must be a pure function of its arguments: identical inputs yield
/// identical outputs, and it must not retain the state it was given.
pub trait PairwiseKernel {
    fn step(&self, iteration: u32, previous: &IterationState) -> ChangeResult<StepOutput>;
}

/// Kernel evaluated by the compute service's `imad` function.
///
/// Builds lazy graph nodes only; nothing is sent until a result is materialized.
#[derive(Debug, Clone, Default)]
pub struct RemoteImadKernel;

impl PairwiseKernel for RemoteImadKernel {
    fn step(&self, iteration: u32, previous: &IterationState) -> ChangeResult<StepOutput> {
        let half = previous.image().band_count() / 2;
        if half == 0 || previous.image().band_count() % 2 != 0 {
            return Err(ChangeError::Validation(format!(
                "Pairwise kernel needs two images with equal band counts, got {} band(s)",
                previous.image().band_count()
            )));
        }

        // one node per pass; chi2, MAD and rhos all read from it
        let result = Expr::invoke(
            "imad",
            [("iteration", Expr::literal(iteration)), ("state", previous.to_expr())],
        )
        .shared();

        let mad_bands = (1..=half).map(|i| format!("MAD{}", i)).collect();
        Ok(StepOutput {
            chi_square: Raster::new(result.get("chi2"), vec!["chi2".to_string()]),
            change_metric: Raster::new(result.get("MAD"), mad_bands),
            correlations: result.get("rhos"),
        })
    }
}

/// Run exactly `iterations` passes of `kernel` over the image pair.
///
/// Passes are numbered from 1. There is no convergence check and no early exit;
/// the first kernel failure aborts the whole accumulation.
pub fn accumulate<K: PairwiseKernel + ?Sized>(
    kernel: &K,
    image1: &Raster,
    image2: &Raster,
    iterations: u32,
) -> ChangeResult<IterationState> {
    if iterations == 0 {
        return Err(ChangeError::Validation("Iteration count must be at least 1".to_string()));
    }
    if image1.band_count() != image2.band_count() {
        return Err(ChangeError::Validation(format!(
            "Image band counts differ: {} vs {}",
            image1.band_count(),
            image2.band_count()
        )));
    }

    log::info!("Iteration started ({} passes over {} band(s))", iterations, image1.band_count());

    let state = (1..=iterations).try_fold(IterationState::initial(image1, image2), |state, i| {
        log::debug!("Refinement pass {}/{}", i, iterations);
        let output = kernel.step(i, &state)?;
        Ok::<_, ChangeError>(state.advance(output))
    })?;

    log::info!("Accumulation completed after {} passes", state.done());
    Ok(state)
}

/// Materialized correlation history, one row per pass and one column per band
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationTable(pub Array2<f64>);

impl CorrelationTable {
    /// Decode `[[f64; bands]; passes]` as returned by the service
    pub fn from_json(value: &serde_json::Value) -> ChangeResult<Self> {
        let rows = value.as_array().ok_or_else(|| {
            ChangeError::RemoteService("Correlation history is not a list".to_string())
        })?;

        let mut width = None;
        let mut flat = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_array().ok_or_else(|| {
                ChangeError::RemoteService(format!("Correlation row {} is not a list", i))
            })?;
            if *width.get_or_insert(row.len()) != row.len() {
                return Err(ChangeError::RemoteService(format!(
                    "Correlation row {} has {} values, expected {}",
                    i,
                    row.len(),
                    width.unwrap_or_default()
                )));
            }
            for v in row {
                flat.push(v.as_f64().ok_or_else(|| {
                    ChangeError::RemoteService(format!("Non-numeric correlation in row {}", i))
                })?);
            }
        }

        let shape = (rows.len(), width.unwrap_or(0));
        Array2::from_shape_vec(shape, flat)
            .map(CorrelationTable)
            .map_err(|e| ChangeError::RemoteService(format!("Correlation table shape error: {}", e)))
    }

    pub fn passes(&self) -> usize {
        self.0.nrows()
    }

    /// Correlations of the last pass
    pub fn last(&self) -> Option<Vec<f64>> {
        (self.0.nrows() > 0).then(|| self.0.row(self.0.nrows() - 1).to_vec())
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.0.outer_iter().map(|r| r.to_vec()).collect()
    }
}
