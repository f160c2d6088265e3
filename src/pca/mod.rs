//! # Principal Component Analysis of measurement curves
//!
//! The engine mean-centers the amplitude matrix of a prepared dataset row by row
//! (the mean curve is the average over all measurements), decomposes it with an
//! [`SVDImplementation`] and stores curves, scores, singular values, the mean curve
//! and the centered matrix as one [`PcaResult`]. Results accumulate: every call to
//! [`PcaEngine::decompose`] appends a new entry, addressed by a [`ResultHandle`].
//!
//! Degenerate input (one measurement, rank-deficient data) is decomposed as-is.

use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::display::scree_chart;
use crate::error::{PcaExpError, Result};
use crate::prepare::{columns_for, BatchContribution, DataPreparer, DatasetHandle, PreparedDataset};
use crate::utils::next_owner_id;

// Trait for SVD implementations
pub trait SVDImplementation {
    /// Thin decomposition `(U, S, Vt)` with `S` in descending order.
    fn compute(&self, matrix: ArrayView2<f64>) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>)>;
}

/// Pure-Rust decomposition through `nalgebra`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NalgebraSVD;

impl SVDImplementation for NalgebraSVD {
    fn compute(&self, matrix: ArrayView2<f64>) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
        let mut svd = crate::svd::dense::SVD::new();
        svd.compute(matrix)?;
        match (svd.u(), svd.s(), svd.vt()) {
            (Some(u), Some(s), Some(vt)) => Ok((u.clone(), s.clone(), vt.clone())),
            _ => Err(PcaExpError::NumericDegeneracy(
                "decomposition produced no factors".to_string(),
            )),
        }
    }
}

#[cfg(feature = "faer")]
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerSVD;

#[cfg(feature = "faer")]
impl SVDImplementation for FaerSVD {
    fn compute(&self, matrix: ArrayView2<f64>) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
        let svd = crate::svd::faer::SVD::new(&matrix)?;

        Ok((svd.u().clone(), svd.s().clone(), svd.vt().clone()))
    }
}

/// Opaque reference to a result held by a [`PcaEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultHandle {
    owner: usize,
    index: usize,
}

/// One decomposition.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaResult {
    scores: Array2<f64>,
    curves: Array2<f64>,
    mean: Array1<f64>,
    singular_values: Array1<f64>,
    centered: Array2<f64>,
    source: Option<DatasetHandle>,
}

impl PcaResult {
    /// `component x measurement` projections of the centered data.
    pub fn scores(&self) -> &Array2<f64> {
        &self.scores
    }

    /// `x-bin x component` basis curves (left singular vectors).
    pub fn curves(&self) -> &Array2<f64> {
        &self.curves
    }

    /// Mean curve over all measurements, one value per x-bin.
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn singular_values(&self) -> &Array1<f64> {
        &self.singular_values
    }

    /// The input amplitude matrix with the mean curve removed.
    pub fn centered(&self) -> &Array2<f64> {
        &self.centered
    }

    /// The prepared dataset this result was computed from, when it came from a preparer.
    pub fn source(&self) -> Option<DatasetHandle> {
        self.source
    }

    pub fn n_components(&self) -> usize {
        self.singular_values.len()
    }

    /// Each singular value divided by their sum, the share of "covariance captured"
    /// shown in scree displays.
    pub fn explained_ratio(&self) -> Array1<f64> {
        let total = self.singular_values.sum();
        &self.singular_values / total
    }

    /// `mean + curves[:, ..k] * scores[..k, :]`. With `k = n_components()` this
    /// reproduces the input matrix.
    pub fn reconstruct(&self, k: usize) -> Result<Array2<f64>> {
        if k > self.n_components() {
            return Err(PcaExpError::InvalidArgument(format!(
                "cannot reconstruct from {} components, only {} exist",
                k,
                self.n_components()
            )));
        }
        let partial = self
            .curves
            .slice(s![.., ..k])
            .dot(&self.scores.slice(s![..k, ..]));
        Ok(partial + &self.mean.view().insert_axis(Axis(1)))
    }

    /// Score columns of the batch at `position` in a provenance record.
    pub fn scores_for_batch(
        &self,
        provenance: &[BatchContribution],
        position: usize,
    ) -> Result<ArrayView2<'_, f64>> {
        columns_for(&self.scores, provenance, position)
    }

    /// Reshapes one basis curve into a `rows x cols` map, undoing
    /// [`DataPreparer::prepare_maps`].
    pub fn curve_as_map(&self, component: usize, shape: (usize, usize)) -> Result<Array2<f64>> {
        if component >= self.curves.ncols() {
            return Err(PcaExpError::InvalidArgument(format!(
                "component {} out of {}",
                component,
                self.curves.ncols()
            )));
        }
        as_map(self.curves.column(component), shape)
    }

    /// The mean curve reshaped into a `rows x cols` map.
    pub fn mean_as_map(&self, shape: (usize, usize)) -> Result<Array2<f64>> {
        as_map(self.mean.view(), shape)
    }
}

fn as_map(curve: ArrayView1<f64>, (rows, cols): (usize, usize)) -> Result<Array2<f64>> {
    if rows * cols != curve.len() {
        return Err(PcaExpError::ShapeMismatch(format!(
            "{}x{} map does not hold a curve of {} points",
            rows,
            cols,
            curve.len()
        )));
    }
    Ok(Array2::from_shape_fn((rows, cols), |(r, c)| curve[r * cols + c]))
}

pub struct PcaEngineBuilder<S: SVDImplementation> {
    svd_implementation: S,
    log_scree: bool,
}

impl<S: SVDImplementation> PcaEngineBuilder<S> {
    pub fn new(svd_implementation: S) -> Self {
        PcaEngineBuilder {
            svd_implementation,
            log_scree: true,
        }
    }

    /// Log an ASCII scree chart at `info` level after each decomposition.
    pub fn log_scree(mut self, log_scree: bool) -> Self {
        self.log_scree = log_scree;
        self
    }

    pub fn build(self) -> PcaEngine<S> {
        PcaEngine {
            owner: next_owner_id(),
            svd_implementation: self.svd_implementation,
            log_scree: self.log_scree,
            results: Vec::new(),
        }
    }
}

pub struct PcaEngine<S: SVDImplementation = NalgebraSVD> {
    owner: usize,
    svd_implementation: S,
    log_scree: bool,
    results: Vec<PcaResult>,
}

impl PcaEngine<NalgebraSVD> {
    pub fn new() -> Self {
        PcaEngineBuilder::new(NalgebraSVD).build()
    }
}

impl Default for PcaEngine<NalgebraSVD> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SVDImplementation> PcaEngine<S> {
    /// Decomposes the amplitude matrix of a prepared dataset.
    pub fn decompose(&mut self, preparer: &DataPreparer, handle: DatasetHandle) -> Result<ResultHandle> {
        let dataset = preparer.dataset(handle)?;
        let result = self.run(dataset.amplitude().view(), Some(handle))?;
        Ok(self.push(result))
    }

    /// Decomposes a dataset that is not held by a preparer.
    pub fn decompose_dataset(&mut self, dataset: &PreparedDataset) -> Result<ResultHandle> {
        let result = self.run(dataset.amplitude().view(), None)?;
        Ok(self.push(result))
    }

    pub fn result(&self, handle: ResultHandle) -> Result<&PcaResult> {
        if handle.owner != self.owner {
            return Err(PcaExpError::UnknownHandle(handle.index));
        }
        self.results
            .get(handle.index)
            .ok_or(PcaExpError::UnknownHandle(handle.index))
    }

    pub fn latest(&self) -> Option<&PcaResult> {
        self.results.last()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PcaResult> {
        self.results.iter()
    }

    fn run(&self, amplitude: ArrayView2<f64>, source: Option<DatasetHandle>) -> Result<PcaResult> {
        let (n_bins, n_meas) = amplitude.dim();
        if n_bins == 0 || n_meas == 0 {
            return Err(PcaExpError::InvalidArgument(format!(
                "cannot decompose an empty {}x{} matrix",
                n_bins, n_meas
            )));
        }

        let mean = amplitude.mean_axis(Axis(1)).ok_or_else(|| {
            PcaExpError::InvalidArgument("amplitude matrix has no measurements".to_string())
        })?;
        let centered = &amplitude - &mean.view().insert_axis(Axis(1));

        info!("performing PCA on {} bins x {} measurements", n_bins, n_meas);
        let (curves, singular_values, _vt) = self.svd_implementation.compute(centered.view())?;
        let scores = curves.t().dot(&centered);
        debug!("leading singular values: {:?}", singular_values.slice(s![..singular_values.len().min(4)]));

        if self.log_scree {
            info!(
                "share of singular values captured by the leading components:\n{}",
                scree_chart(singular_values.view(), 8, 10)
            );
        }

        Ok(PcaResult {
            scores,
            curves,
            mean,
            singular_values,
            centered,
            source,
        })
    }

    fn push(&mut self, result: PcaResult) -> ResultHandle {
        self.results.push(result);
        ResultHandle {
            owner: self.owner,
            index: self.results.len() - 1,
        }
    }
}
