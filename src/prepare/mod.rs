//! # Data preparation
//!
//! Turns stored batches into the `(amplitude, x, error)` matrices the PCA engine
//! consumes. Rows are x-bins, columns are measurements of all contributing batches in
//! the order the batches were named. Each prepared dataset is addressed by a
//! [`DatasetHandle`] and can carry a provenance record mapping its columns back to
//! the source batches.

use log::{debug, info};
use ndarray::{Array2, ArrayView2, ArrayView3};

use crate::batch::{Batch, BatchStore, Channel};
use crate::error::{PcaExpError, Result};
use crate::rebin::{RebinProgress, RebinnedSeries, RebinnerBuilder, StoppingRule};
use crate::utils::next_owner_id;

/// One contributing batch: its store index and how many measurement columns it added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchContribution {
    pub bidx: usize,
    pub mlen: usize,
}

/// Opaque reference to a dataset held by a [`DataPreparer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetHandle {
    owner: usize,
    index: usize,
}

/// The three `bins x measurements` matrices fed to PCA.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDataset {
    amplitude: Array2<f64>,
    x: Array2<f64>,
    error: Array2<f64>,
}

impl PreparedDataset {
    pub fn new(amplitude: Array2<f64>, x: Array2<f64>, error: Array2<f64>) -> Result<Self> {
        if amplitude.dim() != x.dim() || amplitude.dim() != error.dim() {
            return Err(PcaExpError::ShapeMismatch(format!(
                "amplitude {:?}, x {:?} and error {:?} must share one shape",
                amplitude.dim(),
                x.dim(),
                error.dim()
            )));
        }
        Ok(PreparedDataset {
            amplitude,
            x,
            error,
        })
    }

    pub fn amplitude(&self) -> &Array2<f64> {
        &self.amplitude
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn error(&self) -> &Array2<f64> {
        &self.error
    }

    pub fn n_bins(&self) -> usize {
        self.amplitude.nrows()
    }

    pub fn n_measurements(&self) -> usize {
        self.amplitude.ncols()
    }
}

/// How [`DataPreparer::prepare`] treats its batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepareOptions {
    rebin: bool,
    precomputed_error: Option<f64>,
    preserve_provenance: bool,
    rule: StoppingRule,
}

impl PrepareOptions {
    pub fn new() -> Self {
        PrepareOptions {
            rebin: true,
            precomputed_error: None,
            preserve_provenance: true,
            rule: StoppingRule::default(),
        }
    }

    /// Without rebinning only the first named batch is used, as-is.
    pub fn rebin(mut self, rebin: bool) -> Self {
        self.rebin = rebin;
        self
    }

    /// Reference variance for the rebinner instead of the first-position value.
    pub fn precomputed_error(mut self, a: f64) -> Self {
        self.precomputed_error = Some(a);
        self
    }

    pub fn preserve_provenance(mut self, preserve: bool) -> Self {
        self.preserve_provenance = preserve;
        self
    }

    pub fn rule(mut self, rule: StoppingRule) -> Self {
        self.rule = rule;
        self
    }
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct PreparedEntry {
    dataset: PreparedDataset,
    provenance: Option<Vec<BatchContribution>>,
    rebinned: Option<RebinnedSeries>,
}

/// Holds every dataset prepared so far. Entries are appended, never replaced.
#[derive(Debug)]
pub struct DataPreparer {
    owner: usize,
    entries: Vec<PreparedEntry>,
}

impl DataPreparer {
    pub fn new() -> Self {
        DataPreparer {
            owner: next_owner_id(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn prepare(
        &mut self,
        store: &BatchStore,
        batch_indices: &[usize],
        options: &PrepareOptions,
    ) -> Result<DatasetHandle> {
        self.prepare_with_progress(store, batch_indices, options, |_| {})
    }

    /// Like [`prepare`](Self::prepare), forwarding rebinning progress to `observer`.
    pub fn prepare_with_progress<F>(
        &mut self,
        store: &BatchStore,
        batch_indices: &[usize],
        options: &PrepareOptions,
        observer: F,
    ) -> Result<DatasetHandle>
    where
        F: FnMut(RebinProgress),
    {
        let first = *batch_indices
            .first()
            .ok_or_else(|| PcaExpError::InvalidArgument("no batch indices to prepare".to_string()))?;
        let batches = batch_indices
            .iter()
            .map(|&i| store.get(i))
            .collect::<Result<Vec<&Batch>>>()?;

        let (dataset, rebinned, used) = if options.rebin {
            let mut builder = RebinnerBuilder::new().rule(options.rule);
            if let Some(a) = options.precomputed_error {
                builder = builder.reference_scale(a);
            }
            let series = builder.build().rebin_with_progress(&batches, observer)?;
            let dataset = PreparedDataset::new(
                series.amplitude().clone(),
                series.x().clone(),
                series.rms_error().clone(),
            )?;
            (dataset, Some(series), batch_indices.to_vec())
        } else {
            if batch_indices.len() > 1 {
                debug!(
                    "preparing without rebinning uses batch {} only, ignoring {} more",
                    first,
                    batch_indices.len() - 1
                );
            }
            (raw_dataset(batches[0])?, None, vec![first])
        };

        let provenance = if options.preserve_provenance {
            Some(
                used.iter()
                    .map(|&i| {
                        store.get(i).map(|b| BatchContribution {
                            bidx: i,
                            mlen: b.n_measurements(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            None
        };

        info!(
            "prepared dataset {} from batches {:?}: {} bins x {} measurements",
            self.entries.len(),
            used,
            dataset.n_bins(),
            dataset.n_measurements()
        );
        Ok(self.push(PreparedEntry {
            dataset,
            provenance,
            rebinned,
        }))
    }

    /// Flattens a stack of 2-D maps shaped `(measurement, rows, cols)` into one column
    /// per map. The x-matrix holds the flat row-major pixel index; errors are zero.
    pub fn prepare_maps(&mut self, stack: ArrayView3<f64>) -> Result<DatasetHandle> {
        let (n_meas, rows, cols) = stack.dim();
        if n_meas == 0 || rows * cols == 0 {
            return Err(PcaExpError::InvalidArgument(format!(
                "map stack {:?} is empty",
                stack.dim()
            )));
        }
        let pixels = rows * cols;
        let amplitude = Array2::from_shape_fn((pixels, n_meas), |(p, m)| stack[[m, p / cols, p % cols]]);
        let x = Array2::from_shape_fn((pixels, n_meas), |(p, _)| p as f64);
        let error = Array2::zeros((pixels, n_meas));

        debug!("flattened {} maps of {}x{} pixels", n_meas, rows, cols);
        Ok(self.push(PreparedEntry {
            dataset: PreparedDataset::new(amplitude, x, error)?,
            provenance: None,
            rebinned: None,
        }))
    }

    pub fn dataset(&self, handle: DatasetHandle) -> Result<&PreparedDataset> {
        self.entry(handle).map(|e| &e.dataset)
    }

    pub fn provenance(&self, handle: DatasetHandle) -> Result<Option<&[BatchContribution]>> {
        self.entry(handle).map(|e| e.provenance.as_deref())
    }

    /// The rebinned series a dataset was built from, if it was rebinned.
    pub fn rebinned(&self, handle: DatasetHandle) -> Result<Option<&RebinnedSeries>> {
        self.entry(handle).map(|e| e.rebinned.as_ref())
    }

    fn push(&mut self, entry: PreparedEntry) -> DatasetHandle {
        self.entries.push(entry);
        DatasetHandle {
            owner: self.owner,
            index: self.entries.len() - 1,
        }
    }

    fn entry(&self, handle: DatasetHandle) -> Result<&PreparedEntry> {
        if handle.owner != self.owner {
            return Err(PcaExpError::UnknownHandle(handle.index));
        }
        self.entries
            .get(handle.index)
            .ok_or(PcaExpError::UnknownHandle(handle.index))
    }
}

impl Default for DataPreparer {
    fn default() -> Self {
        Self::new()
    }
}

fn raw_dataset(batch: &Batch) -> Result<PreparedDataset> {
    let amplitude = batch.channel(Channel::Y)?.to_owned();
    let x = batch.channel(Channel::X)?.to_owned();
    let error = if batch.has_errors() {
        batch.channel(Channel::Error)?.to_owned()
    } else {
        Array2::zeros(amplitude.dim())
    };
    PreparedDataset::new(amplitude, x, error)
}

/// Column range of each contribution, in order.
pub fn column_ranges(provenance: &[BatchContribution]) -> Vec<std::ops::Range<usize>> {
    let mut start = 0;
    provenance
        .iter()
        .map(|c| {
            let range = start..start + c.mlen;
            start += c.mlen;
            range
        })
        .collect()
}

/// Columns of `matrix` contributed by the batch at `position` in the provenance record.
pub fn columns_for<'a>(
    matrix: &'a Array2<f64>,
    provenance: &[BatchContribution],
    position: usize,
) -> Result<ArrayView2<'a, f64>> {
    let ranges = column_ranges(provenance);
    let range = ranges.get(position).cloned().ok_or_else(|| {
        PcaExpError::InvalidArgument(format!(
            "provenance has {} batches, asked for position {}",
            ranges.len(),
            position
        ))
    })?;
    if range.end > matrix.ncols() {
        return Err(PcaExpError::ShapeMismatch(format!(
            "provenance covers {} columns, matrix has {}",
            range.end,
            matrix.ncols()
        )));
    }
    Ok(matrix.slice(ndarray::s![.., range]))
}
