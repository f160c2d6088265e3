//! # Batch Store
//!
//! A batch is a set of repeated measurement curves sharing one x-axis, stored as a
//! 3-D array indexed by `(x-position, measurement, channel)`. The channel axis holds
//! x-values, y-values and (optionally) y-errors in that order.
//!
//! The [`BatchStore`] keeps every batch together with its display name in a single
//! ordered list, so a batch and its name can never drift apart. Batches are addressed
//! by position and are never removed.

use log::{debug, info};
use ndarray::{s, Array3, ArrayView1, ArrayView2, Axis};

use crate::error::{PcaExpError, Result};
use crate::utils::nearest_index;

mod grid;
mod loader;

pub use grid::resample_batch;
pub use loader::{parse_table, LoadOptions};

/// One of the channels along the last axis of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    X,
    Y,
    Error,
}

impl Channel {
    pub fn index(self) -> usize {
        match self {
            Channel::X => 0,
            Channel::Y => 1,
            Channel::Error => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    data: Array3<f64>,
}

impl Batch {
    /// Wraps an array shaped `(x-length, measurement-count, channel-count)`.
    ///
    /// Channel semantics are not validated: the caller supplies x, y and error in
    /// that order.
    pub fn new(data: Array3<f64>) -> Self {
        Batch { data }
    }

    pub fn x_len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_measurements(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn n_channels(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn has_errors(&self) -> bool {
        self.n_channels() > Channel::Error.index()
    }

    /// `(x-position, measurement)` view of one channel.
    pub fn channel(&self, channel: Channel) -> Result<ArrayView2<'_, f64>> {
        let idx = channel.index();
        if idx >= self.n_channels() {
            return Err(PcaExpError::ShapeMismatch(format!(
                "batch has {} channels, {:?} channel is missing",
                self.n_channels(),
                channel
            )));
        }
        Ok(self.data.index_axis(Axis(2), idx))
    }

    /// The x-values of the first measurement, used as the reference axis for
    /// slicing and grid resampling. A batch without measurements or channels has none.
    pub fn x_axis(&self) -> Result<ArrayView1<'_, f64>> {
        if self.n_measurements() == 0 || self.n_channels() == 0 {
            return Err(PcaExpError::ShapeMismatch(format!(
                "batch {:?} has no x-axis",
                self.data.dim()
            )));
        }
        Ok(self.data.slice(s![.., 0, 0]))
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn into_inner(self) -> Array3<f64> {
        self.data
    }
}

/// Bounds accepted by [`BatchStore::slice_by`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SliceBounds {
    /// Half-open `[start, stop)` index range along the x-axis.
    Index(usize, usize),
    /// x-values; each bound is replaced by the index of the nearest x-value.
    Value(f64, f64),
}

#[derive(Debug, Clone)]
struct BatchEntry {
    batch: Batch,
    name: String,
}

/// Ordered collection of batches and their names.
#[derive(Debug, Clone, Default)]
pub struct BatchStore {
    entries: Vec<BatchEntry>,
}

impl BatchStore {
    pub fn new() -> Self {
        BatchStore {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Batch> {
        self.entries
            .get(index)
            .map(|e| &e.batch)
            .ok_or(PcaExpError::UnknownBatch(index))
    }

    pub fn name(&self, index: usize) -> Result<&str> {
        self.entries
            .get(index)
            .map(|e| e.name.as_str())
            .ok_or(PcaExpError::UnknownBatch(index))
    }

    /// Index of the first batch carrying `name`.
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Batch)> {
        self.entries.iter().map(|e| (e.name.as_str(), &e.batch))
    }

    /// Appends a batch and returns its index. Without a name the index itself,
    /// rendered as a string, becomes the name.
    pub fn push(&mut self, batch: Batch, name: Option<&str>) -> usize {
        let index = self.entries.len();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| index.to_string());
        debug!(
            "storing batch {} '{}' with shape {:?}",
            index,
            name,
            batch.data().dim()
        );
        self.entries.push(BatchEntry { batch, name });
        index
    }

    /// Appends a pre-built `(x-length, measurement-count, channel-count)` array.
    pub fn load_from_array(&mut self, array: Array3<f64>, name: Option<&str>) -> usize {
        self.push(Batch::new(array), name)
    }

    /// Loads one file per number in the configured range and stacks them into a
    /// new batch. Nothing is stored unless every file parses.
    pub fn load_from_files(&mut self, options: &LoadOptions) -> Result<usize> {
        let batch = options.load()?;
        info!(
            "loaded {} measurements of {} points from {}",
            batch.n_measurements(),
            batch.x_len(),
            options.directory_str()
        );
        Ok(self.push(batch, options.name_str()))
    }

    /// Truncates a batch along x. Exactly one of `index_range` and `value_range`
    /// has to be given.
    pub fn slice(
        &mut self,
        index: usize,
        index_range: Option<(usize, usize)>,
        value_range: Option<(f64, f64)>,
    ) -> Result<()> {
        let bounds = match (index_range, value_range) {
            (Some((start, stop)), None) => SliceBounds::Index(start, stop),
            (None, Some((start, stop))) => SliceBounds::Value(start, stop),
            (Some(_), Some(_)) => {
                return Err(PcaExpError::InvalidArgument(
                    "slice takes either an index range or a value range, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(PcaExpError::InvalidArgument(
                    "slice needs an index range or a value range".to_string(),
                ))
            }
        };
        self.slice_by(index, bounds)
    }

    pub fn slice_by(&mut self, index: usize, bounds: SliceBounds) -> Result<()> {
        let batch = self.get(index)?;
        let (start, stop) = match bounds {
            SliceBounds::Index(start, stop) => (start, stop),
            SliceBounds::Value(lo, hi) => value_bounds_to_indices(batch, lo, hi)?,
        };

        if start >= stop || stop > batch.x_len() {
            return Err(PcaExpError::InvalidArgument(format!(
                "slice [{}, {}) is empty or outside the x-axis of length {}",
                start,
                stop,
                batch.x_len()
            )));
        }

        let sliced = batch.data().slice(s![start..stop, .., ..]).to_owned();
        debug!("sliced batch {} to x-range [{}, {})", index, start, stop);
        self.entries[index].batch = Batch::new(sliced);
        Ok(())
    }

    /// Resamples each listed batch onto `grid` (see [`resample_batch`]). Either all
    /// batches are replaced or, on error, none is.
    pub fn resample_to_grid(&mut self, grid: ArrayView1<f64>, indices: &[usize]) -> Result<()> {
        let mut unique: Vec<usize> = Vec::with_capacity(indices.len());
        for &i in indices {
            if !unique.contains(&i) {
                unique.push(i);
            }
        }

        let mut resampled = Vec::with_capacity(unique.len());
        for &i in &unique {
            resampled.push((i, resample_batch(self.get(i)?, grid)?));
        }

        for (i, batch) in resampled {
            debug!("batch {} resampled onto {} grid points", i, grid.len());
            self.entries[i].batch = batch;
        }
        Ok(())
    }
}

/// The `[start, stop)` indices a value-range slice resolves to.
pub fn value_bounds_to_indices(batch: &Batch, lo: f64, hi: f64) -> Result<(usize, usize)> {
    let x = batch.x_axis()?;
    let start = nearest_index(x, lo);
    let stop = nearest_index(x, hi);
    match (start, stop) {
        (Some(start), Some(stop)) => Ok((start, stop)),
        _ => Err(PcaExpError::InvalidArgument(
            "cannot slice a batch without x-values".to_string(),
        )),
    }
}
