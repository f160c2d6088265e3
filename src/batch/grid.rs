use ndarray::{Array3, ArrayView1, Axis};

use super::{Batch, Channel};
use crate::error::{PcaExpError, Result};

/// Rebins a batch onto a uniform grid.
///
/// Each grid point `g` collects the original positions whose x (taken from the first
/// measurement) lies in `[g - dx/2, g + dx/2)`, where `dx = grid[1] - grid[0]`. The
/// y-values of a window are averaged and the errors combined as `sqrt(sum e^2) / n`.
/// The x channel of the result is the grid point, repeated for every measurement.
///
/// A window without any original point fails with
/// [`PcaExpError::NumericDegeneracy`] instead of producing NaN.
pub fn resample_batch(batch: &Batch, grid: ArrayView1<f64>) -> Result<Batch> {
    if grid.len() < 2 {
        return Err(PcaExpError::InvalidArgument(format!(
            "target grid needs at least 2 points, got {}",
            grid.len()
        )));
    }
    let dx = grid[1] - grid[0];
    if !(dx > 0.0) {
        return Err(PcaExpError::InvalidArgument(format!(
            "target grid must be increasing, spacing is {}",
            dx
        )));
    }

    let y = batch.channel(Channel::Y)?;
    let e = batch.channel(Channel::Error)?;
    let x = batch.x_axis()?;
    let n_meas = batch.n_measurements();

    let mut out = Array3::<f64>::zeros((grid.len(), n_meas, 3));
    for (h, &g) in grid.iter().enumerate() {
        let lo = g - dx / 2.0;
        let hi = g + dx / 2.0;
        let members: Vec<usize> = x
            .iter()
            .enumerate()
            .filter(|&(_, &xi)| xi >= lo && xi < hi)
            .map(|(i, _)| i)
            .collect();

        if members.is_empty() {
            return Err(PcaExpError::NumericDegeneracy(format!(
                "no original point falls into the window [{}, {}) around grid point {}",
                lo, hi, g
            )));
        }
        let count = members.len() as f64;

        let y_window = y.select(Axis(0), &members);
        let e_window = e.select(Axis(0), &members);
        let y_mean = y_window.sum_axis(Axis(0)) / count;
        let e_comb = e_window.mapv(|v| v * v).sum_axis(Axis(0)).mapv(f64::sqrt) / count;

        let mut row = out.index_axis_mut(Axis(0), h);
        row.column_mut(Channel::X.index()).fill(g);
        row.column_mut(Channel::Y.index()).assign(&y_mean);
        row.column_mut(Channel::Error.index()).assign(&e_comb);
    }

    Ok(Batch::new(out))
}
