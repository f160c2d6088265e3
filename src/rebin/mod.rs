//! # Error-equalizing rebinning
//!
//! Merges adjacent x-positions of one or more batches into coarser bins so that every
//! bin carries roughly the same statistical weight.
//!
//! The walk fixes a reference variance `a` (by default the summed squared errors of all
//! measurements at the first x-position) and visits the positions in order. Position
//! `i` contributes the normalized variance `v_i = sum_j E[i, j]^2 / a`. After each
//! position the [`StoppingRule`] decides whether the running bin is complete. A closed
//! bin stores, per measurement, the mean amplitude, the mean x-value and the RMS
//! combination of the errors, plus the equalized error `sqrt(a * sum v_i) / (M * n)`
//! where `M` is the measurement count and `n` the bin width.
//!
//! The last bin is closed at the end of the walk whether or not the rule fired and is
//! then dropped, since it is usually undersized.

use log::{debug, trace};
use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};

use crate::batch::{Batch, Channel};
use crate::error::{PcaExpError, Result};
use crate::utils::ZeroVec;

/// When a running bin is complete. Both rules compare against 1 inclusively, so
/// positions that already carry the reference variance stay single bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoppingRule {
    /// `sum 1 / v_i >= 1` over the positions of the bin.
    #[default]
    InverseVarianceSum,
    /// `n^2 / sum v_i >= 1`; guarantees the equalized error of every closed bin is at
    /// most the reference error `sqrt(a) / M`.
    SquaredWidthOverVariance,
}

impl StoppingRule {
    fn fires(&self, acc: &BinAccumulator) -> bool {
        match self {
            StoppingRule::InverseVarianceSum => acc.inverse_sum >= 1.0,
            StoppingRule::SquaredWidthOverVariance => {
                let n = acc.width as f64;
                n * n / acc.variance_sum >= 1.0
            }
        }
    }
}

/// Per-position notification emitted during the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebinProgress {
    /// Zero-based index of the position just processed.
    pub position: usize,
    pub total: usize,
    pub bins_closed: usize,
}

/// Result of a rebinning walk, one row (or entry) per bin.
#[derive(Debug, Clone, PartialEq)]
pub struct RebinnedSeries {
    amplitude: Array2<f64>,
    error: Array1<f64>,
    width: Vec<usize>,
    x: Array2<f64>,
    rms_error: Array2<f64>,
    reference_scale: f64,
}

impl RebinnedSeries {
    pub fn n_bins(&self) -> usize {
        self.width.len()
    }

    pub fn n_measurements(&self) -> usize {
        self.amplitude.ncols()
    }

    /// Mean amplitude, `bins x measurements`.
    pub fn amplitude(&self) -> &Array2<f64> {
        &self.amplitude
    }

    /// Equalized error, one value per bin.
    pub fn error(&self) -> &Array1<f64> {
        &self.error
    }

    /// Number of original x-positions merged into each bin.
    pub fn width(&self) -> &[usize] {
        &self.width
    }

    /// Mean x-value, `bins x measurements`.
    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    /// `sqrt(sum e^2) / n` per bin and measurement: the calibrated error of each
    /// averaged amplitude.
    pub fn rms_error(&self) -> &Array2<f64> {
        &self.rms_error
    }

    /// The `a` the walk normalized against.
    pub fn reference_scale(&self) -> f64 {
        self.reference_scale
    }
}

pub struct RebinnerBuilder {
    rule: StoppingRule,
    reference_scale: Option<f64>,
}

impl RebinnerBuilder {
    pub fn new() -> Self {
        RebinnerBuilder {
            rule: StoppingRule::default(),
            reference_scale: None,
        }
    }

    pub fn rule(mut self, rule: StoppingRule) -> Self {
        self.rule = rule;
        self
    }

    /// Overrides the reference variance. Without it, the summed squared errors of the
    /// first x-position are used.
    pub fn reference_scale(mut self, a: f64) -> Self {
        self.reference_scale = Some(a);
        self
    }

    pub fn build(self) -> Rebinner {
        Rebinner {
            rule: self.rule,
            reference_scale: self.reference_scale,
        }
    }
}

impl Default for RebinnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rebinner {
    rule: StoppingRule,
    reference_scale: Option<f64>,
}

struct BinAccumulator {
    amplitude: Vec<f64>,
    x: Vec<f64>,
    squared_error: Vec<f64>,
    variance_sum: f64,
    inverse_sum: f64,
    width: usize,
}

impl BinAccumulator {
    fn new(n_meas: usize) -> Self {
        BinAccumulator {
            amplitude: vec![0.0; n_meas],
            x: vec![0.0; n_meas],
            squared_error: vec![0.0; n_meas],
            variance_sum: 0.0,
            inverse_sum: 0.0,
            width: 0,
        }
    }

    fn reset(&mut self) {
        let n = self.amplitude.len();
        self.amplitude.zero_len(n);
        self.x.zero_len(n);
        self.squared_error.zero_len(n);
        self.variance_sum = 0.0;
        self.inverse_sum = 0.0;
        self.width = 0;
    }
}

#[derive(Default)]
struct ClosedBins {
    amplitude: Vec<f64>,
    x: Vec<f64>,
    rms_error: Vec<f64>,
    error: Vec<f64>,
    width: Vec<usize>,
}

impl ClosedBins {
    fn close(&mut self, acc: &BinAccumulator, a: f64) {
        let n = acc.width as f64;
        let m = acc.amplitude.len() as f64;
        self.amplitude.extend(acc.amplitude.iter().map(|v| v / n));
        self.x.extend(acc.x.iter().map(|v| v / n));
        self.rms_error
            .extend(acc.squared_error.iter().map(|v| v.sqrt() / n));
        self.error.push((a * acc.variance_sum).sqrt() / m / n);
        self.width.push(acc.width);
    }

    fn drop_last(&mut self, n_meas: usize) {
        if self.width.pop().is_some() {
            self.error.pop();
            let keep = self.width.len() * n_meas;
            self.amplitude.truncate(keep);
            self.x.truncate(keep);
            self.rms_error.truncate(keep);
        }
    }
}

impl Rebinner {
    pub fn new(rule: StoppingRule) -> Self {
        Rebinner {
            rule,
            reference_scale: None,
        }
    }

    pub fn rule(&self) -> StoppingRule {
        self.rule
    }

    pub fn rebin(&self, batches: &[&Batch]) -> Result<RebinnedSeries> {
        self.rebin_with_progress(batches, |_| {})
    }

    /// Rebins the batches concatenated along the measurement axis, calling `observer`
    /// once per processed x-position.
    pub fn rebin_with_progress<F>(&self, batches: &[&Batch], mut observer: F) -> Result<RebinnedSeries>
    where
        F: FnMut(RebinProgress),
    {
        let (t, amp, err) = concatenate_batches(batches)?;
        let (n_x, n_meas) = amp.dim();

        let a = match self.reference_scale {
            Some(a) => a,
            None => err.row(0).iter().map(|e| e * e).sum::<f64>(),
        };
        if !(a.is_finite() && a > 0.0) {
            return Err(PcaExpError::NumericDegeneracy(format!(
                "reference variance must be positive and finite, got {}",
                a
            )));
        }

        let mut acc = BinAccumulator::new(n_meas);
        let mut bins = ClosedBins::default();

        for i in 0..n_x {
            let v = err.row(i).iter().map(|e| e * e).sum::<f64>() / a;
            if !(v.is_finite() && v > 0.0) {
                return Err(PcaExpError::NumericDegeneracy(format!(
                    "x-position {} has normalized variance {}",
                    i, v
                )));
            }

            for (j, ((s, xs), q)) in acc
                .amplitude
                .iter_mut()
                .zip(acc.x.iter_mut())
                .zip(acc.squared_error.iter_mut())
                .enumerate()
            {
                *s += amp[[i, j]];
                *xs += t[[i, j]];
                *q += err[[i, j]] * err[[i, j]];
            }
            acc.variance_sum += v;
            acc.inverse_sum += 1.0 / v;
            acc.width += 1;

            observer(RebinProgress {
                position: i,
                total: n_x,
                bins_closed: bins.width.len(),
            });

            if self.rule.fires(&acc) || i == n_x - 1 {
                trace!("closing bin {} with width {}", bins.width.len(), acc.width);
                bins.close(&acc, a);
                acc.reset();
            }
        }

        bins.drop_last(n_meas);
        let n_bins = bins.width.len();
        debug!(
            "rebinned {} positions x {} measurements into {} bins ({:?})",
            n_x, n_meas, n_bins, self.rule
        );

        let shape = (n_bins, n_meas);
        let to_matrix = |v: Vec<f64>| {
            Array2::from_shape_vec(shape, v).map_err(|e| PcaExpError::ShapeMismatch(e.to_string()))
        };
        Ok(RebinnedSeries {
            amplitude: to_matrix(bins.amplitude)?,
            x: to_matrix(bins.x)?,
            rms_error: to_matrix(bins.rms_error)?,
            error: Array1::from(bins.error),
            width: bins.width,
            reference_scale: a,
        })
    }
}

/// Joins the x, y and error channels of the batches along the measurement axis.
pub fn concatenate_batches(batches: &[&Batch]) -> Result<(Array2<f64>, Array2<f64>, Array2<f64>)> {
    let first = batches
        .first()
        .ok_or_else(|| PcaExpError::InvalidArgument("no batches to rebin".to_string()))?;

    for (i, b) in batches.iter().enumerate() {
        if b.x_len() != first.x_len() {
            return Err(PcaExpError::ShapeMismatch(format!(
                "batch {} has x-length {}, the first batch has {}",
                i,
                b.x_len(),
                first.x_len()
            )));
        }
        if b.n_channels() != first.n_channels() {
            return Err(PcaExpError::ShapeMismatch(format!(
                "batch {} has {} channels, the first batch has {}",
                i,
                b.n_channels(),
                first.n_channels()
            )));
        }
    }
    if !first.has_errors() {
        return Err(PcaExpError::ShapeMismatch(
            "rebinning needs an error channel".to_string(),
        ));
    }
    if first.x_len() == 0 {
        return Err(PcaExpError::InvalidArgument(
            "batches have no x-positions".to_string(),
        ));
    }

    let join = |channel: Channel| -> Result<Array2<f64>> {
        let views = batches
            .iter()
            .map(|b| b.channel(channel))
            .collect::<Result<Vec<ArrayView2<f64>>>>()?;
        concatenate(Axis(1), &views).map_err(|e| PcaExpError::ShapeMismatch(e.to_string()))
    };
    Ok((join(Channel::X)?, join(Channel::Y)?, join(Channel::Error)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Batch whose error at position `i` is `errors[i]` for every measurement and whose
    /// amplitude is `i + 10 * j`.
    fn batch_with_errors(errors: &[f64], n_meas: usize) -> Batch {
        Batch::new(Array3::from_shape_fn(
            (errors.len(), n_meas, 3),
            |(i, j, k)| match k {
                0 => i as f64,
                1 => i as f64 + 10.0 * j as f64,
                _ => errors[i],
            },
        ))
    }

    #[test]
    fn test_uniform_errors_keep_one_bin_per_position() {
        init_logger();
        let batch = batch_with_errors(&[1.0; 100], 5);
        for rule in [
            StoppingRule::InverseVarianceSum,
            StoppingRule::SquaredWidthOverVariance,
        ] {
            let series = Rebinner::new(rule).rebin(&[&batch]).unwrap();
            assert_abs_diff_eq!(series.reference_scale(), 5.0);
            assert_eq!(series.n_bins(), 99);
            assert!(series.width().iter().all(|&w| w == 1));
            assert_eq!(series.amplitude().dim(), (99, 5));
            assert_eq!(series.amplitude()[[42, 3]], 42.0 + 30.0);
        }
    }

    #[test]
    fn test_rules_pick_different_boundaries() {
        let errors = [1.0, 2.0, 1.0, 1.0, 5.0];
        let batch = batch_with_errors(&errors, 2);

        let a = Rebinner::new(StoppingRule::InverseVarianceSum)
            .rebin(&[&batch])
            .unwrap();
        assert_eq!(a.width(), &[1, 2, 1]);

        let b = Rebinner::new(StoppingRule::SquaredWidthOverVariance)
            .rebin(&[&batch])
            .unwrap();
        assert_eq!(b.width(), &[1, 3]);

        // Second bin of rule b merges positions 1..=3: v = 4 + 1 + 1, a = 2, M = 2, n = 3.
        assert_abs_diff_eq!(b.error()[1], (2.0f64 * 6.0).sqrt() / 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b.rms_error()[[1, 0]], 6.0f64.sqrt() / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b.amplitude()[[1, 1]], 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b.x()[[1, 0]], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_widths_account_for_all_but_last_bin() {
        let errors: Vec<f64> = (0..300)
            .map(|i| 0.02 * ((0.1 * i as f64 * 0.04).exp() + 0.01))
            .collect();
        let batch = batch_with_errors(&errors, 4);

        for rule in [
            StoppingRule::InverseVarianceSum,
            StoppingRule::SquaredWidthOverVariance,
        ] {
            let mut last_width = 0;
            let mut acc = BinAccumulator::new(4);
            for (i, e) in errors.iter().enumerate() {
                let v = std::iter::repeat_n(e * e, 4).sum::<f64>()
                    / std::iter::repeat_n(errors[0] * errors[0], 4).sum::<f64>();
                acc.variance_sum += v;
                acc.inverse_sum += 1.0 / v;
                acc.width += 1;
                if rule.fires(&acc) || i == errors.len() - 1 {
                    last_width = acc.width;
                    acc.reset();
                }
            }

            let series = Rebinner::new(rule).rebin(&[&batch]).unwrap();
            let total: usize = series.width().iter().sum();
            assert_eq!(total, errors.len() - last_width);
            assert_eq!(series.error().len(), series.n_bins());
            assert_eq!(series.x().nrows(), series.n_bins());
            assert_eq!(series.rms_error().nrows(), series.n_bins());
        }
    }

    #[test]
    fn test_squared_width_rule_bounds_error() {
        let errors: Vec<f64> = (0..200).map(|i| 0.01 * (1.0 + 0.05 * i as f64)).collect();
        let batch = batch_with_errors(&errors, 3);
        let series = Rebinner::new(StoppingRule::SquaredWidthOverVariance)
            .rebin(&[&batch])
            .unwrap();

        let reference = series.reference_scale().sqrt() / 3.0;
        assert!(series.n_bins() > 1);
        for &e in series.error() {
            assert!(e <= reference * (1.0 + 1e-12));
        }
        // Errors grow along x, so bins widen.
        assert!(series.width().last().unwrap() > &series.width()[0]);
    }

    #[test]
    fn test_explicit_reference_scale() {
        let batch = batch_with_errors(&[1.0; 100], 5);
        let series = RebinnerBuilder::new()
            .reference_scale(1.25)
            .build()
            .rebin(&[&batch])
            .unwrap();
        assert_eq!(series.n_bins(), 24);
        assert!(series.width().iter().all(|&w| w == 4));
    }

    #[test]
    fn test_concatenated_batches() {
        let errors = [1.0, 2.0, 1.0, 1.0, 5.0, 1.0];
        let left = batch_with_errors(&errors, 2);
        let right = batch_with_errors(&errors, 3);
        let joined = batch_with_errors(&errors, 5);

        let rebinner = Rebinner::default();
        let split = rebinner.rebin(&[&left, &right]).unwrap();
        let whole = rebinner.rebin(&[&joined]).unwrap();

        assert_eq!(split.width(), whole.width());
        assert_eq!(split.n_measurements(), 5);
        assert_eq!(split.error(), whole.error());
    }

    #[test]
    fn test_progress_reports_every_position() {
        let batch = batch_with_errors(&[1.0; 12], 2);
        let mut seen = Vec::new();
        Rebinner::default()
            .rebin_with_progress(&[&batch], |p| seen.push(p))
            .unwrap();

        assert_eq!(seen.len(), 12);
        assert_eq!(seen[0].bins_closed, 0);
        assert_eq!(seen[11].position, 11);
        assert_eq!(seen[11].total, 12);
        assert_eq!(seen[11].bins_closed, 11);
    }

    #[test]
    fn test_failure_modes() {
        let rebinner = Rebinner::default();
        assert!(matches!(
            rebinner.rebin(&[]),
            Err(PcaExpError::InvalidArgument(_))
        ));

        let short = batch_with_errors(&[1.0; 5], 2);
        let long = batch_with_errors(&[1.0; 6], 2);
        assert!(matches!(
            rebinner.rebin(&[&short, &long]),
            Err(PcaExpError::ShapeMismatch(_))
        ));

        let no_errors = Batch::new(Array3::zeros((5, 2, 2)));
        assert!(matches!(
            rebinner.rebin(&[&no_errors]),
            Err(PcaExpError::ShapeMismatch(_))
        ));

        let zero_first = batch_with_errors(&[0.0, 1.0, 1.0], 2);
        assert!(matches!(
            rebinner.rebin(&[&zero_first]),
            Err(PcaExpError::NumericDegeneracy(_))
        ));

        let zero_later = batch_with_errors(&[1.0, 0.0, 1.0], 2);
        assert!(matches!(
            rebinner.rebin(&[&zero_later]),
            Err(PcaExpError::NumericDegeneracy(_))
        ));
    }
}
