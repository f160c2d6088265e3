use nalgebra::linalg::SVD as NalgebraSVD;
use ndarray::{Array1, Array2, ArrayView2};
use nshare::{IntoNalgebra, IntoNdarray2};

use crate::error::{PcaExpError, Result};

/// Thin singular value decomposition `X = U diag(S) Vt`, singular values descending.
pub struct SVD {
    u: Option<Array2<f64>>,
    s: Option<Array1<f64>>,
    vt: Option<Array2<f64>>,
}

impl SVD {
    pub fn new() -> Self {
        SVD {
            u: None,
            s: None,
            vt: None,
        }
    }

    /// Non-finite entries are rejected up front; the iterative solver would not
    /// terminate on them.
    pub fn compute(&mut self, x: ArrayView2<f64>) -> Result<()> {
        if let Some(bad) = x.iter().find(|v| !v.is_finite()) {
            return Err(PcaExpError::NumericDegeneracy(format!(
                "cannot decompose a matrix containing {}",
                bad
            )));
        }
        let matrix = x.into_nalgebra().clone_owned();

        let svd = NalgebraSVD::try_new(matrix, true, true, f64::EPSILON, 0).ok_or_else(|| {
            PcaExpError::NumericDegeneracy("singular value decomposition did not converge".to_string())
        })?;

        let u = svd
            .u
            .ok_or_else(|| PcaExpError::NumericDegeneracy("left singular vectors missing".to_string()))?;
        let vt = svd
            .v_t
            .ok_or_else(|| PcaExpError::NumericDegeneracy("right singular vectors missing".to_string()))?;

        self.u = Some(u.into_ndarray2());
        self.s = Some(Array1::from(svd.singular_values.as_slice().to_vec()));
        self.vt = Some(vt.into_ndarray2());

        Ok(())
    }

    pub fn u(&self) -> Option<&Array2<f64>> {
        self.u.as_ref()
    }

    pub fn s(&self) -> Option<&Array1<f64>> {
        self.s.as_ref()
    }

    pub fn vt(&self) -> Option<&Array2<f64>> {
        self.vt.as_ref()
    }
}

impl Default for SVD {
    fn default() -> Self {
        Self::new()
    }
}
