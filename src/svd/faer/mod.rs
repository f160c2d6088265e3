use faer_ext::*;
use ndarray::{Array1, Array2, ArrayView2};

use crate::error::{PcaExpError, Result};

/// Thin SVD computed by `faer`.
pub struct SVD {
    u: Array2<f64>,
    s: Array1<f64>,
    vt: Array2<f64>,
}

impl SVD {
    pub fn new(array: &ArrayView2<f64>) -> Result<Self> {
        if array.iter().any(|v| !v.is_finite()) {
            return Err(PcaExpError::NumericDegeneracy(
                "cannot decompose a matrix containing non-finite values".to_string(),
            ));
        }
        let faer_mat = array.into_faer();
        let svd = faer_mat.thin_svd();
        let u = svd.u().into_ndarray().to_owned();
        let s: Array1<f64> = Array1::from_iter(svd.s_diagonal().iter().cloned());
        let vt = svd.v().transpose().into_ndarray().to_owned();

        Ok(SVD { u, s, vt })
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn s(&self) -> &Array1<f64> {
        &self.s
    }

    pub fn vt(&self) -> &Array2<f64> {
        &self.vt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_faer_matches_known_singular_values() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let svd = SVD::new(&a.view()).unwrap();
        assert_abs_diff_eq!(svd.s()[0], 5.4649857, epsilon = 1e-6);
        assert_abs_diff_eq!(svd.s()[1], 0.3659662, epsilon = 1e-6);

        let rebuilt = svd.u().dot(&Array2::from_diag(svd.s())).dot(svd.vt());
        for (r, o) in rebuilt.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*r, *o, epsilon = 1e-9);
        }
    }
}
