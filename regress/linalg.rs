//! Least squares through `faer`, with `ndarray` at the boundary.

use faer::linalg::solvers::{self, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};

use super::RegressionError;

/// Relative ridge added to the normal equations when the plain factorization
/// fails.
const RIDGE_SCALE: f64 = 1e-9;

enum Storage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

/// A `faer` view of an `ndarray` matrix, borrowed when the memory layout allows.
pub struct FaerView<'a> {
    storage: Storage<'a>,
}

impl<'a> FaerView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => {
                Storage::Borrowed(MatRef::from_row_major_slice(slice, rows, cols))
            }
            Some(slice) if array.t().is_standard_layout() => {
                Storage::Borrowed(MatRef::from_column_major_slice(slice, rows, cols))
            }
            _ => Storage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)])),
        };
        Self { storage }
    }

    pub fn as_ref(&self) -> MatRef<'_, f64> {
        match &self.storage {
            Storage::Borrowed(view) => *view,
            Storage::Owned(mat) => mat.as_ref(),
        }
    }
}

fn to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn factorize(gram: &Array2<f64>) -> Result<solvers::Llt<f64>, solvers::LltError> {
    FaerView::new(gram).as_ref().llt(Side::Lower)
}

/// Residual sum of squares of each column of `y` regressed on `design`.
///
/// Solves the normal equations by Cholesky. A rank-deficient design is retried
/// once with a small ridge on the diagonal.
pub fn residual_sum_of_squares(
    design: &Array2<f64>,
    y: &Array2<f64>,
) -> Result<Array1<f64>, RegressionError> {
    let (n, k) = design.dim();
    if n <= k {
        return Err(RegressionError::TooFewIndividuals {
            individuals: n,
            parameters: k,
        });
    }
    let mut gram = design.t().dot(design);
    let cross = design.t().dot(y);

    let factor = match factorize(&gram) {
        Ok(factor) => factor,
        Err(first) => {
            let scale = gram.diag().iter().copied().fold(0.0_f64, f64::max).max(1.0);
            let ridge = RIDGE_SCALE * scale;
            log::debug!("Normal equations not positive definite ({first:?}); retrying with ridge {ridge:e}");
            gram.diag_mut().mapv_inplace(|d| d + ridge);
            factorize(&gram).map_err(|e| RegressionError::Singular(format!("{e:?}")))?
        }
    };

    let cross_view = FaerView::new(&cross);
    let beta = to_array(factor.solve(cross_view.as_ref()).as_ref());
    let residuals = y - &design.dot(&beta);
    Ok(residuals.mapv(|r| r * r).sum_axis(Axis(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn recovers_exact_linear_fit() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![[1.0, 0.0], [3.0, 1.0], [5.0, 0.0], [7.0, 1.0]];
        let rss = residual_sum_of_squares(&x, &y).unwrap();
        assert_abs_diff_eq!(rss[0], 0.0, epsilon = 1e-10);
        // Alternating 0/1 against a line: fitted 0.2, 0.4, 0.6, 0.8.
        assert_abs_diff_eq!(rss[1], 0.8, epsilon = 1e-10);
    }

    #[test]
    fn duplicated_column_is_rescued_by_ridge() {
        let x = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let y = array![[1.0], [2.0], [3.0], [4.0]];
        let rss = residual_sum_of_squares(&x, &y).unwrap();
        assert_abs_diff_eq!(rss[0], 5.0, epsilon = 1e-6);
    }

    #[test]
    fn rejects_more_parameters_than_individuals() {
        let x = Array2::<f64>::ones((2, 3));
        let y = Array2::<f64>::ones((2, 1));
        assert!(matches!(
            residual_sum_of_squares(&x, &y),
            Err(RegressionError::TooFewIndividuals { .. })
        ));
    }
}
