//! EDM completion through a masked low-rank factorization
//!
//! A [`MatrixFactorizer`] approximates the masked matrix as `X S Yᵗ` from its observed entries
//! alone. The completer multiplies the factors back together and zeroes the diagonal, which the
//! factorization knows nothing about. No other EDM structure is imposed.

use linfa_linalg::qr::QR;
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix2, Zip};
use tracing::{debug, info, trace};

use crate::{
    check_rank, check_shape, check_square,
    lowrank::truncated_svd,
    mask::{observation_mask, observed_count},
    EdmError, Result,
};

/// Factors `X`, `S` and `Y` with `X S Yᵗ` approximating the complete matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Factorization {
    pub x: Array2<f64>,
    pub s: Array2<f64>,
    pub y: Array2<f64>,
    pub diagnostics: FactorizationDiagnostics,
}

impl Factorization {
    /// `X S Yᵗ`
    pub fn reconstruct(&self) -> Array2<f64> {
        self.x.dot(&self.s).dot(&self.y.t())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorizationDiagnostics {
    pub iterations: usize,
    /// Root mean square error on the observed entries after every sweep
    pub rmse_history: Vec<f64>,
    pub converged: bool,
}

/// Low-rank factorization of a matrix with missing entries
pub trait MatrixFactorizer {
    /// Factorizes `masked`, in which exact zeros mark missing entries, with inner dimension at
    /// most `rank`.
    fn factor(
        &self,
        masked: ArrayView2<f64>,
        rank: usize,
        max_iter: usize,
        tolerance: f64,
        verbose: bool,
    ) -> Result<Factorization>;
}

impl<T: MatrixFactorizer + ?Sized> MatrixFactorizer for &T {
    fn factor(
        &self,
        masked: ArrayView2<f64>,
        rank: usize,
        max_iter: usize,
        tolerance: f64,
        verbose: bool,
    ) -> Result<Factorization> {
        (**self).factor(masked, rank, max_iter, tolerance, verbose)
    }
}

/// Factorization completer
///
/// # Example
///
/// ```rust
/// use ndarray::Array2;
/// use edm_completion::FactorizationCompletion;
///
/// let points = [0.0f64, 1., 3., 4., 7., 8.];
/// let mut masked = Array2::from_shape_fn((6, 6), |(i, j)| (points[i] - points[j]).powi(2));
/// masked[(0, 5)] = 0.;
/// masked[(5, 0)] = 0.;
///
/// let edm = FactorizationCompletion::new(3)
///     .max_iter(200)
///     .complete(&masked)
///     .unwrap();
/// assert!(edm.diag().iter().all(|&d| d == 0.));
/// ```
#[derive(Debug, Clone)]
pub struct FactorizationCompletion<F = AlternatingLeastSquares> {
    rank: usize,
    max_iter: usize,
    tolerance: f64,
    verbose: bool,
    factorizer: F,
}

impl FactorizationCompletion<AlternatingLeastSquares> {
    /// Create a completer for EDMs of rank at most `rank`
    pub fn new(rank: usize) -> Self {
        FactorizationCompletion {
            rank,
            max_iter: 500,
            tolerance: 1e-6,
            verbose: false,
            factorizer: AlternatingLeastSquares::default(),
        }
    }
}

impl<F> FactorizationCompletion<F> {
    /// Set the iteration budget of the factorizer (default 500)
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the convergence tolerance of the factorizer (default `1e-6`)
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Log progress at info instead of debug level
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Use another factorization solver
    pub fn factorizer<G>(self, factorizer: G) -> FactorizationCompletion<G> {
        FactorizationCompletion {
            rank: self.rank,
            max_iter: self.max_iter,
            tolerance: self.tolerance,
            verbose: self.verbose,
            factorizer,
        }
    }

    /// Completes `masked`, where zero entries are unobserved
    pub fn complete<S>(&self, masked: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
    where
        S: Data<Elem = f64>,
        F: MatrixFactorizer,
    {
        let n = check_square(masked)?;
        check_rank(self.rank, n)?;

        let factorization = self.factorizer.factor(
            masked.view(),
            self.rank,
            self.max_iter,
            self.tolerance,
            self.verbose,
        )?;
        let k = factorization.s.nrows();
        check_shape(&factorization.s, (k, k))?;
        check_shape(&factorization.x, (n, k))?;
        check_shape(&factorization.y, (n, k))?;

        let diag = &factorization.diagnostics;
        if self.verbose {
            info!(
                iterations = diag.iterations,
                converged = diag.converged,
                rmse = ?diag.rmse_history.last(),
                "factorization finished"
            );
        } else {
            debug!(
                iterations = diag.iterations,
                converged = diag.converged,
                rmse = ?diag.rmse_history.last(),
                "factorization finished"
            );
        }

        let mut edm = factorization.reconstruct();
        edm.diag_mut().fill(0.);
        Ok(edm)
    }
}

/// Masked factorization by alternating least squares
///
/// The factors are initialised OptSpace style: rows and columns with more than twice the average
/// number of observations are trimmed, the remaining observed entries are rescaled by the inverse
/// sampling rate, and the rank-`r` truncated SVD of the result gives `L = U Σ` and `R = V`. The
/// rows of `L` and `R` are then refit in turn by ridge-regularised least squares over the observed
/// entries, until the relative change of the RMSE on the observed entries drops below the
/// tolerance. The final `L Rᵗ` is refactored into orthonormal `X`, `Y` and diagonal `S`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlternatingLeastSquares {
    regularization: f64,
}

impl Default for AlternatingLeastSquares {
    fn default() -> Self {
        Self {
            regularization: 1e-9,
        }
    }
}

impl AlternatingLeastSquares {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ridge penalty of the least squares updates (default `1e-9`), must be positive
    pub fn regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }
}

impl MatrixFactorizer for AlternatingLeastSquares {
    fn factor(
        &self,
        masked: ArrayView2<f64>,
        rank: usize,
        max_iter: usize,
        tolerance: f64,
        verbose: bool,
    ) -> Result<Factorization> {
        if !(self.regularization > 0.) {
            return Err(EdmError::invalid_parameter(
                "regularization",
                "must be positive",
            ));
        }
        if rank == 0 {
            return Err(EdmError::ZeroRank);
        }
        let (nrows, ncols) = masked.dim();
        let observed = observed_count(&masked);
        if observed == 0 {
            return Err(EdmError::NoObservations);
        }
        let mask = observation_mask(&masked);

        let scale = (nrows * ncols) as f64 / observed as f64;
        let init = trim(masked, mask.view()) * scale;
        let (u, sigma, vt) = truncated_svd(&init, rank)?;
        let mut left = u * &sigma;
        let mut right = vt.reversed_axes();

        let mut diagnostics = FactorizationDiagnostics::default();
        let ridge = self.regularization.sqrt();
        for sweep in 0..max_iter {
            refit_rows(&mut left, &right, masked, mask.view(), ridge)?;
            refit_rows(&mut right, &left, masked.t(), mask.t(), ridge)?;

            let rmse = observed_rmse(masked, mask.view(), &left, &right, observed);
            if verbose {
                info!(sweep, rmse, "alternating least squares sweep");
            } else {
                trace!(sweep, rmse, "alternating least squares sweep");
            }
            let previous = diagnostics.rmse_history.last().copied();
            diagnostics.rmse_history.push(rmse);
            diagnostics.iterations = sweep + 1;

            if let Some(previous) = previous {
                if (previous - rmse).abs() <= tolerance * previous.max(f64::MIN_POSITIVE) {
                    diagnostics.converged = true;
                    break;
                }
            }
        }

        let (x, sigma, yt) = truncated_svd(&left.dot(&right.t()), rank)?;
        Ok(Factorization {
            x,
            s: Array2::from_diag(&sigma),
            y: yt.reversed_axes(),
            diagnostics,
        })
    }
}

/// Observed entries, with over-represented rows and columns zeroed
fn trim(masked: ArrayView2<f64>, mask: ArrayView2<bool>) -> Array2<f64> {
    let (nrows, ncols) = masked.dim();
    let row_counts: Array1<usize> =
        mask.map_axis(Axis(1), |lane| lane.iter().filter(|&&o| o).count());
    let col_counts: Array1<usize> =
        mask.map_axis(Axis(0), |lane| lane.iter().filter(|&&o| o).count());
    let total = row_counts.sum() as f64;
    let row_limit = 2. * total / nrows as f64;
    let col_limit = 2. * total / ncols as f64;

    Array2::from_shape_fn((nrows, ncols), |(i, j)| {
        if mask[(i, j)] && row_counts[i] as f64 <= row_limit && col_counts[j] as f64 <= col_limit
        {
            masked[(i, j)]
        } else {
            0.
        }
    })
}

/// Refits every row of `target` by least squares against the observed entries of the matching
/// row of `data`, with `fixed` holding the other factor
fn refit_rows(
    target: &mut Array2<f64>,
    fixed: &Array2<f64>,
    data: ArrayView2<f64>,
    mask: ArrayView2<bool>,
    ridge: f64,
) -> Result<()> {
    let k = fixed.ncols();
    for (i, mut row) in target.rows_mut().into_iter().enumerate() {
        let observed: Vec<usize> = mask
            .row(i)
            .iter()
            .enumerate()
            .filter(|&(_, &o)| o)
            .map(|(j, _)| j)
            .collect();

        // [fixed_observed; ridge * I] x = [data_observed; 0]
        let m = observed.len();
        let mut design = Array2::zeros((m + k, k));
        let mut rhs = Array2::zeros((m + k, 1));
        for (r, &j) in observed.iter().enumerate() {
            design.row_mut(r).assign(&fixed.row(j));
            rhs[(r, 0)] = data[(i, j)];
        }
        for d in 0..k {
            design[(m + d, d)] = ridge;
        }

        let solution = design.qr()?.solve(&rhs)?;
        row.assign(&solution.column(0));
    }
    Ok(())
}

fn observed_rmse(
    data: ArrayView2<f64>,
    mask: ArrayView2<bool>,
    left: &Array2<f64>,
    right: &Array2<f64>,
    observed: usize,
) -> f64 {
    let estimate = left.dot(&right.t());
    let sq = Zip::from(&data)
        .and(&mask)
        .and(&estimate)
        .fold(0., |acc, &d, &o, &e| if o { acc + (d - e) * (d - e) } else { acc });
    (sq / observed as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    /// Returns fixed factors and records the arguments it was called with
    struct FixedFactors {
        factors: Factorization,
        calls: RefCell<Vec<(usize, usize, f64, bool)>>,
    }

    impl MatrixFactorizer for FixedFactors {
        fn factor(
            &self,
            _masked: ArrayView2<f64>,
            rank: usize,
            max_iter: usize,
            tolerance: f64,
            verbose: bool,
        ) -> Result<Factorization> {
            self.calls
                .borrow_mut()
                .push((rank, max_iter, tolerance, verbose));
            Ok(self.factors.clone())
        }
    }

    fn fixed(x: Array2<f64>, s: Array2<f64>, y: Array2<f64>) -> FixedFactors {
        FixedFactors {
            factors: Factorization {
                x,
                s,
                y,
                diagnostics: FactorizationDiagnostics::default(),
            },
            calls: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn reassembles_and_zeroes_diagonal() {
        let x = array![[1.0], [2.], [3.]];
        let factorizer = fixed(x.clone(), array![[2.0]], x);
        let masked = Array2::<f64>::ones((3, 3));
        let edm = FactorizationCompletion::new(1)
            .max_iter(17)
            .tolerance(1e-3)
            .verbose(true)
            .factorizer(&factorizer)
            .complete(&masked)
            .unwrap();
        assert_eq!(
            edm,
            array![[0.0, 4., 6.], [4., 0., 12.], [6., 12., 0.]]
        );
        assert_eq!(*factorizer.calls.borrow(), vec![(1, 17, 1e-3, true)]);
    }

    #[test]
    fn no_symmetrization() {
        let factorizer = fixed(
            array![[1.0, 0.], [0., 1.]],
            Array2::eye(2),
            array![[1.0, -3.], [2., 1.]],
        );
        let masked = array![[0.0, 1., 1.], [1., 0., 1.], [1., 1., 0.]];
        // a 2x2 factorization does not fit a 3x3 problem
        assert!(matches!(
            FactorizationCompletion::new(2)
                .factorizer(&factorizer)
                .complete(&masked),
            Err(EdmError::ShapeMismatch { .. })
        ));

        let masked = array![[0.0, 1.], [1., 0.]];
        let edm = FactorizationCompletion::new(1)
            .factorizer(&factorizer)
            .complete(&masked)
            .unwrap();
        // negative and asymmetric entries are left alone
        assert_eq!(edm, array![[0.0, 2.], [-3., 0.]]);
    }

    #[test]
    fn trims_dense_rows() {
        let masked = array![
            [1.0, 1., 1., 1.],
            [0., 0., 0., 1.],
            [0., 0., 0., 1.],
            [0., 0., 0., 1.]
        ];
        let mask = observation_mask(&masked);
        // 7 observations: rows may hold 3.5, columns as well
        let trimmed = trim(masked.view(), mask.view());
        assert_eq!(trimmed.row(0).sum(), 0.);
        assert_eq!(trimmed.column(3).sum(), 0.);
    }

    #[test]
    fn als_fits_complete_low_rank() {
        let u = array![[1.0, 0.], [0.5, 1.], [2., -1.], [1., 1.], [0.3, 0.7]];
        let target = u.dot(&u.t()) + 3.;
        let fact = AlternatingLeastSquares::new()
            .factor(target.view(), 3, 100, 1e-12, false)
            .unwrap();
        assert_abs_diff_eq!(fact.reconstruct(), target, epsilon = 1e-5);
        assert!(fact.diagnostics.iterations >= 1);
        assert_eq!(
            fact.diagnostics.rmse_history.len(),
            fact.diagnostics.iterations
        );
    }

    #[test]
    fn als_requires_observations() {
        let empty = Array2::<f64>::zeros((4, 4));
        assert!(matches!(
            AlternatingLeastSquares::new().factor(empty.view(), 2, 10, 1e-6, false),
            Err(EdmError::NoObservations)
        ));
        assert!(matches!(
            AlternatingLeastSquares::new()
                .regularization(0.)
                .factor(Array2::ones((2, 2)).view(), 1, 10, 1e-6, false),
            Err(EdmError::InvalidParameter { .. })
        ));
    }
}
