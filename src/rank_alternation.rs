//! EDM completion by rank alternation
//!
//! Starting from the masked EDM with its missing entries set to the mean of the observed ones,
//! the estimate is repeatedly
//!
//! 1. projected onto the matrices of rank at most `rank`,
//! 2. reset to the measured values on every observed entry,
//! 3. projected onto the EDM structure (zero diagonal, non-negative, symmetric).
//!
//! Measurements are never denoised, only the unobserved entries are inferred. The full iteration
//! budget is always used, there is no convergence test.

use ndarray::{Array2, ArrayBase, ArrayView2, Data, Ix2, NdFloat, Zip};
use tracing::{debug, info, trace};

use crate::{
    check_rank, check_shape, check_square,
    lowrank::{LowRankProjector, SvdProjector},
    mask::{observation_mask, observed_mean},
    norm::Norm,
    structure::ImposeStructure,
    Result,
};

/// Rank alternation completer
///
/// # Example
///
/// ```rust
/// use ndarray::array;
/// use edm_completion::RankAlternation;
///
/// // squared distances of the points 0, 1, 2 and 4 on a line, with (0, 3) missing
/// let masked = array![
///     [0., 1., 4., 0.],
///     [1., 0., 1., 9.],
///     [4., 1., 0., 4.],
///     [0., 9., 4., 0.],
/// ];
///
/// let (edm, errors) = RankAlternation::new(3)
///     .max_iter(100)
///     .complete(&masked, None)
///     .unwrap();
/// assert_eq!(edm[(0, 1)], 1.);
/// assert!(errors.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct RankAlternation<P = SvdProjector> {
    rank: usize,
    max_iter: usize,
    verbose: bool,
    projector: P,
}

impl RankAlternation<SvdProjector> {
    /// Create a completer for EDMs of rank at most `rank`, projecting with a truncated SVD
    pub fn new(rank: usize) -> Self {
        RankAlternation {
            rank,
            max_iter: 50,
            verbose: false,
            projector: SvdProjector,
        }
    }
}

impl<P> RankAlternation<P> {
    /// Set the number of iterations (default 50)
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Log the summary at info instead of debug level
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Use another low-rank projection
    pub fn projector<Q>(self, projector: Q) -> RankAlternation<Q> {
        RankAlternation {
            rank: self.rank,
            max_iter: self.max_iter,
            verbose: self.verbose,
            projector,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Completes `masked`, where zero entries are unobserved
    ///
    /// If `true_edm` is given, the Frobenius distance between the estimate and `true_edm` is
    /// recorded after every iteration and returned as the second element, which is empty
    /// otherwise.
    ///
    /// Fails if `masked` is not square, if `rank` is not in `1..N`, if `true_edm` has a different
    /// shape or if no entry is observed.
    pub fn complete<A, S>(
        &self,
        masked: &ArrayBase<S, Ix2>,
        true_edm: Option<ArrayView2<A>>,
    ) -> Result<(Array2<A>, Vec<A>)>
    where
        A: NdFloat,
        S: Data<Elem = A>,
        P: LowRankProjector<A>,
    {
        let n = check_square(masked)?;
        check_rank(self.rank, n)?;
        if let Some(truth) = &true_edm {
            check_shape(truth, (n, n))?;
        }
        let mean = observed_mean(masked)?;
        let mask = observation_mask(masked);
        debug!(
            n,
            rank = self.rank,
            max_iter = self.max_iter,
            "starting rank alternation"
        );

        let mut edm = masked.mapv(|x| if x == A::zero() { mean } else { x });
        let mut errors = Vec::with_capacity(if true_edm.is_some() { self.max_iter } else { 0 });

        for iter in 0..self.max_iter {
            edm = self.projector.project(edm.view(), self.rank)?;

            Zip::from(&mut edm)
                .and(masked)
                .and(&mask)
                .for_each(|e, &m, &observed| {
                    if observed {
                        *e = m;
                    }
                });

            edm.impose_structure_inplace()?;

            if let Some(truth) = &true_edm {
                let err = (&edm - truth).norm_fro();
                trace!(iter, error = %err, "rank alternation step");
                errors.push(err);
            }
        }

        if self.verbose {
            info!(
                iterations = self.max_iter,
                error = ?errors.last(),
                "rank alternation finished"
            );
        } else {
            debug!(
                iterations = self.max_iter,
                error = ?errors.last(),
                "rank alternation finished"
            );
        }

        Ok((edm, errors))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;
    use crate::EdmError;

    /// Records the calls and returns the input unchanged
    struct CountingProjector {
        calls: Cell<usize>,
    }

    impl LowRankProjector<f64> for CountingProjector {
        fn project(&self, matrix: ArrayView2<f64>, _rank: usize) -> Result<Array2<f64>> {
            self.calls.set(self.calls.get() + 1);
            Ok(matrix.to_owned())
        }
    }

    #[test]
    fn mean_initialization() {
        let masked = array![[0.0, 2., 0.], [2., 0., 4.], [0., 4., 0.]];
        let projector = CountingProjector {
            calls: Cell::new(0),
        };
        let (edm, errors) = RankAlternation::new(1)
            .max_iter(3)
            .projector(&projector)
            .complete(&masked, None)
            .unwrap();
        assert_eq!(projector.calls.get(), 3);
        assert!(errors.is_empty());
        // missing entries start at the observed mean and the identity projection keeps them
        assert_abs_diff_eq!(edm, array![[0.0, 2., 3.], [2., 0., 4.], [3., 4., 0.]]);
    }

    #[test]
    fn error_trace() {
        let truth = array![[0.0, 1., 4.], [1., 0., 1.], [4., 1., 0.]];
        let masked = array![[0.0, 1., 0.], [1., 0., 1.], [0., 1., 0.]];
        let (_, errors) = RankAlternation::new(2)
            .max_iter(7)
            .complete(&masked, Some(truth.view()))
            .unwrap();
        assert_eq!(errors.len(), 7);
        assert!(errors.iter().all(|e: &f64| e.is_finite() && *e >= 0.));
    }

    #[test]
    fn verbose_only_changes_logging() {
        let truth = array![[0.0, 1., 4.], [1., 0., 1.], [4., 1., 0.]];
        let masked = array![[0.0, 1., 0.], [1., 0., 1.], [0., 1., 0.]];
        let quiet = RankAlternation::new(2)
            .max_iter(5)
            .complete(&masked, Some(truth.view()))
            .unwrap();
        let verbose = RankAlternation::new(2)
            .max_iter(5)
            .verbose(true)
            .complete(&masked, Some(truth.view()))
            .unwrap();
        assert_eq!(quiet, verbose);

        // the flag survives swapping the projector
        let alt = RankAlternation::new(1).verbose(true).projector(SvdProjector);
        assert!(alt.verbose);
    }

    #[test]
    fn invalid_input() {
        let masked = array![[0.0, 1.], [1., 0.]];
        let alt = RankAlternation::new(2);
        assert!(matches!(
            alt.complete(&masked, None),
            Err(EdmError::RankTooLarge { rank: 2, dim: 2 })
        ));
        assert!(matches!(
            RankAlternation::new(0).complete(&masked, None),
            Err(EdmError::ZeroRank)
        ));

        let truth = Array2::<f64>::zeros((3, 3));
        assert!(matches!(
            RankAlternation::new(1).complete(&masked, Some(truth.view())),
            Err(EdmError::ShapeMismatch { .. })
        ));

        let rect = Array2::<f64>::ones((2, 3));
        assert!(matches!(
            RankAlternation::new(1).complete(&rect, None),
            Err(EdmError::NotSquare { rows: 2, cols: 3 })
        ));
    }
}
