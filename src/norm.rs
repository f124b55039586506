//! Norms of matrices and masked residuals

use ndarray::{prelude::*, Data, Zip};

/// Entrywise norms, treating a matrix as one flat vector
pub trait Norm {
    type Output;

    /// Frobenius norm, i.e. the L-2 norm of the flattened matrix
    fn norm_fro(&self) -> Self::Output;
    /// Maximum norm (L-infinite)
    fn norm_max(&self) -> Self::Output;
}

impl<A, S, D> Norm for ArrayBase<S, D>
where
    A: NdFloat,
    S: Data<Elem = A>,
    D: Dimension,
{
    type Output = A;

    fn norm_fro(&self) -> Self::Output {
        self.fold(A::zero(), |acc, &x| acc + x * x).sqrt()
    }

    fn norm_max(&self) -> Self::Output {
        self.fold(A::zero(), |f, &val| val.abs().max(f))
    }
}

/// Frobenius norm of `weights ⊙ (estimate - target)`
///
/// All three matrices must have the same shape.
pub fn weighted_residual_fro<A, S1, S2, S3>(
    estimate: &ArrayBase<S1, Ix2>,
    target: &ArrayBase<S2, Ix2>,
    weights: &ArrayBase<S3, Ix2>,
) -> A
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    S3: Data<Elem = A>,
{
    Zip::from(estimate)
        .and(target)
        .and(weights)
        .fold(A::zero(), |acc, &e, &t, &w| {
            let r = w * (e - t);
            acc + r * r
        })
        .sqrt()
}
