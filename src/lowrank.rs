//! Low-rank approximation of dense matrices
//!
//! The best rank-`r` approximation in Frobenius norm is obtained by truncating the singular value
//! decomposition to the `r` largest singular values (Eckart-Young). The decomposition is computed
//! from symmetric eigendecompositions: directly for symmetric input, and from the normal matrix
//! `AᵀA` otherwise. Both stay exact on rank-deficient matrices, which is where low-rank
//! iterations spend most of their time.

use std::cmp::Ordering;

use linfa_linalg::eigh::Eigh;
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix2, NdFloat};

use crate::Result;

/// Projection onto the set of matrices with rank at most `rank`
pub trait LowRankProjector<A> {
    /// Returns a matrix of the same shape as `matrix` with rank at most `rank`.
    fn project(&self, matrix: ArrayView2<A>, rank: usize) -> Result<Array2<A>>;
}

impl<A, T: LowRankProjector<A> + ?Sized> LowRankProjector<A> for &T {
    fn project(&self, matrix: ArrayView2<A>, rank: usize) -> Result<Array2<A>> {
        (**self).project(matrix, rank)
    }
}

/// Projector computing the best Frobenius-norm approximation from a truncated SVD
///
/// For symmetric input this keeps the eigenpairs with the largest `|λ|`, so the projection of a
/// symmetric matrix is symmetric.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvdProjector;

impl<A: NdFloat> LowRankProjector<A> for SvdProjector {
    fn project(&self, matrix: ArrayView2<A>, rank: usize) -> Result<Array2<A>> {
        let (u, sigma, vt) = truncated_svd(&matrix, rank)?;
        Ok((u * &sigma).dot(&vt))
    }
}

/// Indices of the `count` largest keys, largest first
fn descending<A: NdFloat>(keys: &Array1<A>, count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| keys[b].partial_cmp(&keys[a]).unwrap_or(Ordering::Equal));
    order.truncate(count);
    order
}

/// Computes the SVD of `matrix` truncated to the `rank` largest singular values
///
/// Returns `(U, sigma, Vt)` with the singular values in decreasing order. If the matrix has fewer
/// than `rank` singular values, all of them are kept. Columns of `U` belonging to a zero singular
/// value are zero.
pub fn truncated_svd<A, S>(
    matrix: &ArrayBase<S, Ix2>,
    rank: usize,
) -> Result<(Array2<A>, Array1<A>, Array2<A>)>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    let (rows, cols) = matrix.dim();
    let rank = rank.min(rows).min(cols);

    if matrix.is_square() && matrix.view() == matrix.t() {
        // A = Q Λ Qᵀ = (Q sign(Λ)) |Λ| Qᵀ
        let (vals, vecs) = matrix.eigh()?;
        let order = descending(&vals.mapv(A::abs), rank);
        let vals = vals.select(Axis(0), &order);
        let v = vecs.select(Axis(1), &order);
        let signs = vals.mapv(|l| if l < A::zero() { -A::one() } else { A::one() });
        return Ok((&v * &signs, vals.mapv(A::abs), v.reversed_axes()));
    }

    let (vals, vecs) = matrix.t().dot(matrix).eigh()?;
    let v = vecs.select(Axis(1), &descending(&vals, rank));
    // σ = |Av| is accurate down to zero, unlike sqrt(λ)
    let mut u = matrix.dot(&v);
    let sigma: Array1<A> = u
        .columns_mut()
        .into_iter()
        .map(|mut col| {
            let s = col.dot(&col).sqrt();
            if s > A::zero() {
                col.mapv_inplace(|x| x / s);
            }
            s
        })
        .collect();

    // eigenvalues of the normal matrix may order nearly equal singular values differently
    let order = descending(&sigma, rank);
    Ok((
        u.select(Axis(1), &order),
        sigma.select(Axis(0), &order),
        v.select(Axis(1), &order).reversed_axes(),
    ))
}

/// Number of singular values of `matrix` larger than `tol`
pub fn numeric_rank<A, S>(matrix: &ArrayBase<S, Ix2>, tol: A) -> Result<usize>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    let (rows, cols) = matrix.dim();
    let (_, sigma, _) = truncated_svd(matrix, rows.min(cols))?;
    Ok(sigma.iter().filter(|&&s| s > tol).count())
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn sorted_truncation() {
        let arr = Array2::from_diag(&array![1.0f64, 5., 3.]);
        let (u, s, vt) = truncated_svd(&arr, 2).unwrap();
        assert_abs_diff_eq!(s, array![5., 3.], epsilon = 1e-12);
        assert_eq!(u.dim(), (3, 2));
        assert_eq!(vt.dim(), (2, 3));

        let proj = SvdProjector.project(arr.view(), 2).unwrap();
        assert_abs_diff_eq!(
            proj,
            Array2::from_diag(&array![0., 5., 3.]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn rank_one() {
        let col = array![[1.0f64], [2.], [3.]];
        let outer = col.dot(&col.t());
        assert_eq!(numeric_rank(&outer, 1e-9).unwrap(), 1);
        let proj = SvdProjector.project(outer.view(), 1).unwrap();
        assert_abs_diff_eq!(proj, outer, epsilon = 1e-10);
    }

    #[test]
    fn negative_eigenvalue_is_kept() {
        let arr = Array2::from_diag(&array![1.0f64, -4., 2.]);
        let (u, s, vt) = truncated_svd(&arr, 1).unwrap();
        assert_abs_diff_eq!(s, array![4.], epsilon = 1e-12);
        assert_abs_diff_eq!(
            u.dot(&vt),
            Array2::from_diag(&array![0., -1., 0.]),
            epsilon = 1e-12
        );

        let proj = SvdProjector.project(arr.view(), 1).unwrap();
        assert_abs_diff_eq!(
            proj,
            Array2::from_diag(&array![0., -4., 0.]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn rank_deficient_general() {
        // 4x4 of rank 3
        let left = array![[1.0f64, 2., 0.], [0., 1., -1.], [3., 0., 1.], [1., 1., 1.]];
        let right = array![[2.0f64, 0., 1., -1.], [1., 3., 0., 2.], [0., -2., 4., 1.]];
        let arr = left.dot(&right);
        assert_eq!(numeric_rank(&arr, 1e-9).unwrap(), 3);

        let (u, s, vt) = truncated_svd(&arr, 3).unwrap();
        assert!(s[2] > 1e-3);
        assert_abs_diff_eq!(u.t().dot(&u), Array2::eye(3), epsilon = 1e-10);
        assert_abs_diff_eq!(vt.dot(&vt.t()), Array2::eye(3), epsilon = 1e-10);

        let proj = SvdProjector.project(arr.view(), 3).unwrap();
        assert_abs_diff_eq!(proj, arr, epsilon = 1e-9);
        let again = SvdProjector.project(proj.view(), 3).unwrap();
        assert_abs_diff_eq!(again, proj, epsilon = 1e-9);
    }

    #[test]
    fn rank_deficient_symmetric_indefinite() {
        let a = array![[1.0f64], [2.], [0.], [1.]];
        let b = array![[0.0f64], [1.], [-1.], [2.]];
        let arr = a.dot(&a.t()) * 5. - b.dot(&b.t()) * 3.;
        assert_eq!(numeric_rank(&arr, 1e-9).unwrap(), 2);

        let proj = SvdProjector.project(arr.view(), 2).unwrap();
        assert_abs_diff_eq!(proj, arr, epsilon = 1e-9);
        assert_abs_diff_eq!(proj, proj.t(), epsilon = 1e-12);
        let again = SvdProjector.project(proj.view(), 2).unwrap();
        assert_abs_diff_eq!(again, proj, epsilon = 1e-9);
    }

    #[test]
    fn wide_matrix() {
        let arr = array![[1.0f64, 0., 2., 1.], [2., 0., 4., 2.]];
        let (u, s, vt) = truncated_svd(&arr, 5).unwrap();
        assert_eq!((u.dim(), s.len(), vt.dim()), ((2, 2), 2, (2, 4)));
        assert_abs_diff_eq!(s[0], 30.0f64.sqrt(), epsilon = 1e-10);
        assert_abs_diff_eq!(s[1], 0., epsilon = 1e-10);
        assert_abs_diff_eq!((u * &s).dot(&vt), arr, epsilon = 1e-10);
    }
}
