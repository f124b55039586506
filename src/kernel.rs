//! Maps between Gram matrices and Euclidean distance matrices
//!
//! A Gram matrix `G` of a point set determines its EDM through the kernel
//! ```text
//! κ(G)[i, j] = G[i, i] + G[j, j] - 2 G[i, j]
//! ```
//! which is invariant under translating the points. The translation degree of freedom is removed
//! with a fixed centering basis `V` of size `N x (N - 1)` whose columns are orthonormal and
//! orthogonal to the all-ones vector. Every centered Gram matrix can then be written as
//! `V H Vᵗ` with a reduced `(N - 1) x (N - 1)` Gram matrix `H`, and
//! ```text
//! H = -1/2 Vᵗ κ(V H Vᵗ) V
//! ```
//! recovers it exactly.

use ndarray::{Array2, ArrayBase, Data, Ix2, NdFloat};
use num_traits::NumCast;

use crate::{check_shape, check_square, EdmError, Result};

/// Builds the centering basis `V` for `n` points
///
/// The first row holds `-1/√n` in every column and the remaining rows form
/// `I - 𝟙𝟙ᵗ / (n + √n)`. The basis depends on `n` only.
pub fn centering_basis<A: NdFloat>(n: usize) -> Result<Array2<A>> {
    if n < 2 {
        return Err(EdmError::TooFewPoints { dim: n });
    }
    let nf: A = NumCast::from(n).unwrap();
    let sqrt_n = nf.sqrt();
    let offset = (nf + sqrt_n).recip();

    Ok(Array2::from_shape_fn((n, n - 1), |(i, j)| {
        if i == 0 {
            -sqrt_n.recip()
        } else if i - 1 == j {
            A::one() - offset
        } else {
            -offset
        }
    }))
}

/// Gram matrix to EDM, `κ(G) = diag(G) 𝟙ᵗ + 𝟙 diag(G)ᵗ - 2 G`
pub fn kappa<A, S>(gram: &ArrayBase<S, Ix2>) -> Result<Array2<A>>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    let n = check_square(gram)?;
    let two = A::from(2.).unwrap();
    let diag = gram.diag();
    Ok(Array2::from_shape_fn((n, n), |(i, j)| {
        diag[i] + diag[j] - two * gram[(i, j)]
    }))
}

/// EDM to Gram matrix of the centered point set, `-1/2 J D J` with `J = I - 𝟙𝟙ᵗ / n`
pub fn gram_from_edm<A, S>(edm: &ArrayBase<S, Ix2>) -> Result<Array2<A>>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    let n = check_square(edm)?;
    if n == 0 {
        return Ok(Array2::zeros((0, 0)));
    }
    let nf: A = NumCast::from(n).unwrap();
    let half = A::from(0.5).unwrap();

    let row_means: Vec<A> = edm
        .rows()
        .into_iter()
        .map(|r| r.fold(A::zero(), |acc, &x| acc + x) / nf)
        .collect();
    let col_means: Vec<A> = edm
        .columns()
        .into_iter()
        .map(|c| c.fold(A::zero(), |acc, &x| acc + x) / nf)
        .collect();
    let grand_mean = row_means.iter().fold(A::zero(), |acc, &x| acc + x) / nf;

    Ok(Array2::from_shape_fn((n, n), |(i, j)| {
        -half * (edm[(i, j)] - row_means[i] - col_means[j] + grand_mean)
    }))
}

/// EDM to reduced Gram matrix in the centering basis, `-1/2 Vᵗ D V`
pub fn reduced_gram<A, S1, S2>(
    edm: &ArrayBase<S1, Ix2>,
    basis: &ArrayBase<S2, Ix2>,
) -> Result<Array2<A>>
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
{
    let n = check_square(edm)?;
    check_shape(basis, (n, n.saturating_sub(1)))?;
    let half = A::from(0.5).unwrap();
    Ok(basis.t().dot(edm).dot(basis) * -half)
}

/// Reduced Gram matrix to full Gram matrix, `V H Vᵗ`
pub fn lift_gram<A, S1, S2>(
    reduced: &ArrayBase<S1, Ix2>,
    basis: &ArrayBase<S2, Ix2>,
) -> Result<Array2<A>>
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
{
    let k = check_square(reduced)?;
    check_shape(basis, (k + 1, k))?;
    Ok(basis.dot(reduced).dot(&basis.t()))
}
