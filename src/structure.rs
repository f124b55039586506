//! Structural constraints of Euclidean distance matrices

use ndarray::{ArrayBase, Data, DataMut, Ix2, NdFloat};

use crate::{check_square, Result};

/// Projection onto the structural constraints of an EDM
pub trait ImposeStructure {
    /// Zeroes the diagonal, clips negative entries to zero and symmetrizes by averaging with the
    /// transpose, in that order, in place.
    fn impose_structure_inplace(&mut self) -> Result<&mut Self>;

    /// Same as [`impose_structure_inplace`](ImposeStructure::impose_structure_inplace), passing
    /// by value.
    fn impose_structure_into(mut self) -> Result<Self>
    where
        Self: Sized,
    {
        self.impose_structure_inplace()?;
        Ok(self)
    }
}

impl<A, S> ImposeStructure for ArrayBase<S, Ix2>
where
    A: NdFloat,
    S: DataMut<Elem = A>,
{
    fn impose_structure_inplace(&mut self) -> Result<&mut Self> {
        let n = check_square(self)?;
        self.diag_mut().fill(A::zero());
        self.mapv_inplace(|x| if x < A::zero() { A::zero() } else { x });

        let half = A::from(0.5).unwrap();
        for i in 0..n {
            for j in 0..i {
                let avg = (self[(i, j)] + self[(j, i)]) * half;
                self[(i, j)] = avg;
                self[(j, i)] = avg;
            }
        }
        Ok(self)
    }
}

/// Checks of the structural EDM properties
pub trait EdmProperties {
    type Elem;

    /// Whether the matrix equals its transpose up to `eps`
    fn is_symmetric(&self, eps: Self::Elem) -> bool;

    /// Whether the matrix is square, symmetric, has a zero diagonal and no entries below `-eps`.
    ///
    /// This does not check the embedding rank.
    fn is_edm(&self, eps: Self::Elem) -> bool;
}

impl<A, S> EdmProperties for ArrayBase<S, Ix2>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    type Elem = A;

    fn is_symmetric(&self, eps: A) -> bool {
        self.is_square()
            && self
                .indexed_iter()
                .all(|((i, j), &x)| (x - self[(j, i)]).abs() <= eps)
    }

    fn is_edm(&self, eps: A) -> bool {
        self.is_symmetric(eps)
            && self.diag().iter().all(|x| x.abs() <= eps)
            && self.iter().all(|&x| x >= -eps)
    }
}
