//! Completion of partially observed Euclidean distance matrices (EDMs).
//!
//! An EDM holds squared pairwise distances between points. Entries that were never measured are
//! marked with `0`, and the routines in this crate infer them under the constraint that the result
//! is again a valid EDM: symmetric, zero on the diagonal, non-negative and consistent with a
//! low-dimensional point configuration.
//!
//! Three independent strategies are provided:
//!
//! * [`RankAlternation`](rank_alternation::RankAlternation) alternates between a low-rank
//!   projection, the fixed measurements and the EDM structure.
//! * [`FactorizationCompletion`](factorization::FactorizationCompletion) delegates to a masked
//!   low-rank factorization solver and reassembles the result.
//! * [`SemidefiniteRelaxation`](sdr::SemidefiniteRelaxation) optimizes over centered Gram
//!   matrices in the positive semidefinite cone and maps the optimum back to EDM space.
//!
//! The numeric collaborators ([`LowRankProjector`](lowrank::LowRankProjector),
//! [`MatrixFactorizer`](factorization::MatrixFactorizer) and
//! [`ConvexSolver`](solver::ConvexSolver)) are traits, each with a default implementation.

pub mod expr;
pub mod factorization;
pub mod kernel;
pub mod lowrank;
pub mod mask;
pub mod norm;
pub mod rank_alternation;
pub mod sdr;
pub mod solver;
pub mod structure;

use ndarray::{ArrayBase, Data, Ix2};
use thiserror::Error;

pub use factorization::FactorizationCompletion;
pub use rank_alternation::RankAlternation;
pub use sdr::SemidefiniteRelaxation;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EdmError {
    /// Non-square matrix
    #[error("Matrix with {rows} rows and {cols} cols is not square")]
    NotSquare { rows: usize, cols: usize },
    /// Problem needs at least two points
    #[error("Matrix of dimension {dim} describes fewer than two points")]
    TooFewPoints { dim: usize },
    #[error("Target rank must be positive")]
    ZeroRank,
    /// Target rank must be smaller than the number of points
    #[error("Target rank {rank} is not smaller than the matrix dimension {dim}")]
    RankTooLarge { rank: usize, dim: usize },
    #[error("Expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("Invalid value for parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },
    /// No entry of the masked EDM is observed, so there is nothing to complete from
    #[error("Masked EDM contains no observed entries")]
    NoObservations,
    #[error("Solver backend `{0}` is not supported")]
    UnsupportedSolver(String),
    #[error(transparent)]
    Linalg(#[from] linfa_linalg::LinalgError),
}

impl EdmError {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EdmError>;

/// Returns the dimension of a square matrix, or an error for rectangular ones
pub(crate) fn check_square<S: Data>(arr: &ArrayBase<S, Ix2>) -> Result<usize> {
    let (rows, cols) = arr.dim();
    if rows != cols {
        Err(EdmError::NotSquare { rows, cols })
    } else {
        Ok(rows)
    }
}

pub(crate) fn check_shape<S: Data>(
    arr: &ArrayBase<S, Ix2>,
    expected: (usize, usize),
) -> Result<()> {
    if arr.dim() != expected {
        Err(EdmError::ShapeMismatch {
            expected,
            actual: arr.dim(),
        })
    } else {
        Ok(())
    }
}

/// Target ranks live in `1..dim`
pub(crate) fn check_rank(rank: usize, dim: usize) -> Result<()> {
    if rank == 0 {
        Err(EdmError::ZeroRank)
    } else if rank >= dim {
        Err(EdmError::RankTooLarge { rank, dim })
    } else {
        Ok(())
    }
}
