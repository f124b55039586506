//! Expressions over a single square matrix variable
//!
//! Convex programs are handed to a [`ConvexSolver`](crate::solver::ConvexSolver) as expression
//! trees rather than closures, so a backend can inspect their structure. Every node can be
//! evaluated at a concrete value of the variable, and scalar expressions can propagate adjoints
//! back to the variable to give a (sub)gradient.

use ndarray::{Array2, ArrayView2, Axis};

use crate::{norm::Norm, EdmError, Result};

/// Matrix valued expression in the variable `H`
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixExpr {
    /// The decision variable `H`
    Variable,
    Constant(Array2<f64>),
    /// `left * inner * right` with constant outer factors
    Sandwich {
        left: Array2<f64>,
        inner: Box<MatrixExpr>,
        right: Array2<f64>,
    },
    /// `diag(E) 𝟙ᵗ + 𝟙 diag(E)ᵗ`
    DiagSpread(Box<MatrixExpr>),
    Scale(f64, Box<MatrixExpr>),
    Sub(Box<MatrixExpr>, Box<MatrixExpr>),
    /// Elementwise product with constant weights
    Hadamard {
        weights: Array2<f64>,
        inner: Box<MatrixExpr>,
    },
}

/// Scalar valued expression in the variable `H`
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    Trace(Box<MatrixExpr>),
    /// Frobenius norm
    NormFro(Box<MatrixExpr>),
    Scaled(f64, Box<ScalarExpr>),
    Sum(Box<ScalarExpr>, Box<ScalarExpr>),
}

/// Direction of optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectiveSense {
    #[default]
    Maximize,
    Minimize,
}

/// A scalar expression together with the direction in which it is optimized
#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub sense: ObjectiveSense,
    pub expr: ScalarExpr,
}

impl Objective {
    pub fn maximize(expr: ScalarExpr) -> Self {
        Self {
            sense: ObjectiveSense::Maximize,
            expr,
        }
    }

    pub fn minimize(expr: ScalarExpr) -> Self {
        Self {
            sense: ObjectiveSense::Minimize,
            expr,
        }
    }
}

/// Symbolic EDM kernel `κ(G) = diag(G) 𝟙ᵗ + 𝟙 diag(G)ᵗ - 2 G`
///
/// This is the expression counterpart of [`kernel::kappa`](crate::kernel::kappa).
pub fn kappa_expr(gram: MatrixExpr) -> MatrixExpr {
    gram.clone().diag_spread().minus(gram.scale(2.))
}

impl MatrixExpr {
    pub fn variable() -> Self {
        Self::Variable
    }

    pub fn constant(value: Array2<f64>) -> Self {
        Self::Constant(value)
    }

    pub fn sandwich(self, left: Array2<f64>, right: Array2<f64>) -> Self {
        Self::Sandwich {
            left,
            inner: Box::new(self),
            right,
        }
    }

    pub fn diag_spread(self) -> Self {
        Self::DiagSpread(Box::new(self))
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::Scale(factor, Box::new(self))
    }

    pub fn minus(self, other: MatrixExpr) -> Self {
        Self::Sub(Box::new(self), Box::new(other))
    }

    pub fn hadamard(self, weights: Array2<f64>) -> Self {
        Self::Hadamard {
            weights,
            inner: Box::new(self),
        }
    }

    pub fn trace(self) -> ScalarExpr {
        ScalarExpr::Trace(Box::new(self))
    }

    pub fn norm_fro(self) -> ScalarExpr {
        ScalarExpr::NormFro(Box::new(self))
    }

    /// Shape of the expression for a `var_dim x var_dim` variable, checking all operand shapes
    pub fn shape(&self, var_dim: usize) -> Result<(usize, usize)> {
        match self {
            Self::Variable => Ok((var_dim, var_dim)),
            Self::Constant(c) => Ok(c.dim()),
            Self::Sandwich { left, inner, right } => {
                let (rows, cols) = inner.shape(var_dim)?;
                if left.ncols() != rows {
                    return Err(EdmError::ShapeMismatch {
                        expected: (left.nrows(), rows),
                        actual: left.dim(),
                    });
                }
                if right.nrows() != cols {
                    return Err(EdmError::ShapeMismatch {
                        expected: (cols, right.ncols()),
                        actual: right.dim(),
                    });
                }
                Ok((left.nrows(), right.ncols()))
            }
            Self::DiagSpread(inner) => {
                let (rows, cols) = inner.shape(var_dim)?;
                if rows != cols {
                    return Err(EdmError::NotSquare { rows, cols });
                }
                Ok((rows, cols))
            }
            Self::Scale(_, inner) => inner.shape(var_dim),
            Self::Sub(a, b) => {
                let shape = a.shape(var_dim)?;
                let other = b.shape(var_dim)?;
                if shape != other {
                    return Err(EdmError::ShapeMismatch {
                        expected: shape,
                        actual: other,
                    });
                }
                Ok(shape)
            }
            Self::Hadamard { weights, inner } => {
                let shape = inner.shape(var_dim)?;
                if weights.dim() != shape {
                    return Err(EdmError::ShapeMismatch {
                        expected: shape,
                        actual: weights.dim(),
                    });
                }
                Ok(shape)
            }
        }
    }

    /// Evaluates the expression at `h`. The expression must be valid for the shape of `h`.
    pub fn eval(&self, h: ArrayView2<f64>) -> Array2<f64> {
        match self {
            Self::Variable => h.to_owned(),
            Self::Constant(c) => c.clone(),
            Self::Sandwich { left, inner, right } => left.dot(&inner.eval(h)).dot(right),
            Self::DiagSpread(inner) => {
                let value = inner.eval(h);
                let diag = value.diag();
                Array2::from_shape_fn(value.dim(), |(i, j)| diag[i] + diag[j])
            }
            Self::Scale(factor, inner) => inner.eval(h) * *factor,
            Self::Sub(a, b) => a.eval(h) - b.eval(h),
            Self::Hadamard { weights, inner } => inner.eval(h) * weights,
        }
    }

    /// Adds the adjoint of this expression applied to `upstream` into `grad`
    fn backprop(&self, h: ArrayView2<f64>, upstream: Array2<f64>, grad: &mut Array2<f64>) {
        match self {
            Self::Variable => *grad += &upstream,
            Self::Constant(_) => {}
            Self::Sandwich { left, inner, right } => {
                inner.backprop(h, left.t().dot(&upstream).dot(&right.t()), grad)
            }
            Self::DiagSpread(inner) => {
                let spread = upstream.sum_axis(Axis(1)) + upstream.sum_axis(Axis(0));
                inner.backprop(h, Array2::from_diag(&spread), grad)
            }
            Self::Scale(factor, inner) => inner.backprop(h, upstream * *factor, grad),
            Self::Sub(a, b) => {
                a.backprop(h, upstream.clone(), grad);
                b.backprop(h, -upstream, grad);
            }
            Self::Hadamard { weights, inner } => inner.backprop(h, upstream * weights, grad),
        }
    }
}

impl ScalarExpr {
    pub fn scale(self, factor: f64) -> Self {
        Self::Scaled(factor, Box::new(self))
    }

    pub fn plus(self, other: ScalarExpr) -> Self {
        Self::Sum(Box::new(self), Box::new(other))
    }

    pub fn minus(self, other: ScalarExpr) -> Self {
        self.plus(other.scale(-1.))
    }

    /// Checks operand shapes for a `var_dim x var_dim` variable
    pub fn validate(&self, var_dim: usize) -> Result<()> {
        match self {
            Self::Trace(inner) => {
                let (rows, cols) = inner.shape(var_dim)?;
                if rows != cols {
                    return Err(EdmError::NotSquare { rows, cols });
                }
                Ok(())
            }
            Self::NormFro(inner) => inner.shape(var_dim).map(|_| ()),
            Self::Scaled(_, inner) => inner.validate(var_dim),
            Self::Sum(a, b) => {
                a.validate(var_dim)?;
                b.validate(var_dim)
            }
        }
    }

    /// Evaluates the expression at `h`. The expression must be valid for the shape of `h`.
    pub fn eval(&self, h: ArrayView2<f64>) -> f64 {
        match self {
            Self::Trace(inner) => inner.eval(h).diag().sum(),
            Self::NormFro(inner) => inner.eval(h).norm_fro(),
            Self::Scaled(factor, inner) => factor * inner.eval(h),
            Self::Sum(a, b) => a.eval(h) + b.eval(h),
        }
    }

    /// Gradient of the expression with respect to the variable at `h`
    ///
    /// The Frobenius norm is not differentiable at zero, where the subgradient `0` is used.
    pub fn gradient(&self, h: ArrayView2<f64>) -> Array2<f64> {
        let mut grad = Array2::zeros(h.dim());
        self.backprop(h, 1., &mut grad);
        grad
    }

    fn backprop(&self, h: ArrayView2<f64>, seed: f64, grad: &mut Array2<f64>) {
        match self {
            Self::Trace(inner) => {
                let n = inner.eval(h).nrows();
                inner.backprop(h, Array2::eye(n) * seed, grad);
            }
            Self::NormFro(inner) => {
                let value = inner.eval(h);
                let norm = value.norm_fro();
                if norm > 0. {
                    inner.backprop(h, value * (seed / norm), grad);
                }
            }
            Self::Scaled(factor, inner) => inner.backprop(h, seed * factor, grad),
            Self::Sum(a, b) => {
                a.backprop(h, seed, grad);
                b.backprop(h, seed, grad);
            }
        }
    }
}
