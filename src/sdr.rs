//! EDM completion by semidefinite relaxation
//!
//! Every EDM is `κ(G)` for a centered Gram matrix `G`, and every centered Gram matrix is
//! `V H Vᵗ` for the [centering basis](crate::kernel::centering_basis) `V` and a PSD
//! `(N-1) x (N-1)` matrix `H`. The relaxation searches over `H` directly:
//!
//! ```text
//! maximize  tr(H) - λ ‖W ⊙ (κ(V H Vᵗ) - D)‖_F      subject to H ⪰ 0
//! ```
//!
//! where `D` is the masked EDM and `W` weights the observed entries. The trace term spreads the
//! points apart, which favours low embedding dimensions. The minimizing variant
//! `minimize tr(H) + λ ‖W ⊙ (κ(V H Vᵗ) - D)‖_F` is available as well.

use linfa_linalg::eigh::Eigh;
use ndarray::{Array2, ArrayBase, ArrayView2, Data, Ix2};
use tracing::{debug, info, warn};

use crate::{
    check_shape, check_square,
    expr::{kappa_expr, MatrixExpr, Objective, ObjectiveSense},
    kernel::{centering_basis, kappa, lift_gram},
    mask::mask_weights,
    norm::weighted_residual_fro,
    solver::{ConvexSolver, Problem, ProjectedGradient, SolveStatus, SolverOptions},
    EdmError, Result,
};

/// Diagnostics of a relaxation solve
///
/// `value` is reported exactly as the solver returned it. It is not recomputed from `trace_h` and
/// `fit_cost`, which are evaluated on the returned matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SdrReport {
    pub value: f64,
    pub status: SolveStatus,
    pub iterations: usize,
    /// `tr(H)` of the solution, `None` if the solver produced none
    pub trace_h: Option<f64>,
    /// `λ ‖W ⊙ (D̂ - D)‖_F` for the returned matrix `D̂`
    pub fit_cost: f64,
    /// Sum of all but the two largest eigenvalues of the Gram matrix of the solution
    pub residual_spectrum: Option<f64>,
}

/// Semidefinite relaxation completer
///
/// # Example
///
/// ```rust
/// use ndarray::array;
/// use edm_completion::SemidefiniteRelaxation;
///
/// let masked = array![
///     [0., 1., 2., 1.],
///     [1., 0., 1., 0.],
///     [2., 1., 0., 1.],
///     [1., 0., 1., 0.],
/// ];
/// let edm = SemidefiniteRelaxation::new(10.).complete(&masked).unwrap();
/// assert!((edm[(1, 3)] - edm[(3, 1)]).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct SemidefiniteRelaxation<C = ProjectedGradient> {
    lambda: f64,
    weights: Option<Array2<f64>>,
    sense: ObjectiveSense,
    options: SolverOptions,
    solver: C,
    verbose: bool,
}

impl SemidefiniteRelaxation<ProjectedGradient> {
    /// Create a completer with fit penalty `lambda`, which must be positive
    pub fn new(lambda: f64) -> Self {
        SemidefiniteRelaxation {
            lambda,
            weights: None,
            sense: ObjectiveSense::default(),
            options: SolverOptions::new(),
            solver: ProjectedGradient::default(),
            verbose: false,
        }
    }
}

impl<C> SemidefiniteRelaxation<C> {
    /// Weight the fit of the observed entries. Weights of unobserved entries are ignored.
    pub fn weights(mut self, weights: Array2<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn sense(mut self, sense: ObjectiveSense) -> Self {
        self.sense = sense;
        self
    }

    /// Options passed to the solver, on top of `{solver: "PROJECTED_GRADIENT"}`
    pub fn options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Log diagnostics at info instead of debug level, and pass `verbose: true` to the solver
    /// unless the options set it
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Use another convex solver
    pub fn solver<D>(self, solver: D) -> SemidefiniteRelaxation<D> {
        SemidefiniteRelaxation {
            lambda: self.lambda,
            weights: self.weights,
            sense: self.sense,
            options: self.options,
            solver,
            verbose: self.verbose,
        }
    }

    /// Completes `masked`, where zero entries are unobserved
    ///
    /// If the solver runs but returns no solution (infeasible, unbounded, failed), a copy of
    /// `masked` is returned. Errors raised by the solver are propagated.
    pub fn complete<S>(&self, masked: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
    where
        S: Data<Elem = f64>,
        C: ConvexSolver,
    {
        self.complete_with_report(masked).map(|(edm, _)| edm)
    }

    /// Like [`complete`](Self::complete), also returning the solve diagnostics
    pub fn complete_with_report<S>(
        &self,
        masked: &ArrayBase<S, Ix2>,
    ) -> Result<(Array2<f64>, SdrReport)>
    where
        S: Data<Elem = f64>,
        C: ConvexSolver,
    {
        let n = check_square(masked)?;
        if n < 2 {
            return Err(EdmError::TooFewPoints { dim: n });
        }
        if !(self.lambda.is_finite() && self.lambda > 0.) {
            return Err(EdmError::invalid_parameter(
                "lambda",
                format!("must be finite and positive, got {}", self.lambda),
            ));
        }
        let weights = mask_weights(masked, self.weights.as_ref().map(|w| w.view()))?;

        let basis = centering_basis::<f64>(n)?;
        let problem =
            relaxation_problem(masked.view(), &weights, &basis, self.lambda, self.sense)?;
        let mut options = self.options.merged_over(&SolverOptions::defaults());
        if self.verbose && options.get("verbose").is_none() {
            options.insert("verbose", true);
        }
        debug!(
            n,
            lambda = self.lambda,
            sense = ?self.sense,
            solver = self.solver.name(),
            "solving relaxation"
        );

        let solution = self.solver.solve(&problem, &options)?;

        let (completed, trace_h, residual_spectrum) = match solution.variable {
            Some(h) => {
                check_shape(&h, (n - 1, n - 1))?;
                let gram = lift_gram(&h, &basis)?;
                (
                    kappa(&gram)?,
                    Some(h.diag().sum()),
                    Some(spectrum_beyond_plane(&gram)?),
                )
            }
            None => {
                warn!(status = %solution.status, "solver returned no solution, keeping the input");
                (masked.to_owned(), None, None)
            }
        };
        let fit_cost = self.lambda * weighted_residual_fro(&completed, masked, &weights);

        let report = SdrReport {
            value: solution.value,
            status: solution.status,
            iterations: solution.iterations,
            trace_h,
            fit_cost,
            residual_spectrum,
        };
        if self.verbose {
            info!(
                status = %report.status,
                value = report.value,
                iterations = report.iterations,
                trace_h = ?report.trace_h,
                fit_cost = report.fit_cost,
                residual_spectrum = ?report.residual_spectrum,
                "relaxation finished"
            );
        } else {
            debug!(
                status = %report.status,
                value = report.value,
                iterations = report.iterations,
                trace_h = ?report.trace_h,
                fit_cost = report.fit_cost,
                residual_spectrum = ?report.residual_spectrum,
                "relaxation finished"
            );
        }

        Ok((completed, report))
    }
}

/// Assembles the relaxation of `masked` over the reduced Gram matrix in `basis`
///
/// `weights` must have the shape of `masked` and `basis` must be `N x (N-1)`.
pub fn relaxation_problem(
    masked: ArrayView2<f64>,
    weights: &Array2<f64>,
    basis: &Array2<f64>,
    lambda: f64,
    sense: ObjectiveSense,
) -> Result<Problem> {
    let n = check_square(&masked)?;
    check_shape(weights, (n, n))?;
    check_shape(basis, (n, n.saturating_sub(1)))?;

    let gram = MatrixExpr::variable().sandwich(basis.clone(), basis.t().to_owned());
    let fit = kappa_expr(gram)
        .minus(MatrixExpr::constant(masked.to_owned()))
        .hadamard(weights.clone())
        .norm_fro()
        .scale(lambda);
    let trace = MatrixExpr::variable().trace();

    let objective = match sense {
        ObjectiveSense::Maximize => Objective::maximize(trace.minus(fit)),
        ObjectiveSense::Minimize => Objective::minimize(trace.plus(fit)),
    };
    Problem::new(objective, n.saturating_sub(1))
}

fn spectrum_beyond_plane(gram: &Array2<f64>) -> Result<f64> {
    let (vals, _) = gram.eigh()?;
    let mut vals = vals.to_vec();
    vals.sort_by(|a, b| b.total_cmp(a));
    Ok(vals.iter().skip(2).sum())
}
