//! Convex solvers for programs over a positive semidefinite matrix variable
//!
//! A [`Problem`] couples an [`Objective`] with the dimension of a single variable `H` that is
//! constrained to the PSD cone. Backends implement [`ConvexSolver`] and are configured through a
//! string keyed [`SolverOptions`] map, whose `solver` entry names the requested backend.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

use linfa_linalg::eigh::Eigh;
use ndarray::{Array2, ArrayView2};
use tracing::{debug, info, trace};

use crate::{
    expr::{Objective, ObjectiveSense},
    EdmError, Result,
};

/// Name of the backend used when the caller does not select one
pub const DEFAULT_SOLVER: &str = "PROJECTED_GRADIENT";

/// Value of a single solver option
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{}", s),
            Self::Float(x) => write!(f, "{}", x),
            Self::Int(i) => write!(f, "{}", i),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<f64> for OptionValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<usize> for OptionValue {
    /// Counts beyond `i64::MAX` saturate.
    fn from(i: usize) -> Self {
        Self::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Options passed through to a solver backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverOptions {
    entries: BTreeMap<String, OptionValue>,
}

impl SolverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options selecting [`DEFAULT_SOLVER`]
    pub fn defaults() -> Self {
        Self::new().with("solver", DEFAULT_SOLVER)
    }

    /// Sets an option, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns these options layered over `defaults`; entries set here take precedence
    pub fn merged_over(&self, defaults: &SolverOptions) -> SolverOptions {
        let mut entries = defaults.entries.clone();
        entries.extend(self.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        SolverOptions { entries }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Str(s)) => Ok(Some(s)),
            Some(other) => Err(EdmError::invalid_parameter(
                key,
                format!("expected a string, got `{}`", other),
            )),
        }
    }

    /// Reads a float option. Integers are accepted as well.
    pub fn get_float(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Float(x)) => Ok(Some(*x)),
            Some(OptionValue::Int(i)) => Ok(Some(*i as f64)),
            Some(other) => Err(EdmError::invalid_parameter(
                key,
                format!("expected a number, got `{}`", other),
            )),
        }
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Int(i)) if *i >= 0 => {
                Ok(Some(usize::try_from(*i).unwrap_or(usize::MAX)))
            }
            Some(other) => Err(EdmError::invalid_parameter(
                key,
                format!("expected a non-negative integer, got `{}`", other),
            )),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(EdmError::invalid_parameter(
                key,
                format!("expected a boolean, got `{}`", other),
            )),
        }
    }
}

/// Outcome reported by a solver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    /// Stopped before the convergence criterion was met; the variable holds the best iterate
    OptimalInaccurate,
    Infeasible,
    Unbounded,
    SolverError,
}

impl SolveStatus {
    pub fn is_optimal(&self) -> bool {
        matches!(self, Self::Optimal | Self::OptimalInaccurate)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Optimal => "optimal",
            Self::OptimalInaccurate => "optimal_inaccurate",
            Self::Infeasible => "infeasible",
            Self::Unbounded => "unbounded",
            Self::SolverError => "solver_error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Optimal objective value, `NaN` when unknown
    pub value: f64,
    pub status: SolveStatus,
    /// Value of the variable, if the solver produced one
    pub variable: Option<Array2<f64>>,
    pub iterations: usize,
}

impl Solution {
    /// Solution without a variable value
    pub fn failed(status: SolveStatus) -> Self {
        Self {
            value: f64::NAN,
            status,
            variable: None,
            iterations: 0,
        }
    }
}

/// Program `optimize objective(H)` subject to `H` being positive semidefinite
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    objective: Objective,
    var_dim: usize,
}

impl Problem {
    /// Creates a problem over a `var_dim x var_dim` PSD variable, checking the expression shapes
    pub fn new(objective: Objective, var_dim: usize) -> Result<Self> {
        objective.expr.validate(var_dim)?;
        Ok(Self { objective, var_dim })
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn var_dim(&self) -> usize {
        self.var_dim
    }

    /// Objective value at `h`
    pub fn evaluate(&self, h: ArrayView2<f64>) -> f64 {
        self.objective.expr.eval(h)
    }
}

/// Backend solving a [`Problem`]
///
/// Returning `Ok` with a status that carries no variable is a regular outcome (for example an
/// infeasible program). `Err` is reserved for failures of the backend itself.
pub trait ConvexSolver {
    /// Backend name, as selected through the `solver` option
    fn name(&self) -> &str;

    fn solve(&self, problem: &Problem, options: &SolverOptions) -> Result<Solution>;
}

impl<T: ConvexSolver + ?Sized> ConvexSolver for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn solve(&self, problem: &Problem, options: &SolverOptions) -> Result<Solution> {
        (**self).solve(problem, options)
    }
}

/// Projects a square matrix onto the cone of symmetric positive semidefinite matrices
///
/// The matrix is symmetrized first, then its negative eigenvalues are clipped to zero.
pub fn project_psd(matrix: ArrayView2<f64>) -> Result<Array2<f64>> {
    let sym = (&matrix + &matrix.t()) * 0.5;
    let (vals, vecs) = sym.eigh()?;
    let clipped = vals.mapv(|v| v.max(0.));
    let proj = (&vecs * &clipped).dot(&vecs.t());
    Ok((&proj + &proj.t()) * 0.5)
}

const MIN_STEP: f64 = 1e-14;
const SUFFICIENT_INCREASE: f64 = 0.5;

/// First-order SDP backend
///
/// Performs projected (super)gradient steps on the PSD cone, starting from `H = 0`. A step from
/// `H` to `H'` along the gradient `g` is accepted if it satisfies the sufficient increase
/// condition `f(H') >= f(H) + <g, H' - H> / 2`, otherwise it is halved; after every accepted step
/// it is doubled. The iteration is optimal once the improvement drops below
/// `eps * max(1, |f|)` or the step collapses, and reports `OptimalInaccurate` with the best
/// iterate when `max_iters` runs out.
///
/// Recognized options:
///
/// * `solver`: must be `"PROJECTED_GRADIENT"` if present
/// * `max_iters`: maximum number of accepted steps (default 2000)
/// * `eps`: relative improvement tolerance (default `1e-9`)
/// * `step`: initial step size (default `1.0`)
/// * `max_value`: objective magnitude beyond which the program is reported unbounded
///   (default `1e12`)
/// * `verbose`: log the outcome at info level (default `false`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedGradient {
    max_iters: usize,
    eps: f64,
    step: f64,
    max_value: f64,
    verbose: bool,
}

impl Default for ProjectedGradient {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            eps: 1e-9,
            step: 1.0,
            max_value: 1e12,
            verbose: false,
        }
    }
}

impl ProjectedGradient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximal number of iterations
    pub fn max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Set the relative improvement tolerance
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Set the initial step size
    pub fn step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    /// Apply per-call options on top of the configured parameters
    fn configure(&self, options: &SolverOptions) -> Result<Self> {
        if let Some(name) = options.get_str("solver")? {
            if name != DEFAULT_SOLVER {
                return Err(EdmError::UnsupportedSolver(name.to_owned()));
            }
        }
        let params = Self {
            max_iters: options.get_usize("max_iters")?.unwrap_or(self.max_iters),
            eps: options.get_float("eps")?.unwrap_or(self.eps),
            step: options.get_float("step")?.unwrap_or(self.step),
            max_value: options.get_float("max_value")?.unwrap_or(self.max_value),
            verbose: options.get_bool("verbose")?.unwrap_or(self.verbose),
        };
        if !(params.step > 0.) {
            return Err(EdmError::invalid_parameter("step", "must be positive"));
        }
        if !(params.eps >= 0.) {
            return Err(EdmError::invalid_parameter("eps", "must be non-negative"));
        }
        Ok(params)
    }
}

impl ConvexSolver for ProjectedGradient {
    fn name(&self) -> &str {
        DEFAULT_SOLVER
    }

    fn solve(&self, problem: &Problem, options: &SolverOptions) -> Result<Solution> {
        let params = self.configure(options)?;
        let solution = params.run(problem)?;
        if params.verbose {
            info!(
                status = %solution.status,
                value = solution.value,
                iterations = solution.iterations,
                "projected gradient finished"
            );
        }
        Ok(solution)
    }
}

impl ProjectedGradient {
    fn run(&self, problem: &Problem) -> Result<Solution> {
        // ascend on `sign * objective`
        let sign = match problem.objective().sense {
            ObjectiveSense::Maximize => 1.,
            ObjectiveSense::Minimize => -1.,
        };
        let expr = &problem.objective().expr;
        let dim = problem.var_dim();

        let mut h = Array2::<f64>::zeros((dim, dim));
        let mut score = sign * expr.eval(h.view());
        if !score.is_finite() {
            return Ok(Solution::failed(SolveStatus::SolverError));
        }
        let mut step = self.step;

        for iter in 0..self.max_iters {
            let direction = expr.gradient(h.view()) * sign;

            let (candidate, candidate_score) = loop {
                let candidate = project_psd((&h + &(&direction * step)).view())?;
                let candidate_score = sign * expr.eval(candidate.view());
                if candidate_score == f64::INFINITY || candidate_score > self.max_value {
                    debug!(iter, value = candidate_score, "objective is unbounded");
                    return Ok(Solution {
                        iterations: iter + 1,
                        ..Solution::failed(SolveStatus::Unbounded)
                    });
                }
                let predicted = (&direction * &(&candidate - &h)).sum();
                if candidate_score >= score + SUFFICIENT_INCREASE * predicted {
                    break (candidate, candidate_score);
                }
                step *= 0.5;
                if step < MIN_STEP {
                    debug!(iter, value = sign * score, "step size collapsed");
                    return Ok(Solution {
                        value: sign * score,
                        status: SolveStatus::Optimal,
                        variable: Some(h),
                        iterations: iter + 1,
                    });
                }
            };

            let converged = candidate_score - score <= self.eps * score.abs().max(1.);
            h = candidate;
            score = candidate_score;
            step *= 2.;
            trace!(iter, value = sign * score, step, "projected gradient step");

            if converged {
                debug!(iterations = iter + 1, value = sign * score, "converged");
                return Ok(Solution {
                    value: sign * score,
                    status: SolveStatus::Optimal,
                    variable: Some(h),
                    iterations: iter + 1,
                });
            }
        }

        debug!(
            iterations = self.max_iters,
            value = sign * score,
            "iteration budget exhausted"
        );
        Ok(Solution {
            value: sign * score,
            status: SolveStatus::OptimalInaccurate,
            variable: Some(h),
            iterations: self.max_iters,
        })
    }
}
