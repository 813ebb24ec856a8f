//! A small LP engine and a thin variable/constraint adapter on top of it.
//!
//! [`Model`] is the piece the rest of the workspace actually talks to: named
//! variables, named constraints that can be added and removed without
//! rebuilding the model, and `minimize`/`maximize` bound queries with the
//! status handling (optimal / gap-limit / time-limit / infeasible) a
//! stochastic recipe sampler needs.

mod model;
mod problem;
mod simplex;
mod solution;

pub use model::{Model, SolveConfig, SolverError, VariableKind};
pub use problem::{Constraint, ConstraintOp, LpProblem, Objective};
pub use simplex::Solver;
pub use solution::{Solution, SolutionStatus};
