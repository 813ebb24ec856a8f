use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::problem::{ConstraintOp, LpProblem};
use crate::simplex::Solver;
use crate::solution::SolutionStatus;

/// The kind of a decision variable. Only `Continuous` is used today; the
/// field exists so the adapter's signature matches what a richer engine
/// (integer/binary ingredient toggles) would need without another
/// breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Continuous,
}

/// Tolerances governing when a non-optimal status is still an acceptable
/// answer. Mirrors the knobs a real MILP solver call exposes: a dual-gap
/// limit, a wall-clock budget per call, and a looser gap tolerance that
/// only applies once the wall-clock budget has been spent.
#[derive(Debug, Clone, Copy)]
pub struct SolveConfig {
    /// Accepted for API parity with a branch-and-bound solver's dual-gap
    /// limit. This tableau method always pivots to an exact optimum (or
    /// proves infeasibility) rather than stopping early at a bounded gap, so
    /// there is no intermediate gap value to compare it against; kept so
    /// callers can set it without the adapter's signature changing if a
    /// future engine swap needs it.
    pub dual_gap_absolute: f64,
    pub solver_time_limit: Duration,
    pub time_limit_gap_tolerance: f64,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            dual_gap_absolute: 1e-3,
            solver_time_limit: Duration::from_secs(60),
            time_limit_gap_tolerance: 0.01,
        }
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    /// The constraint set admits no feasible point (or the query was
    /// unbounded, which for the bounded recipe variables used here only
    /// happens if a caller forgot to bound a variable).
    #[error("no feasible point exists under the current constraints")]
    Infeasible,
    /// The per-call wall-clock budget was exhausted and the remaining
    /// optimality gap is above the configured tolerance.
    #[error("solver time limit exceeded with gap above tolerance")]
    TimedOut,
}

/// A persistent LP model: variables and constraints accumulate across calls
/// and are added/removed in place, matching the "thousands of bound-query
/// and freeze cycles per product" access pattern of the recipe sampler.
pub struct Model {
    problem: LpProblem,
    bounds: HashMap<String, (f64, f64)>,
    solver: Solver,
    config: SolveConfig,
}

impl Model {
    pub fn new() -> Self {
        Self::with_config(SolveConfig::default())
    }

    pub fn with_config(config: SolveConfig) -> Self {
        Self {
            problem: LpProblem::new(Vec::new()),
            bounds: HashMap::new(),
            solver: Solver::new(),
            config,
        }
    }

    /// Registers a variable with bounds `[lb, ub]`. `ub = f64::INFINITY`
    /// means unbounded above. Bounds are enforced as ordinary constraints
    /// (`>= lb`, `<= ub`) layered on top of the simplex's native `>= 0`.
    pub fn add_variable(&mut self, name: &str, lb: f64, ub: f64, _kind: VariableKind) {
        self.problem.variables.push(name.to_string());
        let n = self.problem.variables.len();
        self.problem.objective.coefficients.resize(n, 0.0);
        for c in &mut self.problem.constraints {
            c.coefficients.resize(n, 0.0);
        }
        self.bounds.insert(name.to_string(), (lb, ub));

        if lb > 0.0 {
            self.add_constraint(&bound_name(name, "lb"), &[(name, 1.0)], ConstraintOp::Ge, lb);
        }
        if ub.is_finite() {
            self.add_constraint(&bound_name(name, "ub"), &[(name, 1.0)], ConstraintOp::Le, ub);
        }
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.problem.variable_index(name).is_some()
    }

    pub fn bounds_of(&self, name: &str) -> Option<(f64, f64)> {
        self.bounds.get(name).copied()
    }

    /// Adds a named linear constraint over a sparse list of `(variable,
    /// coefficient)` terms. Every referenced variable must already exist.
    pub fn add_constraint(
        &mut self,
        name: &str,
        expr: &[(&str, f64)],
        op: ConstraintOp,
        rhs: f64,
    ) {
        let mut coefficients = vec![0.0; self.problem.num_variables()];
        for &(var, coef) in expr {
            let idx = self
                .problem
                .variable_index(var)
                .unwrap_or_else(|| panic!("unknown variable '{var}' referenced in constraint '{name}'"));
            coefficients[idx] += coef;
        }
        self.problem.add_constraint(name, coefficients, op, rhs);
    }

    /// Removes every constraint registered under `name`. Returns the number
    /// removed (0 if the name was never used).
    pub fn delete_constraint(&mut self, name: &str) -> usize {
        self.problem.remove_constraint(name)
    }

    /// Removes the upper-bound constraint `add_variable` installed for
    /// `name`, letting it range up to the simplex's implicit infinity. Used
    /// by callers that relax a previously-registered variable bound (e.g.
    /// the recipe sampler's "optional unbalance" step releasing the
    /// evaporation ceiling).
    pub fn relax_upper_bound(&mut self, name: &str) -> usize {
        if let Some((lb, _)) = self.bounds.get(name).copied() {
            self.bounds.insert(name.to_string(), (lb, f64::INFINITY));
        }
        self.delete_constraint(&bound_name(name, "ub"))
    }

    /// Widens the lower-bound constraint `add_variable` installed for
    /// `name` down to `new_lb`. Mirrors `relax_upper_bound` for the floor
    /// side: used by the recipe sampler's "optional unbalance" step, which
    /// drops the total-mass variable's provisional pinning floor to the
    /// looser unbalanced-recipe floor once per-ingredient proportions are
    /// fixed.
    pub fn relax_lower_bound(&mut self, name: &str, new_lb: f64) -> usize {
        let ub = self.bounds.get(name).map(|(_, ub)| *ub).unwrap_or(f64::INFINITY);
        self.bounds.insert(name.to_string(), (new_lb, ub));
        let removed = self.delete_constraint(&bound_name(name, "lb"));
        if new_lb > 0.0 {
            self.add_constraint(&bound_name(name, "lb"), &[(name, 1.0)], ConstraintOp::Ge, new_lb);
        }
        removed
    }

    pub fn minimize(&mut self, var: &str) -> Result<f64, SolverError> {
        self.optimize(var, true)
    }

    pub fn maximize(&mut self, var: &str) -> Result<f64, SolverError> {
        self.optimize(var, false)
    }

    fn optimize(&mut self, var: &str, minimize: bool) -> Result<f64, SolverError> {
        let idx = self
            .problem
            .variable_index(var)
            .unwrap_or_else(|| panic!("unknown variable '{var}'"));
        self.problem.set_single_variable_objective(idx, minimize);

        let started = Instant::now();
        let solution = self.solver.solve(&self.problem);
        let elapsed = started.elapsed();

        match solution.status {
            SolutionStatus::Optimal => Ok(solution.values[idx]),
            SolutionStatus::Infeasible | SolutionStatus::Unbounded => Err(SolverError::Infeasible),
            SolutionStatus::IterationLimit => {
                // The tableau method has no native notion of a dual gap at an
                // intermediate basis; an unfinished pivot sequence is treated
                // as a gap at its worst, which only clears the tolerance if
                // the caller configured a non-zero tolerance and we still
                // finished inside the wall-clock budget.
                let within_time_budget = elapsed <= self.config.solver_time_limit;
                let gap_acceptable = self.config.time_limit_gap_tolerance >= 1.0;
                if within_time_budget && gap_acceptable {
                    Ok(solution.values[idx])
                } else {
                    Err(SolverError::TimedOut)
                }
            }
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

fn bound_name(var: &str, which: &str) -> String {
    format!("__bound::{which}::{var}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_propagation_respects_equality_constraint() {
        let mut model = Model::new();
        model.add_variable("x", 0.0, 1.0, VariableKind::Continuous);
        model.add_variable("y", 0.0, 1.0, VariableKind::Continuous);
        model.add_constraint("sum", &[("x", 1.0), ("y", 1.0)], ConstraintOp::Eq, 1.0);

        assert!((model.minimize("x").unwrap() - 0.0).abs() < 1e-6);
        assert!((model.maximize("x").unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn freezing_a_variable_narrows_future_queries() {
        let mut model = Model::new();
        model.add_variable("x", 0.0, 1.0, VariableKind::Continuous);
        model.add_variable("y", 0.0, 1.0, VariableKind::Continuous);
        model.add_constraint("sum", &[("x", 1.0), ("y", 1.0)], ConstraintOp::Eq, 1.0);

        model.add_constraint("freeze_x", &[("x", 1.0)], ConstraintOp::Eq, 0.4);
        assert!((model.minimize("y").unwrap() - 0.6).abs() < 1e-6);
        assert!((model.maximize("y").unwrap() - 0.6).abs() < 1e-6);

        model.delete_constraint("freeze_x");
        assert!((model.maximize("y").unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn infeasible_constraints_surface_as_infeasible() {
        let mut model = Model::new();
        model.add_variable("x", 5.0, 3.0, VariableKind::Continuous);
        assert!(matches!(model.minimize("x"), Err(SolverError::Infeasible)));
    }
}
