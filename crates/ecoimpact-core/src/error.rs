use thiserror::Error;

/// Errors raised or surfaced by the core, matching the taxonomy of
/// PreflightRejection / FeasibilityEmpty / SolverBudget / InputShape.
/// `NumericDegeneracy` cases are handled silently (skip-and-warn) and never
/// reach this enum.
#[derive(Debug, Error)]
pub enum EstimationError {
    /// No taxonomically-known ingredient remains, or the only one left is water.
    #[error("product has no known ingredients left after preflight")]
    NoKnownIngredients,

    /// No impact-characterized leaf remains, or the recipe impact was null
    /// on every retry of a consecutive run.
    #[error("product has no characterized ingredients to estimate impact from")]
    NoCharacterizedIngredients,

    /// The feasibility set is empty under the current constraints.
    /// Recoverable by the Relaxation Supervisor.
    #[error("no feasible recipe exists under the current constraints")]
    RecipeCreation,

    /// The LP solver exceeded its wall-clock budget with an unacceptable
    /// primal-dual gap. Recoverable by the Relaxation Supervisor.
    #[error("solver exceeded its time budget without a sufficiently tight gap")]
    SolverTimeout,

    /// The product's shape does not meet the minimum input contract
    /// (missing/empty ingredients, or missing nutriments when required).
    /// Not recoverable.
    #[error("invalid product input: {reason}")]
    InputShape { reason: String },
}

pub type Result<T> = std::result::Result<T, EstimationError>;

impl From<lp_solver::SolverError> for EstimationError {
    fn from(err: lp_solver::SolverError) -> Self {
        match err {
            lp_solver::SolverError::Infeasible => EstimationError::RecipeCreation,
            lp_solver::SolverError::TimedOut => EstimationError::SolverTimeout,
        }
    }
}
