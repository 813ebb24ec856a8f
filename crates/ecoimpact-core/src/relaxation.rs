//! Relaxation Supervisor (§4.8): wraps the Monte-Carlo Estimator and retries
//! with progressively weaker constraints when the feasibility set is empty
//! or the solver times out.
//!
//! Grounded on `impacts_estimation/impacts_estimation.py`'s
//! `estimate_impacts`, which wraps `ImpactsEstimator.estimate_impacts` in a
//! loop over `constraints_levels` when `safe_mode` is set.

use rand::rngs::StdRng;

use crate::error::{EstimationError, Result};
use crate::estimator;
use crate::params::EstimationParams;
use crate::settings::RELAXATION_SCHEDULE;
use crate::types::{Product, ReferenceTables};

/// Runs [`estimator::estimate_impacts`] once with `params` as given; if that
/// fails with a recoverable error (`RecipeCreation`/`SolverTimeout`) and
/// `params.safe_mode` is set, retries with each entry of
/// [`RELAXATION_SCHEDULE`] in turn, each combined with the caller's original
/// settings so that a level never relaxes the problem *more* than the
/// caller allowed (§9's open question: the first schedule entry that
/// succeeds is accepted, so two products needing different relaxation
/// amounts are reported with different `const_relax_coef` values — this is
/// the documented, intended contract, not a bug).
pub fn estimate_impacts_with_relaxation(
    product: &Product,
    tables: &ReferenceTables,
    params: &EstimationParams,
    impact_names: &[String],
    rng: &mut StdRng,
) -> Result<crate::params::EstimationResult> {
    let first = estimator::estimate_impacts(product, tables, params, impact_names, rng);

    let original_err = match first {
        Ok(result) => return Ok(result),
        Err(e @ (EstimationError::RecipeCreation | EstimationError::SolverTimeout)) => e,
        Err(other) => return Err(other),
    };

    if !params.safe_mode {
        return Err(original_err);
    }

    for &(level_use_defined_prct, level_relax_coef) in RELAXATION_SCHEDULE {
        let mut relaxed = params.clone();
        relaxed.use_defined_prct = level_use_defined_prct && params.use_defined_prct;
        relaxed.const_relax_coef = relaxed.const_relax_coef.max(level_relax_coef);

        tracing::info!(
            use_defined_prct = relaxed.use_defined_prct,
            const_relax_coef = relaxed.const_relax_coef,
            "relaxation supervisor retrying with weaker constraints"
        );

        match estimator::estimate_impacts(product, tables, &relaxed, impact_names, rng) {
            Ok(mut result) => {
                result.warnings.push(format!(
                    "Constraints were relaxed to reach a feasible recipe: use_defined_prct={}, const_relax_coef={}.",
                    relaxed.use_defined_prct, relaxed.const_relax_coef
                ));
                return Ok(result);
            }
            Err(EstimationError::RecipeCreation | EstimationError::SolverTimeout) => continue,
            Err(other) => return Err(other),
        }
    }

    Err(original_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImpactValue, IngredientNode, IngredientReference};
    use rand::SeedableRng;

    fn tables_with_impact(id: &str, amount: f64) -> ReferenceTables {
        let mut tables = ReferenceTables::default();
        tables.taxonomy.insert(id.to_string());
        tables.ingredients.insert(
            id.to_string(),
            IngredientReference {
                nutriments: Default::default(),
                impacts: [(
                    "Score unique EF".to_string(),
                    ImpactValue { amount, unit: "mPt".to_string(), uncertainty_distributions: vec![] },
                )]
                .into_iter()
                .collect(),
            },
        );
        tables
    }

    #[test]
    fn infeasible_nutrition_recovers_under_safe_mode() {
        // Declared fat of 3% is inconsistent with palm-oil + butter (both
        // near-pure fat): infeasible at const_relax_coef=0, feasible once
        // relaxed (S3 in spec.md §8).
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:palm-oil"), IngredientNode::new("en:butter")]),
            nutriments: [
                ("fat_100g".to_string(), 3.0),
                ("proteins_100g".to_string(), 25.0),
                ("carbohydrates_100g".to_string(), 30.0),
                ("sugars_100g".to_string(), 20.0),
            ]
            .into_iter()
            .collect(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let mut tables = tables_with_impact("en:palm-oil", 1.0);
        tables.taxonomy.insert("en:butter".to_string());
        tables.ingredients.insert(
            "en:butter".to_string(),
            IngredientReference {
                nutriments: Default::default(),
                impacts: [(
                    "Score unique EF".to_string(),
                    ImpactValue { amount: 2.0, unit: "mPt".to_string(), uncertainty_distributions: vec![] },
                )]
                .into_iter()
                .collect(),
            },
        );

        let params = EstimationParams {
            forced_run_nb: Some(3),
            safe_mode: true,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(2);
        let result =
            estimate_impacts_with_relaxation(&product, &tables, &params, &["Score unique EF".to_string()], &mut rng);
        assert!(result.is_ok(), "expected safe_mode to recover via relaxation: {result:?}");
        let result = result.unwrap();
        assert!(result.const_relax_coef > 0.0);
        assert!(result.warnings.iter().any(|w| w.contains("relaxed")));
    }

    #[test]
    fn same_infeasible_product_fails_fast_without_safe_mode() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:palm-oil"), IngredientNode::new("en:butter")]),
            nutriments: [
                ("fat_100g".to_string(), 3.0),
                ("proteins_100g".to_string(), 25.0),
                ("carbohydrates_100g".to_string(), 30.0),
                ("sugars_100g".to_string(), 20.0),
            ]
            .into_iter()
            .collect(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let mut tables = tables_with_impact("en:palm-oil", 1.0);
        tables.taxonomy.insert("en:butter".to_string());
        tables.ingredients.insert(
            "en:butter".to_string(),
            IngredientReference {
                nutriments: Default::default(),
                impacts: [(
                    "Score unique EF".to_string(),
                    ImpactValue { amount: 2.0, unit: "mPt".to_string(), uncertainty_distributions: vec![] },
                )]
                .into_iter()
                .collect(),
            },
        );

        let params = EstimationParams {
            forced_run_nb: Some(3),
            safe_mode: false,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(2);
        let result =
            estimate_impacts_with_relaxation(&product, &tables, &params, &["Score unique EF".to_string()], &mut rng);
        assert!(matches!(
            result,
            Err(EstimationError::RecipeCreation) | Err(EstimationError::SolverTimeout)
        ));
    }
}
