//! Monte-Carlo estimation of a packaged food product's environmental impact
//! from its declared ingredient list and nutrition facts, without a known
//! exact recipe.
//!
//! [`estimate_impacts`] is the crate's single public entry point: it runs
//! Preflight Checks, then the Monte-Carlo Estimator (sampling recipes
//! through the Constraint Builder and [`lp_solver`]), wrapped by the
//! Relaxation Supervisor when `safe_mode` is set.

pub mod confidence;
pub mod constraints;
pub mod error;
pub mod estimator;
pub mod graph;
pub mod impact;
pub mod margins;
pub mod params;
pub mod preflight;
pub mod recipe;
pub mod relaxation;
pub mod sampler;
pub mod settings;
pub mod stats;
pub mod types;

pub use error::{EstimationError, Result};
pub use params::{DualGapType, EstimationParams, EstimationResult};
pub use types::{
    Distribution, ImpactValue, IngredientNode, IngredientReference, NutrimentData, PercentageSample,
    PercentType, Product, Range, Recipe, ReferenceTables,
};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Runs the full pipeline for one product: preflight, then the Monte-Carlo
/// loop, retried under progressively weaker constraints by the Relaxation
/// Supervisor (§4.8) when `params.safe_mode` is set and the first attempt
/// hits an empty feasibility set or a solver timeout.
///
/// Deterministic given `product`, `tables`, `params` and `params.seed`: the
/// RNG is seeded once here and threaded explicitly through every call that
/// needs randomness, rather than drawn from a hidden process-global
/// generator (§5.A).
pub fn estimate_impacts(
    product: &types::Product,
    tables: &types::ReferenceTables,
    params: &params::EstimationParams,
    impact_names: &[String],
) -> error::Result<params::EstimationResult> {
    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    relaxation::estimate_impacts_with_relaxation(product, tables, params, impact_names, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImpactValue, IngredientReference};

    /// End-to-end pound cake scenario (spec.md §8, S1): declared nutrition
    /// for egg/flour/butter/sugar should converge to a numeric impact mean
    /// with every ingredient present at a non-trivial mass.
    #[test]
    fn pound_cake_converges_to_an_impact_estimate() {
        let _ = tracing_subscriber::fmt::try_init();

        let product = Product {
            id: "pound-cake".into(),
            ingredients: Some(vec![
                IngredientNode::new("en:egg"),
                IngredientNode::new("en:flour"),
                IngredientNode::new("en:butter"),
                IngredientNode::new("en:sugar"),
            ]),
            nutriments: [
                ("carbohydrates_100g".to_string(), 46.0),
                ("fat_100g".to_string(), 26.0),
                ("saturated-fat_100g".to_string(), 15.8),
                ("proteins_100g".to_string(), 6.0),
                ("sugars_100g".to_string(), 27.0),
            ]
            .into_iter()
            .collect(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };

        let mut tables = ReferenceTables::default();
        for (id, amount) in [("en:egg", 1.5), ("en:flour", 0.8), ("en:butter", 3.0), ("en:sugar", 0.5)] {
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
        }

        let params = EstimationParams { use_nutritional_info: false, forced_run_nb: Some(50), ..Default::default() };

        let result = estimate_impacts(&product, &tables, &params, &["Score unique EF".to_string()])
            .expect("pound cake is a feasible product");

        assert!(result.number_of_runs <= 1000);
        let mean = result.impacts_geom_means["Score unique EF"];
        assert!(mean > 0.0, "impact mean should be a positive number, got {mean}");

        for ingredient in ["en:egg", "en:flour", "en:butter", "en:sugar"] {
            let recipe = result.recipes.as_ref();
            let share = result.ingredients_mass_share.get(ingredient).copied().unwrap_or(0.0);
            assert!(share > 0.0, "{ingredient} should have a non-zero mass share, got {share}: {recipe:?}");
        }
    }

    #[test]
    fn seeded_runs_are_deterministic() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:flour"), IngredientNode::new("en:water")]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let mut tables = ReferenceTables::default();
        tables.taxonomy.insert("en:flour".to_string());
        tables.ingredients.insert(
            "en:flour".to_string(),
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
            use_nutritional_info: false,
            ignore_unknown_ingredients: false,
            forced_run_nb: Some(10),
            seed: Some(123),
            ..Default::default()
        };

        let a = estimate_impacts(&product, &tables, &params, &["Score unique EF".to_string()]).unwrap();
        let b = estimate_impacts(&product, &tables, &params, &["Score unique EF".to_string()]).unwrap();
        assert_eq!(a.impacts_geom_means, b.impacts_geom_means);
    }
}
