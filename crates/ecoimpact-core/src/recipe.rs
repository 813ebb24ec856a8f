//! Recipe-level utilities (part of the "Recipe Utilities" component):
//! de-individualizing a sampler's per-variable proportions into a plain
//! recipe, and aggregating a recipe's nutritional composition back up to
//! the product level.
//!
//! Grounded on `impacts_estimation/impact_estimation.py`'s
//! `RandomRecipeCreator.recipe_from_proportions` and
//! `impacts_estimation/utils.py`'s `nutriments_from_recipe`.

use std::collections::BTreeMap;

use crate::graph::original_id;
use crate::settings::NUTRIMENTS_CATEGORIES;
use crate::types::{Recipe, ReferenceTables};

/// Turns a map of individualized-variable proportions (fractions of 1) into
/// a recipe of original-id masses in grams, summing ingredients that were
/// individualized because they appear more than once in the tree.
pub fn recipe_from_proportions(proportions: &BTreeMap<String, f64>, total_mass_grams: f64) -> Recipe {
    let mut recipe: Recipe = BTreeMap::new();
    for (id, &proportion) in proportions {
        *recipe.entry(original_id(id).to_string()).or_insert(0.0) += proportion * total_mass_grams;
    }
    recipe
}

/// Weighted sum of each nutriment category over a recipe's known ingredients,
/// inflated to the recipe's total mass so that unknown-nutriment ingredients
/// don't bias the result downward. A category with no known contributor at
/// all is omitted from the result, matching the original's `del` of empty
/// categories.
pub fn nutriments_from_recipe(recipe: &Recipe, tables: &ReferenceTables) -> BTreeMap<String, f64> {
    let total_mass: f64 = recipe.values().sum();
    let mut result = BTreeMap::new();
    for &nutriment in NUTRIMENTS_CATEGORIES {
        let mut known_mass = 0.0;
        let mut weighted_sum = 0.0;
        for (id, &mass) in recipe {
            let Some(reference) = tables.get(id) else { continue };
            if !reference.nutriments.contains_key(nutriment) {
                continue;
            }
            known_mass += mass;
            weighted_sum += mass * reference.nutriment_value(nutriment) / 100.0;
        }
        if known_mass > 0.0 {
            result.insert(nutriment.to_string(), weighted_sum * total_mass / known_mass);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IngredientReference, NutrimentData, Range};

    fn reference_with(proteins: f64) -> IngredientReference {
        let mut nutriments = BTreeMap::new();
        nutriments.insert(
            "proteins".to_string(),
            NutrimentData { range: Range { min: proteins, max: proteins }, value: proteins },
        );
        IngredientReference { nutriments, impacts: Default::default() }
    }

    #[test]
    fn sums_masses_of_individualized_duplicates() {
        let mut proportions = BTreeMap::new();
        proportions.insert("en:water".to_string(), 0.3);
        proportions.insert("en:water*".to_string(), 0.1);
        let recipe = recipe_from_proportions(&proportions, 100.0);
        assert_eq!(recipe.len(), 1);
        assert!((recipe["en:water"] - 40.0).abs() < 1e-9);
    }

    #[test]
    fn aggregates_and_inflates_to_total_mass() {
        let mut tables = ReferenceTables::default();
        tables.taxonomy.insert("en:flour".to_string());
        tables.ingredients.insert("en:flour".to_string(), reference_with(10.0));

        let mut recipe = Recipe::new();
        recipe.insert("en:flour".to_string(), 50.0);
        recipe.insert("en:unknown".to_string(), 50.0);

        let nutri = nutriments_from_recipe(&recipe, &tables);
        // Known mass is 50g out of 100g total; inflate 5g by 100/50.
        assert!((nutri["proteins"] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn omits_category_with_no_known_contributor() {
        let tables = ReferenceTables::default();
        let mut recipe = Recipe::new();
        recipe.insert("en:mystery".to_string(), 100.0);
        let nutri = nutriments_from_recipe(&recipe, &tables);
        assert!(nutri.is_empty());
    }
}
