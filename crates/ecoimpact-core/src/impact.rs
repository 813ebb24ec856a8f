//! Recipe Impact Calculator (§4.5): the environmental impact of a recipe
//! from its ingredients' reference impact data, optionally sampling each
//! ingredient's uncertainty distribution, plus per-ingredient impact shares.
//!
//! Grounded on `impacts_estimation/utils.py`'s `impact_from_recipe` and the
//! ingredient-share accumulation in `ImpactEstimator.estimate_impacts`.

use rand::distributions::{Distribution as RandDistribution, Uniform};
use rand::Rng;
use rand_distr::{Normal, Triangular};

use crate::settings::IMPACT_MASS_UNIT;
use crate::types::{Distribution, Recipe, ReferenceTables};

/// Draws one value from an ingredient's tagged uncertainty distribution.
/// Falls back silently to a degenerate point draw if the distribution's
/// parameters happen to be malformed (e.g. `min == max` for a triangular),
/// since a single bad ingredient record should not abort a Monte-Carlo run.
fn sample_distribution(dist: &Distribution, rng: &mut impl Rng) -> f64 {
    match dist {
        Distribution::Normal { mean, stddev } => Normal::new(*mean, *stddev)
            .map(|d| d.sample(rng))
            .unwrap_or(*mean),
        Distribution::Lognormal { gmean, gstddev } => {
            let magnitude = gmean.abs();
            let log_sample = Normal::new(magnitude.ln(), gstddev.ln())
                .map(|d| d.sample(rng))
                .unwrap_or_else(|_| magnitude.ln());
            let value = log_sample.exp();
            if *gmean < 0.0 {
                -value
            } else {
                value
            }
        }
        Distribution::Triangular { min, mode, max } => Triangular::new(*min, *max, *mode)
            .map(|d| d.sample(rng))
            .unwrap_or(*mode),
        Distribution::Uniform { min, max } => Uniform::new_inclusive(*min, *max).sample(rng),
    }
}

/// Picks the per-ingredient impact amount: the point `amount` if
/// uncertainty is disabled or none is declared, else a draw from a randomly
/// chosen uncertainty distribution.
fn ingredient_impact_amount(
    tables: &ReferenceTables,
    id: &str,
    impact_name: &str,
    use_uncertainty: bool,
    rng: &mut impl Rng,
) -> Option<f64> {
    let impact = tables.get(id)?.impacts.get(impact_name)?;
    if !use_uncertainty || impact.uncertainty_distributions.is_empty() {
        return Some(impact.amount);
    }
    let idx = rng.gen_range(0..impact.uncertainty_distributions.len());
    Some(sample_distribution(&impact.uncertainty_distributions[idx], rng))
}

/// Total impact of a recipe for `impact_name`, inflated from the known-impact
/// ingredients' mass up to the recipe's total mass (ingredients with no
/// characterization for this impact are assumed to share the product's
/// average impact, matching the original's documented warning). Returns
/// `None` if no ingredient in the recipe is characterized for this impact.
pub fn impact_from_recipe(
    recipe: &Recipe,
    impact_name: &str,
    tables: &ReferenceTables,
    use_uncertainty: bool,
    rng: &mut impl Rng,
) -> Option<f64> {
    let total_mass: f64 = recipe.values().sum();
    let mut known_mass = 0.0;
    let mut result = 0.0;
    for (id, &mass) in recipe {
        let Some(amount) = ingredient_impact_amount(tables, id, impact_name, use_uncertainty, rng) else {
            continue;
        };
        known_mass += mass;
        result += mass * amount / IMPACT_MASS_UNIT;
    }
    if known_mass == 0.0 {
        None
    } else {
        Some(result * total_mass / known_mass)
    }
}

/// Per-ingredient share of `recipe_impact` (the *point* impact value, not a
/// sampled draw, so repeated calls across a Monte-Carlo run accumulate a
/// stable weighted average): `mass * amount / 1000 / recipe_impact` for a
/// characterized ingredient, or a mass share (`mass / total_mass`) for one
/// that has no reference impact data at all.
pub fn ingredient_impact_share(
    recipe: &Recipe,
    impact_name: &str,
    tables: &ReferenceTables,
    recipe_impact: f64,
) -> std::collections::BTreeMap<String, f64> {
    let total_mass: f64 = recipe.values().sum();
    let mut shares = std::collections::BTreeMap::new();
    for (id, &mass) in recipe {
        let amount = tables.get(id).and_then(|r| r.impacts.get(impact_name)).map(|i| i.amount);
        let share = match amount {
            Some(amount) => (mass * amount / IMPACT_MASS_UNIT) / recipe_impact,
            None => mass / total_mass,
        };
        shares.insert(id.clone(), share);
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImpactValue, IngredientReference};
    use rand::rngs::StdRng;
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
    fn inflates_to_total_mass() {
        let tables = tables_with_impact("en:flour", 2.0);
        let mut recipe = Recipe::new();
        recipe.insert("en:flour".to_string(), 50.0);
        recipe.insert("en:unknown".to_string(), 50.0);
        let mut rng = StdRng::seed_from_u64(1);
        let impact = impact_from_recipe(&recipe, "Score unique EF", &tables, false, &mut rng).unwrap();
        // known mass 50g contributes 50*2/1000 = 0.1, inflated by 100/50 = 2 -> 0.2
        assert!((impact - 0.2).abs() < 1e-9);
    }

    #[test]
    fn none_when_nothing_characterized() {
        let tables = ReferenceTables::default();
        let mut recipe = Recipe::new();
        recipe.insert("en:mystery".to_string(), 100.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(impact_from_recipe(&recipe, "Score unique EF", &tables, false, &mut rng).is_none());
    }

    #[test]
    fn uncharacterized_ingredient_gets_mass_share() {
        let tables = tables_with_impact("en:flour", 2.0);
        let mut recipe = Recipe::new();
        recipe.insert("en:flour".to_string(), 50.0);
        recipe.insert("en:unknown".to_string(), 50.0);
        let shares = ingredient_impact_share(&recipe, "Score unique EF", &tables, 0.2);
        assert!((shares["en:flour"] - 0.5).abs() < 1e-9);
        assert!((shares["en:unknown"] - 0.5).abs() < 1e-9);
    }
}
