//! Random Recipe Sampler (§4.4): draws one plausible 100g recipe consistent
//! with the Constraint Builder's invariants, an optional empirical
//! percentage prior per ingredient, and a confidence-maximizing total mass.
//!
//! Grounded on `impacts_estimation/impact_estimation.py`'s
//! `RandomRecipeCreator.random_recipe`, `_pick_proportion`, and
//! `_pick_total_mass`.
//!
//! Each call rebuilds its [`ConstraintModel`] from scratch via
//! [`constraints::build`] rather than incrementally clearing and
//! re-installing constraints on a reused solver instance. The two are
//! observationally equivalent here (the model carries no state besides its
//! constraints) and far simpler to get right; see DESIGN.md.
//!
//! The per-ingredient pinning loop (steps 2-3) always runs against the
//! provisional `m >= 0.99` floor, per §4.4 step 1. When
//! `allow_unbalanced_recipe` is set, step 5's "optional unbalance" then
//! rebuilds a second model with the looser floor and an uncapped
//! evaporation variable, replays every `sampler::pin::*` constraint already
//! decided, and hands that model to [`pick_total_mass`] — a rebuild rather
//! than a live bound relax because the McCormick envelopes on `m * x_i` are
//! derived from `m`'s box bounds at build time (see `constraints::build`).

use std::collections::BTreeMap;

use rand::distributions::Distribution as RandDistribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::Normal;

use crate::confidence::confidence_score;
use crate::constraints::{self, drop_decreasing_from_rank, var_name, ConstraintModel, MASS_VAR};
use crate::error::Result;
use crate::graph::original_id;
use crate::recipe::{nutriments_from_recipe, recipe_from_proportions};
use crate::settings::{
    DECREASING_PROPORTION_ORDER_LIMIT, MASS_GRID_STEP, NUTRIMENTS_CATEGORIES,
    TOP_LEVEL_NUTRIMENTS_CATEGORIES,
};
use crate::types::{PercentageSample, Product, Recipe, ReferenceTables};

/// Parameters the sampler needs on every call, factored out of
/// [`crate::params::EstimationParams`] so the estimator can pass them down
/// without re-threading the whole params struct.
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub maximum_evaporation: f64,
    pub use_defined_prct: bool,
    pub use_nutritional_info: bool,
    pub const_relax_coef: f64,
    pub total_mass_used: Option<f64>,
    pub min_prct_dist_size: usize,
    pub confidence_score_weighting_factor: f64,
    /// §4.4 step 5: release the provisional mass floor and evaporation
    /// ceiling before the mass-choice step.
    pub allow_unbalanced_recipe: bool,
    pub solve_config: lp_solver::SolveConfig,
}

/// Draws one plausible recipe for 100g of finished product. Ids in the
/// returned recipe are original (de-individualized) ingredient ids, masses
/// in grams.
pub fn random_recipe(
    product: &Product,
    tables: &ReferenceTables,
    config: &SamplerConfig,
    rng: &mut StdRng,
) -> Result<Recipe> {
    let mut cm = build_model(product, tables, config, false);
    pin_total_mass(&mut cm, config);

    let mut shuffled = cm.leaves.clone();
    shuffled.shuffle(rng);

    let mut proportions: BTreeMap<String, f64> = BTreeMap::new();
    let mut dropped_ranks: Vec<usize> = Vec::new();
    for id in &shuffled {
        let var = var_name(id);
        let inf = cm.model.minimize(&var)?;
        let sup = cm.model.maximize(&var)?;
        let proportion = pick_proportion(tables, product, id, inf, sup, config.min_prct_dist_size, rng);

        proportions.insert(id.clone(), proportion);
        cm.model.add_constraint(
            &format!("sampler::pin::{id}"),
            &[(var.as_str(), 1.0)],
            lp_solver::ConstraintOp::Eq,
            proportion,
        );

        if proportion <= DECREASING_PROPORTION_ORDER_LIMIT {
            if let Some(rank) = cm.top_level.iter().position(|t| t == id) {
                drop_decreasing_from_rank(&mut cm.model, &cm.top_level, rank);
                dropped_ranks.push(rank);
            }
        }
    }

    // §4.4 step 5: rebuild with the looser floor/ceiling for the
    // mass-choice step, replaying every pin decided above since the
    // McCormick envelopes in the tight-floor model can't simply be relaxed.
    let mut mass_choice_cm = if config.allow_unbalanced_recipe {
        let mut relaxed = build_model(product, tables, config, true);
        pin_total_mass(&mut relaxed, config);
        for (id, proportion) in &proportions {
            relaxed.model.add_constraint(
                &format!("sampler::pin::{id}"),
                &[(var_name(id).as_str(), 1.0)],
                lp_solver::ConstraintOp::Eq,
                *proportion,
            );
        }
        for rank in dropped_ranks {
            drop_decreasing_from_rank(&mut relaxed.model, &relaxed.top_level, rank);
        }
        relaxed
    } else {
        cm
    };

    let total_mass = pick_total_mass(&mut mass_choice_cm, &proportions, tables, product, config, rng)?;
    Ok(recipe_from_proportions(&proportions, total_mass))
}

fn build_model(
    product: &Product,
    tables: &ReferenceTables,
    config: &SamplerConfig,
    allow_unbalanced_recipe: bool,
) -> ConstraintModel {
    constraints::build(
        product,
        tables,
        config.maximum_evaporation,
        config.use_defined_prct,
        config.use_nutritional_info,
        config.const_relax_coef,
        allow_unbalanced_recipe,
        config.solve_config,
    )
}

fn pin_total_mass(cm: &mut ConstraintModel, config: &SamplerConfig) {
    if let Some(total) = config.total_mass_used {
        cm.model.add_constraint(
            "sampler::pin_total_mass",
            &[(MASS_VAR, 1.0)],
            lp_solver::ConstraintOp::Eq,
            total / 100.0,
        );
    }
}

/// Picks a random proportion for one ingredient within its solved `[inf,
/// sup]` interval: from an empirical percentage prior (narrowed to the
/// product's most specific matching category with enough samples) via
/// reject-sampled Gaussian-kernel density estimation, or uniformly if no
/// prior has enough data.
fn pick_proportion(
    tables: &ReferenceTables,
    product: &Product,
    id: &str,
    inf: f64,
    sup: f64,
    min_dist_size: usize,
    rng: &mut StdRng,
) -> f64 {
    if round8(inf) == round8(sup) {
        return inf;
    }

    let inf_pct = inf * 100.0;
    let sup_pct = sup * 100.0;
    let orig = original_id(id);

    let in_range: Vec<&PercentageSample> = tables
        .percentage_distribution
        .iter()
        .filter(|s| s.id == orig && s.percent >= inf_pct && s.percent <= sup_pct)
        .collect();

    let mut chosen: Vec<&PercentageSample> = in_range.clone();
    if !product.categories_tags.is_empty() {
        for idx in (0..product.categories_tags.len()).rev() {
            let category = &product.categories_tags[idx];
            let bucket: Vec<&PercentageSample> =
                in_range.iter().copied().filter(|s| s.categories_tags.iter().any(|c| c == category)).collect();
            if bucket.len() >= min_dist_size {
                chosen = bucket;
                break;
            }
        }
    }

    if chosen.len() < min_dist_size {
        return rng.gen_range(inf..=sup);
    }

    let bandwidth = ((sup_pct - inf_pct) / 10.0).max(1e-9);
    let noise = Normal::new(0.0, bandwidth).expect("positive bandwidth");
    loop {
        let base = chosen.choose(rng).expect("non-empty").percent;
        let draw = base + noise.sample(rng);
        if draw >= inf_pct && draw <= sup_pct {
            return draw / 100.0;
        }
    }
}

/// Chooses the total ingredient mass (in grams, for 100g of final product)
/// that maximizes the recipe's confidence score against the product's
/// declared nutriments, scanning `[inf, sup]` on a fixed grid. Falls back to
/// a caller-fixed mass, the interval midpoint (if the interval is already
/// narrower than the grid step), or the interval's lower bound (if
/// nutritional information can't discriminate between candidates).
fn pick_total_mass(
    cm: &mut ConstraintModel,
    proportions: &BTreeMap<String, f64>,
    tables: &ReferenceTables,
    product: &Product,
    config: &SamplerConfig,
    _rng: &mut StdRng,
) -> Result<f64> {
    if let Some(total) = config.total_mass_used {
        return Ok(total);
    }

    let inf = cm.model.minimize(MASS_VAR)?;
    let sup = cm.model.maximize(MASS_VAR)?;
    if sup - inf <= MASS_GRID_STEP {
        return Ok(100.0 * (inf + sup) / 2.0);
    }

    let recipe_at_inf = recipe_from_proportions(proportions, inf * 100.0);
    let recipe_nutri_at_inf = nutriments_from_recipe(&recipe_at_inf, tables);
    let has_common_nutriment = config.use_nutritional_info
        && TOP_LEVEL_NUTRIMENTS_CATEGORIES
            .iter()
            .any(|k| recipe_nutri_at_inf.contains_key(*k) && product.nutriment(k).is_some());

    if !has_common_nutriment {
        return Ok(inf * 100.0);
    }

    let reference = reference_nutriments(product);
    let mut best_score = 0.0;
    let mut best_mass = inf;
    let mut m = inf;
    while m < sup {
        let recipe = recipe_from_proportions(proportions, m * 100.0);
        let recipe_nutri = nutriments_from_recipe(&recipe, tables);
        if let Ok(score) =
            confidence_score(&recipe_nutri, &reference, m, inf, sup, config.confidence_score_weighting_factor)
        {
            if score > best_score {
                best_score = score;
                best_mass = m;
            }
        }
        m += MASS_GRID_STEP;
    }

    Ok(best_mass * 100.0)
}

fn reference_nutriments(product: &Product) -> BTreeMap<String, f64> {
    NUTRIMENTS_CATEGORIES
        .iter()
        .filter_map(|&k| product.nutriment(k).map(|v| (k.to_string(), v)))
        .collect()
}

fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IngredientNode, IngredientReference};
    use rand::SeedableRng;

    fn tables_with(ids: &[&str]) -> ReferenceTables {
        let mut tables = ReferenceTables::default();
        for id in ids {
            tables.taxonomy.insert(id.to_string());
            tables.ingredients.insert(id.to_string(), IngredientReference::default());
        }
        tables
    }

    #[test]
    fn produces_a_recipe_summing_to_the_chosen_mass() {
        let mut product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:flour"), IngredientNode::new("en:water")]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        crate::graph::individualize_ingredients(product.ingredients.as_mut().unwrap());
        let tables = tables_with(&["en:flour", "en:water"]);
        let config = SamplerConfig {
            maximum_evaporation: 0.4,
            use_defined_prct: false,
            use_nutritional_info: false,
            const_relax_coef: 0.0,
            total_mass_used: None,
            min_prct_dist_size: 30,
            confidence_score_weighting_factor: 10.0,
            allow_unbalanced_recipe: true,
            solve_config: lp_solver::SolveConfig::default(),
        };
        let mut rng = StdRng::seed_from_u64(42);
        let recipe = random_recipe(&product, &tables, &config, &mut rng).unwrap();
        assert_eq!(recipe.len(), 2);
        let total: f64 = recipe.values().sum();
        assert!(total > 0.0);
    }

    #[test]
    fn fixed_total_mass_used_is_respected() {
        let mut product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:flour"), IngredientNode::new("en:water")]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        crate::graph::individualize_ingredients(product.ingredients.as_mut().unwrap());
        let tables = tables_with(&["en:flour", "en:water"]);
        let config = SamplerConfig {
            maximum_evaporation: 0.4,
            use_defined_prct: false,
            use_nutritional_info: false,
            const_relax_coef: 0.0,
            total_mass_used: Some(120.0),
            min_prct_dist_size: 30,
            confidence_score_weighting_factor: 10.0,
            allow_unbalanced_recipe: true,
            solve_config: lp_solver::SolveConfig::default(),
        };
        let mut rng = StdRng::seed_from_u64(7);
        let recipe = random_recipe(&product, &tables, &config, &mut rng).unwrap();
        let total: f64 = recipe.values().sum();
        assert!((total - 120.0).abs() < 1e-6);
    }
}
