//! Monte-Carlo Estimator (§4.7): the outer loop that draws recipes from the
//! Random Recipe Sampler, accumulates their impacts, and stops once the
//! running log-mean of every impact has converged within the requested
//! confidence interval.
//!
//! Grounded on `impacts_estimation/impacts_estimation.py`'s
//! `ImpactsEstimator.estimate_impacts`.

use std::collections::BTreeMap;

use rand::rngs::StdRng;

use crate::confidence::confidence_score;
use crate::error::{EstimationError, Result};
use crate::graph::find_leaves;
use crate::impact::{impact_from_recipe, ingredient_impact_share};
use crate::params::{EstimationParams, EstimationResult};
use crate::preflight::{self, PreflightOutput};
use crate::recipe::nutriments_from_recipe;
use crate::sampler::{self, SamplerConfig};
use crate::settings::{
    MAX_CONSECUTIVE_NULL_IMPACT_CHARACTERIZED_INGREDIENTS_MASS, MAX_CONSECUTIVE_RECIPE_CREATION_ERROR,
    MINIMUM_TOTAL_MASS_FOR_UNBALANCED_RECIPES, TOP_LEVEL_NUTRIMENTS_CATEGORIES,
    UNCHARACTERIZED_INGREDIENTS_MASS_WARNING_THRESHOLD,
};
use crate::stats::{t_confidence_interval, weighted_geometric_mean, weighted_geometric_stdev, weighted_mean, weighted_quantile};
use crate::types::{Product, Recipe, ReferenceTables};

/// Per-impact accumulators, grouped so `skip_impact` can drop one impact's
/// worth of state in a single call.
struct ImpactState {
    distribution: Vec<f64>,
    log_distribution: Vec<f64>,
    log_means: Vec<f64>,
    mean_ci_distribution: Vec<(f64, f64)>,
    sign: Option<f64>,
    ingredients_impacts_share: BTreeMap<String, f64>,
    convergence_reached: bool,
}

impl ImpactState {
    fn new() -> Self {
        Self {
            distribution: Vec::new(),
            log_distribution: Vec::new(),
            log_means: Vec::new(),
            mean_ci_distribution: Vec::new(),
            sign: None,
            ingredients_impacts_share: BTreeMap::new(),
            convergence_reached: false,
        }
    }
}

/// Runs the full pipeline (preflight, then the Monte-Carlo loop) and returns
/// the aggregated result. This is the crate's top-level entry point; the
/// Relaxation Supervisor (§4.8) wraps calls to this function.
pub fn estimate_impacts(
    product: &Product,
    tables: &ReferenceTables,
    params: &EstimationParams,
    impact_names: &[String],
    rng: &mut StdRng,
) -> Result<EstimationResult> {
    if params.use_nutritional_info && product.nutriments.is_empty() {
        return Err(EstimationError::InputShape {
            reason: "use_nutritional_info is set but the product has no nutriments".to_string(),
        });
    }

    let preflight = preflight::run(product, tables, params, impact_names)?;
    run_monte_carlo(&preflight, tables, params, impact_names, rng)
}

fn run_monte_carlo(
    preflight: &PreflightOutput,
    tables: &ReferenceTables,
    params: &EstimationParams,
    impact_names: &[String],
    rng: &mut StdRng,
) -> Result<EstimationResult> {
    let start_time = std::time::Instant::now();
    let maximum_evaporation = preflight.adjusted_maximum_evaporation.unwrap_or(params.maximum_evaporation);
    let use_defined_prct = preflight.use_defined_prct;
    let use_nutritional_info = preflight.use_nutritional_info;

    let number_of_ingredients = find_leaves(preflight.product.ingredients.as_ref().unwrap()).len();

    let sampler_config = SamplerConfig {
        maximum_evaporation,
        use_defined_prct,
        use_nutritional_info,
        const_relax_coef: params.const_relax_coef,
        total_mass_used: params.total_mass_used,
        min_prct_dist_size: params.min_prct_dist_size,
        confidence_score_weighting_factor: params.confidence_score_weighting_factor,
        allow_unbalanced_recipe: params.allow_unbalanced_recipe,
        solve_config: solve_config_from_params(params),
    };

    let (min_run_nb, max_run_nb, confidence_interval_width) = if let Some(forced) = params.forced_run_nb {
        (2, forced + 1, 0.0)
    } else {
        (params.min_run_nb, params.max_run_nb, params.confidence_interval_width)
    };

    let mut impact_names: Vec<String> = impact_names.to_vec();
    let mut states: BTreeMap<String, ImpactState> =
        impact_names.iter().map(|n| (n.clone(), ImpactState::new())).collect();
    let mut skipped_impacts: Vec<String> = Vec::new();
    let mut impacts_units: BTreeMap<String, String> = BTreeMap::new();
    let mut warnings = preflight.warnings.clone();

    let mut confidence_score_distribution: Vec<f64> = Vec::new();
    let mut total_used_mass_distribution: Vec<f64> = Vec::new();
    let mut recipes: Vec<Recipe> = Vec::new();
    let mut uncharacterized_mass_distribution: BTreeMap<&'static str, Vec<f64>> =
        [("nutrition", Vec::new()), ("impact", Vec::new())].into_iter().collect();

    let mut run: i64 = 0;
    let mut consecutive_null: u32 = 0;

    'main: loop {
        run += 1;
        let mut break_main = false;

        let mut consecutive_recipe_err = 0u32;
        let recipe_100g = 'recipe: loop {
            match sampler::random_recipe(&preflight.product, tables, &sampler_config, rng) {
                Ok(r) => break 'recipe r,
                Err(EstimationError::RecipeCreation) | Err(EstimationError::SolverTimeout) => {
                    consecutive_recipe_err += 1;
                    if consecutive_recipe_err >= MAX_CONSECUTIVE_RECIPE_CREATION_ERROR {
                        return Err(EstimationError::RecipeCreation);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        let recipe: Recipe =
            recipe_100g.iter().map(|(k, &v)| (k.clone(), v * params.quantity / 100.0)).collect();

        let recipe_nutri = nutriments_from_recipe(&recipe_100g, tables);
        let has_common_top_level = use_nutritional_info
            && params.confidence_weighting
            && TOP_LEVEL_NUTRIMENTS_CATEGORIES
                .iter()
                .any(|k| recipe_nutri.contains_key(*k) && preflight.product.nutriment(k).is_some());
        let conf_score = if has_common_top_level {
            let reference = reference_nutriments(&preflight.product);
            let total_mass_ratio: f64 = recipe_100g.values().sum::<f64>() / 100.0;
            let min_mass = MINIMUM_TOTAL_MASS_FOR_UNBALANCED_RECIPES;
            let max_mass = 1.0 / (1.0 - maximum_evaporation);
            confidence_score(
                &recipe_nutri,
                &reference,
                total_mass_ratio,
                min_mass,
                max_mass,
                params.confidence_score_weighting_factor,
            )
            .unwrap_or(1.0)
        } else {
            1.0
        };
        confidence_score_distribution.push(conf_score);

        let total_mass: f64 = recipe.values().sum();
        total_used_mass_distribution.push(total_mass);
        for kind in ["nutrition", "impact"] {
            let ids = &preflight.uncharacterized_ingredients[kind];
            let mass_fraction: f64 = ids.iter().filter_map(|id| recipe.get(id)).sum::<f64>() / total_mass;
            uncharacterized_mass_distribution.get_mut(kind).unwrap().push(mass_fraction);
        }

        recipes.push(recipe.clone());

        for idx in 0..impact_names.len() {
            let impact_name = impact_names[idx].clone();
            let recipe_impact =
                impact_from_recipe(&recipe, &impact_name, tables, params.use_ingredients_impact_uncertainty, rng);

            let recipe_impact = match recipe_impact {
                None => {
                    run -= 1;
                    recipes.pop();
                    confidence_score_distribution.pop();
                    for earlier in &impact_names[0..idx] {
                        let state = states.get_mut(earlier).unwrap();
                        state.distribution.pop();
                        state.log_distribution.pop();
                    }
                    consecutive_null += 1;
                    if consecutive_null >= MAX_CONSECUTIVE_NULL_IMPACT_CHARACTERIZED_INGREDIENTS_MASS {
                        return Err(EstimationError::NoCharacterizedIngredients);
                    }
                    break;
                }
                Some(v) => v,
            };
            consecutive_null = 0;

            if recipe_impact == 0.0 {
                skip_impact(&impact_name, &mut states, &mut skipped_impacts);
                warnings.push(format!(
                    "Geometric mean could not be calculated for impact: {impact_name}.\n\
                     This impact has been ignored."
                ));
                continue;
            }

            let recipe_impact_log = recipe_impact.abs().ln();
            let sign = if recipe_impact >= 0.0 { 1.0 } else { -1.0 };
            {
                let state = states.get_mut(&impact_name).unwrap();
                match state.sign {
                    None => state.sign = Some(sign),
                    Some(s) if s != sign => {
                        drop(state);
                        skip_impact(&impact_name, &mut states, &mut skipped_impacts);
                        warnings.push(format!(
                            "Geometric mean could not be calculated for impact: {impact_name}.\n\
                             This impact has been ignored."
                        ));
                        continue;
                    }
                    _ => {}
                }
            }

            let state = states.get_mut(&impact_name).unwrap();
            state.distribution.push(recipe_impact);
            state.log_distribution.push(recipe_impact_log);

            let shares = ingredient_impact_share(&recipe, &impact_name, tables, recipe_impact);
            for (ingredient, share) in &shares {
                if preflight.ignored_unknown_ingredients.iter().any(|i| i == ingredient) {
                    continue;
                }
                if !impacts_units.contains_key(&impact_name) {
                    if let Some(unit) = tables.get(ingredient).and_then(|r| r.impacts.get(&impact_name)).map(|i| i.unit.clone()) {
                        impacts_units.insert(impact_name.clone(), unit);
                    }
                }
                if run == 1 {
                    state.ingredients_impacts_share.insert(ingredient.clone(), *share);
                } else {
                    let prev_sum: f64 = confidence_score_distribution[..confidence_score_distribution.len() - 1].iter().sum();
                    let last = *confidence_score_distribution.last().unwrap();
                    let total: f64 = confidence_score_distribution.iter().sum();
                    let prev_share = *state.ingredients_impacts_share.get(ingredient).unwrap_or(&0.0);
                    state
                        .ingredients_impacts_share
                        .insert(ingredient.clone(), (prev_sum * prev_share + last * share) / total);
                }
            }

            let weights: Vec<f64> = if params.confidence_weighting {
                confidence_score_distribution.clone()
            } else {
                vec![1.0; state.log_distribution.len()]
            };
            let mean_log = weighted_mean(&state.log_distribution, &weights);
            state.log_means.push(mean_log);

            if run >= min_run_nb as i64 {
                let unweighted = vec![1.0; state.log_means.len()];
                let (lo, hi) = t_confidence_interval(&state.log_means, &unweighted, 1.0 - params.confidence_level);
                let (lo, hi) = (lo.exp(), hi.exp());
                state.mean_ci_distribution.push((lo, hi));

                if (hi - lo) / ((hi + lo) / 2.0) < confidence_interval_width {
                    state.convergence_reached = true;
                }
            }

            if run >= min_run_nb as i64 && states.values().all(|s| s.convergence_reached) {
                break_main = true;
            }

            if run >= max_run_nb as i64 {
                break_main = true;
                for (name, state) in &states {
                    if !state.convergence_reached {
                        warnings.push(format!(
                            "Maximum run number has been reached before convergence of impact \"{name}\""
                        ));
                    }
                }
                break;
            }

            if let Some(forced) = params.forced_run_nb {
                if run == forced as i64 {
                    break_main = true;
                    break;
                }
            }
        }

        impact_names.retain(|n| !skipped_impacts.contains(n));
        if impact_names.is_empty() {
            return Err(EstimationError::NoCharacterizedIngredients);
        }

        if break_main {
            break 'main;
        }
    }

    let mut uncharacterized_ingredients_mass_proportion = BTreeMap::new();
    for kind in ["nutrition", "impact"] {
        let values = &uncharacterized_mass_distribution[kind];
        let v = values.iter().sum::<f64>() / values.len() as f64;
        uncharacterized_ingredients_mass_proportion.insert(kind.to_string(), v);
        if v > UNCHARACTERIZED_INGREDIENTS_MASS_WARNING_THRESHOLD {
            warnings.push(format!(
                "The estimated mass of {kind} uncharacterized ingredients in the product is high: {:.0}%",
                v * 100.0
            ));
        }
    }

    if !preflight.ignored_unknown_ingredients.is_empty() {
        warnings.push(format!(
            "{} ingredients have been ignored because they are absent of the ingredients taxonomy.",
            preflight.ignored_unknown_ingredients.len()
        ));
    }

    let weights: Vec<f64> = if params.confidence_weighting {
        confidence_score_distribution.clone()
    } else {
        vec![1.0; confidence_score_distribution.len()]
    };

    let mut impacts_geom_means = BTreeMap::new();
    let mut impacts_geom_stdevs = BTreeMap::new();
    let mut impacts_quantiles = BTreeMap::new();
    let mut impacts_relative_interquartile = BTreeMap::new();
    let mut ingredients_impacts_share = BTreeMap::new();
    let quantile_labels: Vec<String> = params.quantiles_points.iter().map(|q| format!("{q}")).collect();

    for name in &impact_names {
        let state = &states[name];
        let sign = state.sign.unwrap_or(1.0);
        impacts_geom_means.insert(name.clone(), sign * weighted_geometric_mean(&state.log_distribution, &weights));
        impacts_geom_stdevs.insert(name.clone(), weighted_geometric_stdev(&state.log_distribution, &weights));

        let mut per_quantile = BTreeMap::new();
        for (label, &q) in quantile_labels.iter().zip(params.quantiles_points.iter()) {
            per_quantile.insert(label.clone(), weighted_quantile(&state.distribution, &weights, q));
        }
        let first_quartile = *per_quantile.get("0.25").unwrap_or(&weighted_quantile(&state.distribution, &weights, 0.25));
        let third_quartile = *per_quantile.get("0.75").unwrap_or(&weighted_quantile(&state.distribution, &weights, 0.75));
        let median = *per_quantile.get("0.5").unwrap_or(&weighted_quantile(&state.distribution, &weights, 0.5));
        let relative_iq = (third_quartile - first_quartile) / median;
        if relative_iq > crate::settings::IMPACT_RELATIVE_INTERQUARTILE_WARNING_THRESHOLD {
            warnings.push(format!(
                "The impact relative interquartile is high for {name} ({:.0}%)",
                relative_iq * 100.0
            ));
        }
        impacts_relative_interquartile.insert(name.clone(), relative_iq);
        impacts_quantiles.insert(name.clone(), per_quantile);
        ingredients_impacts_share.insert(name.clone(), state.ingredients_impacts_share.clone());
    }

    let average_total_used_mass = weighted_mean(&total_used_mass_distribution, &weights);

    let mut ingredients_mass_share = BTreeMap::new();
    if let Some(first) = recipes.first() {
        for ingredient in first.keys() {
            let mass_shares: Vec<f64> = recipes
                .iter()
                .map(|r| r.get(ingredient).copied().unwrap_or(0.0) / r.values().sum::<f64>())
                .collect();
            ingredients_mass_share.insert(ingredient.clone(), weighted_mean(&mass_shares, &weights));
        }
    }

    let reliability = reliability_score(
        &preflight.ignored_unknown_ingredients,
        number_of_ingredients,
        params.const_relax_coef,
        &uncharacterized_ingredients_mass_proportion,
        &warnings,
    );

    let (impact_distributions, mean_confidence_interval_distribution, confidence_score_dist_out, recipes_out, total_used_mass_dist_out) =
        if params.distributions_as_result {
            let dists: BTreeMap<String, Vec<f64>> =
                impact_names.iter().map(|n| (n.clone(), states[n].distribution.clone())).collect();
            let cis: BTreeMap<String, Vec<(f64, f64)>> =
                impact_names.iter().map(|n| (n.clone(), states[n].mean_ci_distribution.clone())).collect();
            (
                Some(dists),
                Some(cis),
                Some(confidence_score_distribution.clone()),
                Some(recipes.clone()),
                Some(total_used_mass_distribution.clone()),
            )
        } else {
            (None, None, None, None, None)
        };

    Ok(EstimationResult {
        impacts_geom_means,
        impacts_geom_stdevs,
        impacts_quantiles,
        impacts_relative_interquartile,
        ingredients_impacts_share,
        ingredients_mass_share,
        impacts_units,
        product_quantity: params.quantity,
        const_relax_coef: params.const_relax_coef,
        warnings,
        reliability,
        ignored_unknown_ingredients: preflight.ignored_unknown_ingredients.clone(),
        uncharacterized_ingredients: preflight.uncharacterized_ingredients.clone(),
        uncharacterized_ingredients_ratio: preflight.uncharacterized_ratio.clone(),
        uncharacterized_ingredients_mass_proportion,
        number_of_runs: run.max(0) as u32,
        number_of_ingredients,
        average_total_used_mass,
        calculation_time_secs: start_time.elapsed().as_secs_f64(),
        data_sources: Vec::new(),
        impact_distributions,
        mean_confidence_interval_distribution,
        confidence_score_distribution: confidence_score_dist_out,
        recipes: recipes_out,
        total_used_mass_distribution: total_used_mass_dist_out,
    })
}

fn skip_impact(name: &str, states: &mut BTreeMap<String, ImpactState>, skipped: &mut Vec<String>) {
    states.remove(name);
    skipped.push(name.to_string());
}

/// Maps the caller-facing solver tolerances (§6) onto the tableau engine's
/// [`lp_solver::SolveConfig`]. `dual_gap_type`/`dual_gap_limit` both resolve
/// to the same absolute tolerance: the two-phase simplex always pivots to an
/// exact optimum rather than a branch-and-bound-style relative gap, so there
/// is no distinct relative-gap quantity to honor separately (see DESIGN.md).
fn solve_config_from_params(params: &EstimationParams) -> lp_solver::SolveConfig {
    lp_solver::SolveConfig {
        dual_gap_absolute: params.dual_gap_limit,
        solver_time_limit: std::time::Duration::from_secs(params.solver_time_limit_secs),
        time_limit_gap_tolerance: params.time_limit_dual_gap_limit,
    }
}

fn reference_nutriments(product: &Product) -> BTreeMap<String, f64> {
    crate::settings::NUTRIMENTS_CATEGORIES
        .iter()
        .filter_map(|&k| product.nutriment(k).map(|v| (k.to_string(), v)))
        .collect()
}

/// Reliability tier (§4.7.4): 1 is fully reliable, 4 is unreliable. Driven by
/// the share of ignored/uncharacterized ingredient mass, whether constraints
/// were relaxed, and whether a blocking warning was raised.
fn reliability_score(
    ignored_unknown_ingredients: &[String],
    number_of_ingredients: usize,
    const_relax_coef: f64,
    uncharacterized_ingredients_mass_proportion: &BTreeMap<String, f64>,
    warnings: &[String],
) -> u8 {
    let denom = ignored_unknown_ingredients.len() + number_of_ingredients;
    let ignored_ratio = if denom == 0 { 0.0 } else { ignored_unknown_ingredients.len() as f64 / denom as f64 };

    for blocking in crate::settings::RESULTS_WARNINGS_NOT_RELIABLE {
        if warnings.iter().any(|w| w.contains(blocking)) {
            return 4;
        }
    }

    if const_relax_coef > 0.05 {
        return 4;
    }

    let nutrition = uncharacterized_ingredients_mass_proportion.get("nutrition").copied().unwrap_or(0.0);
    let impact = uncharacterized_ingredients_mass_proportion.get("impact").copied().unwrap_or(0.0);

    if nutrition == 0.0 && impact == 0.0 && ignored_ratio == 0.0 && const_relax_coef == 0.0 {
        return 1;
    }
    if nutrition <= 0.05 && impact <= 0.05 && ignored_ratio <= 0.05 && const_relax_coef == 0.0 {
        return 2;
    }
    if nutrition <= 0.25 && impact <= 0.25 && ignored_ratio <= 0.25 && const_relax_coef <= 0.05 {
        return 3;
    }
    4
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
    fn converges_with_forced_run_number() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:flour"), IngredientNode::new("en:water")]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let tables = tables_with_impact("en:flour", 2.0);
        let mut params = EstimationParams {
            use_nutritional_info: false,
            ignore_unknown_ingredients: false,
            forced_run_nb: Some(5),
            ..Default::default()
        };
        params.quantity = 100.0;
        let mut rng = StdRng::seed_from_u64(1);
        let result = estimate_impacts(&product, &tables, &params, &["Score unique EF".to_string()], &mut rng).unwrap();
        assert_eq!(result.number_of_runs, 5);
        assert!(result.impacts_geom_means.contains_key("Score unique EF"));
        assert!(result.impacts_geom_means["Score unique EF"] > 0.0);
    }

    #[test]
    fn rejects_product_with_empty_nutriments_when_nutrition_required() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:flour")]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let tables = tables_with_impact("en:flour", 2.0);
        let params = EstimationParams { use_nutritional_info: true, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(1);
        let err = estimate_impacts(&product, &tables, &params, &["Score unique EF".to_string()], &mut rng).unwrap_err();
        assert!(matches!(err, EstimationError::InputShape { .. }));
    }
}
