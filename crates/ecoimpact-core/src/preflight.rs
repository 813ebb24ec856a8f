//! Preflight checks (§4.1): product normalization before constraint
//! building. Operates on a clone of the caller's product; never mutates the
//! original.

use crate::error::{EstimationError, Result};
use crate::graph::{
    clear_ingredient_graph, define_subingredients_percentage_type, find_leaves, flat_list,
    individualize_ingredients, maximum_percentage_sum, minimum_percentage_sum, natural_bounds,
    remove_unknown_ingredients,
};
use crate::params::EstimationParams;
use crate::settings::{
    FERMENTATION_AGENTS, FERMENTED_FOOD_CATEGORIES, HIGH_WATER_LOSS_CATEGORIES,
    UNCHARACTERIZED_INGREDIENTS_RATIO_WARNING_THRESHOLD,
};
use crate::types::{IngredientNode, Product, ReferenceTables};

pub struct PreflightOutput {
    pub product: Product,
    pub warnings: Vec<String>,
    pub adjusted_maximum_evaporation: Option<f64>,
    pub use_defined_prct: bool,
    pub use_nutritional_info: bool,
    pub uncharacterized_ratio: std::collections::BTreeMap<String, f64>,
    pub ignored_unknown_ingredients: Vec<String>,
    pub uncharacterized_ingredients: std::collections::BTreeMap<String, Vec<String>>,
}

pub fn run(
    product: &Product,
    tables: &ReferenceTables,
    params: &EstimationParams,
    impact_names: &[String],
) -> Result<PreflightOutput> {
    let mut product = product.clone();
    let mut warnings = Vec::new();

    let ingredients = product.ingredients.as_ref().ok_or_else(|| EstimationError::InputShape {
        reason: "product has no ingredients field".to_string(),
    })?;
    if ingredients.is_empty() {
        return Err(EstimationError::InputShape {
            reason: "product has an empty ingredients list".to_string(),
        });
    }

    // 1. Fermentation detection.
    let leaves = flat_list(product.ingredients.as_ref().unwrap());
    let has_fermentation_agent = leaves
        .iter()
        .any(|n| FERMENTATION_AGENTS.contains(&n.id.as_str()));
    let has_fermented_category = product
        .categories_tags
        .iter()
        .any(|c| FERMENTED_FOOD_CATEGORIES.contains(&c.as_str()));
    if has_fermentation_agent || has_fermented_category {
        product.nutriments.remove("carbohydrates_100g");
        product.nutriments.remove("carbohydrates");
        product.nutriments.remove("sugars_100g");
        product.nutriments.remove("sugars");
        warnings.push(
            "Fermented product detected: carbohydrates and sugars constraints dropped.".to_string(),
        );
        tracing::debug!("fermentation detected, dropped carbohydrates/sugars constraints");
    }

    // 2. Water-loss override.
    let adjusted_maximum_evaporation = HIGH_WATER_LOSS_CATEGORIES
        .iter()
        .filter(|(cat, _)| product.categories_tags.iter().any(|c| c == cat))
        .map(|(_, coef)| *coef)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a: f64| a.max(v))));
    if let Some(coef) = adjusted_maximum_evaporation {
        warnings.push(format!(
            "High water-loss category detected: maximum evaporation raised to {coef}."
        ));
    }

    // 3. Flat-with-rank flattening: the data model only supports the tree
    // representation (§3), so the legacy flat-with-rank mode never applies.

    // 4. Unknown-ingredient removal.
    let mut ignored_unknown_ingredients = Vec::new();
    if params.ignore_unknown_ingredients {
        let nodes = product.ingredients.as_mut().unwrap();
        remove_unknown_ingredients(nodes, tables, &mut ignored_unknown_ingredients);
        if nodes.is_empty() {
            return Err(EstimationError::NoKnownIngredients);
        }
        if !ignored_unknown_ingredients.is_empty() {
            warnings.push(format!(
                "Removed unknown ingredients: {}",
                ignored_unknown_ingredients.join(", ")
            ));
        }
    }

    // This runs regardless of `ignore_unknown_ingredients`: a product left
    // with no impact-characterized ingredient (or only water) has nothing
    // to estimate from either way.
    {
        let nodes = product.ingredients.as_ref().unwrap();
        let impact_ids: Vec<String> = find_leaves(nodes)
            .into_iter()
            .filter(|id| {
                tables
                    .get(id.as_str())
                    .is_some_and(|r| impact_names.iter().any(|n| r.has_impact(n)))
            })
            .collect();
        if impact_ids.is_empty() || impact_ids == ["en:water".to_string()] {
            return Err(EstimationError::NoKnownIngredients);
        }
    }

    // 5. Uncharacterized-leaf pruning.
    {
        let nodes = product.ingredients.as_mut().unwrap();
        clear_ingredient_graph(nodes, tables);
        let leaves = find_leaves(nodes);
        let any_characterized = leaves.iter().any(|id| {
            tables
                .get(id.as_str())
                .is_some_and(|r| impact_names.iter().any(|n| r.has_impact(n)))
        });
        if !any_characterized {
            return Err(EstimationError::NoCharacterizedIngredients);
        }
    }

    // 6. Percent-type decision.
    define_subingredients_percentage_type(product.ingredients.as_mut().unwrap());

    // 7. Percentage sanity.
    let mut use_defined_prct = params.use_defined_prct;
    {
        let nodes = product.ingredients.as_mut().unwrap();
        let n = nodes.len() as u32;
        for (i, node) in nodes.iter_mut().enumerate() {
            if let Some(p) = node.percent {
                let rank = (i + 1) as u32;
                let (lo, hi) = natural_bounds(rank, n);
                if !(lo..=hi).contains(&p) {
                    node.percent = None;
                    warnings.push(format!(
                        "Dropped out-of-natural-bounds declared percentage for rank {rank}."
                    ));
                }
            }
        }

        let declared: Vec<(usize, f64)> = nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.percent.filter(|p| *p > 2.0).map(|p| (i, p)))
            .collect();
        let monotonic = declared.windows(2).all(|w| w[0].1 >= w[1].1);

        let min_sum = minimum_percentage_sum(nodes);
        let max_sum = maximum_percentage_sum(nodes);

        if use_defined_prct && (!monotonic || min_sum > 105.0 || max_sum < 95.0) {
            use_defined_prct = false;
            warnings.push(
                "Declared percentages are inconsistent (out of order or implausible sum); \
                 disabling use_defined_prct."
                    .to_string(),
            );
            strip_percentages(nodes);
        }
    }

    // 8. Uncharacterized ratio warnings.
    let mut uncharacterized_ratio = std::collections::BTreeMap::new();
    let mut uncharacterized_ingredients = std::collections::BTreeMap::new();
    {
        let nodes = product.ingredients.as_ref().unwrap();
        let leaves = find_leaves(nodes);
        let total = leaves.len().max(1) as f64;
        let lacking_nutrition: Vec<String> = leaves
            .iter()
            .filter(|id| !tables.get(id.as_str()).is_some_and(|r| r.has_nutrition()))
            .cloned()
            .collect();
        let lacking_impact: Vec<String> = leaves
            .iter()
            .filter(|id| {
                !tables
                    .get(id.as_str())
                    .is_some_and(|r| impact_names.iter().any(|n| r.has_impact(n)))
            })
            .cloned()
            .collect();
        uncharacterized_ratio.insert("nutrition".to_string(), lacking_nutrition.len() as f64 / total);
        uncharacterized_ratio.insert("impact".to_string(), lacking_impact.len() as f64 / total);
        uncharacterized_ingredients.insert("nutrition".to_string(), lacking_nutrition);
        uncharacterized_ingredients.insert("impact".to_string(), lacking_impact);
        for (kind, ratio) in &uncharacterized_ratio {
            if *ratio >= UNCHARACTERIZED_INGREDIENTS_RATIO_WARNING_THRESHOLD {
                warnings.push(format!(
                    "High proportion of ingredients uncharacterized for {kind}: {ratio:.2}."
                ));
            }
        }
    }

    let use_nutritional_info = if !NUTRIMENT_KEYS_PRESENT.iter().any(|k| product.nutriment(k).is_some()) {
        warnings.push("The product has no recognized nutriment information.".to_string());
        false
    } else {
        params.use_nutritional_info
    };

    // 9. Individualization: suffix duplicate ids so the constraint builder
    // and sampler can treat every node as a distinct LP variable. Done last
    // so steps 1-8's reference-table lookups above still see original ids.
    individualize_ingredients(product.ingredients.as_mut().unwrap());

    Ok(PreflightOutput {
        product,
        warnings,
        adjusted_maximum_evaporation,
        use_defined_prct,
        use_nutritional_info,
        uncharacterized_ratio,
        ignored_unknown_ingredients,
        uncharacterized_ingredients,
    })
}

const NUTRIMENT_KEYS_PRESENT: &[&str] = crate::types::NUTRIMENT_KEYS;

fn strip_percentages(nodes: &mut [IngredientNode]) {
    for node in nodes.iter_mut() {
        node.percent = None;
        if let Some(children) = &mut node.ingredients {
            strip_percentages(children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImpactValue, IngredientReference};

    fn tables_with(ids: &[&str]) -> ReferenceTables {
        let mut tables = ReferenceTables::default();
        for id in ids {
            tables.taxonomy.insert(id.to_string());
            tables.ingredients.insert(
                id.to_string(),
                IngredientReference {
                    nutriments: Default::default(),
                    impacts: [(
                        "Score unique EF".to_string(),
                        ImpactValue {
                            amount: 1.0,
                            unit: "mPt".to_string(),
                            uncertainty_distributions: vec![],
                        },
                    )]
                    .into_iter()
                    .collect(),
                },
            );
        }
        tables
    }

    #[test]
    fn rejects_empty_ingredients() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let tables = tables_with(&[]);
        let params = EstimationParams::default();
        let err = run(&product, &tables, &params, &["Score unique EF".to_string()]).unwrap_err();
        assert!(matches!(err, EstimationError::InputShape { .. }));
    }

    #[test]
    fn unknown_only_product_is_rejected() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:unknown-thing")]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let tables = tables_with(&[]);
        let params = EstimationParams::default();
        let err = run(&product, &tables, &params, &["Score unique EF".to_string()]).unwrap_err();
        assert!(matches!(err, EstimationError::NoKnownIngredients));
    }

    #[test]
    fn known_product_passes() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:flour")]),
            nutriments: [("proteins_100g".to_string(), 10.0)].into_iter().collect(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let tables = tables_with(&["en:flour"]);
        let params = EstimationParams::default();
        let out = run(&product, &tables, &params, &["Score unique EF".to_string()]).unwrap();
        assert!(out.use_nutritional_info);
    }
}
