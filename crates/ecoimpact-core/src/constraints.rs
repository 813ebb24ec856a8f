//! The Constraint Builder (§4.2): turns a preflight-normalized,
//! individualized ingredient tree into an [`lp_solver::Model`] carrying the
//! mass-balance invariants I1-I7.
//!
//! The original builds this model directly against a nonlinear solver
//! (`pyscipopt`), where the mass `m`, the evaporation coefficient `e` and
//! every ingredient share `x_i` interact through products like `m * e * x_i`
//! (I4) and `m * x_i` (I5). `lp-solver` is a linear engine, so those products
//! are linearized via McCormick envelopes (`mccormick::product`) rather than
//! reproduced exactly — a disclosed relaxation, not a silent approximation;
//! see DESIGN.md.

use std::collections::BTreeMap;

use lp_solver::{ConstraintOp, Model};

use crate::graph::{find_leaves, flat_list, natural_bounds, original_id};
use crate::settings::{
    nutriment_quality_warnings, DECREASING_PROPORTION_ORDER_LIMIT, GLOBAL_QUALITY_DATA_WARNINGS,
    MINIMUM_TOTAL_MASS_FOR_UNBALANCED_RECIPES, NUTRIMENTS_CATEGORIES, PROVISIONAL_MASS_FLOOR,
    TOP_LEVEL_NUTRIMENTS_CATEGORIES,
};
use crate::types::{IngredientNode, Product, ReferenceTables};

pub const MASS_VAR: &str = "m";
pub const EVAPORATION_VAR: &str = "e";

/// LP variable name for ingredient `id` (already individualized).
pub fn var_name(id: &str) -> String {
    format!("x::{id}")
}

/// What the installed model looks like, so the sampler and mass-choice step
/// can walk the same tree the constraints were built from without
/// recomputing it.
pub struct ConstraintModel {
    pub model: Model,
    /// Individualized leaf ids, in tree (declared) order.
    pub leaves: Vec<String>,
    /// Individualized compound-node ids, in tree order.
    pub compounds: Vec<String>,
    /// Individualized top-level ids, in declared order (what
    /// `drop_decreasing_from_rank` and I3/I7 operate over).
    pub top_level: Vec<String>,
    pub mass_upper_bound: f64,
}

/// Builds the LP model for a preflight-normalized product. `product.ingredients`
/// must already be individualized (unique ids).
///
/// `allow_unbalanced_recipe` picks which of `m`'s two floors (§4.4 step 1 vs.
/// step 5's "optional unbalance") gets installed, along with the matching
/// evaporation ceiling: `false` for the provisional
/// [`PROVISIONAL_MASS_FLOOR`] used while pinning ingredient shares, `true`
/// for the looser [`MINIMUM_TOTAL_MASS_FOR_UNBALANCED_RECIPES`] floor and an
/// uncapped evaporation variable used for the final mass-choice step. The
/// McCormick envelopes on `m * x_i` are derived from `m`'s box bounds at
/// build time, so switching floors mid-flow calls for a fresh `build()`
/// rather than relaxing bounds on a live model — see the sampler.
pub fn build(
    product: &Product,
    tables: &ReferenceTables,
    maximum_evaporation: f64,
    use_defined_prct: bool,
    use_nutritional_info: bool,
    const_relax_coef: f64,
    allow_unbalanced_recipe: bool,
    solve_config: lp_solver::SolveConfig,
) -> ConstraintModel {
    let nodes = product.ingredients.as_ref().expect("preflight guarantees ingredients");
    let top_level: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let mut leaves = find_leaves(nodes);
    let flat = flat_list(nodes);
    let all_ids: Vec<String> = flat.iter().map(|n| n.id.clone()).collect();
    let compound_ids: Vec<String> = all_ids.iter().filter(|id| !leaves.contains(id)).cloned().collect();

    // If `en:water` is not declared at the top level, EU labelling rules
    // allow omitting water under 5% of mass; add a synthetic leaf for it so
    // I1/I4/I5 and the sampler still account for hidden water.
    let water_present = top_level.iter().any(|id| original_id(id) == "en:water");
    let synthetic_water = if water_present {
        None
    } else {
        let mut candidate = "en:water".to_string();
        while all_ids.contains(&candidate) {
            candidate.push('*');
        }
        leaves.push(candidate.clone());
        Some(candidate)
    };

    let (mass_lower_bound, evaporation_upper_bound) = if allow_unbalanced_recipe {
        (MINIMUM_TOTAL_MASS_FOR_UNBALANCED_RECIPES, 1.0)
    } else {
        (PROVISIONAL_MASS_FLOOR, maximum_evaporation)
    };
    let mass_upper_bound = 1.0 / (1.0 - evaporation_upper_bound).max(1e-6);

    let mut model = Model::with_config(solve_config);
    model.add_variable(MASS_VAR, mass_lower_bound, mass_upper_bound, lp_solver_kind());
    model.add_variable(EVAPORATION_VAR, 0.0, evaporation_upper_bound, lp_solver_kind());

    for id in &all_ids {
        model.add_variable(&var_name(id), 0.0, 1.0, lp_solver_kind());
    }
    if let Some(water_id) = &synthetic_water {
        model.add_variable(&var_name(water_id), 0.0, 0.05, lp_solver_kind());
    }

    // I7: natural bounds on top-level shares, tightened by the declared
    // percentage (as a fixed point) when `use_defined_prct` survived
    // preflight.
    let n = top_level.len() as u32;
    for (i, id) in top_level.iter().enumerate() {
        let rank = (i + 1) as u32;
        let (lo, hi) = natural_bounds(rank, n);
        model.add_constraint(
            &format!("I7::lo::{id}"),
            &[(var_name(id).as_str(), 1.0)],
            ConstraintOp::Ge,
            lo / 100.0,
        );
        model.add_constraint(
            &format!("I7::hi::{id}"),
            &[(var_name(id).as_str(), 1.0)],
            ConstraintOp::Le,
            hi / 100.0,
        );
    }
    if use_defined_prct {
        for node in nodes {
            if let Some(p) = node.percent {
                model.add_constraint(
                    &format!("I7::declared::{}", node.id),
                    &[(var_name(&node.id).as_str(), 1.0)],
                    ConstraintOp::Eq,
                    p / 100.0,
                );
            }
        }
    }

    // I1: every leaf share (including a synthetic undeclared-water leaf, if
    // any) sums to 1.
    let leaf_names: Vec<String> = leaves.iter().map(|id| var_name(id)).collect();
    let i1_expr: Vec<(&str, f64)> = leaf_names.iter().map(|n| (n.as_str(), 1.0)).collect();
    model.add_constraint("I1", &i1_expr, ConstraintOp::Eq, 1.0);

    // I2: every compound node's share equals the sum of its direct children.
    install_sum_of_children(&mut model, nodes);

    // I3: consecutive siblings declared in decreasing order, at every level.
    install_decreasing_order(&mut model, nodes, true);

    // I4/I5: evaporation and total mass balance, linearized via McCormick
    // envelopes on `u_i = m * x_i` and `z_i = e * u_i` (~= m * e * x_i).
    let relax = 1.0 + const_relax_coef;
    let mut u_names = BTreeMap::new();
    let mut z_names = BTreeMap::new();
    for id in &leaves {
        let u = mccormick_product(
            &mut model,
            &format!("u::{id}"),
            MASS_VAR,
            (mass_lower_bound, mass_upper_bound),
            &var_name(id),
            (0.0, 1.0),
        );
        let z = mccormick_product(
            &mut model,
            &format!("z::{id}"),
            EVAPORATION_VAR,
            (0.0, evaporation_upper_bound),
            &u,
            (0.0, mass_upper_bound),
        );
        u_names.insert(id.clone(), u);
        z_names.insert(id.clone(), z);
    }

    if use_nutritional_info && !has_global_quality_warning(product) {
        let mut i4_hi: Vec<(&str, f64)> = vec![(MASS_VAR, 1.0)];
        let mut i4_lo: Vec<(&str, f64)> = vec![(MASS_VAR, 1.0)];
        let mut coeffs_hi = Vec::new();
        let mut coeffs_lo = Vec::new();
        for id in &leaves {
            let key = original_id(id);
            let r = tables.get(key);
            let water = r
                .map(|r| r.nutriment_range("water"))
                .unwrap_or_else(crate::types::Range::unknown_nutriment);
            coeffs_hi.push((z_names[id].clone(), -water.max / 100.0));
            coeffs_lo.push((z_names[id].clone(), -water.min / 100.0));
        }
        for (name, c) in &coeffs_hi {
            i4_hi.push((name.as_str(), *c));
        }
        for (name, c) in &coeffs_lo {
            i4_lo.push((name.as_str(), *c));
        }
        model.add_constraint("I4::hi", &i4_hi, ConstraintOp::Le, relax);
        model.add_constraint("I4::lo", &i4_lo, ConstraintOp::Ge, 2.0 - relax);

        // I5: total recovered mass from composition stays within tolerance of
        // the declared total.
        let mut i5_terms: Vec<(String, f64)> = Vec::new();
        for id in &leaves {
            let key = original_id(id);
            let r = tables.get(key);
            let water = r.map(|r| r.nutriment_value("water")).unwrap_or(0.0);
            let ash = r.map(|r| r.nutriment_value("ash")).unwrap_or(0.0);
            let nutrient_sum: f64 = TOP_LEVEL_NUTRIMENTS_CATEGORIES
                .iter()
                .map(|n| r.map(|r| r.nutriment_value(n)).unwrap_or(0.0))
                .sum();
            let u = &u_names[id];
            let z = &z_names[id];
            i5_terms.push((u.clone(), (water + nutrient_sum + ash) / 100.0));
            i5_terms.push((z.clone(), -water / 100.0));
        }
        let i5_expr: Vec<(&str, f64)> = i5_terms.iter().map(|(n, c)| (n.as_str(), *c)).collect();
        model.add_constraint("I5::hi", &i5_expr, ConstraintOp::Le, relax);
        model.add_constraint("I5::lo", &i5_expr, ConstraintOp::Ge, 2.0 - relax);

        // I6: per-nutriment declared-value tolerance band.
        for nutriment in NUTRIMENTS_CATEGORIES {
            if has_nutriment_quality_warning(product, nutriment) {
                continue;
            }
            let Some(declared_pct) = product.nutriment(nutriment) else { continue };
            let declared = declared_pct / 100.0;
            let margin = crate::margins::nutritional_error_margin(nutriment, declared).resolve(declared);
            let mut hi_expr: Vec<(String, f64)> = Vec::new();
            let mut lo_expr: Vec<(String, f64)> = Vec::new();
            for id in &leaves {
                let key = original_id(id);
                let range = tables
                    .get(key)
                    .map(|r| r.nutriment_range(nutriment))
                    .unwrap_or_else(crate::types::Range::unknown_nutriment);
                hi_expr.push((var_name(id), range.max / 100.0));
                lo_expr.push((var_name(id), range.min / 100.0));
            }
            let hi_expr: Vec<(&str, f64)> = hi_expr.iter().map(|(n, c)| (n.as_str(), *c)).collect();
            let lo_expr: Vec<(&str, f64)> = lo_expr.iter().map(|(n, c)| (n.as_str(), *c)).collect();
            model.add_constraint(
                &format!("I6::hi::{nutriment}"),
                &hi_expr,
                ConstraintOp::Ge,
                declared - margin - const_relax_coef,
            );
            model.add_constraint(
                &format!("I6::lo::{nutriment}"),
                &lo_expr,
                ConstraintOp::Le,
                declared + margin + const_relax_coef,
            );
        }
    }

    ConstraintModel {
        model,
        leaves,
        compounds: compound_ids,
        top_level,
        mass_upper_bound,
    }
}

fn install_sum_of_children(model: &mut Model, nodes: &[IngredientNode]) {
    for node in nodes {
        if let Some(children) = &node.ingredients {
            if !children.is_empty() {
                let parent_name = var_name(&node.id);
                let mut names: Vec<String> = children.iter().map(|c| var_name(&c.id)).collect();
                names.push(parent_name);
                let mut terms: Vec<(&str, f64)> = names.iter().map(|n| (n.as_str(), 1.0)).collect();
                let last = terms.len() - 1;
                terms[last].1 = -1.0;
                model.add_constraint(&format!("I2::{}", node.id), &terms, ConstraintOp::Eq, 0.0);
                install_sum_of_children(model, children);
            }
        }
    }
}

fn install_decreasing_order(model: &mut Model, nodes: &[IngredientNode], top_level: bool) {
    for j in 1..nodes.len() {
        let name = if top_level {
            format!("I3::top::{}", j + 1)
        } else {
            format!("I3::{}::{}", nodes[0].id, j + 1)
        };
        model.add_constraint(
            &name,
            &[(var_name(&nodes[j].id).as_str(), 1.0), (var_name(&nodes[j - 1].id).as_str(), -1.0)],
            ConstraintOp::Le,
            0.0,
        );
    }
    for node in nodes {
        if let Some(children) = &node.ingredients {
            if children.len() > 1 {
                install_decreasing_order(model, children, false);
            }
        }
    }
}

/// Relaxes the decreasing-order constraint for a low-percentage tail:
/// removes the `I3::top::j` pairwise constraints for `j >= rank` and caps
/// every sibling after `rank` at 2% instead (§4.4 step 3's
/// "drop_decreasing_from_rank").
pub fn drop_decreasing_from_rank(model: &mut Model, top_level: &[String], rank: usize) {
    for j in rank..top_level.len() {
        model.delete_constraint(&format!("I3::top::{}", j + 1));
    }
    for j in rank..top_level.len() {
        let id = &top_level[j];
        model.delete_constraint(&format!("I3_cap::top::{}", j + 1));
        model.add_constraint(
            &format!("I3_cap::top::{}", j + 1),
            &[(var_name(id).as_str(), 1.0)],
            ConstraintOp::Le,
            DECREASING_PROPORTION_ORDER_LIMIT,
        );
    }
}

fn has_global_quality_warning(product: &Product) -> bool {
    product
        .data_quality_warnings
        .iter()
        .any(|w| GLOBAL_QUALITY_DATA_WARNINGS.contains(&w.as_str()))
}

fn has_nutriment_quality_warning(product: &Product, nutriment: &str) -> bool {
    let tags = nutriment_quality_warnings(nutriment);
    product.data_quality_warnings.iter().any(|w| tags.contains(&w.as_str()))
}

/// McCormick envelope for `p = x * y` given fixed bounds on `x` and `y`.
/// Registers `p` as a new bounded variable plus the four standard linear
/// inequalities that make `p = x * y` exact at the box corners and a valid
/// relaxation everywhere else.
fn mccormick_product(
    model: &mut Model,
    product_name: &str,
    x: &str,
    x_bounds: (f64, f64),
    y: &str,
    y_bounds: (f64, f64),
) -> String {
    let (xl, xu) = x_bounds;
    let (yl, yu) = y_bounds;
    let p_lb = (xl * yl).min(xl * yu).min(xu * yl).min(xu * yu);
    let p_ub = (xl * yl).max(xl * yu).max(xu * yl).max(xu * yu);
    model.add_variable(product_name, p_lb, p_ub, lp_solver_kind());

    // p >= xl*y + yl*x - xl*yl
    model.add_constraint(
        &format!("mccormick::{product_name}::lo1"),
        &[(product_name, 1.0), (y, -xl), (x, -yl)],
        ConstraintOp::Ge,
        -xl * yl,
    );
    // p >= xu*y + yu*x - xu*yu
    model.add_constraint(
        &format!("mccormick::{product_name}::lo2"),
        &[(product_name, 1.0), (y, -xu), (x, -yu)],
        ConstraintOp::Ge,
        -xu * yu,
    );
    // p <= xu*y + yl*x - xu*yl
    model.add_constraint(
        &format!("mccormick::{product_name}::hi1"),
        &[(product_name, 1.0), (y, -xu), (x, -yl)],
        ConstraintOp::Le,
        -xu * yl,
    );
    // p <= xl*y + yu*x - xl*yu
    model.add_constraint(
        &format!("mccormick::{product_name}::hi2"),
        &[(product_name, 1.0), (y, -xl), (x, -yu)],
        ConstraintOp::Le,
        -xl * yu,
    );

    product_name.to_string()
}

fn lp_solver_kind() -> lp_solver::VariableKind {
    lp_solver::VariableKind::Continuous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IngredientReference;

    fn tables_with(ids: &[&str]) -> ReferenceTables {
        let mut tables = ReferenceTables::default();
        for id in ids {
            tables.taxonomy.insert(id.to_string());
            tables.ingredients.insert(id.to_string(), IngredientReference::default());
        }
        tables
    }

    #[test]
    fn top_level_shares_sum_to_one() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![
                IngredientNode::new("en:flour"),
                IngredientNode::new("en:water"),
            ]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let tables = tables_with(&["en:flour", "en:water"]);
        let mut cm = build(&product, &tables, 0.4, false, false, 0.0, true, lp_solver::SolveConfig::default());
        let lo = cm.model.minimize(&var_name("en:flour")).unwrap();
        let hi = cm.model.maximize(&var_name("en:flour")).unwrap();
        assert!(lo >= 0.0 && hi <= 1.0 && lo <= hi);
    }

    #[test]
    fn compound_share_equals_sum_of_children() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![IngredientNode::new("en:cake-mix").with_children(vec![
                IngredientNode::new("en:flour"),
                IngredientNode::new("en:sugar"),
            ])]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let tables = tables_with(&["en:flour", "en:sugar"]);
        let mut cm = build(&product, &tables, 0.4, false, false, 0.0, true, lp_solver::SolveConfig::default());
        let parent = cm.model.maximize(&var_name("en:cake-mix")).unwrap();
        assert!((parent - 1.0).abs() < 1e-6);
    }

    #[test]
    fn drop_decreasing_from_rank_relaxes_tail() {
        let product = Product {
            id: "p".into(),
            ingredients: Some(vec![
                IngredientNode::new("en:a"),
                IngredientNode::new("en:b"),
                IngredientNode::new("en:c"),
            ]),
            nutriments: Default::default(),
            categories_tags: vec![],
            data_quality_warnings: vec![],
        };
        let tables = tables_with(&["en:a", "en:b", "en:c"]);
        let mut cm = build(&product, &tables, 0.4, false, false, 0.0, true, lp_solver::SolveConfig::default());
        drop_decreasing_from_rank(&mut cm.model, &cm.top_level, 1);
        let hi = cm.model.maximize(&var_name("en:c")).unwrap();
        assert!(hi <= DECREASING_PROPORTION_ORDER_LIMIT + 1e-9);
    }
}
