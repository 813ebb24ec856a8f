//! Graph walks over the ingredient tree: individualization, leaf/flat
//! enumeration, pruning, and percent-type inference.
//!
//! Grounded on `impacts_estimation/utils.py`'s `individualize_ingredients`,
//! `find_ingredients_graph_leaves`, `flat_ingredients_list`,
//! `clear_ingredient_graph`, `UnknownIngredientsRemover`, and
//! `define_subingredients_percentage_type`.

use std::collections::HashSet;

use crate::types::{IngredientNode, PercentType, ReferenceTables};

/// Appends `*` to `id` until it no longer collides with `seen`, recording
/// the (possibly suffixed) id in `seen` before returning it.
fn individualize_id(id: &str, seen: &mut HashSet<String>) -> String {
    let mut candidate = id.to_string();
    while seen.contains(&candidate) {
        candidate.push('*');
    }
    seen.insert(candidate.clone());
    candidate
}

/// Recursively rewrites every node's id to be unique across the whole tree.
pub fn individualize_ingredients(nodes: &mut [IngredientNode]) {
    let mut seen = HashSet::new();
    individualize_rec(nodes, &mut seen);
}

fn individualize_rec(nodes: &mut [IngredientNode], seen: &mut HashSet<String>) {
    for node in nodes {
        node.id = individualize_id(&node.id, seen);
        if let Some(children) = &mut node.ingredients {
            individualize_rec(children, seen);
        }
    }
}

/// Strips trailing `*` individualization suffixes back to the original id.
pub fn original_id(id: &str) -> &str {
    id.trim_end_matches('*')
}

/// Depth-first list of every leaf node id in the tree.
pub fn find_leaves(nodes: &[IngredientNode]) -> Vec<String> {
    let mut out = Vec::new();
    find_leaves_rec(nodes, &mut out);
    out
}

fn find_leaves_rec(nodes: &[IngredientNode], out: &mut Vec<String>) {
    for node in nodes {
        match &node.ingredients {
            None => out.push(node.id.clone()),
            Some(children) if children.is_empty() => out.push(node.id.clone()),
            Some(children) => find_leaves_rec(children, out),
        }
    }
}

/// Depth-first list of every node (leaf or compound) in the tree.
pub fn flat_list(nodes: &[IngredientNode]) -> Vec<IngredientNode> {
    let mut out = Vec::new();
    flat_list_rec(nodes, &mut out);
    out
}

fn flat_list_rec(nodes: &[IngredientNode], out: &mut Vec<IngredientNode>) {
    for node in nodes {
        let mut flat = node.clone();
        flat.ingredients = None;
        out.push(flat);
        if let Some(children) = &node.ingredients {
            flat_list_rec(children, out);
        }
    }
}

/// Removes leaf nodes absent from the taxonomy with no declared percentage
/// and no subingredients. Returns the ids removed. Deletes a node's
/// `ingredients` list entirely if it becomes empty.
pub fn remove_unknown_ingredients(
    nodes: &mut Vec<IngredientNode>,
    tables: &ReferenceTables,
    removed: &mut Vec<String>,
) {
    let mut i = 0;
    while i < nodes.len() {
        if let Some(children) = &mut nodes[i].ingredients {
            remove_unknown_ingredients(children, tables, removed);
            if children.is_empty() {
                nodes[i].ingredients = None;
            }
        }
        let is_leaf_now = nodes[i].ingredients.as_ref().is_none_or(Vec::is_empty);
        let has_subingredients = nodes[i]
            .ingredients
            .as_ref()
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        let unknown = !tables.is_known(&nodes[i].id);
        if is_leaf_now && unknown && nodes[i].percent.is_none() && !has_subingredients {
            removed.push(nodes.remove(i).id);
        } else {
            i += 1;
        }
    }
}

/// Recursively drops a compound node's subingredient list when none of its
/// direct children are known, percented, or themselves have subingredients.
pub fn clear_ingredient_graph(nodes: &mut [IngredientNode], tables: &ReferenceTables) {
    for node in nodes.iter_mut() {
        if let Some(children) = &mut node.ingredients {
            clear_ingredient_graph(children, tables);
            let any_useful = children.iter().any(|c| {
                tables.get(&c.id).is_some()
                    || c.percent.is_some()
                    || c.ingredients.as_ref().is_some_and(|gc| !gc.is_empty())
            });
            if !any_useful {
                node.ingredients = None;
            }
        }
    }
}

/// `[lower, upper]` natural bounds for a top-level ingredient at rank `r`
/// (1-based) among `n` listed ingredients in declared decreasing order.
pub fn natural_bounds(rank: u32, nb_ingredients: u32) -> (f64, f64) {
    if rank == 1 {
        (100.0 / nb_ingredients as f64, 100.0)
    } else {
        (0.0, 100.0 / rank as f64)
    }
}

/// Scans a sibling list propagating the last-seen declared percentage
/// forward (for `maximum_percentage_sum`, reversed) or backward (for
/// `minimum_percentage_sum`) as the implied bound for gaps.
pub fn minimum_percentage_sum(nodes: &[IngredientNode]) -> f64 {
    let n = nodes.len() as u32;
    let mut sum = 0.0;
    let mut last_seen: Option<f64> = None;
    for (i, node) in nodes.iter().enumerate().rev() {
        match node.percent {
            Some(p) => {
                sum += p;
                last_seen = Some(p);
            }
            None => {
                let rank = (i + 1) as u32;
                let bound = last_seen.unwrap_or_else(|| natural_bounds(rank, n).0);
                sum += bound.min(natural_bounds(rank, n).1);
            }
        }
    }
    sum
}

pub fn maximum_percentage_sum(nodes: &[IngredientNode]) -> f64 {
    let n = nodes.len() as u32;
    let mut sum = 0.0;
    let mut last_seen: Option<f64> = None;
    for (i, node) in nodes.iter().enumerate() {
        match node.percent {
            Some(p) => {
                sum += p;
                last_seen = Some(p);
            }
            None => {
                let rank = (i + 1) as u32;
                let bound = last_seen.unwrap_or_else(|| natural_bounds(rank, n).1);
                sum += bound;
            }
        }
    }
    sum
}

/// Infers `percent-type` for every compound node with at least one
/// percented direct child (Preflight step 6). A node's own upper bound is
/// its declared percent (or 100 if undeclared) clamped to its rank-natural
/// bound among its own siblings in `nodes`, not a bound inherited from its
/// parent.
pub fn define_subingredients_percentage_type(nodes: &mut [IngredientNode]) {
    let n = nodes.len() as u32;
    for (i, node) in nodes.iter_mut().enumerate() {
        let rank = (i + 1) as u32;
        let own_upper = node.percent.unwrap_or(100.0).min(natural_bounds(rank, n).1);
        if let Some(children) = &mut node.ingredients {
            let any_percented = children.iter().any(|c| c.percent.is_some());
            if any_percented {
                let max_sum = maximum_percentage_sum(children);
                let min_sum = minimum_percentage_sum(children);
                let parent_feasible = max_sum >= 100.0;
                let product_feasible = min_sum <= own_upper;
                node.percent_type = Some(match (parent_feasible, product_feasible) {
                    (true, false) => PercentType::Parent,
                    (false, true) => PercentType::Product,
                    _ => PercentType::Undefined,
                });
            }
            define_subingredients_percentage_type(children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn individualizes_duplicate_ids() {
        let mut nodes = vec![
            IngredientNode::new("en:water"),
            IngredientNode::new("en:sugar").with_children(vec![IngredientNode::new("en:water")]),
        ];
        individualize_ingredients(&mut nodes);
        assert_eq!(nodes[0].id, "en:water");
        assert_eq!(nodes[1].ingredients.as_ref().unwrap()[0].id, "en:water*");
        assert_eq!(original_id("en:water*"), "en:water");
    }

    #[test]
    fn leaves_and_flat_list_cover_nested_tree() {
        let nodes = vec![IngredientNode::new("en:cake-mix").with_children(vec![
            IngredientNode::new("en:flour"),
            IngredientNode::new("en:sugar"),
        ])];
        assert_eq!(find_leaves(&nodes), vec!["en:flour", "en:sugar"]);
        assert_eq!(flat_list(&nodes).len(), 3);
    }

    #[test]
    fn natural_bounds_rank_one_vs_others() {
        assert_eq!(natural_bounds(1, 4), (25.0, 100.0));
        assert_eq!(natural_bounds(2, 4), (0.0, 50.0));
    }
}
