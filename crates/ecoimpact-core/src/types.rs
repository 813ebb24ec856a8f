//! The data model: ingredient trees, products, reference tables, and the
//! recipe/result shapes exchanged at the crate boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declared per-100g nutriment values recognized by the core.
pub const NUTRIMENT_KEYS: &[&str] = &[
    "proteins",
    "carbohydrates",
    "fat",
    "fiber",
    "salt",
    "sugars",
    "saturated-fat",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentType {
    Product,
    Parent,
    Undefined,
}

/// A node in the product's ingredient tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngredientNode {
    pub id: String,
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub ingredients: Option<Vec<IngredientNode>>,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub percent_type: Option<PercentType>,
}

impl IngredientNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            percent: None,
            ingredients: None,
            rank: None,
            percent_type: None,
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_children(mut self, children: Vec<IngredientNode>) -> Self {
        self.ingredients = Some(children);
        self
    }

    pub fn is_leaf(&self) -> bool {
        match &self.ingredients {
            None => true,
            Some(children) => children.is_empty(),
        }
    }
}

/// A declared packaged-food product, as received by `estimate_impacts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub ingredients: Option<Vec<IngredientNode>>,
    #[serde(default)]
    pub nutriments: BTreeMap<String, f64>,
    #[serde(default)]
    pub categories_tags: Vec<String>,
    #[serde(default)]
    pub data_quality_warnings: Vec<String>,
}

impl Product {
    /// Declared value for a nutriment, keyed by its bare category name
    /// (e.g. "proteins", not "proteins_100g").
    pub fn nutriment(&self, name: &str) -> Option<f64> {
        self.nutriments
            .get(name)
            .or_else(|| self.nutriments.get(&format!("{name}_100g")))
            .copied()
    }
}

/// One tagged uncertainty distribution attached to an ingredient impact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Distribution {
    Normal { mean: f64, stddev: f64 },
    /// `gmean` may be negative: sample from its magnitude, then flip sign.
    Lognormal { gmean: f64, gstddev: f64 },
    Triangular { min: f64, mode: f64, max: f64 },
    Uniform { min: f64, max: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactValue {
    pub amount: f64,
    pub unit: String,
    #[serde(default)]
    pub uncertainty_distributions: Vec<Distribution>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn unknown_nutriment() -> Self {
        Self { min: 0.0, max: 100.0 }
    }

    pub fn unknown_ash() -> Self {
        Self {
            min: 0.0,
            max: crate::settings::MAX_ASH_CONTENT,
        }
    }
}

/// Nutriment/water/ash ranges plus the point value used for recipe
/// aggregation, for a single nutriment key (also covers "water" and "ash").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutrimentData {
    pub range: Range,
    pub value: f64,
}

/// Per-ingredient reference record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngredientReference {
    #[serde(default)]
    pub nutriments: BTreeMap<String, NutrimentData>,
    #[serde(default)]
    pub impacts: BTreeMap<String, ImpactValue>,
}

impl IngredientReference {
    pub fn nutriment_range(&self, key: &str) -> Range {
        self.nutriments
            .get(key)
            .map(|d| d.range)
            .unwrap_or_else(|| {
                if key == "ash" {
                    Range::unknown_ash()
                } else {
                    Range::unknown_nutriment()
                }
            })
    }

    pub fn nutriment_value(&self, key: &str) -> f64 {
        self.nutriments.get(key).map(|d| d.value).unwrap_or(0.0)
    }

    pub fn has_nutrition(&self) -> bool {
        !self.nutriments.is_empty()
    }

    pub fn has_impact(&self, impact_name: &str) -> bool {
        self.impacts.contains_key(impact_name)
    }
}

/// One row of the empirical per-ingredient percentage distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentageSample {
    pub id: String,
    pub percent: f64,
    #[serde(default)]
    pub categories_tags: Vec<String>,
}

/// Immutable, process-global reference data. Loaded once; never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceTables {
    pub ingredients: BTreeMap<String, IngredientReference>,
    pub taxonomy: std::collections::BTreeSet<String>,
    #[serde(default)]
    pub percentage_distribution: Vec<PercentageSample>,
}

impl ReferenceTables {
    pub fn is_known(&self, id: &str) -> bool {
        self.taxonomy.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&IngredientReference> {
        self.ingredients.get(id)
    }
}

/// A mass assignment to (individualized) ingredient ids, in grams.
pub type Recipe = BTreeMap<String, f64>;
