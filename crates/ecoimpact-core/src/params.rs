//! `estimate_impacts` parameters (§6) and the result shape it returns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DualGapType {
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationParams {
    pub quantity: f64,
    pub ignore_unknown_ingredients: bool,
    pub use_defined_prct: bool,
    pub use_nutritional_info: bool,
    pub const_relax_coef: f64,
    pub maximum_evaporation: f64,
    pub total_mass_used: Option<f64>,
    pub min_prct_dist_size: usize,
    pub dual_gap_type: DualGapType,
    pub dual_gap_limit: f64,
    pub solver_time_limit_secs: u64,
    pub time_limit_dual_gap_limit: f64,
    pub min_run_nb: u32,
    pub max_run_nb: u32,
    pub forced_run_nb: Option<u32>,
    pub confidence_interval_width: f64,
    pub confidence_level: f64,
    pub confidence_weighting: bool,
    pub use_ingredients_impact_uncertainty: bool,
    pub quantiles_points: Vec<f64>,
    pub distributions_as_result: bool,
    pub confidence_score_weighting_factor: f64,
    pub safe_mode: bool,
    /// Allows the sampler to release the `m >= 0.99` floor and the
    /// evaporation upper bound before the mass-choice step (§4.4.5).
    pub allow_unbalanced_recipe: bool,
    /// Seeds the process-local RNG (§5.A). `None` draws entropy from the OS.
    pub seed: Option<u64>,
}

impl Default for EstimationParams {
    fn default() -> Self {
        Self {
            quantity: 100.0,
            ignore_unknown_ingredients: true,
            use_defined_prct: true,
            use_nutritional_info: true,
            const_relax_coef: 0.0,
            maximum_evaporation: 0.4,
            total_mass_used: None,
            min_prct_dist_size: 30,
            dual_gap_type: DualGapType::Absolute,
            dual_gap_limit: 1e-3,
            solver_time_limit_secs: 60,
            time_limit_dual_gap_limit: 0.01,
            min_run_nb: 30,
            max_run_nb: 1000,
            forced_run_nb: None,
            confidence_interval_width: 0.05,
            confidence_level: 0.95,
            confidence_weighting: true,
            use_ingredients_impact_uncertainty: true,
            quantiles_points: vec![0.05, 0.25, 0.5, 0.75, 0.95],
            distributions_as_result: false,
            confidence_score_weighting_factor: 10.0,
            safe_mode: true,
            allow_unbalanced_recipe: true,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimationResult {
    pub impacts_geom_means: BTreeMap<String, f64>,
    pub impacts_geom_stdevs: BTreeMap<String, f64>,
    pub impacts_quantiles: BTreeMap<String, BTreeMap<String, f64>>,
    pub impacts_relative_interquartile: BTreeMap<String, f64>,
    pub ingredients_impacts_share: BTreeMap<String, BTreeMap<String, f64>>,
    pub ingredients_mass_share: BTreeMap<String, f64>,
    pub impacts_units: BTreeMap<String, String>,
    pub product_quantity: f64,
    pub const_relax_coef: f64,
    pub warnings: Vec<String>,
    pub reliability: u8,
    pub ignored_unknown_ingredients: Vec<String>,
    pub uncharacterized_ingredients: BTreeMap<String, Vec<String>>,
    pub uncharacterized_ingredients_ratio: BTreeMap<String, f64>,
    pub uncharacterized_ingredients_mass_proportion: BTreeMap<String, f64>,
    pub number_of_runs: u32,
    pub number_of_ingredients: usize,
    pub average_total_used_mass: f64,
    pub calculation_time_secs: f64,
    pub data_sources: Vec<String>,

    // Only populated when `distributions_as_result` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_distributions: Option<BTreeMap<String, Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_confidence_interval_distribution: Option<BTreeMap<String, Vec<(f64, f64)>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score_distribution: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipes: Option<Vec<crate::types::Recipe>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_used_mass_distribution: Option<Vec<f64>>,
}
