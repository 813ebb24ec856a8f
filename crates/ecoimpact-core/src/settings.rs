//! Fixed constants carried over from the original implementation's
//! `settings.py`/`impacts_estimation/vars.py`. These are policy data, not
//! magic numbers scattered through the algorithm modules.

/// The six nutriment categories the confidence score and the "at least one
/// shared top-level nutriment" check operate over.
pub const TOP_LEVEL_NUTRIMENTS_CATEGORIES: &[&str] =
    &["proteins", "carbohydrates", "fat", "fiber", "salt", "other"];

/// Every nutriment category the nutritional constraints (I6) and error
/// margin table cover.
pub const NUTRIMENTS_CATEGORIES: &[&str] = &[
    "proteins",
    "carbohydrates",
    "fat",
    "fiber",
    "salt",
    "other",
    "sugars",
    "saturated-fat",
];

pub const MAX_ASH_CONTENT: f64 = 10.0;

/// Data-quality tags that disable *every* nutritional constraint for a
/// product when present.
pub const GLOBAL_QUALITY_DATA_WARNINGS: &[&str] = &[
    "en:no-nutrition-data",
    "en:nutrition-value-total-over-105",
    "en:nutrition-data-not-for-the-product-as-sold",
];

/// Data-quality tags that disable the I6 constraint for a single nutriment,
/// keyed by the bare nutriment name.
pub const NUTRIMENT_QUALITY_DATA_WARNINGS: &[(&str, &[&str])] = &[
    ("proteins", &["en:nutrition-value-over-105-proteins"]),
    ("carbohydrates", &["en:nutrition-value-over-105-carbohydrates"]),
    ("fat", &["en:nutrition-value-over-105-fat"]),
    ("salt", &["en:nutrition-value-over-105-salt"]),
];

pub fn nutriment_quality_warnings(nutriment: &str) -> &'static [&'static str] {
    NUTRIMENT_QUALITY_DATA_WARNINGS
        .iter()
        .find(|(n, _)| *n == nutriment)
        .map(|(_, tags)| *tags)
        .unwrap_or(&[])
}

/// Ingredient ids treated as fermentation agents (Preflight step 1).
pub const FERMENTATION_AGENTS: &[&str] = &[
    "en:yeast",
    "en:selected-ferments",
    "en:lactic-ferments",
    "en:bacterial-culture",
    "en:rennet",
    "en:sourdough",
];

/// Category tags treated as already-fermented foods (Preflight step 1).
pub const FERMENTED_FOOD_CATEGORIES: &[&str] = &["en:fermented-foods"];

/// Category tag -> maximum evaporation coefficient override (Preflight step 2).
pub const HIGH_WATER_LOSS_CATEGORIES: &[(&str, f64)] = &[("en:cheeses", 0.9)];

/// Warning substrings that force reliability score 4 regardless of the
/// numeric metrics.
pub const RESULTS_WARNINGS_NOT_RELIABLE: &[&str] =
    &["The product has no recognized nutriment information."];

/// Ingredient impacts are expressed per this mass unit (grams per kg).
pub const IMPACT_MASS_UNIT: f64 = 1000.0;

/// Below this 2% threshold the decreasing-order constraint (I3) is dropped
/// in favor of a flat upper bound.
pub const DECREASING_PROPORTION_ORDER_LIMIT: f64 = 0.02;

pub const UNCHARACTERIZED_INGREDIENTS_RATIO_WARNING_THRESHOLD: f64 = 0.25;
pub const UNCHARACTERIZED_INGREDIENTS_MASS_WARNING_THRESHOLD: f64 = 0.10;
pub const IMPACT_RELATIVE_INTERQUARTILE_WARNING_THRESHOLD: f64 = 0.25;

pub const MAX_CONSECUTIVE_RECIPE_CREATION_ERROR: u32 = 3;
pub const MAX_CONSECUTIVE_NULL_IMPACT_CHARACTERIZED_INGREDIENTS_MASS: u32 = 3;

/// Lower bound on `m` when unbalanced recipes (allow-unbalanced-recipe) are
/// permitted.
pub const MINIMUM_TOTAL_MASS_FOR_UNBALANCED_RECIPES: f64 = 0.5;

/// The provisional floor installed on `m` during per-ingredient pinning,
/// released again in the sampler's "optional unbalance" step.
pub const PROVISIONAL_MASS_FLOOR: f64 = 0.99;

/// Grid step for the mass-choice scan, expressed as a multiple of 100g
/// (1g/100g).
pub const MASS_GRID_STEP: f64 = 0.01;

/// Minimum number of samples a walked category bucket of the empirical
/// percentage distribution must contain before it is used directly.
pub const MIN_PRCT_DIST_BUCKET_SIZE_DEFAULT: usize = 30;

/// The Relaxation Supervisor's fixed retry schedule (§4.8): concatenation of
/// the 12-step `const_relax_coef` ramp with `use_defined_prct = true`, then
/// the same ramp with `use_defined_prct = false`. Each level is combined
/// with the caller's originally requested parameters via
/// `const_relax_coef = max(level, original)` and `use_defined_prct = level
/// AND original`, so a level never relaxes *more* than the caller allowed.
pub const RELAXATION_SCHEDULE: &[(bool, f64)] = &[
    (true, 0.01),
    (true, 0.05),
    (true, 0.1),
    (true, 0.2),
    (true, 0.3),
    (true, 0.4),
    (true, 0.5),
    (true, 0.6),
    (true, 0.7),
    (true, 0.8),
    (true, 0.9),
    (true, 1.0),
    (false, 0.01),
    (false, 0.05),
    (false, 0.1),
    (false, 0.2),
    (false, 0.3),
    (false, 0.4),
    (false, 0.5),
    (false, 0.6),
    (false, 0.7),
    (false, 0.8),
    (false, 0.9),
    (false, 1.0),
];
