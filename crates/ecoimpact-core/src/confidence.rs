//! The confidence score (§4.6): a scalar combining nutritional Euclidean
//! distance and total-mass deviation from 100g, used as the Monte-Carlo
//! sample weight.

use std::collections::BTreeMap;

use crate::settings::TOP_LEVEL_NUTRIMENTS_CATEGORIES;

/// A squared nutriment difference exceeded 1 (more than 100 percentage
/// points apart on a /100 basis) — the caller should treat the candidate
/// mass as infeasible for this comparison, not a hard failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutOfRange;

/// `confidence(nutri, ref_nutri, total_mass, min_mass, max_mass, weight, ref_mass)`.
///
/// All of `total_mass`, `min_mass`, `max_mass` are expressed as multiples of
/// `ref_mass` already (i.e. pass `m`, not `m * ref_mass`); `ref_mass` only
/// enters the nutriment normalization. The caller is responsible for using
/// a fixed score of `1.0` when no top-level nutriment is shared between
/// `nutri` and `ref_nutri` — this function assumes at least one is.
pub fn confidence_score(
    nutri: &BTreeMap<String, f64>,
    ref_nutri: &BTreeMap<String, f64>,
    total_mass: f64,
    min_mass: f64,
    max_mass: f64,
    weight: f64,
) -> Result<f64, OutOfRange> {
    let mut sqdiff_sum = 0.0;
    for key in TOP_LEVEL_NUTRIMENTS_CATEGORIES {
        if let (Some(&v), Some(&rv)) = (nutri.get(*key), ref_nutri.get(*key)) {
            let diff = (rv / 100.0) - (v / 100.0);
            let sqdiff = (diff * diff).max(1e-7);
            if sqdiff > 1.0 {
                return Err(OutOfRange);
            }
            sqdiff_sum += sqdiff;
        }
    }

    let dist = sqdiff_sum.sqrt() / std::f64::consts::SQRT_2;

    let mass_term = if total_mass < 1.0 {
        (1.0 - total_mass) / (1.0 - min_mass)
    } else {
        (total_mass - 1.0) / (max_mass - 1.0)
    };

    Ok(1.0 / (weight * dist + mass_term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maximal_at_exact_mass_and_matching_nutriments() {
        let mut nutri = BTreeMap::new();
        nutri.insert("proteins".to_string(), 6.0);
        let ref_nutri = nutri.clone();
        let score = confidence_score(&nutri, &ref_nutri, 1.0, 0.5, 2.0, 10.0).unwrap();
        assert!(score > 1e6, "score should blow up at the exact match: {score}");
    }

    #[test]
    fn decreases_as_mass_deviates_from_one() {
        let mut nutri = BTreeMap::new();
        nutri.insert("proteins".to_string(), 6.0);
        let ref_nutri = nutri.clone();
        let at_1 = confidence_score(&nutri, &ref_nutri, 1.0, 0.5, 2.0, 10.0).unwrap();
        let at_1_2 = confidence_score(&nutri, &ref_nutri, 1.2, 0.5, 2.0, 10.0).unwrap();
        let at_0_8 = confidence_score(&nutri, &ref_nutri, 0.8, 0.5, 2.0, 10.0).unwrap();
        assert!(at_1 > at_1_2);
        assert!(at_1 > at_0_8);
    }

    #[test]
    fn out_of_range_difference_is_rejected() {
        let mut nutri = BTreeMap::new();
        nutri.insert("proteins".to_string(), 200.0);
        let mut ref_nutri = BTreeMap::new();
        ref_nutri.insert("proteins".to_string(), 0.0);
        assert_eq!(
            confidence_score(&nutri, &ref_nutri, 1.0, 0.5, 2.0, 10.0),
            Err(OutOfRange)
        );
    }
}
