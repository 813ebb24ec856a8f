//! Weighted statistics: mean, variance, quantile, geometric mean/stdev, and
//! a Student-t confidence interval on a sample of (weighted) means.
//!
//! The original relies on `statsmodels.stats.weightstats.DescrStatsW`; no
//! crate in this workspace's dependency stack provides an equivalent, so
//! the handful of routines needed are implemented directly against their
//! textbook definitions. Equal weights (all 1.0) reproduce the unweighted
//! statistic, satisfying the "must accept equal weights when
//! confidence_weighting=false" requirement from the design notes.

/// Weighted arithmetic mean.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let wsum: f64 = weights.iter().sum();
    let num: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    num / wsum
}

/// Weighted (population) variance, using the weighted mean as the center.
pub fn weighted_variance(values: &[f64], weights: &[f64]) -> f64 {
    let mean = weighted_mean(values, weights);
    let wsum: f64 = weights.iter().sum();
    let num: f64 = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - mean).powi(2))
        .sum();
    num / wsum
}

/// Weighted standard error of the weighted mean, used by the t confidence
/// interval. Follows `DescrStatsW`'s convention: the variance of the mean is
/// the weighted variance divided by the (weighted) effective sample count.
fn weighted_mean_stderr(values: &[f64], weights: &[f64]) -> f64 {
    let n = values.len() as f64;
    let var = weighted_variance(values, weights);
    (var / n).sqrt()
}

/// exp(weighted mean of log|x|) — the running weighted geometric mean.
pub fn weighted_geometric_mean(values: &[f64], weights: &[f64]) -> f64 {
    weighted_mean(values, weights).exp()
}

/// exp(sqrt(weighted variance of log|x|)).
pub fn weighted_geometric_stdev(log_values: &[f64], weights: &[f64]) -> f64 {
    weighted_variance(log_values, weights).sqrt().exp()
}

/// Linear interpolation weighted quantile over `(value, weight)` pairs,
/// following the common "weighted percentile" definition: sort by value,
/// build the cumulative weight fraction, interpolate.
pub fn weighted_quantile(values: &[f64], weights: &[f64], q: f64) -> f64 {
    assert!((0.0..=1.0).contains(&q));
    let mut pairs: Vec<(f64, f64)> = values.iter().copied().zip(weights.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if pairs.len() == 1 {
        return pairs[0].0;
    }

    let mut cum = 0.0;
    let mut cum_fracs = Vec::with_capacity(pairs.len());
    for &(_, w) in &pairs {
        cum += w;
        cum_fracs.push((cum - 0.5 * w) / total);
    }

    if q <= cum_fracs[0] {
        return pairs[0].0;
    }
    if q >= *cum_fracs.last().unwrap() {
        return pairs.last().unwrap().0;
    }
    for i in 0..pairs.len() - 1 {
        if q >= cum_fracs[i] && q <= cum_fracs[i + 1] {
            let t = (q - cum_fracs[i]) / (cum_fracs[i + 1] - cum_fracs[i]);
            return pairs[i].0 + t * (pairs[i + 1].0 - pairs[i].0);
        }
    }
    pairs.last().unwrap().0
}

/// Inverse standard normal CDF (probit), via the Acklam rational
/// approximation (accurate to ~1.15e-9 over the full domain).
pub fn normal_quantile(p: f64) -> f64 {
    assert!(p > 0.0 && p < 1.0);

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    const P_LOW: f64 = 0.02425;
    let p_high = 1.0 - P_LOW;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= p_high {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// Approximate Student-t quantile via the Cornish-Fisher expansion around
/// the normal quantile. Converges to the exact value as `df` grows and is
/// within ~1e-3 of tabulated values for df >= 10, which comfortably covers
/// `min_run_nb = 30` and above.
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    let z = normal_quantile(p);
    let z2 = z * z;
    let z3 = z2 * z;
    let z5 = z3 * z2;
    let g1 = (z3 + z) / 4.0;
    let g2 = (5.0 * z5 + 16.0 * z3 + 3.0 * z) / 96.0;
    z + g1 / df + g2 / (df * df)
}

/// Two-sided Student-t confidence interval for the mean of `values`
/// (optionally weighted), at confidence level `1 - alpha`.
pub fn t_confidence_interval(values: &[f64], weights: &[f64], alpha: f64) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = weighted_mean(values, weights);
    let df = (n - 1.0).max(1.0);
    let t = student_t_quantile(1.0 - alpha / 2.0, df);
    let se = weighted_mean_stderr(values, weights);
    (mean - t * se, mean + t * se)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_mean_matches_unweighted_with_equal_weights() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let weights = [1.0, 1.0, 1.0, 1.0];
        assert!((weighted_mean(&values, &weights) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn weighted_quantile_median_of_uniform_weights() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let weights = [1.0; 5];
        let median = weighted_quantile(&values, &weights, 0.5);
        assert!((median - 3.0).abs() < 1e-9);
    }

    #[test]
    fn normal_quantile_matches_known_values() {
        assert!((normal_quantile(0.5)).abs() < 1e-6);
        assert!((normal_quantile(0.975) - 1.959964).abs() < 1e-4);
    }

    #[test]
    fn student_t_converges_to_normal_for_large_df() {
        let t = student_t_quantile(0.975, 10_000.0);
        assert!((t - 1.959964).abs() < 1e-2);
    }
}
