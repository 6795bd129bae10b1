//! Robust statistics over noisy timing samples.
//!
//! - Percentile bootstrap confidence intervals for the median
//! - Bootstrap interval for a ratio of medians (speedup)
//! - Mood's median test (two-sample, nonparametric)
//!
//! Implemented from first principles:
//! - Lanczos approximation for ln(Gamma)
//! - Regularized upper incomplete gamma Q(a, x) (series + Lentz continued fraction)
//! - Chi-squared survival function
//!
//! Resampling uses a seeded `StdRng`, so every interval is reproducible for a
//! given configuration. Degenerate inputs never raise: intervals collapse to
//! the point estimate and significance tests report p = 1.0.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

// ─── Configuration ───────────────────────────────────────────────────

/// Configuration for bootstrap resampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Number of bootstrap resamples (default 2000).
    pub n_resamples: usize,
    /// Confidence level of the interval (default 0.95).
    pub alpha: f64,
    /// RNG seed for reproducibility.
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            n_resamples: 2000,
            alpha: 0.95,
            seed: 42,
        }
    }
}

impl BootstrapConfig {
    fn tail_percentiles(&self) -> (f64, f64) {
        let tail = 50.0 * (1.0 - self.alpha.clamp(0.0, 1.0));
        (tail, 100.0 - tail)
    }
}

// ─── Descriptive ─────────────────────────────────────────────────────

/// Median of `values`; NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    median_in_place(&mut sorted)
}

fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Percentile of a sorted slice using linear interpolation.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = rank - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

fn resample_into(values: &[f64], buf: &mut Vec<f64>, rng: &mut StdRng) {
    buf.clear();
    let n = values.len();
    buf.extend((0..n).map(|_| values[rng.gen_range(0..n)]));
}

// ─── Confidence intervals ────────────────────────────────────────────

/// Bootstrap confidence interval `(low, high)` for the population median.
///
/// Fewer than two observations collapse the interval onto the median. The
/// interval always contains the sample median.
pub fn confidence_interval(times: &[f64], config: &BootstrapConfig) -> (f64, f64) {
    let point = median(times);
    if times.len() < 2 || config.n_resamples == 0 {
        return (point, point);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut buf = Vec::with_capacity(times.len());
    let mut medians: Vec<f64> = (0..config.n_resamples)
        .map(|_| {
            resample_into(times, &mut buf, &mut rng);
            median_in_place(&mut buf)
        })
        .collect();
    medians.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let (lo_p, hi_p) = config.tail_percentiles();
    let low = percentile_sorted(&medians, lo_p).min(point);
    let high = percentile_sorted(&medians, hi_p).max(point);
    (low, high)
}

/// Bootstrap confidence interval for `median(a) / median(b)`.
///
/// Each draw resamples both sides at their own sizes and records the ratio
/// of the resampled medians. Draws with a zero denominator are discarded.
/// The interval always contains the point ratio when it is finite.
pub fn ratio_confidence_interval(a: &[f64], b: &[f64], config: &BootstrapConfig) -> (f64, f64) {
    if a.is_empty() || b.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let point = median(a) / median(b);
    if (a.len() < 2 && b.len() < 2) || config.n_resamples == 0 {
        return (point, point);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut buf_a = Vec::with_capacity(a.len());
    let mut buf_b = Vec::with_capacity(b.len());
    let mut ratios = Vec::with_capacity(config.n_resamples);
    for _ in 0..config.n_resamples {
        resample_into(a, &mut buf_a, &mut rng);
        resample_into(b, &mut buf_b, &mut rng);
        let ratio = median_in_place(&mut buf_a) / median_in_place(&mut buf_b);
        if ratio.is_finite() {
            ratios.push(ratio);
        }
    }
    if ratios.is_empty() {
        return (point, point);
    }
    ratios.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let (lo_p, hi_p) = config.tail_percentiles();
    let mut low = percentile_sorted(&ratios, lo_p);
    let mut high = percentile_sorted(&ratios, hi_p);
    if point.is_finite() {
        low = low.min(point);
        high = high.max(point);
    }
    (low, high)
}

// ─── Mood's median test ──────────────────────────────────────────────

/// Result of Mood's median test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianTest {
    /// Pearson chi-squared statistic (Yates-corrected).
    pub statistic: f64,
    pub p_value: f64,
    /// Median of the pooled samples.
    pub grand_median: f64,
    /// Counts strictly above the grand median, per sample.
    pub above: [usize; 2],
    /// Counts at or below the grand median, per sample.
    pub below: [usize; 2],
}

/// Mood's median test for H0: both samples share the same population median.
///
/// Ties with the grand median count as "below". The 2x2 contingency table
/// is scored with Pearson's chi-squared and Yates' continuity correction,
/// one degree of freedom.
///
/// Returns `None` for degenerate input: an empty sample, two single
/// observations, or a table with an empty row (e.g. every value equal).
pub fn moods_median_test(a: &[f64], b: &[f64]) -> Option<MedianTest> {
    if a.is_empty() || b.is_empty() || a.len() + b.len() < 3 {
        return None;
    }
    if a.iter().chain(b).any(|v| !v.is_finite()) {
        return None;
    }

    let pooled: Vec<f64> = a.iter().chain(b).copied().collect();
    let grand_median = median(&pooled);

    let above_a = a.iter().filter(|&&v| v > grand_median).count();
    let above_b = b.iter().filter(|&&v| v > grand_median).count();
    let above = [above_a, above_b];
    let below = [a.len() - above_a, b.len() - above_b];

    let row_totals = [(above[0] + above[1]) as f64, (below[0] + below[1]) as f64];
    if row_totals.iter().any(|&t| t == 0.0) {
        return None;
    }
    let col_totals = [a.len() as f64, b.len() as f64];
    let total = pooled.len() as f64;

    let observed = [
        [above[0] as f64, above[1] as f64],
        [below[0] as f64, below[1] as f64],
    ];
    let mut statistic = 0.0;
    for (r, row) in observed.iter().enumerate() {
        for (c, &obs) in row.iter().enumerate() {
            let expected = row_totals[r] * col_totals[c] / total;
            let diff = expected - obs;
            let corrected = obs + diff.signum() * diff.abs().min(0.5);
            statistic += (corrected - expected).powi(2) / expected;
        }
    }

    Some(MedianTest {
        statistic,
        p_value: chi_squared_sf(statistic, 1.0),
        grand_median,
        above,
        below,
    })
}

/// p-value of Mood's median test; 1.0 (not significant) when degenerate.
pub fn median_test(a: &[f64], b: &[f64]) -> f64 {
    moods_median_test(a, b).map_or(1.0, |t| t.p_value)
}

// ─── Math primitives ─────────────────────────────────────────────────

/// Lanczos approximation for ln(Gamma(x)), g=7, n=9.
fn ln_gamma(x: f64) -> f64 {
    #[allow(clippy::excessive_precision)]
    const COEFFICIENTS: [f64; 9] = [
        0.99999999999980993,
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];
    const G: f64 = 7.0;

    if x < 0.5 {
        // Reflection: Gamma(x) * Gamma(1-x) = pi / sin(pi*x)
        let sin_val = (std::f64::consts::PI * x).sin();
        if sin_val.abs() < 1e-300 {
            return f64::INFINITY;
        }
        return std::f64::consts::PI.ln() - sin_val.abs().ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut sum = COEFFICIENTS[0];
    for (i, &c) in COEFFICIENTS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + G + 0.5;
    (2.0 * std::f64::consts::PI).sqrt().ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

/// Regularized upper incomplete gamma function Q(a, x) = 1 - P(a, x).
fn regularized_gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    let max_iter = 500;
    let epsilon = 1e-15;
    let ln_prefix = -x + a * x.ln() - ln_gamma(a);

    if x < a + 1.0 {
        // Series for P(a, x)
        let mut ap = a;
        let mut term = 1.0 / a;
        let mut sum = term;
        for _ in 0..max_iter {
            ap += 1.0;
            term *= x / ap;
            sum += term;
            if term.abs() < sum.abs() * epsilon {
                break;
            }
        }
        return (1.0 - sum * ln_prefix.exp()).clamp(0.0, 1.0);
    }

    // Continued fraction for Q(a, x), modified Lentz
    let tiny = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / tiny;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=max_iter {
        let i_f = i as f64;
        let an = -i_f * (i_f - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < tiny {
            d = tiny;
        }
        c = b + an / c;
        if c.abs() < tiny {
            c = tiny;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < epsilon {
            break;
        }
    }
    (ln_prefix.exp() * h).clamp(0.0, 1.0)
}

/// Chi-squared survival function P(X > x) for `df` degrees of freedom.
pub fn chi_squared_sf(x: f64, df: f64) -> f64 {
    if !x.is_finite() {
        return if x > 0.0 { 0.0 } else { 1.0 };
    }
    regularized_gamma_q(df / 2.0, x / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Descriptive ─────────────────────────────────────────────

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&sorted, 50.0), 3.0);
        assert_eq!(percentile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(percentile_sorted(&sorted, 100.0), 5.0);
        assert!((percentile_sorted(&sorted, 12.5) - 1.5).abs() < 1e-12);
    }

    // ─── Math primitives ─────────────────────────────────────────

    #[test]
    fn ln_gamma_known_values() {
        assert!((ln_gamma(1.0)).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-10);
    }

    #[test]
    fn chi_squared_critical_values() {
        // 95th and 99.9th percentiles of chi-squared(1)
        assert!((chi_squared_sf(3.841458820694124, 1.0) - 0.05).abs() < 1e-6);
        assert!((chi_squared_sf(10.827566170662733, 1.0) - 0.001).abs() < 1e-6);
        assert_eq!(chi_squared_sf(0.0, 1.0), 1.0);
        // chi-squared(2) has closed form exp(-x/2)
        assert!((chi_squared_sf(4.0, 2.0) - (-2.0_f64).exp()).abs() < 1e-10);
    }

    // ─── Confidence intervals ────────────────────────────────────

    #[test]
    fn interval_single_observation_is_point() {
        let cfg = BootstrapConfig::default();
        assert_eq!(confidence_interval(&[3.5], &cfg), (3.5, 3.5));
    }

    #[test]
    fn interval_contains_median() {
        let cfg = BootstrapConfig::default();
        let times = [1.0, 1.1, 0.9, 1.05, 3.0, 0.95, 1.02];
        let (low, high) = confidence_interval(&times, &cfg);
        let m = median(&times);
        assert!(low <= m && m <= high, "({low}, {high}) vs {m}");
        assert!(high < 3.0);
    }

    #[test]
    fn interval_is_deterministic() {
        let cfg = BootstrapConfig {
            seed: 7,
            ..BootstrapConfig::default()
        };
        let times: Vec<f64> = (0..25).map(|i| 1.0 + (i as f64 * 0.37).sin() * 0.1).collect();
        assert_eq!(
            confidence_interval(&times, &cfg),
            confidence_interval(&times, &cfg)
        );
    }

    #[test]
    fn constant_sample_interval_collapses() {
        let cfg = BootstrapConfig::default();
        assert_eq!(confidence_interval(&[2.0; 10], &cfg), (2.0, 2.0));
    }

    #[test]
    fn ratio_interval_brackets_speedup() {
        let cfg = BootstrapConfig::default();
        let reference = [10.0, 10.2, 9.8, 10.1, 9.9];
        let candidate = [5.0, 5.1, 4.9, 5.05, 4.95];
        let (low, high) = ratio_confidence_interval(&reference, &candidate, &cfg);
        let point = median(&reference) / median(&candidate);
        assert!(low <= point && point <= high);
        assert!(low > 1.8 && high < 2.2, "({low}, {high})");
    }

    #[test]
    fn ratio_interval_degenerate_inputs() {
        let cfg = BootstrapConfig::default();
        let (l, h) = ratio_confidence_interval(&[], &[1.0], &cfg);
        assert!(l.is_nan() && h.is_nan());
        assert_eq!(ratio_confidence_interval(&[4.0], &[2.0], &cfg), (2.0, 2.0));
    }

    // ─── Mood's median test ──────────────────────────────────────

    #[test]
    fn separated_samples_are_significant() {
        let a: Vec<f64> = (0..20).map(|i| 10.0 + i as f64 * 0.01).collect();
        let b: Vec<f64> = (0..20).map(|i| 12.0 + i as f64 * 0.01).collect();
        let test = moods_median_test(&a, &b).unwrap();
        assert_eq!(test.above, [0, 20]);
        assert_eq!(test.below, [20, 0]);
        // Yates-corrected: 4 * 9.5^2 / 10 = 36.1
        assert!((test.statistic - 36.1).abs() < 1e-9);
        assert!(test.p_value < 1e-6);
    }

    #[test]
    fn interleaved_samples_not_significant() {
        let a = [1.0, 3.0, 5.0, 7.0, 9.0, 11.0];
        let b = [2.0, 4.0, 6.0, 8.0, 10.0, 12.0];
        assert!(median_test(&a, &b) > 0.5);
    }

    #[test]
    fn three_vs_three_separated() {
        // grand median 7.5; table [[0,3],[3,0]]; Yates chi2 = 4 * 1^2 / 1.5
        let test = moods_median_test(&[10.0, 10.0, 10.0], &[5.0, 5.0, 5.0]).unwrap();
        assert!((test.statistic - 8.0 / 3.0).abs() < 1e-12);
        assert!((test.p_value - 0.10247043485974942).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_are_not_significant() {
        assert_eq!(median_test(&[1.0; 5], &[1.0; 7]), 1.0);
        assert_eq!(median_test(&[1.0], &[2.0]), 1.0);
        assert_eq!(median_test(&[], &[2.0, 3.0]), 1.0);
        assert_eq!(median_test(&[1.0, f64::NAN], &[2.0, 3.0]), 1.0);
        assert!(moods_median_test(&[1.0; 3], &[1.0; 3]).is_none());
    }
}
