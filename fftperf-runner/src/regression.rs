//! Regression detection — flags problems that got significantly slower.
//!
//! A problem regresses in a comparison run when all three hold:
//! 1. its median time is higher than the reference median
//! 2. the relative difference exceeds `percent`
//! 3. Mood's median test rejects equality below `significance`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fftperf_core::Run;

use crate::postprocess::run_labels;
use crate::statistics::{median, median_test};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionConfig {
    /// Minimum slowdown, in percent of the reference median.
    pub percent: f64,
    /// p-value threshold.
    pub significance: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            percent: 5.0,
            significance: 0.001,
        }
    }
}

/// `m1` is the reference median, `m2` the comparison median.
pub fn is_regression(m1: f64, m2: f64, p_value: f64, config: &RegressionConfig) -> bool {
    m1 < m2 && (m1 - m2).abs() / m1 * 100.0 > config.percent && p_value < config.significance
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub dataset: String,
    pub run: String,
    pub token: String,
    pub label: String,
    pub size: usize,
    pub reference_median: f64,
    pub comparison_median: f64,
    pub percent_diff: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    /// Ordered by size, then dataset, token and run.
    pub regressions: Vec<Regression>,
    /// Number of (run, dataset, token) comparisons performed.
    pub compared: usize,
}

impl RegressionReport {
    pub fn is_clean(&self) -> bool {
        self.regressions.is_empty()
    }
}

/// Compare every run in `others` against `reference`, over the datasets and
/// problems both contain.
pub fn detect(reference: &Run, others: &[Run], config: &RegressionConfig) -> RegressionReport {
    let mut labels = run_labels(&[std::slice::from_ref(reference), others].concat());
    labels.remove(0);

    let mut found: BTreeMap<(usize, String, String, String), Regression> = BTreeMap::new();
    let mut compared = 0;

    for (run, label) in others.iter().zip(&labels) {
        for ref_store in reference.stores() {
            let Some(store) = run.store(ref_store.name()) else {
                continue;
            };
            for r in ref_store.sorted() {
                let Some(o) = store.get(&r.token) else {
                    continue;
                };
                compared += 1;
                let m1 = median(&r.times);
                let m2 = median(&o.times);
                let p = median_test(&r.times, &o.times);
                if !is_regression(m1, m2, p, config) {
                    continue;
                }
                let key = (
                    r.size,
                    ref_store.name().to_string(),
                    r.token.clone(),
                    label.clone(),
                );
                found.entry(key).or_insert_with(|| Regression {
                    dataset: ref_store.name().to_string(),
                    run: label.clone(),
                    token: r.token.clone(),
                    label: r.label.clone(),
                    size: r.size,
                    reference_median: m1,
                    comparison_median: m2,
                    percent_diff: (m2 - m1) / m1 * 100.0,
                    p_value: p,
                });
            }
        }
    }

    let regressions: Vec<Regression> = found.into_values().collect();
    tracing::info!(
        compared,
        regressions = regressions.len(),
        "regression check complete"
    );
    RegressionReport {
        regressions,
        compared,
    }
}
