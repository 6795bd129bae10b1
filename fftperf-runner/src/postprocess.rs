//! Post-processing — raw run stores into summary and comparison tables.
//!
//! For every run `r` and dataset `d`:
//! - `{r}-{d}-median.dat`: median, confidence interval and throughput per problem
//! - `{ref}-{r}-{d}-speedup.dat`: speedup of `r` against the first (reference)
//!   run, for problems present in both
//!
//! The metadata header of each source store is copied to every derived file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fftperf_core::dat::write_table;
use fftperf_core::{DatError, Problem, Run, SampleStore};

use crate::statistics::{
    confidence_interval, median, median_test, ratio_confidence_interval, BootstrapConfig,
};

#[derive(Debug, Error)]
pub enum PostError {
    #[error("no runs to post-process")]
    NoRuns,
    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Dat(#[from] DatError),
}

// ─── Rows ────────────────────────────────────────────────────────────

/// One line of a `-median.dat` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub token: String,
    pub label: String,
    pub size: usize,
    pub elements: usize,
    pub nsample: usize,
    pub median: f64,
    pub low: f64,
    pub high: f64,
    /// Nominal throughput at the median time; 0 when unknown.
    pub gflops: f64,
}

impl SummaryRow {
    pub const COLUMNS: [&'static str; 9] = [
        "token", "label", "size", "elements", "nsample", "median", "low", "high", "gflops",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.token.clone(),
            self.label.clone(),
            self.size.to_string(),
            self.elements.to_string(),
            self.nsample.to_string(),
            self.median.to_string(),
            self.low.to_string(),
            self.high.to_string(),
            self.gflops.to_string(),
        ]
    }
}

/// One line of a `-speedup.dat` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub token: String,
    pub label: String,
    pub size: usize,
    pub ref_median: f64,
    pub cmp_median: f64,
    /// `ref_median / cmp_median`; above 1 means the compared run is faster.
    pub speedup: f64,
    pub speedup_low: f64,
    pub speedup_high: f64,
    pub p_value: f64,
}

impl ComparisonRow {
    pub const COLUMNS: [&'static str; 9] = [
        "token",
        "label",
        "size",
        "ref_median",
        "cmp_median",
        "speedup",
        "speedup_low",
        "speedup_high",
        "p_value",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.token.clone(),
            self.label.clone(),
            self.size.to_string(),
            self.ref_median.to_string(),
            self.cmp_median.to_string(),
            self.speedup.to_string(),
            self.speedup_low.to_string(),
            self.speedup_high.to_string(),
            self.p_value.to_string(),
        ]
    }
}

fn gflops(token: &str, median_ms: f64) -> f64 {
    match Problem::from_token(token) {
        Ok(problem) if median_ms > 0.0 => problem.flop_count() / (median_ms * 1e6),
        _ => 0.0,
    }
}

// ─── Tables ──────────────────────────────────────────────────────────

/// Summary rows for every problem in `store`, in ascending size order.
pub fn summarize(store: &SampleStore, config: &BootstrapConfig) -> Vec<SummaryRow> {
    store
        .sorted()
        .into_iter()
        .map(|s| {
            let m = median(&s.times);
            let (low, high) = confidence_interval(&s.times, config);
            SummaryRow {
                token: s.token.clone(),
                label: s.label.clone(),
                size: s.size,
                elements: s.elements,
                nsample: s.times.len(),
                median: m,
                low,
                high,
                gflops: gflops(&s.token, m),
            }
        })
        .collect()
}

/// Comparison rows for problems present in both stores. Problems covered by
/// only one side are left out.
pub fn compare(
    reference: &SampleStore,
    other: &SampleStore,
    config: &BootstrapConfig,
) -> Vec<ComparisonRow> {
    reference
        .sorted()
        .into_iter()
        .filter_map(|r| other.get(&r.token).map(|o| (r, o)))
        .map(|(r, o)| {
            let ref_median = median(&r.times);
            let cmp_median = median(&o.times);
            let (speedup_low, speedup_high) = ratio_confidence_interval(&r.times, &o.times, config);
            ComparisonRow {
                token: r.token.clone(),
                label: r.label.clone(),
                size: r.size,
                ref_median,
                cmp_median,
                speedup: ref_median / cmp_median,
                speedup_low,
                speedup_high,
                p_value: median_test(&r.times, &o.times),
            }
        })
        .collect()
}

/// Report labels for `runs`: directory names, with `_{index}` appended when
/// a name was already taken. Generated labels never shadow a later run's
/// own directory name.
pub fn run_labels(runs: &[Run]) -> Vec<String> {
    let names: Vec<String> = runs.iter().map(Run::name).collect();
    let mut taken: HashSet<String> = HashSet::new();
    names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let mut label = name.clone();
            let mut attempt = index;
            while taken.contains(&label) || (label != *name && names.contains(&label)) {
                label = format!("{name}_{attempt}");
                attempt += 1;
            }
            taken.insert(label.clone());
            label
        })
        .collect()
}

// ─── Driver ──────────────────────────────────────────────────────────

enum Job<'a> {
    Summary {
        run: &'a str,
        store: &'a SampleStore,
    },
    Speedup {
        reference: &'a str,
        run: &'a str,
        ref_store: &'a SampleStore,
        store: &'a SampleStore,
    },
}

/// Writes the derived tables for a group of runs.
pub struct PostProcessor {
    config: BootstrapConfig,
    parallel: bool,
}

impl PostProcessor {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            parallel: true,
        }
    }

    /// Enables or disables parallel execution across datasets.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Write every derived table into `outdir`. The first run is the
    /// reference. Returns the written paths in a stable order.
    pub fn run(&self, runs: &[Run], outdir: &Path) -> Result<Vec<PathBuf>, PostError> {
        let (reference, others) = runs.split_first().ok_or(PostError::NoRuns)?;
        std::fs::create_dir_all(outdir).map_err(|source| PostError::OutputDir {
            path: outdir.to_path_buf(),
            source,
        })?;

        let labels = run_labels(runs);
        let ref_label = labels[0].as_str();

        let mut jobs = Vec::new();
        for (run, label) in runs.iter().zip(&labels) {
            jobs.extend(run.stores().map(|store| Job::Summary {
                run: label.as_str(),
                store,
            }));
        }
        for (run, label) in others.iter().zip(&labels[1..]) {
            for ref_store in reference.stores() {
                if let Some(store) = run.store(ref_store.name()) {
                    jobs.push(Job::Speedup {
                        reference: ref_label,
                        run: label.as_str(),
                        ref_store,
                        store,
                    });
                }
            }
        }

        let results: Vec<Result<PathBuf, DatError>> = if self.parallel {
            jobs.par_iter().map(|job| self.execute(job, outdir)).collect()
        } else {
            jobs.iter().map(|job| self.execute(job, outdir)).collect()
        };
        let written = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            runs = runs.len(),
            files = written.len(),
            outdir = %outdir.display(),
            "post-processing complete"
        );
        Ok(written)
    }

    fn execute(&self, job: &Job<'_>, outdir: &Path) -> Result<PathBuf, DatError> {
        match job {
            Job::Summary { run, store } => {
                let path = outdir.join(format!("{run}-{}-median.dat", store.name()));
                let rows = summarize(store, &self.config);
                write_table(
                    &path,
                    store.meta(),
                    Some(&SummaryRow::COLUMNS[..]),
                    rows.iter().map(SummaryRow::fields),
                )?;
                tracing::debug!(path = %path.display(), rows = rows.len(), "wrote summary");
                Ok(path)
            }
            Job::Speedup {
                reference,
                run,
                ref_store,
                store,
            } => {
                let path = outdir.join(format!(
                    "{reference}-{run}-{}-speedup.dat",
                    ref_store.name()
                ));
                let rows = compare(ref_store, store, &self.config);
                write_table(
                    &path,
                    ref_store.meta(),
                    Some(&ComparisonRow::COLUMNS[..]),
                    rows.iter().map(ComparisonRow::fields),
                )?;
                tracing::debug!(path = %path.display(), rows = rows.len(), "wrote speedup");
                Ok(path)
            }
        }
    }
}

/// Convenience wrapper over [`PostProcessor`].
pub fn post_process(
    runs: &[Run],
    outdir: &Path,
    config: &BootstrapConfig,
    parallel: bool,
) -> Result<Vec<PathBuf>, PostError> {
    PostProcessor::new(*config)
        .with_parallelism(parallel)
        .run(runs, outdir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fftperf_core::DatMeta;

    fn store(name: &str, entries: &[(&str, &[f64])]) -> SampleStore {
        let mut store = SampleStore::new(name, DatMeta::titled(name));
        for (token, times) in entries {
            store.append(&Problem::from_token(token).unwrap(), times);
        }
        store
    }

    const T64: &str = "complex_forward_len_64_single_ip_batch_1";
    const T128: &str = "complex_forward_len_128_single_ip_batch_1";
    const T256: &str = "complex_forward_len_256_single_ip_batch_1";

    #[test]
    fn summarize_orders_by_size() {
        let s = store("d", &[(T256, &[3.0, 3.0]), (T64, &[1.0, 2.0, 3.0])]);
        let rows = summarize(&s, &BootstrapConfig::default());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].token, T64);
        assert_eq!(rows[0].median, 2.0);
        assert_eq!(rows[0].nsample, 3);
        assert!(rows[0].low <= 2.0 && rows[0].high >= 2.0);
        // 5 * 64 * 6 flops at 2 ms
        assert!((rows[0].gflops - 1920.0 / 2e6).abs() < 1e-12);
    }

    #[test]
    fn speedup_of_twice_as_fast_is_two() {
        let reference = store("d", &[(T64, &[10.0, 10.0, 10.0])]);
        let candidate = store("d", &[(T64, &[5.0, 5.0, 5.0])]);
        let rows = compare(&reference, &candidate, &BootstrapConfig::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].speedup, 2.0);
        assert_eq!((rows[0].speedup_low, rows[0].speedup_high), (2.0, 2.0));
    }

    #[test]
    fn partial_coverage_is_excluded() {
        let reference = store("d", &[(T64, &[1.0, 1.0]), (T128, &[2.0, 2.0])]);
        let other = store("d", &[(T128, &[1.0, 1.0]), (T256, &[4.0, 4.0])]);
        let rows = compare(&reference, &other, &BootstrapConfig::default());
        let tokens: Vec<&str> = rows.iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, vec![T128]);
    }

    #[test]
    fn colliding_labels_get_index_suffix() {
        let runs = vec![
            Run::from_stores("/a/base", []),
            Run::from_stores("/b/base", []),
            Run::from_stores("/c/new", []),
        ];
        assert_eq!(run_labels(&runs), vec!["base", "base_1", "new"]);
    }

    #[test]
    fn generated_label_skips_existing_directory_name() {
        let runs = vec![
            Run::from_stores("/a/base", []),
            Run::from_stores("/b/base", []),
            Run::from_stores("/c/base_1", []),
        ];
        let labels = run_labels(&runs);
        assert_eq!(labels, vec!["base", "base_2", "base_1"]);
        let unique: HashSet<&String> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }

    #[test]
    fn no_runs_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            post_process(&[], dir.path(), &BootstrapConfig::default(), false),
            Err(PostError::NoRuns)
        ));
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let runs = vec![
            Run::from_stores(
                "/runs/ref",
                [
                    store("a", &[(T64, &[1.0, 1.1, 0.9])]),
                    store("b", &[(T128, &[2.0, 2.1, 1.9])]),
                ],
            ),
            Run::from_stores(
                "/runs/new",
                [
                    store("a", &[(T64, &[0.5, 0.6, 0.4])]),
                    store("b", &[(T128, &[2.0, 2.0, 2.0])]),
                ],
            ),
        ];
        let seq_dir = tempfile::tempdir().unwrap();
        let par_dir = tempfile::tempdir().unwrap();
        let cfg = BootstrapConfig::default();

        let seq = post_process(&runs, seq_dir.path(), &cfg, false).unwrap();
        let par = post_process(&runs, par_dir.path(), &cfg, true).unwrap();
        assert_eq!(seq.len(), 6);
        for (s, p) in seq.iter().zip(&par) {
            assert_eq!(s.file_name(), p.file_name());
            assert_eq!(
                std::fs::read_to_string(s).unwrap(),
                std::fs::read_to_string(p).unwrap()
            );
        }
        assert!(seq_dir.path().join("ref-new-a-speedup.dat").exists());
        assert!(seq_dir.path().join("new-b-median.dat").exists());
    }
}
