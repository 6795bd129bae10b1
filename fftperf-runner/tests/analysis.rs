mod common;

use std::fs;
use std::path::Path;

use common::spread;
use fftperf_core::dat::{read_meta, read_rows};
use fftperf_core::{DatMeta, Problem, Run, SampleStore};
use fftperf_runner::postprocess::post_process;
use fftperf_runner::regression::{detect, RegressionConfig};
use fftperf_runner::statistics::BootstrapConfig;

const DATASET: &str = "1D_complex_forward_single_ip";
const T64: &str = "complex_forward_len_64_single_ip_batch_1";
const T128: &str = "complex_forward_len_128_single_ip_batch_1";
const T256: &str = "complex_forward_len_256_single_ip_batch_1";

fn write_run(dir: &Path, entries: &[(&str, Vec<f64>)]) -> Run {
    let mut meta = DatMeta::titled(DATASET);
    meta.figure.insert("kind".into(), "time".into());
    let mut store = SampleStore::new(DATASET, meta);
    for (token, times) in entries {
        store.append(&Problem::from_token(token).unwrap(), times);
    }
    store.write(dir).unwrap();
    Run::load(dir).unwrap()
}

#[test]
fn post_processing_writes_summary_and_speedup_tables() {
    let root = tempfile::tempdir().unwrap();
    let reference = write_run(
        &root.path().join("baseline"),
        &[(T64, spread(2.0, 15)), (T128, spread(4.0, 15))],
    );
    let candidate = write_run(
        &root.path().join("candidate"),
        &[(T64, spread(1.0, 15)), (T256, spread(8.0, 15))],
    );

    let outdir = root.path().join("post");
    let written = post_process(
        &[reference, candidate],
        &outdir,
        &BootstrapConfig::default(),
        true,
    )
    .unwrap();
    assert_eq!(written.len(), 3);

    let median_path = outdir.join(format!("baseline-{DATASET}-median.dat"));
    let content = fs::read_to_string(&median_path).unwrap();
    assert_eq!(read_meta(&content, &median_path).unwrap().figure["kind"], "time");
    let rows = read_rows(&content, &median_path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1[0], T64);

    // only the 64-point problem is covered by both runs
    let speedup_path = outdir.join(format!("baseline-candidate-{DATASET}-speedup.dat"));
    let content = fs::read_to_string(&speedup_path).unwrap();
    let rows = read_rows(&content, &speedup_path).unwrap();
    assert_eq!(rows.len(), 1);
    let speedup: f64 = rows[0].1[5].parse().unwrap();
    assert!((speedup - 2.0).abs() < 0.01, "speedup {speedup}");
    let p_value: f64 = rows[0].1[8].parse().unwrap();
    assert!(p_value < 0.001);
}

#[test]
fn regression_detector_flags_only_significant_slowdowns() {
    let root = tempfile::tempdir().unwrap();
    let reference = write_run(
        &root.path().join("ref"),
        &[
            (T64, spread(10.0, 25)),
            (T128, spread(10.0, 25)),
            (T256, spread(10.0, 25)),
        ],
    );
    let slower = write_run(
        &root.path().join("next"),
        &[
            // 20% slower, clearly separated
            (T64, spread(12.0, 25)),
            // 1% slower
            (T128, spread(10.1, 25)),
            // faster
            (T256, spread(8.0, 25)),
        ],
    );

    let report = detect(&reference, &[slower], &RegressionConfig::default());
    assert_eq!(report.compared, 3);
    assert_eq!(report.regressions.len(), 1);
    let r = &report.regressions[0];
    assert_eq!(r.token, T64);
    assert_eq!(r.dataset, DATASET);
    assert_eq!(r.run, "next");
    assert!(r.p_value < 0.001);
}

#[test]
fn run_directory_reloads_after_post_processing_into_it() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("run");
    let reference = write_run(&run_dir, &[(T64, spread(2.0, 3)), (T128, spread(4.0, 3))]);

    post_process(
        std::slice::from_ref(&reference),
        &run_dir,
        &BootstrapConfig::default(),
        false,
    )
    .unwrap();
    assert!(run_dir.join(format!("run-{DATASET}-median.dat")).exists());

    let reloaded = Run::load(&run_dir).unwrap();
    assert_eq!(reloaded.dataset_names().collect::<Vec<_>>(), vec![DATASET]);
    assert_eq!(reloaded.store(DATASET).unwrap().len(), 2);
}
