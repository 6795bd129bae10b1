mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{fail, fake_executable, flag_value, ok, spread, timing_line, ScriptedLauncher};
use fftperf_runner::launch::{LaunchConfig, LaunchOutput};
use fftperf_runner::merge::{MergeConfig, MergeEngine, MergeReport};
use fftperf_runner::rider::SOLUTION_OVERRIDE_ENV;
use fftperf_runner::tuning::{
    MergeInput, TuningMetadata, TuningOrchestrator, MERGE_INPUT_FILE, OUTPUT_ENV,
    TUNING_CONFIG_FILE,
};

const FAST: &str = "complex_forward_len_64_single_ip_batch_1";
const BROKEN: &str = "complex_forward_len_128_single_ip_batch_1";
const GENERIC: &str = "complex_forward_len_256_single_ip_batch_1";

/// Writes an artifact naming the problem length, except for 128.
fn tuner(cfg: &LaunchConfig) -> LaunchOutput {
    let length = flag_value(cfg, "--length").unwrap_or_default().to_string();
    if length == "128" {
        return fail(2, "no valid configuration");
    }
    let artifact = PathBuf::from(&cfg.env[OUTPUT_ENV]);
    fs::write(&artifact, format!("kernel_{length}\n")).unwrap();
    ok(format!("best candidate for {length}\nSolution map entry: kernel_{length} (FULL)\n"))
}

fn tune(dir: &Path, problems: &[&str]) -> MergeInput {
    let meta = TuningMetadata {
        problems: problems.iter().map(|s| s.to_string()).collect(),
        ..TuningMetadata::new(fake_executable(dir, "tuner"), dir.join("tuning"))
    };
    let launcher = ScriptedLauncher::new(tuner);
    let outcome = TuningOrchestrator::new(meta, &launcher).unwrap().run().unwrap();
    assert_eq!(outcome.records.len(), problems.len());
    outcome.merge_input
}

/// Rider: slow against the reference map, fast with a candidate override.
/// The 256 candidate reports no matched solution.
fn rider(cfg: &LaunchConfig) -> LaunchOutput {
    let length = flag_value(cfg, "--length").unwrap_or_default();
    match cfg.env.get(SOLUTION_OVERRIDE_ENV) {
        None => ok(format!(
            "{}Solution map entry: ref_{length} (FULL)\n",
            timing_line(&spread(2.0, 20))
        )),
        Some(_) if length == "256" => ok(format!(
            "{}Solution map entry:  (NONE)\n",
            timing_line(&spread(1.0, 20))
        )),
        Some(_) => ok(format!(
            "{}Solution map entry: kernel_{length} (FULL)\n",
            timing_line(&spread(1.0, 20))
        )),
    }
}

/// Merge tool: appends the key to the base content. Fails on `poison_key`
/// after writing a partial file.
fn merge_tool(poison_key: &'static str) -> impl Fn(&LaunchConfig) -> LaunchOutput {
    move |cfg| {
        let key = flag_value(cfg, "--key").unwrap().to_string();
        let output = PathBuf::from(flag_value(cfg, "--output").unwrap());
        let base = flag_value(cfg, "--base")
            .map(|b| fs::read_to_string(b).unwrap())
            .unwrap_or_default();
        fs::write(&output, format!("{base}{key}\n")).unwrap();
        if key == poison_key {
            fail(1, "corrupt artifact")
        } else {
            ok("")
        }
    }
}

fn engine<'a>(dir: &Path, launcher: &'a ScriptedLauncher) -> MergeEngine<&'a ScriptedLauncher> {
    let config = MergeConfig {
        rider: fake_executable(dir, "rider"),
        merge_tool: fake_executable(dir, "merge"),
        reference_map: None,
        ntrial: 20,
        device: None,
    };
    MergeEngine::new(config, launcher).unwrap()
}

#[test]
fn tuning_failure_does_not_stop_later_problems() {
    let dir = tempfile::tempdir().unwrap();
    let input = tune(dir.path(), &[BROKEN, FAST]);
    let tokens: Vec<&str> = input.entries.iter().map(|e| e.token.as_str()).collect();
    assert_eq!(tokens, vec![FAST]);

    let tuning = dir.path().join("tuning");
    assert!(tuning.join(TUNING_CONFIG_FILE).is_file());
    let replayed = MergeInput::from_file(&tuning.join(MERGE_INPUT_FILE)).unwrap();
    assert_eq!(replayed, input);
}

#[test]
fn resume_skips_existing_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let tuning = dir.path().join("tuning");
    fs::create_dir_all(&tuning).unwrap();
    fs::write(tuning.join(format!("{FAST}.dat")), "kernel_64\n").unwrap();

    let meta = TuningMetadata {
        problems: vec![FAST.into(), GENERIC.into()],
        resume: true,
        ..TuningMetadata::new(fake_executable(dir.path(), "tuner"), &tuning)
    };
    let launcher = ScriptedLauncher::new(tuner);
    let outcome = TuningOrchestrator::new(meta, &launcher).unwrap().run().unwrap();

    assert!(outcome.records[0].resumed);
    assert_eq!(outcome.succeeded(), 2);
    assert_eq!(launcher.calls().len(), 1);
}

#[test]
fn stale_artifact_does_not_count_as_tuner_output() {
    let dir = tempfile::tempdir().unwrap();
    let tuning = dir.path().join("tuning");
    fs::create_dir_all(&tuning).unwrap();
    let stale = tuning.join(format!("{FAST}.dat"));
    fs::write(&stale, "kernel_from_last_week\n").unwrap();

    let meta = TuningMetadata {
        problems: vec![FAST.into()],
        ..TuningMetadata::new(fake_executable(dir.path(), "tuner"), &tuning)
    };
    let launcher = ScriptedLauncher::new(|_| ok("found nothing\n"));
    let outcome = TuningOrchestrator::new(meta, &launcher).unwrap().run().unwrap();

    assert_eq!(launcher.calls().len(), 1);
    assert!(!outcome.records[0].success);
    assert!(outcome.records[0].summary.contains("wrote no artifact"));
    assert!(outcome.merge_input.entries.is_empty());
    assert!(!stale.exists());
}

#[test]
fn inverted_resolved_bounds_fail_only_that_problem() {
    let dir = tempfile::tempdir().unwrap();
    let double = "complex_forward_len_64_double_ip_batch_1";
    let meta = TuningMetadata {
        problems: vec![double.into(), FAST.into()],
        min_wgs: Some(300),
        ..TuningMetadata::new(fake_executable(dir.path(), "tuner"), dir.path().join("tuning"))
    };
    let launcher = ScriptedLauncher::new(tuner);
    let outcome = TuningOrchestrator::new(meta, &launcher).unwrap().run().unwrap();

    assert!(!outcome.records[0].success);
    assert!(outcome.records[0].summary.contains("min 300 > max 256"));
    assert!(outcome.records[1].success);
    assert_eq!(launcher.calls().len(), 1);
}

#[test]
fn merge_input_carries_the_tuned_solution() {
    let dir = tempfile::tempdir().unwrap();
    let input = tune(dir.path(), &[FAST]);
    let solution = input.entries[0].solution.as_ref().unwrap();
    assert_eq!(solution.token, "kernel_64");

    let replayed = MergeInput::from_file(&dir.path().join("tuning").join(MERGE_INPUT_FILE)).unwrap();
    assert_eq!(replayed.entries[0].solution, input.entries[0].solution);
}

#[test]
fn tuned_candidates_fold_into_one_map() {
    let dir = tempfile::tempdir().unwrap();
    let input = tune(
        dir.path(),
        &[
            FAST,
            GENERIC,
            "complex_forward_len_512_single_ip_batch_1",
        ],
    );
    assert_eq!(input.entries.len(), 3);

    let launcher = ScriptedLauncher::new(|cfg| {
        if cfg.program.ends_with("merge") {
            merge_tool("never")(cfg)
        } else {
            rider(cfg)
        }
    });
    let engine = engine(dir.path(), &launcher);

    let evaluation = engine.evaluate(&input);
    assert_eq!(evaluation.decisions.len(), 2);
    assert_eq!(evaluation.skipped.len(), 1);
    assert_eq!(evaluation.skipped[0].token, GENERIC);
    assert!(evaluation.decisions.iter().all(|d| d.accept));

    let work = dir.path().join("work");
    let outcome = engine.merge(evaluation.accepted(), None, &work).unwrap();
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.steps[0].base, None);
    assert_eq!(outcome.steps[1].base.as_deref(), Some(work.join("solution-map.0.dat").as_path()));
    assert_eq!(outcome.steps[1].key, "kernel_512");

    let final_map = outcome.final_map.clone().unwrap();
    assert_eq!(final_map, work.join("solution-map.1.dat"));
    assert_eq!(fs::read_to_string(&final_map).unwrap(), "kernel_64\nkernel_512\n");

    let report = MergeReport {
        evaluation,
        outcome,
    };
    let report_path = dir.path().join("merge-report.json");
    report.save(&report_path).unwrap();
    let back: MergeReport = serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(back.outcome, report.outcome);
}

#[test]
fn failed_insertion_keeps_previous_base() {
    let dir = tempfile::tempdir().unwrap();
    let input = tune(
        dir.path(),
        &[
            FAST,
            "complex_forward_len_512_single_ip_batch_1",
            "complex_forward_len_1024_single_ip_batch_1",
        ],
    );

    let base = dir.path().join("base.dat");
    fs::write(&base, "existing\n").unwrap();

    let launcher = ScriptedLauncher::new(|cfg| {
        if cfg.program.ends_with("merge") {
            merge_tool("kernel_512")(cfg)
        } else {
            rider(cfg)
        }
    });
    let engine = engine(dir.path(), &launcher);
    let evaluation = engine.evaluate(&input);
    let work = dir.path().join("work");
    let outcome = engine.merge(evaluation.accepted(), Some(&base), &work).unwrap();

    assert_eq!(outcome.inserted(), 2);
    assert!(!outcome.steps[1].success);
    assert!(!work.join("solution-map.1.dat").exists());
    assert_eq!(outcome.steps[2].base.as_deref(), Some(work.join("solution-map.0.dat").as_path()));
    assert_eq!(
        fs::read_to_string(outcome.final_map.unwrap()).unwrap(),
        "existing\nkernel_64\nkernel_1024\n"
    );
}

#[test]
fn stale_map_from_earlier_merge_is_not_chained() {
    let dir = tempfile::tempdir().unwrap();
    let input = tune(dir.path(), &[FAST]);

    let work = dir.path().join("work");
    fs::create_dir_all(&work).unwrap();
    let stale = work.join("solution-map.0.dat");
    fs::write(&stale, "old_map\n").unwrap();

    let launcher = ScriptedLauncher::new(|cfg| {
        if cfg.program.ends_with("merge") {
            ok("")
        } else {
            rider(cfg)
        }
    });
    let engine = engine(dir.path(), &launcher);
    let evaluation = engine.evaluate(&input);
    let outcome = engine.merge(evaluation.accepted(), None, &work).unwrap();

    assert_eq!(outcome.steps.len(), 1);
    assert!(!outcome.steps[0].success);
    assert_eq!(outcome.steps[0].reason.as_deref(), Some("merge tool wrote no output"));
    assert_eq!(outcome.final_map, None);
    assert!(!stale.exists());
}

#[test]
fn missing_artifact_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let input = MergeInput {
        entries: vec![fftperf_runner::tuning::CandidateArtifact {
            token: FAST.into(),
            artifact: dir.path().join("gone.dat"),
            solution: None,
        }],
    };
    let launcher = ScriptedLauncher::new(rider);
    let evaluation = engine(dir.path(), &launcher).evaluate(&input);
    assert!(evaluation.decisions.is_empty());
    assert!(evaluation.skipped[0].reason.contains("artifact missing"));
    assert!(launcher.calls().is_empty());
}
