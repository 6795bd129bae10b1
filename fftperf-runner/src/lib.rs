//! fftperf runner — everything that drives external executables or reasons
//! about their measurements.
//!
//! This crate builds on `fftperf-core` to provide:
//! - The subprocess launch seam and the rider output protocol
//! - The timer that fills sample stores from rider runs
//! - Bootstrap intervals and Mood's median test
//! - Post-processing into summary and speedup tables
//! - Regression detection between runs
//! - Tuning orchestration and solution-map merging

pub mod launch;
pub mod machine;
pub mod merge;
pub mod postprocess;
pub mod regression;
pub mod rider;
pub mod statistics;
pub mod timer;
pub mod tuning;

pub use launch::{LaunchConfig, LaunchError, LaunchOutput, Launcher, ProcessLauncher};
pub use machine::MachineSpec;
pub use merge::{
    Evaluation, InsertionStep, MergeConfig, MergeDecision, MergeEngine, MergeError, MergeOutcome,
    MergeRecord, MergeReport, RecordState, Side,
};
pub use postprocess::{compare, post_process, summarize, ComparisonRow, PostError, PostProcessor, SummaryRow};
pub use regression::{detect, is_regression, Regression, RegressionConfig, RegressionReport};
pub use rider::{MatchKind, RiderError, RiderOutcome, SolutionMatch, SolutionSource};
pub use statistics::{
    confidence_interval, median, median_test, moods_median_test, ratio_confidence_interval,
    BootstrapConfig, MedianTest,
};
pub use timer::{Timer, TimerConfig, TimerError, TimingReport};
pub use tuning::{
    workgroup_bounds, CandidateArtifact, MergeInput, TuningError, TuningMetadata,
    TuningOrchestrator, TuningOutcome, TuningRecord,
};
