//! Tuning orchestration — one tuner invocation per problem.
//!
//! The tuner is an external executable that searches kernel configurations
//! for a problem and writes its best candidate as an artifact file. Every
//! setting reaches it through the child environment of its launch record:
//!
//! | Variable                         | Value                                  |
//! |----------------------------------|----------------------------------------|
//! | `FFTPERF_TUNING_MIN_WGS`         | lower workgroup-size bound             |
//! | `FFTPERF_TUNING_MAX_WGS`         | upper workgroup-size bound             |
//! | `FFTPERF_TUNING_OUTPUT`          | artifact path                          |
//! | `FFTPERF_TUNING_DUMP_CANDIDATE`  | `1` to dump every candidate            |
//! | `FFTPERF_TUNING_EXACT_TOKEN`     | `1` to key the artifact on the exact token |
//! | `FFTPERF_TUNING_REJECT_REASON`   | `1` to log why candidates were rejected |
//!
//! The pass metadata is persisted before tuning starts and the successful
//! (token, artifact) pairs after it ends, so the merge stage can be replayed
//! from disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fftperf_core::{Precision, Problem};

use crate::launch::{require_executable, LaunchConfig, LaunchError, Launcher};
use crate::rider::{parse_solution_line, SolutionMatch};

pub const MIN_WGS_ENV: &str = "FFTPERF_TUNING_MIN_WGS";
pub const MAX_WGS_ENV: &str = "FFTPERF_TUNING_MAX_WGS";
pub const OUTPUT_ENV: &str = "FFTPERF_TUNING_OUTPUT";
pub const DUMP_CANDIDATE_ENV: &str = "FFTPERF_TUNING_DUMP_CANDIDATE";
pub const EXACT_TOKEN_ENV: &str = "FFTPERF_TUNING_EXACT_TOKEN";
pub const REJECT_REASON_ENV: &str = "FFTPERF_TUNING_REJECT_REASON";

pub const TUNING_CONFIG_FILE: &str = "tuning-config.json";
pub const MERGE_INPUT_FILE: &str = "merge-input.json";

#[derive(Debug, Error)]
pub enum TuningError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad JSON in {path}: {reason}")]
    Json { path: PathBuf, reason: String },
    #[error("invalid workgroup bounds: min {min} > max {max}")]
    Bounds { min: u32, max: u32 },
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), TuningError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| TuningError::Json {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| TuningError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, json).map_err(|source| TuningError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, TuningError> {
    let content = fs::read_to_string(path).map_err(|source| TuningError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| TuningError::Json {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

// ─── Metadata ────────────────────────────────────────────────────────

/// Settings of one tuning pass, persisted as `tuning-config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningMetadata {
    pub tuner: PathBuf,
    pub output_dir: PathBuf,
    /// Problem tokens, tuned in order.
    pub problems: Vec<String>,
    #[serde(default)]
    pub dump_candidates: bool,
    #[serde(default)]
    pub exact_token: bool,
    #[serde(default)]
    pub log_reject_reason: bool,
    /// Global workgroup-size overrides; per-problem defaults otherwise.
    #[serde(default)]
    pub min_wgs: Option<u32>,
    #[serde(default)]
    pub max_wgs: Option<u32>,
    /// Skip problems whose artifact already exists.
    #[serde(default)]
    pub resume: bool,
}

impl TuningMetadata {
    pub fn new(tuner: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            tuner: tuner.into(),
            output_dir: output_dir.into(),
            problems: Vec::new(),
            dump_candidates: false,
            exact_token: false,
            log_reject_reason: false,
            min_wgs: None,
            max_wgs: None,
            resume: false,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), TuningError> {
        write_json(self, path)
    }

    pub fn from_file(path: &Path) -> Result<Self, TuningError> {
        read_json(path)
    }

    /// Content hash of the settings (blake3 over the JSON encoding).
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }

    pub fn config_path(&self) -> PathBuf {
        self.output_dir.join(TUNING_CONFIG_FILE)
    }

    pub fn merge_input_path(&self) -> PathBuf {
        self.output_dir.join(MERGE_INPUT_FILE)
    }

    /// Where the tuner writes the candidate for `token`.
    pub fn artifact_path(&self, token: &str) -> PathBuf {
        self.output_dir.join(format!("{token}.dat"))
    }
}

/// Inclusive workgroup-size search range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkgroupBounds {
    pub min: u32,
    pub max: u32,
}

/// Global overrides when set, otherwise `64..=256` for double precision and
/// `64..=512` for everything else. A single override can still leave the
/// range inverted for some precisions, which is an error.
pub fn workgroup_bounds(problem: &Problem, meta: &TuningMetadata) -> Result<WorkgroupBounds, TuningError> {
    let default_max = match problem.precision() {
        Precision::Double => 256,
        Precision::Half | Precision::Single => 512,
    };
    let min = meta.min_wgs.unwrap_or(64);
    let max = meta.max_wgs.unwrap_or(default_max);
    if min > max {
        return Err(TuningError::Bounds { min, max });
    }
    Ok(WorkgroupBounds { min, max })
}

/// Launch record for tuning `problem` into `artifact`.
pub fn tuner_launch_config(
    meta: &TuningMetadata,
    problem: &Problem,
    artifact: &Path,
) -> Result<LaunchConfig, TuningError> {
    let bounds = workgroup_bounds(problem, meta)?;
    let mut cfg = LaunchConfig::new(&meta.tuner)
        .args(problem.rider_args())
        .env(MIN_WGS_ENV, bounds.min.to_string())
        .env(MAX_WGS_ENV, bounds.max.to_string())
        .env(OUTPUT_ENV, artifact.display().to_string());
    let flags = [
        (meta.dump_candidates, DUMP_CANDIDATE_ENV),
        (meta.exact_token, EXACT_TOKEN_ENV),
        (meta.log_reject_reason, REJECT_REASON_ENV),
    ];
    for (enabled, key) in flags {
        if enabled {
            cfg = cfg.env(key, "1");
        }
    }
    Ok(cfg)
}

// ─── Records ─────────────────────────────────────────────────────────

/// Outcome of tuning one problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningRecord {
    pub token: String,
    pub artifact: PathBuf,
    /// Tuner stdout on success, the failure reason otherwise.
    pub summary: String,
    pub success: bool,
    pub solution: Option<SolutionMatch>,
    /// Artifact was already present and the tuner was not run.
    #[serde(default)]
    pub resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateArtifact {
    pub token: String,
    pub artifact: PathBuf,
    /// Solution the tuner reported for the artifact, if any.
    #[serde(default)]
    pub solution: Option<SolutionMatch>,
}

/// The successful tuning results handed to the merge stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeInput {
    pub entries: Vec<CandidateArtifact>,
}

impl MergeInput {
    pub fn from_records(records: &[TuningRecord]) -> Self {
        Self {
            entries: records
                .iter()
                .filter(|r| r.success)
                .map(|r| CandidateArtifact {
                    token: r.token.clone(),
                    artifact: r.artifact.clone(),
                    solution: r.solution.clone(),
                })
                .collect(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), TuningError> {
        write_json(self, path)
    }

    pub fn from_file(path: &Path) -> Result<Self, TuningError> {
        read_json(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningOutcome {
    pub records: Vec<TuningRecord>,
    pub merge_input: MergeInput,
}

impl TuningOutcome {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }
}

fn artifact_ready(path: &Path) -> bool {
    fs::metadata(path).map_or(false, |m| m.is_file() && m.len() > 0)
}

// ─── Orchestrator ────────────────────────────────────────────────────

pub struct TuningOrchestrator<L> {
    meta: TuningMetadata,
    launcher: L,
}

impl<L: Launcher> TuningOrchestrator<L> {
    pub fn new(meta: TuningMetadata, launcher: L) -> Result<Self, TuningError> {
        require_executable(&meta.tuner)?;
        if let (Some(min), Some(max)) = (meta.min_wgs, meta.max_wgs) {
            if min > max {
                return Err(TuningError::Bounds { min, max });
            }
        }
        Ok(Self { meta, launcher })
    }

    pub fn metadata(&self) -> &TuningMetadata {
        &self.meta
    }

    /// Tune every problem in order. Individual failures are recorded and the
    /// pass continues.
    pub fn run(&self) -> Result<TuningOutcome, TuningError> {
        let meta = &self.meta;
        meta.save(&meta.config_path())?;
        tracing::info!(
            problems = meta.problems.len(),
            fingerprint = %meta.fingerprint(),
            output_dir = %meta.output_dir.display(),
            "tuning pass started"
        );

        let records: Vec<TuningRecord> = meta.problems.iter().map(|t| self.tune_one(t)).collect();

        let merge_input = MergeInput::from_records(&records);
        merge_input.save(&meta.merge_input_path())?;

        let outcome = TuningOutcome {
            records,
            merge_input,
        };
        tracing::info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "tuning pass complete"
        );
        Ok(outcome)
    }

    fn tune_one(&self, token: &str) -> TuningRecord {
        let artifact = self.meta.artifact_path(token);
        let failure = |reason: String| {
            tracing::warn!(token = %token, reason = %reason, "tuning failed");
            TuningRecord {
                token: token.to_string(),
                artifact: artifact.clone(),
                summary: reason,
                success: false,
                solution: None,
                resumed: false,
            }
        };

        let problem = match Problem::from_token(token) {
            Ok(p) => p,
            Err(e) => return failure(e.to_string()),
        };

        if self.meta.resume && artifact_ready(&artifact) {
            tracing::info!(token = %token, "artifact present, skipping");
            return TuningRecord {
                token: token.to_string(),
                artifact,
                summary: String::new(),
                success: true,
                solution: None,
                resumed: true,
            };
        }

        let cfg = match tuner_launch_config(&self.meta, &problem, &artifact) {
            Ok(cfg) => cfg,
            Err(e) => return failure(e.to_string()),
        };
        // an artifact left by an earlier pass does not count as output
        match fs::remove_file(&artifact) {
            Ok(()) => tracing::debug!(artifact = %artifact.display(), "removed stale artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return failure(format!("cannot clear {}: {e}", artifact.display())),
        }
        let output = match self.launcher.launch(&cfg) {
            Ok(out) => out,
            Err(e) => return failure(e.to_string()),
        };
        if !output.success() {
            return failure(format!(
                "tuner exited with {:?}: {}",
                output.code,
                output.stderr.trim()
            ));
        }
        if !artifact_ready(&artifact) {
            return failure(format!("tuner wrote no artifact at {}", artifact.display()));
        }

        tracing::debug!(token = %token, artifact = %artifact.display(), "tuned");
        TuningRecord {
            token: token.to_string(),
            artifact,
            summary: output.stdout.trim().to_string(),
            success: true,
            solution: output.stdout.lines().find_map(parse_solution_line),
            resumed: false,
        }
    }
}
