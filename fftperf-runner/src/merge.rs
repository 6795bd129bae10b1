//! Solution merging — decide which tuned candidates beat the reference
//! solution map, then fold the winners into a new map.
//!
//! Evaluation runs the rider twice per candidate: once against the reference
//! map, once with the candidate artifact overriding it. The two timing
//! samples are compared with a median ratio and Mood's median test.
//!
//! Insertion is a fold. Step `i` hands the current base map to the external
//! merge tool and, on success, its output `solution-map.{i}.dat` becomes the
//! base for step `i + 1`. A failed step leaves the base untouched.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fftperf_core::Problem;

use crate::launch::{require_executable, LaunchConfig, LaunchError, Launcher};
use crate::rider::{run_rider, RiderRequest, SolutionMatch, SolutionSource};
use crate::statistics::{median, median_test};
use crate::tuning::{CandidateArtifact, MergeInput};

/// p-value at or below which a speedup is trusted.
pub const CONFIDENCE_THRESHOLD: f64 = 0.05;

pub const MERGE_REPORT_FILE: &str = "merge-report.json";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge record for {token} is incomplete ({state:?})")]
    Incomplete { token: String, state: RecordState },
    #[error("invalid merge configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ─── Records ─────────────────────────────────────────────────────────

/// One rider pass: which map entry served it and how long it took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Side {
    pub solution: SolutionMatch,
    pub times: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Empty,
    ReferenceOnly,
    CandidateOnly,
    Complete,
}

/// Evidence gathered for one candidate, assembled side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRecord {
    token: String,
    artifact: PathBuf,
    reference: Option<Side>,
    candidate: Option<Side>,
}

impl MergeRecord {
    pub fn new(token: impl Into<String>, artifact: impl Into<PathBuf>) -> Self {
        Self {
            token: token.into(),
            artifact: artifact.into(),
            reference: None,
            candidate: None,
        }
    }

    pub fn with_reference(mut self, side: Side) -> Self {
        self.reference = Some(side);
        self
    }

    pub fn with_candidate(mut self, side: Side) -> Self {
        self.candidate = Some(side);
        self
    }

    pub fn state(&self) -> RecordState {
        match (&self.reference, &self.candidate) {
            (None, None) => RecordState::Empty,
            (Some(_), None) => RecordState::ReferenceOnly,
            (None, Some(_)) => RecordState::CandidateOnly,
            (Some(_), Some(_)) => RecordState::Complete,
        }
    }

    pub fn finalize(self) -> Result<MergeDecision, MergeError> {
        let state = self.state();
        let (Some(reference), Some(candidate)) = (self.reference, self.candidate) else {
            return Err(MergeError::Incomplete {
                token: self.token,
                state,
            });
        };

        let reference_median = median(&reference.times);
        let candidate_median = median(&candidate.times);
        let speedup = reference_median / candidate_median;
        let p_value = median_test(&reference.times, &candidate.times);
        let confident = p_value <= CONFIDENCE_THRESHOLD;
        let new_is_faster = speedup > 1.0 && confident;

        Ok(MergeDecision {
            token: self.token,
            artifact: self.artifact,
            reference_solution: reference.solution.token.clone(),
            reference_exact: reference.solution.is_exact(),
            reference_median,
            candidate_solution: candidate.solution.token.clone(),
            candidate_exact: candidate.solution.is_exact(),
            candidate_median,
            speedup,
            p_value,
            confident,
            new_is_faster,
            can_keep_slow_ref_sol: reference.solution.is_exact() && !candidate.solution.is_exact(),
            accept: new_is_faster,
        })
    }
}

/// Verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub token: String,
    pub artifact: PathBuf,
    pub reference_solution: String,
    pub reference_exact: bool,
    pub reference_median: f64,
    /// Solution-map key the candidate is inserted under.
    pub candidate_solution: String,
    pub candidate_exact: bool,
    pub candidate_median: f64,
    /// `reference_median / candidate_median`.
    pub speedup: f64,
    pub p_value: f64,
    pub confident: bool,
    pub new_is_faster: bool,
    /// The reference entry is exact while the candidate is generalized.
    /// Reported only; it does not affect `accept`.
    pub can_keep_slow_ref_sol: bool,
    pub accept: bool,
}

impl MergeDecision {
    pub fn label(&self) -> String {
        let verdict = if self.accept { "accept" } else { "reject" };
        let confidence = if self.confident { "" } else { ", not significant" };
        let keep = if self.can_keep_slow_ref_sol {
            ", reference entry is exact"
        } else {
            ""
        };
        format!(
            "{verdict}: {:.3}x (p={:.4}{confidence}{keep})",
            self.speedup, self.p_value
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub token: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub decisions: Vec<MergeDecision>,
    pub skipped: Vec<SkippedCandidate>,
}

impl Evaluation {
    pub fn accepted(&self) -> impl Iterator<Item = &MergeDecision> {
        self.decisions.iter().filter(|d| d.accept)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertionStep {
    pub token: String,
    pub key: String,
    /// Map the merge tool started from; `None` means an empty map.
    pub base: Option<PathBuf>,
    pub output: PathBuf,
    pub success: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Base map after the last step; `None` if nothing was ever written.
    pub final_map: Option<PathBuf>,
    pub steps: Vec<InsertionStep>,
}

impl MergeOutcome {
    pub fn inserted(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }
}

/// Everything the merge stage decided, persisted as `merge-report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub evaluation: Evaluation,
    pub outcome: MergeOutcome,
}

impl MergeReport {
    pub fn save(&self, path: &Path) -> Result<(), MergeError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e));
        json.and_then(|json| fs::write(path, json))
            .map_err(|source| MergeError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

// ─── Engine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    pub rider: PathBuf,
    pub merge_tool: PathBuf,
    /// Map the reference pass runs against; the library default otherwise.
    #[serde(default)]
    pub reference_map: Option<PathBuf>,
    pub ntrial: usize,
    #[serde(default)]
    pub device: Option<usize>,
}

/// Launch record for one insertion.
pub fn merge_tool_launch_config(
    tool: &Path,
    base: Option<&Path>,
    artifact: &Path,
    key: &str,
    output: &Path,
) -> LaunchConfig {
    let mut cfg = LaunchConfig::new(tool);
    if let Some(base) = base {
        cfg = cfg.arg("--base").arg(base.display().to_string());
    }
    cfg.arg("--new")
        .arg(artifact.display().to_string())
        .arg("--key")
        .arg(key)
        .arg("--output")
        .arg(output.display().to_string())
}

pub struct MergeEngine<L> {
    config: MergeConfig,
    launcher: L,
}

impl<L: Launcher> MergeEngine<L> {
    pub fn new(config: MergeConfig, launcher: L) -> Result<Self, MergeError> {
        require_executable(&config.rider)?;
        require_executable(&config.merge_tool)?;
        if config.ntrial == 0 {
            return Err(MergeError::Config("ntrial must be >= 1".into()));
        }
        if let Some(map) = &config.reference_map {
            if !map.is_file() {
                return Err(MergeError::Config(format!(
                    "reference map not found: {}",
                    map.display()
                )));
            }
        }
        Ok(Self { config, launcher })
    }

    /// Time every candidate against the reference map.
    pub fn evaluate(&self, input: &MergeInput) -> Evaluation {
        let mut evaluation = Evaluation::default();
        for entry in &input.entries {
            match self.evaluate_one(entry) {
                Ok(decision) => {
                    tracing::info!(token = %decision.token, verdict = %decision.label(), "evaluated");
                    evaluation.decisions.push(decision);
                }
                Err(reason) => {
                    tracing::warn!(token = %entry.token, reason = %reason, "candidate skipped");
                    evaluation.skipped.push(SkippedCandidate {
                        token: entry.token.clone(),
                        reason,
                    });
                }
            }
        }
        evaluation
    }

    fn evaluate_one(&self, entry: &CandidateArtifact) -> Result<MergeDecision, String> {
        if !entry.artifact.is_file() {
            return Err(format!("artifact missing: {}", entry.artifact.display()));
        }
        let problem = Problem::from_token(&entry.token).map_err(|e| e.to_string())?;

        let reference_source = match &self.config.reference_map {
            Some(map) => SolutionSource::Map(map.clone()),
            None => SolutionSource::Default,
        };
        let candidate_source = SolutionSource::Override {
            map: self.config.reference_map.clone(),
            candidate: entry.artifact.clone(),
        };

        let reference = self
            .measure(&problem, &reference_source)
            .map_err(|e| format!("reference pass failed: {e}"))?;
        let candidate = self
            .measure(&problem, &candidate_source)
            .map_err(|e| format!("candidate pass failed: {e}"))?;
        if candidate.solution.is_empty() {
            return Err("candidate pass matched no solution".into());
        }

        MergeRecord::new(&entry.token, &entry.artifact)
            .with_reference(reference)
            .with_candidate(candidate)
            .finalize()
            .map_err(|e| e.to_string())
    }

    fn measure(
        &self,
        problem: &Problem,
        solution: &SolutionSource,
    ) -> Result<Side, crate::rider::RiderError> {
        let request = RiderRequest {
            rider: &self.config.rider,
            problem,
            ntrial: self.config.ntrial,
            device: self.config.device,
            libraries: &[],
            solution,
        };
        let outcome = run_rider(&self.launcher, &request)?;
        Ok(Side {
            solution: outcome.solution.unwrap_or_else(SolutionMatch::none),
            times: outcome.timings.into_iter().next().unwrap_or_default(),
        })
    }

    /// Insert `accepted` decisions one after another, starting from `base`
    /// (an empty map when `None`). Intermediate maps land in `work_dir`.
    pub fn merge<'a, I>(
        &self,
        accepted: I,
        base: Option<&Path>,
        work_dir: &Path,
    ) -> Result<MergeOutcome, MergeError>
    where
        I: IntoIterator<Item = &'a MergeDecision>,
    {
        fs::create_dir_all(work_dir).map_err(|source| MergeError::Io {
            path: work_dir.to_path_buf(),
            source,
        })?;

        let initial = MergeOutcome {
            final_map: base.map(Path::to_path_buf),
            steps: Vec::new(),
        };
        let outcome = accepted
            .into_iter()
            .enumerate()
            .fold(initial, |mut acc, (i, decision)| {
                let output = work_dir.join(format!("solution-map.{i}.dat"));
                let step = self.insert(decision, acc.final_map.as_deref(), output);
                if step.success {
                    acc.final_map = Some(step.output.clone());
                }
                acc.steps.push(step);
                acc
            });

        tracing::info!(
            inserted = outcome.inserted(),
            failed = outcome.steps.len() - outcome.inserted(),
            "merge complete"
        );
        Ok(outcome)
    }

    fn insert(&self, decision: &MergeDecision, base: Option<&Path>, output: PathBuf) -> InsertionStep {
        let key = decision.candidate_solution.clone();
        let cfg = merge_tool_launch_config(
            &self.config.merge_tool,
            base,
            &decision.artifact,
            &key,
            &output,
        );
        let cleared = match fs::remove_file(&output) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(format!("cannot clear {}: {e}", output.display()))
            }
            _ => Ok(()),
        };
        let failure = match cleared.map(|()| self.launcher.launch(&cfg)) {
            Err(reason) => Some(reason),
            Ok(Ok(out)) if out.success() && output.is_file() => None,
            Ok(Ok(out)) if out.success() => Some("merge tool wrote no output".to_string()),
            Ok(Ok(out)) => Some(format!(
                "merge tool exited with {:?}: {}",
                out.code,
                out.stderr.trim()
            )),
            Ok(Err(e)) => Some(e.to_string()),
        };

        if let Some(reason) = &failure {
            let _ = fs::remove_file(&output);
            tracing::warn!(token = %decision.token, key = %key, reason = %reason, "insertion failed, keeping previous base");
        } else {
            tracing::debug!(token = %decision.token, output = %output.display(), "inserted");
        }

        InsertionStep {
            token: decision.token.clone(),
            key,
            base: base.map(Path::to_path_buf),
            output,
            success: failure.is_none(),
            reason: failure,
        }
    }
}
