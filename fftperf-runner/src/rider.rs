//! Rider protocol — how the external benchmark executable is driven and read.
//!
//! Invocation: `rider <problem flags> -N <ntrial> [--device d] [--lib p0 p1 ..]`.
//! The solution-map source travels in the child's environment
//! (`FFTPERF_SOLUTION_MAP`, `FFTPERF_SOLUTION_OVERRIDE`).
//!
//! Output lines the parser understands:
//! - `Execution gpu time: t0 t1 ... ms` — one line per library, in `--lib` order
//! - `Solution map entry: <token> (FULL|MINIMAL|NONE)` — which map entry served the run
//! - `SKIPPED: <reason>` — the rider declined the problem

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fftperf_core::Problem;

use crate::launch::{LaunchConfig, LaunchError, Launcher};

pub const SOLUTION_MAP_ENV: &str = "FFTPERF_SOLUTION_MAP";
pub const SOLUTION_OVERRIDE_ENV: &str = "FFTPERF_SOLUTION_OVERRIDE";

const TIME_PREFIX: &str = "Execution gpu time:";
const SOLUTION_PREFIX: &str = "Solution map entry:";
const SKIPPED_PREFIX: &str = "SKIPPED:";

// ─── Solution matches ────────────────────────────────────────────────

/// How specifically a solution-map entry matched the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchKind {
    /// Exact problem token.
    Full,
    /// Generalized entry that also serves other problems.
    Minimal,
    /// Nothing matched.
    None,
}

/// The solution-map entry that serviced a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionMatch {
    pub token: String,
    pub kind: MatchKind,
}

impl SolutionMatch {
    pub fn none() -> Self {
        Self {
            token: String::new(),
            kind: MatchKind::None,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.kind == MatchKind::Full
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }
}

/// Parse a `Solution map entry:` line.
pub fn parse_solution_line(line: &str) -> Option<SolutionMatch> {
    let rest = line.trim().strip_prefix(SOLUTION_PREFIX)?.trim();
    let (token, kind) = match rest.rfind('(') {
        Some(open) if rest.ends_with(')') => {
            let kind = match &rest[open + 1..rest.len() - 1] {
                "FULL" => MatchKind::Full,
                "MINIMAL" => MatchKind::Minimal,
                _ => MatchKind::None,
            };
            (rest[..open].trim(), kind)
        }
        _ => (rest, MatchKind::Minimal),
    };
    let kind = if token.is_empty() { MatchKind::None } else { kind };
    Some(SolutionMatch {
        token: token.to_string(),
        kind,
    })
}

/// Which solution map the rider should consult.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SolutionSource {
    /// Whatever the rider's library uses by default.
    #[default]
    Default,
    /// An explicit map file.
    Map(PathBuf),
    /// A map (optional) with one candidate artifact taking precedence.
    Override {
        map: Option<PathBuf>,
        candidate: PathBuf,
    },
}

// ─── Requests and outcomes ───────────────────────────────────────────

/// One rider invocation.
#[derive(Debug, Clone)]
pub struct RiderRequest<'a> {
    pub rider: &'a Path,
    pub problem: &'a Problem,
    pub ntrial: usize,
    pub device: Option<usize>,
    /// Empty: single default library. Non-empty: dynamic mode.
    pub libraries: &'a [PathBuf],
    pub solution: &'a SolutionSource,
}

impl RiderRequest<'_> {
    pub fn expected_timing_lines(&self) -> usize {
        self.libraries.len().max(1)
    }

    pub fn launch_config(&self) -> LaunchConfig {
        let mut cfg = LaunchConfig::new(self.rider)
            .args(self.problem.rider_args())
            .arg("-N")
            .arg(self.ntrial.to_string());
        if let Some(device) = self.device {
            cfg = cfg.arg("--device").arg(device.to_string());
        }
        if !self.libraries.is_empty() {
            cfg = cfg
                .arg("--lib")
                .args(self.libraries.iter().map(|l| l.display().to_string()));
        }
        match self.solution {
            SolutionSource::Default => {}
            SolutionSource::Map(map) => {
                cfg = cfg.env(SOLUTION_MAP_ENV, map.display().to_string());
            }
            SolutionSource::Override { map, candidate } => {
                if let Some(map) = map {
                    cfg = cfg.env(SOLUTION_MAP_ENV, map.display().to_string());
                }
                cfg = cfg.env(SOLUTION_OVERRIDE_ENV, candidate.display().to_string());
            }
        }
        cfg
    }
}

/// Parsed rider output.
#[derive(Debug, Clone, PartialEq)]
pub struct RiderOutcome {
    /// One timing vector per library.
    pub timings: Vec<Vec<f64>>,
    pub solution: Option<SolutionMatch>,
}

#[derive(Debug, Error)]
pub enum RiderError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("rider exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("rider skipped the problem: {0}")]
    Skipped(String),
    #[error("malformed rider output: {0}")]
    Malformed(String),
}

/// Parse rider stdout, expecting `expected` timing lines.
pub fn parse_rider_output(stdout: &str, expected: usize) -> Result<RiderOutcome, RiderError> {
    let mut timings = Vec::new();
    let mut solution = None;

    for line in stdout.lines() {
        let line = line.trim();
        if let Some(reason) = line.strip_prefix(SKIPPED_PREFIX) {
            return Err(RiderError::Skipped(reason.trim().to_string()));
        }
        if let Some(values) = line.strip_prefix(TIME_PREFIX) {
            timings.push(parse_times(values)?);
        } else if let Some(m) = parse_solution_line(line) {
            solution = Some(m);
        }
    }

    if timings.len() != expected {
        return Err(RiderError::Malformed(format!(
            "expected {expected} timing line(s), found {}",
            timings.len()
        )));
    }

    Ok(RiderOutcome { timings, solution })
}

fn parse_times(values: &str) -> Result<Vec<f64>, RiderError> {
    let times = values
        .split_whitespace()
        .filter(|v| *v != "ms")
        .map(|v| match v.parse::<f64>() {
            Ok(t) if t.is_finite() && t >= 0.0 => Ok(t),
            _ => Err(RiderError::Malformed(format!("bad timing value '{v}'"))),
        })
        .collect::<Result<Vec<f64>, _>>()?;
    if times.is_empty() {
        return Err(RiderError::Malformed("timing line has no values".into()));
    }
    Ok(times)
}

/// Invoke the rider once and parse its output.
pub fn run_rider<L: Launcher + ?Sized>(
    launcher: &L,
    request: &RiderRequest<'_>,
) -> Result<RiderOutcome, RiderError> {
    let output = launcher.launch(&request.launch_config())?;
    if !output.success() {
        return Err(RiderError::Failed {
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    parse_rider_output(&output.stdout, request.expected_timing_lines())
}
