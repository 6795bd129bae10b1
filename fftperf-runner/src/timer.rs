//! Timer — repeated rider measurement across a problem sequence.
//!
//! Problems run strictly one after another, one subprocess at a time. A
//! failing problem is recorded and skipped; it never aborts the pass.
//!
//! Output layout, per library target:
//! - `{output_dir}/machine.json` — written before the first measurement
//! - `{output_dir}/{family}.dat` — one store per transform family, rewritten
//!   after every problem so an interrupted pass keeps what it measured

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fftperf_core::{DatError, DatMeta, Problem, SampleStore};

use crate::launch::{require_executable, LaunchError, Launcher};
use crate::machine::MachineSpec;
use crate::rider::{run_rider, RiderRequest, SolutionSource};

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    pub rider: PathBuf,
    /// Empty: single default library. Non-empty: dynamic mode.
    #[serde(default)]
    pub libraries: Vec<PathBuf>,
    /// One output directory per library target.
    pub output_dirs: Vec<PathBuf>,
    #[serde(default = "default_ntrial")]
    pub ntrial: usize,
    #[serde(default)]
    pub device: Option<usize>,
    #[serde(default)]
    pub caption: String,
}

fn default_ntrial() -> usize {
    10
}

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("invalid timer configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("failed to write machine snapshot to {path}: {source}")]
    Machine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Dat(#[from] DatError),
}

// ─── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementFailure {
    pub token: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingReport {
    pub measured: usize,
    pub failures: Vec<MeasurementFailure>,
}

impl TimingReport {
    pub fn attempted(&self) -> usize {
        self.measured + self.failures.len()
    }
}

// ─── Timer ───────────────────────────────────────────────────────────

pub struct Timer<L> {
    config: TimerConfig,
    launcher: L,
}

impl<L: Launcher> Timer<L> {
    /// Validate the configuration. Any problem here is fatal and happens
    /// before a single measurement.
    pub fn new(config: TimerConfig, launcher: L) -> Result<Self, TimerError> {
        require_executable(&config.rider)?;
        if config.ntrial == 0 {
            return Err(TimerError::Config("ntrial must be >= 1".into()));
        }
        let targets = config.libraries.len().max(1);
        if config.output_dirs.len() != targets {
            return Err(TimerError::Config(format!(
                "{} library target(s) need {} output director{}, got {}",
                targets,
                targets,
                if targets == 1 { "y" } else { "ies" },
                config.output_dirs.len()
            )));
        }
        Ok(Self { config, launcher })
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Measure every problem in order and populate one store per family in
    /// each output directory.
    pub fn run<I>(&self, problems: I) -> Result<TimingReport, TimerError>
    where
        I: IntoIterator<Item = Problem>,
    {
        let cfg = &self.config;
        let spec = MachineSpec::capture(&self.launcher, &cfg.rider, &cfg.libraries);
        for dir in &cfg.output_dirs {
            spec.write(dir).map_err(|source| TimerError::Machine {
                path: dir.clone(),
                source,
            })?;
        }

        let mut stores: Vec<BTreeMap<String, SampleStore>> =
            vec![BTreeMap::new(); cfg.output_dirs.len()];
        let mut report = TimingReport::default();
        let solution = SolutionSource::Default;

        for problem in problems {
            let token = problem.token();
            let request = RiderRequest {
                rider: &cfg.rider,
                problem: &problem,
                ntrial: cfg.ntrial,
                device: cfg.device,
                libraries: &cfg.libraries,
                solution: &solution,
            };

            let outcome = match run_rider(&self.launcher, &request) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(token = %token, error = %err, "measurement failed, skipping");
                    report.failures.push(MeasurementFailure {
                        token,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let family = problem.family();
            for (target, times) in outcome.timings.iter().enumerate() {
                let store = stores[target]
                    .entry(family.clone())
                    .or_insert_with(|| SampleStore::new(family.clone(), self.store_meta(&family, target)));
                store.append(&problem, times);
                store.write(&cfg.output_dirs[target])?;
            }
            tracing::debug!(token = %token, trials = cfg.ntrial, "measured");
            report.measured += 1;
        }

        tracing::info!(
            measured = report.measured,
            failed = report.failures.len(),
            "timing pass complete"
        );
        Ok(report)
    }

    fn store_meta(&self, family: &str, target: usize) -> DatMeta {
        let mut meta = DatMeta::titled(family);
        meta.caption = self.config.caption.clone();
        meta.figure.insert("kind".into(), "time".into());
        let library = self
            .config
            .libraries
            .get(target)
            .map_or_else(|| "default".to_string(), |l| l.display().to_string());
        meta.figure.insert("library".into(), library);
        meta
    }
}
