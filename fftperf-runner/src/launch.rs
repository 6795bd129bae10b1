//! Subprocess launch seam.
//!
//! Every external executable (rider, tuner, merge tool) is described by an
//! explicit [`LaunchConfig`] record. [`ProcessLauncher`] maps the record onto
//! `std::process::Command` at the call boundary only: environment variables
//! are set on the child, never on this process, so two differently configured
//! invocations cannot leak settings into each other. Protocol variables
//! (`FFTPERF_*`) inherited from the parent are removed unless the record sets
//! them, so the record is a child's only configuration.
//!
//! The [`Launcher`] trait lets tests substitute scripted executables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Prefix shared by every variable of the rider, tuner and merge-tool protocol.
pub const PROTOCOL_ENV_PREFIX: &str = "FFTPERF_";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("executable not found: {0}")]
    MissingExecutable(PathBuf),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything needed to start one subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Child-only environment overrides.
    pub env: BTreeMap<String, String>,
}

impl LaunchConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<String> = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        parts.push(self.program.display().to_string());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl LaunchOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a subprocess to completion. Implementations block until it exits.
pub trait Launcher {
    fn launch(&self, config: &LaunchConfig) -> Result<LaunchOutput, LaunchError>;
}

impl<L: Launcher + ?Sized> Launcher for &L {
    fn launch(&self, config: &LaunchConfig) -> Result<LaunchOutput, LaunchError> {
        (**self).launch(config)
    }
}

/// Launcher backed by real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, config: &LaunchConfig) -> Result<LaunchOutput, LaunchError> {
        tracing::debug!(command = %config.command_line(), "launching");
        let mut command = Command::new(&config.program);
        command.args(&config.args);
        for (key, _) in std::env::vars_os() {
            let inherited = key
                .to_str()
                .is_some_and(|k| k.starts_with(PROTOCOL_ENV_PREFIX) && !config.env.contains_key(k));
            if inherited {
                command.env_remove(&key);
            }
        }
        let output = command
            .envs(&config.env)
            .output()
            .map_err(|source| LaunchError::Spawn {
                program: config.program.clone(),
                source,
            })?;
        Ok(LaunchOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Configuration check: `path` must name an existing file.
pub fn require_executable(path: &Path) -> Result<(), LaunchError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(LaunchError::MissingExecutable(path.to_path_buf()))
    }
}
