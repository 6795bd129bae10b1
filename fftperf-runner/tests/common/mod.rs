//! Scripted stand-ins for the rider, tuner and merge tool.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fftperf_runner::launch::{LaunchConfig, LaunchError, LaunchOutput, Launcher};

type Script = dyn Fn(&LaunchConfig) -> LaunchOutput + Send + Sync;

/// Answers every launch with a scripted output and records the request.
pub struct ScriptedLauncher {
    script: Box<Script>,
    calls: Mutex<Vec<LaunchConfig>>,
}

impl ScriptedLauncher {
    pub fn new(script: impl Fn(&LaunchConfig) -> LaunchOutput + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<LaunchConfig> {
        self.calls.lock().unwrap().clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, config: &LaunchConfig) -> Result<LaunchOutput, LaunchError> {
        self.calls.lock().unwrap().push(config.clone());
        Ok((self.script)(config))
    }
}

pub fn ok(stdout: impl Into<String>) -> LaunchOutput {
    LaunchOutput {
        code: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

pub fn fail(code: i32, stderr: &str) -> LaunchOutput {
    LaunchOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

pub fn timing_line(times: &[f64]) -> String {
    let values: Vec<String> = times.iter().map(|t| t.to_string()).collect();
    format!("Execution gpu time: {} ms\n", values.join(" "))
}

/// Value following `flag` in the argument list.
pub fn flag_value<'a>(config: &'a LaunchConfig, flag: &str) -> Option<&'a str> {
    config
        .args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| config.args.get(i + 1))
        .map(String::as_str)
}

pub fn is_version_probe(config: &LaunchConfig) -> bool {
    config.args == ["--version"]
}

/// Create an empty file standing in for an executable.
pub fn fake_executable(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\n").unwrap();
    path
}

/// `n` samples spread slightly above `center`.
pub fn spread(center: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| center + i as f64 * 0.001).collect()
}
