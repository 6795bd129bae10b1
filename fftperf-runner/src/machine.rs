//! Machine-specification snapshot written into every run directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::launch::{LaunchConfig, Launcher};

pub const MACHINE_FILE: &str = "machine.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub cpus: usize,
    pub captured_at: NaiveDateTime,
    pub rider: PathBuf,
    pub libraries: Vec<PathBuf>,
    /// First line of `rider --version`, if the rider answers.
    pub rider_version: Option<String>,
}

impl MachineSpec {
    pub fn capture<L: Launcher + ?Sized>(launcher: &L, rider: &Path, libraries: &[PathBuf]) -> Self {
        let rider_version = launcher
            .launch(&LaunchConfig::new(rider).arg("--version"))
            .ok()
            .filter(|out| out.success())
            .and_then(|out| {
                out.stdout
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(String::from)
            });

        Self {
            hostname: hostname(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: std::thread::available_parallelism().map_or(1, |n| n.get()),
            captured_at: chrono::Local::now().naive_local(),
            rider: rider.to_path_buf(),
            libraries: libraries.to_vec(),
            rider_version,
        }
    }

    /// Write `{dir}/machine.json`.
    pub fn write(&self, dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(MACHINE_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

fn hostname() -> String {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}
