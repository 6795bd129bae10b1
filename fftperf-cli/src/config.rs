//! Run configuration files for `fftperf run` and `fftperf tune --config`.
//!
//! ```toml
//! output_dirs = ["runs/nightly"]
//! caption = "nightly"
//!
//! [rider]
//! path = "/opt/fft/bin/rider"
//! ntrial = 10
//!
//! [generator]
//! type = "radix"
//! radix = 2
//! x = { min = 8, max = 4096 }
//!
//! [filter]
//! precisions = ["single"]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use fftperf_core::{Filtered, GeneratorSpec, ProblemFilter, ProblemGenerator};
use fftperf_runner::TimerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderSection {
    pub path: PathBuf,
    #[serde(default)]
    pub libraries: Vec<PathBuf>,
    #[serde(default = "default_ntrial")]
    pub ntrial: usize,
    #[serde(default)]
    pub device: Option<usize>,
}

fn default_ntrial() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFileConfig {
    pub rider: RiderSection,
    pub generator: GeneratorSpec,
    #[serde(default)]
    pub filter: ProblemFilter,
    #[serde(default)]
    pub output_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub caption: String,
}

impl RunFileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading run config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing run config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The filtered problem generator, validated.
    pub fn generator(&self) -> Result<Filtered<Box<dyn ProblemGenerator>>> {
        let inner = self.generator.build().context("building problem generator")?;
        Ok(self.filter.clone().wrap(inner))
    }

    pub fn timer_config(&self) -> TimerConfig {
        TimerConfig {
            rider: self.rider.path.clone(),
            libraries: self.rider.libraries.clone(),
            output_dirs: self.output_dirs.clone(),
            ntrial: self.rider.ntrial,
            device: self.rider.device,
            caption: self.caption.clone(),
        }
    }
}
