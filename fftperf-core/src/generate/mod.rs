//! Problem generators — lazily enumerate the benchmark problem space.
//!
//! Two sources:
//! - [`RadixGenerator`]: powers of a radix per axis, crossed with batches and
//!   transform attributes.
//! - [`SuiteGenerator`]: an explicitly authored list loaded from a TOML file.
//!
//! [`Filtered`] wraps any generator and narrows it with a [`ProblemFilter`].
//! Every generator is restartable: each `generate_problems()` call derives the
//! same ordered sequence from configuration.

pub mod filter;
pub mod radix;
pub mod suite;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::problem::{Problem, ProblemError};

pub use filter::{Filtered, ProblemFilter};
pub use radix::{LengthRange, RadixGenerator, RadixSpec};
pub use suite::{SuiteFile, SuiteGenerator, SuiteProblem, SuiteSpec};

/// A restartable, finite source of problems.
pub trait ProblemGenerator {
    fn generate_problems(&self) -> Box<dyn Iterator<Item = Problem> + '_>;
}

impl<G: ProblemGenerator + ?Sized> ProblemGenerator for Box<G> {
    fn generate_problems(&self) -> Box<dyn Iterator<Item = Problem> + '_> {
        (**self).generate_problems()
    }
}

/// Errors raised while configuring a generator. All of them are
/// configuration failures: nothing has been measured yet.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("radix must be >= 2, got {0}")]
    InvalidRadix(usize),
    #[error("dimension {0} is outside 1..=3")]
    InvalidDimension(usize),
    #[error("no dimensions requested")]
    NoDimensions,
    #[error("invalid bounds on axis {axis}: min {min} > max {max}")]
    InvalidBounds { axis: char, min: usize, max: usize },
    #[error("batch list is empty or contains zero")]
    InvalidBatches,
    #[error("failed to read suite file {path}: {source}")]
    SuiteRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse suite file {path}: {reason}")]
    SuiteParse { path: PathBuf, reason: String },
    #[error("suite '{name}' not found in {path} (available: {available})")]
    SuiteNotFound {
        name: String,
        path: PathBuf,
        available: String,
    },
    #[error("invalid problem in suite '{suite}': {source}")]
    SuiteProblem {
        suite: String,
        #[source]
        source: ProblemError,
    },
}

/// Serializable generator selection used by run configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorSpec {
    Radix(RadixSpec),
    Suite { file: PathBuf, name: String },
}

impl GeneratorSpec {
    /// Build the configured generator, validating it up front.
    pub fn build(&self) -> Result<Box<dyn ProblemGenerator>, GeneratorError> {
        match self {
            GeneratorSpec::Radix(spec) => Ok(Box::new(RadixGenerator::new(spec.clone())?)),
            GeneratorSpec::Suite { file, name } => Ok(Box::new(SuiteGenerator::load(file, name)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radix_spec_from_toml() {
        let spec: GeneratorSpec = toml::from_str(
            r#"
type = "radix"
radix = 2
dimensions = [1]
batches = [1]
[x]
min = 4
max = 16
"#,
        )
        .unwrap();
        let generator = spec.build().unwrap();
        let sizes: Vec<usize> = generator.generate_problems().map(|p| p.size()).collect();
        assert!(sizes.contains(&4));
        assert!(sizes.contains(&16));
        assert!(!sizes.contains(&32));
    }

    #[test]
    fn boxed_generator_is_a_generator() {
        let spec = GeneratorSpec::Radix(RadixSpec::default());
        let boxed = spec.build().unwrap();
        let filtered = ProblemFilter::default().wrap(boxed);
        assert!(filtered.generate_problems().next().is_some());
    }
}
