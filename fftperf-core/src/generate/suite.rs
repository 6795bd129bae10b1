//! Suite generator — named, explicitly authored problem lists.
//!
//! Suites live in a TOML file:
//!
//! ```toml
//! [[suite]]
//! name = "qa_prime"
//! tokens = ["complex_forward_len_7_single_ip_batch_1"]
//!
//! [[suite.problem]]
//! lengths = [128, 128]
//! precision = "double"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{GeneratorError, ProblemGenerator};
use crate::problem::{Direction, FieldKind, Placement, Precision, Problem};

/// Whole suite file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteFile {
    #[serde(default, rename = "suite")]
    pub suites: Vec<SuiteSpec>,
}

/// One named suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default, rename = "problem")]
    pub problems: Vec<SuiteProblem>,
}

/// A problem written out field by field. Omitted attributes take the most
/// common defaults (complex forward, in-place, single precision, batch 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteProblem {
    pub lengths: Vec<usize>,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    #[serde(default = "default_field")]
    pub field: FieldKind,
    #[serde(default = "default_placement")]
    pub placement: Placement,
    #[serde(default = "default_precision")]
    pub precision: Precision,
    #[serde(default = "default_batch")]
    pub batch: usize,
}

fn default_direction() -> Direction {
    Direction::Forward
}

fn default_field() -> FieldKind {
    FieldKind::Complex
}

fn default_placement() -> Placement {
    Placement::InPlace
}

fn default_precision() -> Precision {
    Precision::Single
}

fn default_batch() -> usize {
    1
}

impl SuiteFile {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, GeneratorError> {
        toml::from_str(content).map_err(|e| GeneratorError::SuiteParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.suites.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Pure lookup: yields the problems of one suite, tokens first, then tables.
#[derive(Debug, Clone)]
pub struct SuiteGenerator {
    name: String,
    problems: Vec<Problem>,
}

impl SuiteGenerator {
    /// Load suite `name` from `path`. Every problem is validated here so a
    /// bad suite fails before anything runs.
    pub fn load(path: &Path, name: &str) -> Result<Self, GeneratorError> {
        let content = fs::read_to_string(path).map_err(|source| GeneratorError::SuiteRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file = SuiteFile::from_toml(&content, path)?;
        let spec = file
            .suites
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| GeneratorError::SuiteNotFound {
                name: name.to_string(),
                path: path.to_path_buf(),
                available: file.names().join(", "),
            })?;
        Self::from_spec(spec)
    }

    pub fn from_spec(spec: &SuiteSpec) -> Result<Self, GeneratorError> {
        let wrap = |source| GeneratorError::SuiteProblem {
            suite: spec.name.clone(),
            source,
        };

        let mut problems = Vec::with_capacity(spec.tokens.len() + spec.problems.len());
        for token in &spec.tokens {
            problems.push(Problem::from_token(token).map_err(wrap)?);
        }
        for p in &spec.problems {
            let problem = Problem::new(
                p.lengths.clone(),
                p.direction,
                p.field,
                p.placement,
                p.precision,
                p.batch,
            )
            .map_err(wrap)?;
            problems.push(problem);
        }

        Ok(Self {
            name: spec.name.clone(),
            problems,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

impl ProblemGenerator for SuiteGenerator {
    fn generate_problems(&self) -> Box<dyn Iterator<Item = Problem> + '_> {
        Box::new(self.problems.iter().cloned())
    }
}
