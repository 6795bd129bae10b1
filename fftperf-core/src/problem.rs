//! Problem model — one benchmark case and its canonical token.
//!
//! A `Problem` is an immutable value. Its token encodes every field and is
//! the join key used across runs:
//!
//! `{field}_{direction}_len_{l0}[_{l1}[_{l2}]]_{precision}_{ip|op}_batch_{n}`
//!
//! e.g. `complex_forward_len_64_128_single_ip_batch_1`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of transform dimensions.
pub const MAX_DIMENSIONS: usize = 3;

// ─── Attributes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Inverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Complex,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    InPlace,
    OutOfPlace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Half,
    Single,
    Double,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Forward, Direction::Inverse];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Inverse => "inverse",
        }
    }
}

impl FieldKind {
    pub const ALL: [FieldKind; 2] = [FieldKind::Complex, FieldKind::Real];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Complex => "complex",
            FieldKind::Real => "real",
        }
    }
}

impl Placement {
    pub const ALL: [Placement; 2] = [Placement::InPlace, Placement::OutOfPlace];

    /// Short token form: `ip` / `op`.
    pub fn as_str(self) -> &'static str {
        match self {
            Placement::InPlace => "ip",
            Placement::OutOfPlace => "op",
        }
    }
}

impl Precision {
    pub const ALL: [Precision; 3] = [Precision::Half, Precision::Single, Precision::Double];

    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Half => "half",
            Precision::Single => "single",
            Precision::Double => "double",
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProblemError {
    #[error("problem needs at least one length")]
    EmptyLengths,
    #[error("{0} dimensions requested, at most {MAX_DIMENSIONS} supported")]
    TooManyDimensions(usize),
    #[error("transform lengths must be >= 1")]
    ZeroLength,
    #[error("batch count must be >= 1")]
    ZeroBatch,
    #[error("problem size overflows: lengths {lengths:?} with batch {batch}")]
    TooLarge { lengths: Vec<usize>, batch: usize },
    #[error("cannot parse problem token '{token}': {reason}")]
    BadToken { token: String, reason: String },
}

// ─── Problem ─────────────────────────────────────────────────────────

/// One benchmark case.
///
/// Serializes as its token, so stored problems always round-trip through
/// `Problem::from_token` validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Problem {
    lengths: Vec<usize>,
    direction: Direction,
    field: FieldKind,
    placement: Placement,
    precision: Precision,
    batch: usize,
}

impl Problem {
    pub fn new(
        lengths: Vec<usize>,
        direction: Direction,
        field: FieldKind,
        placement: Placement,
        precision: Precision,
        batch: usize,
    ) -> Result<Self, ProblemError> {
        if lengths.is_empty() {
            return Err(ProblemError::EmptyLengths);
        }
        if lengths.len() > MAX_DIMENSIONS {
            return Err(ProblemError::TooManyDimensions(lengths.len()));
        }
        if lengths.iter().any(|&l| l == 0) {
            return Err(ProblemError::ZeroLength);
        }
        if batch == 0 {
            return Err(ProblemError::ZeroBatch);
        }
        let elements = lengths
            .iter()
            .try_fold(batch, |acc, &l| acc.checked_mul(l));
        if elements.is_none() {
            return Err(ProblemError::TooLarge { lengths, batch });
        }
        Ok(Self {
            lengths,
            direction,
            field,
            placement,
            precision,
            batch,
        })
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn dimension(&self) -> usize {
        self.lengths.len()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn field(&self) -> FieldKind {
        self.field
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Product of the transform lengths. All report ordering uses this.
    /// `new` guarantees it fits, batch included.
    pub fn size(&self) -> usize {
        self.lengths.iter().product()
    }

    /// Total scalar elements transformed (size times batch).
    pub fn element_count(&self) -> usize {
        self.size() * self.batch
    }

    /// Nominal floating-point operation count: `5 N log2(N)` per complex
    /// transform, half of that for real transforms.
    pub fn flop_count(&self) -> f64 {
        let n = self.size() as f64;
        let per_transform = if n > 1.0 { 5.0 * n * n.log2() } else { 0.0 };
        let scale = match self.field {
            FieldKind::Complex => 1.0,
            FieldKind::Real => 0.5,
        };
        per_transform * scale * self.batch as f64
    }

    /// Canonical token. Equal tokens mean the same problem.
    pub fn token(&self) -> String {
        let lengths: Vec<String> = self.lengths.iter().map(|l| l.to_string()).collect();
        format!(
            "{}_{}_len_{}_{}_{}_batch_{}",
            self.field.as_str(),
            self.direction.as_str(),
            lengths.join("_"),
            self.precision.as_str(),
            self.placement.as_str(),
            self.batch
        )
    }

    /// Parse a token produced by [`Problem::token`].
    pub fn from_token(token: &str) -> Result<Self, ProblemError> {
        let bad = |reason: &str| ProblemError::BadToken {
            token: token.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = token.trim().split('_').collect();
        // field, direction, "len", >=1 length, precision, placement, "batch", n
        if parts.len() < 8 {
            return Err(bad("too few fields"));
        }

        let field = match parts[0] {
            "complex" => FieldKind::Complex,
            "real" => FieldKind::Real,
            other => return Err(bad(&format!("unknown field kind '{other}'"))),
        };
        let direction = match parts[1] {
            "forward" => Direction::Forward,
            "inverse" => Direction::Inverse,
            other => return Err(bad(&format!("unknown direction '{other}'"))),
        };
        if parts[2] != "len" {
            return Err(bad("expected 'len'"));
        }

        let tail = parts.len() - 4;
        if parts[tail + 2] != "batch" {
            return Err(bad("expected 'batch'"));
        }
        let lengths = parts[3..tail]
            .iter()
            .map(|p| p.parse::<usize>().map_err(|_| bad(&format!("bad length '{p}'"))))
            .collect::<Result<Vec<_>, _>>()?;
        let precision = match parts[tail] {
            "half" => Precision::Half,
            "single" => Precision::Single,
            "double" => Precision::Double,
            other => return Err(bad(&format!("unknown precision '{other}'"))),
        };
        let placement = match parts[tail + 1] {
            "ip" => Placement::InPlace,
            "op" => Placement::OutOfPlace,
            other => return Err(bad(&format!("unknown placement '{other}'"))),
        };
        let batch = parts[tail + 3]
            .parse::<usize>()
            .map_err(|_| bad("bad batch count"))?;

        Self::new(lengths, direction, field, placement, precision, batch)
    }

    /// Dataset name shared by every problem of one transform family,
    /// e.g. `2D_complex_forward_single_ip`.
    pub fn family(&self) -> String {
        format!(
            "{}D_{}_{}_{}_{}",
            self.dimension(),
            self.field.as_str(),
            self.direction.as_str(),
            self.precision.as_str(),
            self.placement.as_str()
        )
    }

    /// Short display label, e.g. `64x128 b1`.
    pub fn label(&self) -> String {
        let lengths: Vec<String> = self.lengths.iter().map(|l| l.to_string()).collect();
        format!("{} b{}", lengths.join("x"), self.batch)
    }

    /// Transform-type code understood by the rider and tuner.
    pub fn transform_type(&self) -> u8 {
        match (self.field, self.direction) {
            (FieldKind::Complex, Direction::Forward) => 0,
            (FieldKind::Complex, Direction::Inverse) => 1,
            (FieldKind::Real, Direction::Forward) => 2,
            (FieldKind::Real, Direction::Inverse) => 3,
        }
    }

    /// Discrete command-line flags describing this problem.
    pub fn rider_args(&self) -> Vec<String> {
        let mut args = vec!["--length".to_string()];
        args.extend(self.lengths.iter().map(|l| l.to_string()));
        args.push("-t".into());
        args.push(self.transform_type().to_string());
        args.push("--precision".into());
        args.push(self.precision.as_str().into());
        args.push("-b".into());
        args.push(self.batch.to_string());
        if self.placement == Placement::OutOfPlace {
            args.push("-o".into());
        }
        args
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for Problem {
    type Err = ProblemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s)
    }
}

impl From<Problem> for String {
    fn from(problem: Problem) -> Self {
        problem.token()
    }
}

impl TryFrom<String> for Problem {
    type Error = ProblemError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_token(&value)
    }
}
