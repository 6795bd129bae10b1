//! Radix generator — power-of-radix lengths per axis.

use serde::{Deserialize, Serialize};

use super::{GeneratorError, ProblemGenerator};
use crate::problem::{Direction, FieldKind, Placement, Precision, Problem};

/// Inclusive length bounds for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthRange {
    pub min: usize,
    pub max: usize,
}

impl Default for LengthRange {
    fn default() -> Self {
        Self { min: 2, max: 1024 }
    }
}

/// Configuration for [`RadixGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadixSpec {
    pub radix: usize,
    /// Dimension counts to enumerate, in order (each in 1..=3).
    pub dimensions: Vec<usize>,
    pub x: LengthRange,
    pub y: LengthRange,
    pub z: LengthRange,
    pub batches: Vec<usize>,
    pub precisions: Vec<Precision>,
    pub fields: Vec<FieldKind>,
    pub directions: Vec<Direction>,
    pub placements: Vec<Placement>,
}

impl Default for RadixSpec {
    fn default() -> Self {
        Self {
            radix: 2,
            dimensions: vec![1],
            x: LengthRange::default(),
            y: LengthRange::default(),
            z: LengthRange::default(),
            batches: vec![1],
            precisions: vec![Precision::Single, Precision::Double],
            fields: FieldKind::ALL.to_vec(),
            directions: Direction::ALL.to_vec(),
            placements: Placement::ALL.to_vec(),
        }
    }
}

/// Enumerates every combination of power-of-radix axis lengths.
///
/// Nesting order (outermost first): dimension count, lengths (x outermost),
/// batch, precision, field, direction, placement.
#[derive(Debug, Clone)]
pub struct RadixGenerator {
    spec: RadixSpec,
}

impl RadixGenerator {
    pub fn new(spec: RadixSpec) -> Result<Self, GeneratorError> {
        if spec.radix < 2 {
            return Err(GeneratorError::InvalidRadix(spec.radix));
        }
        if spec.dimensions.is_empty() {
            return Err(GeneratorError::NoDimensions);
        }
        if let Some(&bad) = spec.dimensions.iter().find(|&&d| d == 0 || d > 3) {
            return Err(GeneratorError::InvalidDimension(bad));
        }
        if spec.batches.is_empty() || spec.batches.contains(&0) {
            return Err(GeneratorError::InvalidBatches);
        }
        let max_dim = spec.dimensions.iter().copied().max().unwrap_or(1);
        for (axis, range) in ['x', 'y', 'z'].into_iter().zip(spec.axes()).take(max_dim) {
            if range.min > range.max {
                return Err(GeneratorError::InvalidBounds {
                    axis,
                    min: range.min,
                    max: range.max,
                });
            }
        }
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &RadixSpec {
        &self.spec
    }

    /// Cartesian product of per-axis power sequences for `dim` axes.
    fn length_combinations(&self, dim: usize) -> Vec<Vec<usize>> {
        let mut combos: Vec<Vec<usize>> = vec![Vec::new()];
        for range in self.spec.axes().iter().take(dim) {
            let powers = radix_powers(self.spec.radix, range);
            combos = combos
                .iter()
                .flat_map(|prefix| {
                    powers.iter().map(move |&len| {
                        let mut next = prefix.clone();
                        next.push(len);
                        next
                    })
                })
                .collect();
        }
        combos
    }

    fn attribute_combinations(&self) -> Vec<(usize, Precision, FieldKind, Direction, Placement)> {
        let s = &self.spec;
        let mut combos = Vec::new();
        for &batch in &s.batches {
            for &precision in &s.precisions {
                for &field in &s.fields {
                    for &direction in &s.directions {
                        for &placement in &s.placements {
                            combos.push((batch, precision, field, direction, placement));
                        }
                    }
                }
            }
        }
        combos
    }
}

impl RadixSpec {
    fn axes(&self) -> [LengthRange; 3] {
        [self.x, self.y, self.z]
    }
}

impl ProblemGenerator for RadixGenerator {
    fn generate_problems(&self) -> Box<dyn Iterator<Item = Problem> + '_> {
        let attributes = self.attribute_combinations();
        Box::new(
            self.spec
                .dimensions
                .iter()
                .flat_map(move |&dim| self.length_combinations(dim))
                .flat_map(move |lengths| {
                    attributes.clone().into_iter().filter_map(
                        move |(batch, precision, field, direction, placement)| {
                            Problem::new(
                                lengths.clone(),
                                direction,
                                field,
                                placement,
                                precision,
                                batch,
                            )
                            .ok()
                        },
                    )
                }),
        )
    }
}

/// Powers `radix^k` (k >= 1) within `[range.min, range.max]`.
fn radix_powers(radix: usize, range: &LengthRange) -> Vec<usize> {
    let mut powers = Vec::new();
    let mut value = radix;
    while value < range.min {
        match value.checked_mul(radix) {
            Some(v) => value = v,
            None => return powers,
        }
    }
    while value <= range.max {
        powers.push(value);
        match value.checked_mul(radix) {
            Some(v) => value = v,
            None => break,
        }
    }
    powers
}
