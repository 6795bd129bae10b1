//! Attribute filter over any problem generator.

use serde::{Deserialize, Serialize};

use super::ProblemGenerator;
use crate::problem::{Direction, FieldKind, Placement, Precision, Problem};

/// Allow-sets per attribute. An empty set places no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemFilter {
    pub directions: Vec<Direction>,
    pub placements: Vec<Placement>,
    pub fields: Vec<FieldKind>,
    pub precisions: Vec<Precision>,
    pub dimensions: Vec<usize>,
}

fn allowed<T: PartialEq>(set: &[T], value: &T) -> bool {
    set.is_empty() || set.contains(value)
}

impl ProblemFilter {
    pub fn accepts(&self, problem: &Problem) -> bool {
        allowed(&self.directions, &problem.direction())
            && allowed(&self.placements, &problem.placement())
            && allowed(&self.fields, &problem.field())
            && allowed(&self.precisions, &problem.precision())
            && allowed(&self.dimensions, &problem.dimension())
    }

    /// Wrap `inner`; the result is itself a generator.
    pub fn wrap<G: ProblemGenerator>(self, inner: G) -> Filtered<G> {
        Filtered {
            inner,
            filter: self,
        }
    }
}

/// A generator narrowed by a [`ProblemFilter`].
#[derive(Debug, Clone)]
pub struct Filtered<G> {
    inner: G,
    filter: ProblemFilter,
}

impl<G> Filtered<G> {
    pub fn filter(&self) -> &ProblemFilter {
        &self.filter
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G: ProblemGenerator> ProblemGenerator for Filtered<G> {
    fn generate_problems(&self) -> Box<dyn Iterator<Item = Problem> + '_> {
        Box::new(
            self.inner
                .generate_problems()
                .filter(move |p| self.filter.accepts(p)),
        )
    }
}
