//! fftperf core — problem model, problem generators, sample stores, runs.
//!
//! This crate holds the data side of the benchmarking engine:
//! - `Problem` values and their canonical tokens
//! - Radix and suite generators, and the attribute filter that wraps them
//! - `SampleStore` datasets and their `.dat` file format
//! - `Run` directories grouping the stores of one timing pass

pub mod dat;
pub mod generate;
pub mod problem;
pub mod run;

pub use dat::{DatError, DatMeta, Sample, SampleStore};
pub use generate::{
    Filtered, GeneratorError, GeneratorSpec, LengthRange, ProblemFilter, ProblemGenerator,
    RadixGenerator, RadixSpec, SuiteGenerator,
};
pub use problem::{Direction, FieldKind, Placement, Precision, Problem, ProblemError};
pub use run::{Run, RunError};
