//! Sample stores — one named dataset of problem → timing samples.
//!
//! On disk a store is a `{name}.dat` file:
//!
//! ```text
//! # meta: {"title":"1D_complex_forward_single_ip","caption":"","figure":{}}
//! complex_forward_len_8_single_ip_batch_1	8 b1	8	8	3	0.011	0.012	0.010
//! ```
//!
//! Rows are tab separated (`token label size elements nsample t0 t1 ...`) and
//! always written in ascending size order. Derived tables written through
//! [`write_table`] share the same meta header so metadata propagates.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::problem::Problem;

/// Prefix of the metadata comment line.
pub const META_PREFIX: &str = "# meta: ";

/// Prefix of the column-name comment line in derived tables.
pub const COLUMNS_PREFIX: &str = "# columns: ";

#[derive(Debug, Error)]
pub enum DatError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error in {path}: {reason}")]
    Csv { path: PathBuf, reason: String },
    #[error("bad metadata in {path}: {reason}")]
    Meta { path: PathBuf, reason: String },
    #[error("bad row {line} in {path}: {reason}")]
    Row {
        path: PathBuf,
        line: u64,
        reason: String,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> DatError + '_ {
    move |source| DatError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Free-form metadata carried unchanged from raw store to every derived file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatMeta {
    pub title: String,
    #[serde(default)]
    pub caption: String,
    /// Figure-kind hints for whatever renders these files.
    #[serde(default)]
    pub figure: BTreeMap<String, String>,
}

impl DatMeta {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Timing samples for one problem in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub token: String,
    pub label: String,
    pub size: usize,
    pub elements: usize,
    /// Raw per-trial times in milliseconds.
    pub times: Vec<f64>,
}

/// One named dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStore {
    name: String,
    meta: DatMeta,
    samples: BTreeMap<String, Sample>,
}

impl SampleStore {
    pub fn new(name: impl Into<String>, meta: DatMeta) -> Self {
        Self {
            name: name.into(),
            meta,
            samples: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &DatMeta {
        &self.meta
    }

    pub fn file_name(&self) -> String {
        format!("{}.dat", self.name)
    }

    /// Append timings for `problem`. Existing samples are only extended.
    pub fn append(&mut self, problem: &Problem, times: &[f64]) {
        let token = problem.token();
        self.samples
            .entry(token.clone())
            .or_insert_with(|| Sample {
                token,
                label: problem.label(),
                size: problem.size(),
                elements: problem.element_count(),
                times: Vec::new(),
            })
            .times
            .extend_from_slice(times);
    }

    pub fn get(&self, token: &str) -> Option<&Sample> {
        self.samples.get(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.samples.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(|k| k.as_str())
    }

    /// Samples ordered by ascending problem size (token breaks ties).
    pub fn sorted(&self) -> Vec<&Sample> {
        let mut samples: Vec<&Sample> = self.samples.values().collect();
        samples.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.token.cmp(&b.token)));
        samples
    }

    /// Write `{dir}/{name}.dat` atomically and return its path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, DatError> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let path = dir.join(self.file_name());
        let rows = self.sorted().into_iter().map(|s| {
            let mut row = vec![
                s.token.clone(),
                s.label.clone(),
                s.size.to_string(),
                s.elements.to_string(),
                s.times.len().to_string(),
            ];
            row.extend(s.times.iter().map(|t| t.to_string()));
            row
        });
        write_table(&path, &self.meta, None, rows)?;
        Ok(path)
    }

    /// Read a store; its name is the file stem.
    pub fn read(path: &Path) -> Result<Self, DatError> {
        let content = fs::read_to_string(path).map_err(io_err(path))?;
        Self::parse(path, &content)
    }

    /// Parse the content of the raw store at `path`.
    pub fn parse(path: &Path, content: &str) -> Result<Self, DatError> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let meta = read_meta(content, path)?;
        let mut store = SampleStore::new(name, meta);

        for (line, record) in read_rows(content, path)? {
            let row_err = |reason: String| DatError::Row {
                path: path.to_path_buf(),
                line,
                reason,
            };
            if record.len() < 5 {
                return Err(row_err(format!("expected >= 5 fields, got {}", record.len())));
            }
            let parse_usize = |i: usize, what: &str| {
                record[i]
                    .parse::<usize>()
                    .map_err(|_| row_err(format!("bad {what} '{}'", record[i])))
            };
            let size = parse_usize(2, "size")?;
            let elements = parse_usize(3, "element count")?;
            let nsample = parse_usize(4, "sample count")?;
            let times = record[5..]
                .iter()
                .map(|t| {
                    t.parse::<f64>()
                        .map_err(|_| row_err(format!("bad timing '{t}'")))
                })
                .collect::<Result<Vec<f64>, _>>()?;
            if times.len() != nsample {
                return Err(row_err(format!(
                    "declared {nsample} samples, found {}",
                    times.len()
                )));
            }
            let token = record[0].clone();
            store.samples.insert(
                token.clone(),
                Sample {
                    token,
                    label: record[1].clone(),
                    size,
                    elements,
                    times,
                },
            );
        }

        Ok(store)
    }
}

/// Write a tab-separated table with the shared meta header, atomically.
pub fn write_table<I>(
    path: &Path,
    meta: &DatMeta,
    columns: Option<&[&str]>,
    rows: I,
) -> Result<(), DatError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let csv_err = |e: csv::Error| DatError::Csv {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let meta_json = serde_json::to_string(meta).map_err(|e| DatError::Meta {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut header = format!("{META_PREFIX}{meta_json}\n");
    if let Some(columns) = columns {
        header.push_str(COLUMNS_PREFIX);
        header.push_str(&columns.join("\t"));
        header.push('\n');
    }

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(false)
        .from_writer(header.into_bytes());
    for row in rows {
        wtr.write_record(&row).map_err(csv_err)?;
    }
    let data = wtr.into_inner().map_err(|e| DatError::Csv {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let tmp_path = path.with_extension("dat.tmp");
    fs::write(&tmp_path, data).map_err(io_err(&tmp_path))?;
    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        DatError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Read the meta header of a `.dat` file's content. A missing header yields
/// default metadata.
pub fn read_meta(content: &str, path: &Path) -> Result<DatMeta, DatError> {
    match content.lines().find_map(|l| l.strip_prefix(META_PREFIX)) {
        Some(json) => serde_json::from_str(json).map_err(|e| DatError::Meta {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        None => Ok(DatMeta::default()),
    }
}

/// Derived tables carry a column header; raw stores never do.
pub fn is_derived_table(content: &str) -> bool {
    content.lines().any(|l| l.starts_with(COLUMNS_PREFIX))
}

/// Data rows of a `.dat` file's content, with 1-based line numbers.
pub fn read_rows(content: &str, path: &Path) -> Result<Vec<(u64, Vec<String>)>, DatError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(false)
        .comment(Some(b'#'))
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| DatError::Csv {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let line = record.position().map_or(0, |p| p.line());
        rows.push((line, record.iter().map(|f| f.to_string()).collect()));
    }
    Ok(rows)
}
