//! Run directories — the set of sample stores produced by one timing pass.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::dat::{is_derived_table, DatError, SampleStore};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("run directory does not exist: {0}")]
    Missing(PathBuf),
    #[error("failed to list run directory {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Dat(#[from] DatError),
}

/// A run directory, read-only once written.
#[derive(Debug, Clone)]
pub struct Run {
    path: PathBuf,
    stores: BTreeMap<String, SampleStore>,
}

impl Run {
    /// Load every raw `*.dat` store in `dir`. Median and speedup tables
    /// written next to them are skipped.
    pub fn load(dir: &Path) -> Result<Self, RunError> {
        if !dir.is_dir() {
            return Err(RunError::Missing(dir.to_path_buf()));
        }
        let entries = fs::read_dir(dir).map_err(|source| RunError::List {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut stores = BTreeMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("dat") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|source| RunError::Read {
                path: path.clone(),
                source,
            })?;
            if is_derived_table(&content) {
                tracing::debug!(path = %path.display(), "skipping derived table");
                continue;
            }
            let store = SampleStore::parse(&path, &content)?;
            tracing::debug!(run = %dir.display(), dataset = store.name(), problems = store.len(), "loaded store");
            stores.insert(store.name().to_string(), store);
        }

        Ok(Self {
            path: dir.to_path_buf(),
            stores,
        })
    }

    /// Build a run from in-memory stores.
    pub fn from_stores(path: impl Into<PathBuf>, stores: impl IntoIterator<Item = SampleStore>) -> Self {
        Self {
            path: path.into(),
            stores: stores
                .into_iter()
                .map(|s| (s.name().to_string(), s))
                .collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name, used as the run label in reports.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn store(&self, dataset: &str) -> Option<&SampleStore> {
        self.stores.get(dataset)
    }

    /// Stores ordered by dataset name.
    pub fn stores(&self) -> impl Iterator<Item = &SampleStore> {
        self.stores.values()
    }

    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(|k| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dat::DatMeta;
    use crate::problem::Problem;

    #[test]
    fn load_reads_all_dat_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = Problem::from_token("complex_forward_len_8_single_ip_batch_1").unwrap();
        for name in ["a", "b"] {
            let mut store = SampleStore::new(name, DatMeta::titled(name));
            store.append(&p, &[1.0, 2.0]);
            store.write(dir.path()).unwrap();
        }
        fs::write(dir.path().join("machine.json"), "{}").unwrap();

        let run = Run::load(dir.path()).unwrap();
        assert_eq!(run.dataset_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(run.store("a").unwrap().meta().title, "a");
    }

    #[test]
    fn load_skips_derived_tables() {
        let dir = tempfile::tempdir().unwrap();
        let p = Problem::from_token("complex_forward_len_8_single_ip_batch_1").unwrap();
        let mut store = SampleStore::new("d", DatMeta::titled("d"));
        store.append(&p, &[1.0, 2.0, 3.0]);
        store.write(dir.path()).unwrap();
        crate::dat::write_table(
            &dir.path().join("run-d-median.dat"),
            store.meta(),
            Some(&["token", "median", "low", "high"][..]),
            vec![vec![p.token(), "2".into(), "1".into(), "3".into()]],
        )
        .unwrap();

        let run = Run::load(dir.path()).unwrap();
        assert_eq!(run.dataset_names().collect::<Vec<_>>(), vec!["d"]);
        assert_eq!(run.store("d").unwrap().len(), 1);
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(matches!(
            Run::load(Path::new("/nonexistent/run")),
            Err(RunError::Missing(_))
        ));
    }

    #[test]
    fn name_is_directory_name() {
        let run = Run::from_stores("/tmp/runs/baseline", Vec::new());
        assert_eq!(run.name(), "baseline");
    }
}
