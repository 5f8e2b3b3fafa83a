//! Workloads enumerated from a directory of query mixes.
//!
//! A workload directory contains one subdirectory per workload (a *query mix*), each holding
//! one file per query:
//!
//! ```text
//! workloads/
//!   0/
//!     q1.sparql
//!     q2.sparql
//!   1/
//!     q1.sparql
//! ```
//!
//! Workloads are sorted lexicographically by name, so that repeated runs assign the same
//! workload to the same client.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while enumerating workloads.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The workload directory does not exist or cannot be read.
    #[error("cannot read workload directory `{}`", path.display())]
    Io {
        /// The directory that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        cause: io::Error,
    },

    /// The path exists but is not a directory.
    #[error("`{}` is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// The directory contains no workloads.
    #[error("no workloads found in `{}`", .0.display())]
    Empty(PathBuf),

    /// A workload name is not valid UTF-8.
    #[error("workload name `{}` is not valid UTF-8", .0.display())]
    InvalidName(PathBuf),
}

/// A reference to a single query file within a workload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFile {
    /// The file name of the query.
    pub name: String,
    /// Full path to the query file.
    pub path: PathBuf,
}

/// A named set of queries replayed by one client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    /// Name of the workload, taken from its directory name.
    pub name: String,
    /// Directory containing the query files.
    pub path: PathBuf,
    /// Query files in lexicographic order.
    pub queries: Vec<QueryFile>,
}

/// All workloads available for a run, sorted by name.
#[derive(Clone, Debug)]
pub struct WorkloadSet {
    workloads: Vec<Workload>,
}

impl WorkloadSet {
    /// Enumerates all workloads below `root`.
    ///
    /// Hidden entries (starting with `.`) and plain files at the top level are ignored.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self, WorkloadError> {
        let root = root.as_ref().to_path_buf();
        let metadata = fs::metadata(&root).map_err(|cause| WorkloadError::Io {
            path: root.clone(),
            cause,
        })?;
        if !metadata.is_dir() {
            return Err(WorkloadError::NotADirectory(root));
        }

        let mut workloads = Vec::new();
        for (name, path) in list_entries(&root)? {
            if !path.is_dir() {
                continue;
            }
            let mut queries = Vec::new();
            for (name, path) in list_entries(&path)? {
                if path.is_file() {
                    queries.push(QueryFile { name, path });
                }
            }
            workloads.push(Workload {
                name,
                path,
                queries,
            });
        }

        if workloads.is_empty() {
            return Err(WorkloadError::Empty(root));
        }

        Ok(Self { workloads })
    }

    /// Creates a set from already enumerated workloads, sorting them by name.
    pub fn from_workloads(mut workloads: Vec<Workload>) -> Self {
        workloads.sort_by(|a, b| a.name.cmp(&b.name));
        Self { workloads }
    }

    /// The number of distinct workloads.
    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    /// Returns `true` if the set contains no workloads.
    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    /// Returns the workload assigned to client `index`.
    ///
    /// Clients are assigned workloads round-robin, so client `i` receives workload
    /// `i mod len()`. Returns `None` only for an empty set.
    pub fn assign(&self, index: usize) -> Option<&Workload> {
        if self.workloads.is_empty() {
            return None;
        }
        self.workloads.get(index % self.workloads.len())
    }

    /// Iterates over all workloads in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Workload> {
        self.workloads.iter()
    }
}

/// Lists the non-hidden entries of `dir`, sorted by name.
fn list_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>, WorkloadError> {
    let io_error = |cause| WorkloadError::Io {
        path: dir.to_path_buf(),
        cause,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let path = entry.path();
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| WorkloadError::InvalidName(path.clone()))?;
        if name.starts_with('.') {
            continue;
        }
        entries.push((name, path));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::write(path, "SELECT * WHERE { ?s ?p ?o }").unwrap();
    }

    #[test]
    fn discovers_sorted_workloads() {
        let dir = tempfile::tempdir().unwrap();
        for mix in ["b", "a", ".hidden"] {
            fs::create_dir(dir.path().join(mix)).unwrap();
        }
        touch(&dir.path().join("a").join("q2.sparql"));
        touch(&dir.path().join("a").join("q1.sparql"));
        touch(&dir.path().join("README"));

        let set = WorkloadSet::discover(dir.path()).unwrap();
        let names: Vec<_> = set.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);

        let first = set.iter().next().unwrap();
        let queries: Vec<_> = first.queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(queries, ["q1.sparql", "q2.sparql"]);
    }

    #[test]
    fn assigns_round_robin() {
        let dir = tempfile::tempdir().unwrap();
        for mix in ["0", "1"] {
            fs::create_dir(dir.path().join(mix)).unwrap();
        }

        let set = WorkloadSet::discover(dir.path()).unwrap();
        let assigned: Vec<_> = (0..5).map(|i| set.assign(i).unwrap().name.as_str()).collect();
        assert_eq!(assigned, ["0", "1", "0", "1", "0"]);
    }

    #[test]
    fn rejects_missing_and_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            WorkloadSet::discover(dir.path()),
            Err(WorkloadError::Empty(_))
        ));
        assert!(matches!(
            WorkloadSet::discover(dir.path().join("missing")),
            Err(WorkloadError::Io { .. })
        ));
    }
}
