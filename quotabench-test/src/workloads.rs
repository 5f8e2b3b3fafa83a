//! Temporary workload directories for tests.
//!
//! ```
//! use quotabench_test::workloads::WorkloadDir;
//!
//! let dir = WorkloadDir::new(&["0", "1"]);
//! assert!(dir.path().join("0").join("q1.sparql").is_file());
//! ```

use std::fs;
use std::path::Path;

use tempfile::TempDir;

/// A temporary directory holding one subdirectory per workload.
///
/// Every workload contains two query files, `q1.sparql` and `q2.sparql`. The directory is deleted
/// when this value is dropped.
#[derive(Debug)]
pub struct WorkloadDir {
    dir: TempDir,
}

impl WorkloadDir {
    /// Creates a workload directory with the given workload names.
    pub fn new(names: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            let workload = dir.path().join(name);
            fs::create_dir(&workload).unwrap();
            for query in ["q1.sparql", "q2.sparql"] {
                fs::write(workload.join(query), "SELECT * WHERE { ?s ?p ?o }").unwrap();
            }
        }
        Self { dir }
    }

    /// The root of the workload directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
