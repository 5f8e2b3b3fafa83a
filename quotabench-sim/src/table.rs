//! CSV tables of per-query measurements.
//!
//! Both the baselines consumed by the simulator and the estimates it produces use the same shape,
//! so that simulated tables can be fed to the same aggregation as measured ones:
//!
//! ```text
//! query,time,httpCalls
//! Q1,2.0,4
//! ```

use std::io;
use std::path::{Path, PathBuf};

use quotabench_types::{Query, QueryError, QueryRecord, SimulationResult};
use thiserror::Error;

/// Columns of every table, matching the serde names of [`QueryRecord`].
const COLUMNS: [&str; 3] = ["query", "time", "httpCalls"];

/// Errors reading or writing a table.
#[derive(Debug, Error)]
pub enum TableError {
    /// The query table could not be read or parsed.
    #[error("cannot read query table `{}`", path.display())]
    Read {
        /// The table that failed to read.
        path: PathBuf,
        /// The underlying CSV error.
        #[source]
        cause: csv::Error,
    },

    /// The result table could not be written.
    #[error("cannot write result table `{}`", path.display())]
    Write {
        /// The table that failed to write.
        path: PathBuf,
        /// The underlying CSV error.
        #[source]
        cause: csv::Error,
    },
}

/// A row with values that cannot be simulated.
#[derive(Clone, Debug, PartialEq)]
pub struct InvalidRow {
    /// Line number of the row in the file, if known.
    pub line: Option<u64>,
    /// Name of the query in the row.
    pub query: String,
    /// What is wrong with the row.
    pub error: QueryError,
}

/// The queries read from a table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryTable {
    /// Valid queries in file order.
    pub queries: Vec<Query>,
    /// Rows that were well-formed but hold invalid values.
    pub invalid: Vec<InvalidRow>,
}

/// Reads the query table at `path`.
pub fn read_queries(path: &Path) -> Result<QueryTable, TableError> {
    let read_error = |cause| TableError::Read {
        path: path.to_path_buf(),
        cause,
    };
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(read_error)?;
    parse_queries(reader).map_err(read_error)
}

/// Reads a query table from `reader`.
pub fn read_queries_from<R: io::Read>(reader: R) -> Result<QueryTable, csv::Error> {
    parse_queries(
        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader),
    )
}

fn parse_queries<R: io::Read>(mut reader: csv::Reader<R>) -> Result<QueryTable, csv::Error> {
    let headers = reader.headers()?.clone();
    let mut table = QueryTable::default();

    for row in reader.records() {
        let row = row?;
        let record: QueryRecord = row.deserialize(Some(&headers))?;
        let name = record.query.clone();
        match Query::try_from(record) {
            Ok(query) => table.queries.push(query),
            Err(error) => table.invalid.push(InvalidRow {
                line: row.position().map(|position| position.line()),
                query: name,
                error,
            }),
        }
    }

    Ok(table)
}

/// Writes `results` as a table to `path`, replacing any existing file.
pub fn write_results(path: &Path, results: &[SimulationResult]) -> Result<(), TableError> {
    let write_error = |cause| TableError::Write {
        path: path.to_path_buf(),
        cause,
    };
    let writer = result_writer().from_path(path).map_err(write_error)?;
    serialize_results(writer, results).map_err(write_error)
}

/// Writes `results` as a table to `writer`.
pub fn write_results_to<W: io::Write>(
    writer: W,
    results: &[SimulationResult],
) -> Result<(), csv::Error> {
    serialize_results(result_writer().from_writer(writer), results)
}

/// The header is written explicitly, so that a table without any results still has one.
fn result_writer() -> csv::WriterBuilder {
    let mut builder = csv::WriterBuilder::new();
    builder.has_headers(false);
    builder
}

fn serialize_results<W: io::Write>(
    mut writer: csv::Writer<W>,
    results: &[SimulationResult],
) -> Result<(), csv::Error> {
    writer.write_record(COLUMNS)?;
    for result in results {
        writer.serialize(result.to_record())?;
    }
    writer.flush()?;
    Ok(())
}

/// The default file name of a simulated table.
///
/// `quota_ms` is formatted as given, so a quota of `75` yields `simulation_4c_75q_1000runs.csv`.
pub fn default_file_name(num_clients: usize, quota_ms: f64, num_trials: usize) -> String {
    format!("simulation_{num_clients}c_{quota_ms}q_{num_trials}runs.csv")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quotabench_types::TrialSpread;

    use super::*;

    #[test]
    fn reads_valid_and_invalid_rows() {
        let csv = "query,time,httpCalls\nQ1, 2.0, 4\nQ2,0.5,0\nQ3,1.25,1\n";
        let table = read_queries_from(csv.as_bytes()).unwrap();

        assert_eq!(
            table.queries,
            [
                Query::new("Q1", Duration::from_secs(2), 4),
                Query::new("Q3", Duration::from_secs_f64(1.25), 1),
            ]
        );
        assert_eq!(
            table.invalid,
            [InvalidRow {
                line: Some(3),
                query: "Q2".into(),
                error: QueryError::NoSubOperations(0),
            }]
        );
    }

    #[test]
    fn out_of_range_times_are_invalid_rows() {
        let csv = "query,time,httpCalls\nQ1,1.0,2\nQbig,1e20,4\nQ3,1.0,1\n";
        let table = read_queries_from(csv.as_bytes()).unwrap();

        let names: Vec<_> = table.queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, ["Q1", "Q3"]);
        assert_eq!(
            table.invalid,
            [InvalidRow {
                line: Some(3),
                query: "Qbig".into(),
                error: QueryError::TimeOutOfRange(1e20),
            }]
        );
    }

    #[test]
    fn malformed_rows_fail_the_table() {
        let csv = "query,time,httpCalls\nQ1,fast,4\n";
        assert!(read_queries_from(csv.as_bytes()).is_err());
    }

    #[test]
    fn writes_the_measurement_shape() {
        let results = [SimulationResult {
            query_name: "Q1".into(),
            estimated_time: Duration::from_millis(2800),
            sub_operation_count: 4,
            spread: TrialSpread::default(),
        }];

        let mut buffer = Vec::new();
        write_results_to(&mut buffer, &results).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "query,time,httpCalls\nQ1,2.8,4\n"
        );
    }

    #[test]
    fn empty_results_keep_the_header() {
        let mut buffer = Vec::new();
        write_results_to(&mut buffer, &[]).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "query,time,httpCalls\n");
    }

    #[test]
    fn results_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(default_file_name(4, 75.0, 1000));
        assert!(path.ends_with("simulation_4c_75q_1000runs.csv"));

        let results = [SimulationResult {
            query_name: "Q9".into(),
            estimated_time: Duration::from_millis(1500),
            sub_operation_count: 3,
            spread: TrialSpread::default(),
        }];
        write_results(&path, &results).unwrap();

        let table = read_queries(&path).unwrap();
        assert_eq!(
            table.queries,
            [Query::new("Q9", Duration::from_millis(1500), 3)]
        );
    }

    #[test]
    fn missing_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_queries(&dir.path().join("missing.csv"));
        assert!(matches!(result, Err(TableError::Read { .. })));
    }
}
