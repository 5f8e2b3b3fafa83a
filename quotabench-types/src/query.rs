//! Queries and their solo baseline measurements.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of a measurement table, as written by the benchmark drivers.
///
/// The column names match the CSV header `query,time,httpCalls`, where `time` is the wall-clock
/// execution time in seconds and `httpCalls` the number of request/response exchanges.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct QueryRecord {
    /// Name of the query.
    pub query: String,
    /// Execution time in seconds.
    pub time: f64,
    /// Number of sub-operations issued against the backend.
    #[serde(rename = "httpCalls")]
    pub http_calls: i64,
}

/// A query with its uncontended baseline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    /// Name of the query, unique within a table.
    pub name: String,
    /// Wall-clock time observed when the query runs without contention.
    pub solo_time: Duration,
    /// Number of independent request/response exchanges the query issues.
    ///
    /// A valid query has at least one sub-operation.
    pub sub_operations: u32,
}

impl Query {
    /// Creates a new query.
    pub fn new(name: impl Into<String>, solo_time: Duration, sub_operations: u32) -> Self {
        Self {
            name: name.into(),
            solo_time,
            sub_operations,
        }
    }

    /// Checks that this query can be simulated.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.sub_operations == 0 {
            return Err(QueryError::NoSubOperations(0));
        }
        Ok(())
    }
}

/// Errors for query rows that cannot be simulated.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum QueryError {
    /// The query issues no sub-operations, so its cost cannot be distributed.
    #[error("sub-operation count must be at least 1, got {0}")]
    NoSubOperations(i64),

    /// The sub-operation count does not fit the supported range.
    #[error("sub-operation count {0} is out of range")]
    TooManySubOperations(i64),

    /// The measured time is negative.
    #[error("measured time must not be negative, got {0}s")]
    NegativeTime(f64),

    /// The measured time is NaN or infinite.
    #[error("measured time must be finite, got {0}")]
    NonFiniteTime(f64),

    /// The measured time is too large to be represented.
    #[error("measured time {0}s is out of range")]
    TimeOutOfRange(f64),
}

impl TryFrom<QueryRecord> for Query {
    type Error = QueryError;

    fn try_from(record: QueryRecord) -> Result<Self, Self::Error> {
        if !record.time.is_finite() {
            return Err(QueryError::NonFiniteTime(record.time));
        }
        if record.time < 0.0 {
            return Err(QueryError::NegativeTime(record.time));
        }
        if record.http_calls <= 0 {
            return Err(QueryError::NoSubOperations(record.http_calls));
        }
        let sub_operations = u32::try_from(record.http_calls)
            .map_err(|_| QueryError::TooManySubOperations(record.http_calls))?;
        let solo_time = Duration::try_from_secs_f64(record.time)
            .map_err(|_| QueryError::TimeOutOfRange(record.time))?;

        Ok(Self {
            name: record.query,
            solo_time,
            sub_operations,
        })
    }
}

impl From<&Query> for QueryRecord {
    fn from(query: &Query) -> Self {
        Self {
            query: query.name.clone(),
            time: query.solo_time.as_secs_f64(),
            http_calls: i64::from(query.sub_operations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: f64, http_calls: i64) -> QueryRecord {
        QueryRecord {
            query: "Q1".into(),
            time,
            http_calls,
        }
    }

    #[test]
    fn converts_valid_record() {
        let query = Query::try_from(record(2.0, 4)).unwrap();
        assert_eq!(query.name, "Q1");
        assert_eq!(query.solo_time, Duration::from_secs(2));
        assert_eq!(query.sub_operations, 4);
    }

    #[test]
    fn rejects_invalid_records() {
        assert_eq!(
            Query::try_from(record(2.0, 0)),
            Err(QueryError::NoSubOperations(0))
        );
        assert_eq!(
            Query::try_from(record(2.0, -3)),
            Err(QueryError::NoSubOperations(-3))
        );
        assert_eq!(
            Query::try_from(record(-0.5, 4)),
            Err(QueryError::NegativeTime(-0.5))
        );
        assert!(matches!(
            Query::try_from(record(f64::NAN, 4)),
            Err(QueryError::NonFiniteTime(_))
        ));
        assert_eq!(
            Query::try_from(record(1e20, 4)),
            Err(QueryError::TimeOutOfRange(1e20))
        );
    }

    #[test]
    fn record_uses_camel_case_column() {
        let json = serde_json::to_string(&record(1.5, 2)).unwrap();
        assert_eq!(json, r#"{"query":"Q1","time":1.5,"httpCalls":2}"#);
    }
}
