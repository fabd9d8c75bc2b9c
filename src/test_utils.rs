use crate::catalog::{initialize_catalog, Catalog};
use crate::database::{insert_observations, Database};
use crate::models::Observation;
use crate::types::TimeType;

use rusqlite::Connection;
use tempfile::TempDir;

/// Create a daily county observation issued on its own time value.
pub(crate) fn observation(
    source: &str,
    signal: &str,
    time_value: i64,
    value: Option<f64>,
) -> Observation {
    Observation::new(source, signal, TimeType::Day, time_value, "county", "01234")
        .with_issue(Some(time_value))
        .with_values(value, None, None)
}

/// Create an initialised database in a temporary directory.
///
/// The directory is removed when the returned [TempDir] is dropped.
pub(crate) fn temp_database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let database = Database::new(&dir.path().join("epidata.db"));
    database.initialize().unwrap();
    (dir, database)
}

/// Return the built-in catalog.
pub(crate) fn catalog() -> Catalog {
    initialize_catalog(None, None).unwrap()
}

/// Insert one observation at each of `issues`, valued by the position of its issue.
pub(crate) fn insert_issues(
    conn: &mut Connection,
    source: &str,
    signal: &str,
    time_value: i64,
    issues: &[i64],
) {
    let rows: Vec<Observation> = issues
        .iter()
        .enumerate()
        .map(|(i, issue)| {
            observation(source, signal, time_value, Some(i as f64)).with_issue(Some(*issue))
        })
        .collect();
    insert_observations(conn, &rows).unwrap();
}

/// Insert `n` consecutive days starting at `start` with values `0, 1, 4, 9, ...`.
pub(crate) fn insert_squares(conn: &mut Connection, source: &str, signal: &str, start: i64, n: i64) {
    let rows: Vec<Observation> = (0..n)
        .map(|i| {
            let time_value = TimeType::Day.shift(start, i).unwrap();
            observation(source, signal, time_value, Some((i * i) as f64))
        })
        .collect();
    insert_observations(conn, &rows).unwrap();
}
