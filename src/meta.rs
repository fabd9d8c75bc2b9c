//! Signal metadata
//!
//! Summaries of the latest issue of every stored (source, signal, time type, geo type). They
//! are expensive to compute, so they are computed in the background on a bounded thread pool
//! and served from a snapshot.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::database::{Database, TABLE};
use crate::error::EpidataError;
use crate::printer::Format;
use crate::query_builder::{Query, QueryBuilder};
use crate::selectors::SourceSignalPair;
use crate::types::TimeType;

/// Request data for the metadata endpoint
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct MetaRequest {
    /// Response format
    pub format: Option<Format>,
}

/// Summary of one (source, signal, time type, geo type) at its latest issues
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetaRow {
    pub data_source: String,
    pub signal: String,
    pub time_type: TimeType,
    pub geo_type: String,
    pub min_time: i64,
    pub max_time: i64,
    pub num_locations: i64,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub mean_value: Option<f64>,
    /// Sample standard deviation of the values
    pub stdev_value: Option<f64>,
    pub max_issue: i64,
    pub min_lag: i64,
    pub max_lag: i64,
}

fn row_to_meta(row: &Row<'_>) -> rusqlite::Result<MetaRow> {
    let count: i64 = row.get("value_count")?;
    let total: Option<f64> = row.get("value_total")?;
    let total_squares: Option<f64> = row.get("value_total_squares")?;
    let (mean_value, stdev_value) = match (total, total_squares) {
        (Some(total), Some(total_squares)) if count > 0 => {
            let n = count as f64;
            let mean = total / n;
            let stdev = (count > 1)
                .then(|| ((total_squares - n * mean * mean) / (n - 1.0)).max(0.0).sqrt());
            (Some(mean), stdev)
        }
        _ => (None, None),
    };
    Ok(MetaRow {
        data_source: row.get("source")?,
        signal: row.get("signal")?,
        time_type: row.get("time_type")?,
        geo_type: row.get("geo_type")?,
        min_time: row.get("min_time")?,
        max_time: row.get("max_time")?,
        num_locations: row.get("num_locations")?,
        min_value: row.get("min_value")?,
        max_value: row.get("max_value")?,
        mean_value,
        stdev_value,
        max_issue: row.get("max_issue")?,
        min_lag: row.get("min_lag")?,
        max_lag: row.get("max_lag")?,
    })
}

/// Query summarising the latest issues of one signal.
fn signal_meta_query(source: &str, signal: &str) -> Query {
    let mut builder = QueryBuilder::new(TABLE, "t");
    builder
        .select(&["source", "signal", "time_type", "geo_type"])
        .select_expr("MIN(t.time_value) AS min_time")
        .select_expr("MAX(t.time_value) AS max_time")
        .select_expr("COUNT(DISTINCT t.geo_value) AS num_locations")
        .select_expr("MIN(t.value) AS min_value")
        .select_expr("MAX(t.value) AS max_value")
        .select_expr("COUNT(t.value) AS value_count")
        .select_expr("SUM(t.value) AS value_total")
        .select_expr("SUM(t.value * t.value) AS value_total_squares")
        .select_expr("MAX(t.issue) AS max_issue")
        .select_expr("MIN(t.lag) AS min_lag")
        .select_expr("MAX(t.lag) AS max_lag")
        .where_source_signals(&[SourceSignalPair::single(source, signal)])
        .use_latest_issue(None)
        .group_by(&["source", "signal", "time_type", "geo_type"]);
    builder.build()
}

/// Summarise one signal on its own connection.
fn signal_meta(database: &Database, source: &str, signal: &str) -> Result<Vec<MetaRow>, EpidataError> {
    let conn = database.connect()?;
    let query = signal_meta_query(source, signal);
    let mut stmt = conn.prepare(&query.sql)?;
    let params = query.params.as_named();
    let rows = stmt.query_map(params.as_slice(), row_to_meta)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// List every stored (source, signal).
fn stored_signals(conn: &Connection) -> Result<Vec<(String, String)>, EpidataError> {
    let query = QueryBuilder::new(TABLE, "t")
        .select(&["source", "signal"])
        .group_by(&["source", "signal"])
        .order_by_fields(&["source", "signal"])
        .build();
    let mut stmt = conn.prepare(&query.sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Compute the metadata of every stored signal.
///
/// One task per (source, signal) runs on a pool of `threads` threads, each with its own
/// connection. Results are sorted by source, signal, time type and geo type.
///
/// # Arguments
///
/// * `database`: The observation database
/// * `threads`: Number of worker threads
pub fn compute_meta(database: &Database, threads: usize) -> Result<Vec<MetaRow>, EpidataError> {
    let signals = stored_signals(&database.connect()?)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("epidata-meta-{i}"))
        .build()?;

    let results: Mutex<Vec<MetaRow>> = Mutex::new(Vec::new());
    let failure: Mutex<Option<EpidataError>> = Mutex::new(None);
    pool.scope(|scope| {
        for (source, signal) in &signals {
            let results = &results;
            let failure = &failure;
            scope.spawn(move |_| match signal_meta(database, source, signal) {
                Ok(rows) => results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(rows),
                Err(err) => {
                    tracing::error!(%source, %signal, "failed to compute signal metadata");
                    failure
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert(err);
                }
            });
        }
    });

    if let Some(err) = failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
        return Err(err);
    }
    let mut rows = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    rows.sort_by(|a, b| {
        (&a.data_source, &a.signal, a.time_type, &a.geo_type).cmp(&(
            &b.data_source,
            &b.signal,
            b.time_type,
            &b.geo_type,
        ))
    });
    tracing::info!(signals = signals.len(), rows = rows.len(), "computed signal metadata");
    Ok(rows)
}

/// The last completed metadata computation
#[derive(Debug, Default)]
pub struct MetaCache {
    rows: RwLock<Arc<Vec<MetaRow>>>,
}

impl MetaCache {
    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<Vec<MetaRow>> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recompute the metadata and replace the snapshot.
    ///
    /// The previous snapshot is kept if the computation fails. Returns the number of rows.
    pub fn refresh(&self, database: &Database, threads: usize) -> Result<usize, EpidataError> {
        let rows = compute_meta(database, threads)?;
        let count = rows.len();
        *self.rows.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(rows);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::insert_observations;
    use crate::models::Observation;
    use crate::test_utils;

    #[test]
    fn test_meta_of_latest_issues() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        // Values 0, 1, 4 at the time value's own issue; the last is revised to 10 a day later.
        test_utils::insert_squares(&mut conn, "src", "sig", 20200401, 3);
        let revised = test_utils::observation("src", "sig", 20200403, Some(10.0))
            .with_issue(Some(20200404));
        let mut other_geo = test_utils::observation("src", "sig", 20200401, Some(2.0));
        other_geo.geo_value = "01235".to_string();
        insert_observations(&mut conn, &[revised, other_geo]).unwrap();

        let rows = compute_meta(&database, 2).unwrap();
        assert_eq!(1, rows.len());
        let row = &rows[0];
        assert_eq!(("src", "sig"), (row.data_source.as_str(), row.signal.as_str()));
        assert_eq!((TimeType::Day, "county"), (row.time_type, row.geo_type.as_str()));
        assert_eq!((20200401, 20200403), (row.min_time, row.max_time));
        assert_eq!(2, row.num_locations);
        // Latest values: 0, 1, 10 and 2 at the second geo.
        assert_eq!((Some(0.0), Some(10.0)), (row.min_value, row.max_value));
        assert_eq!(Some(3.25), row.mean_value);
        let stdev = row.stdev_value.unwrap();
        assert!((stdev - (62.75_f64 / 3.0).sqrt()).abs() < 1e-9, "{stdev}");
        assert_eq!(20200404, row.max_issue);
        assert_eq!((0, 1), (row.min_lag, row.max_lag));
    }

    #[test]
    fn test_meta_per_geo_type_sorted() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        let state = Observation::new("b", "sig", TimeType::Day, 20200401, "state", "pa")
            .with_issue(Some(20200401))
            .with_values(Some(1.0), None, None);
        let county = test_utils::observation("b", "sig", 20200401, Some(1.0));
        let first = test_utils::observation("a", "sig", 20200401, None);
        insert_observations(&mut conn, &[state, county, first]).unwrap();

        let rows = compute_meta(&database, 4).unwrap();
        assert_eq!(
            vec![("a", "county"), ("b", "county"), ("b", "state")],
            rows.iter()
                .map(|r| (r.data_source.as_str(), r.geo_type.as_str()))
                .collect::<Vec<_>>()
        );
        assert_eq!(None, rows[0].mean_value);
        assert_eq!(None, rows[1].stdev_value);
    }

    #[test]
    fn test_cache_refresh() {
        let (_dir, database) = test_utils::temp_database();
        let cache = MetaCache::default();
        assert!(cache.snapshot().is_empty());
        let mut conn = database.connect().unwrap();
        test_utils::insert_squares(&mut conn, "src", "sig", 20200401, 2);
        assert_eq!(1, cache.refresh(&database, 1).unwrap());
        assert_eq!(1, cache.snapshot().len());
    }
}
