//! Fetching series of observations
//!
//! [fetch_series] is the query pipeline shared by the endpoints: it resolves requested signals
//! against the catalog, reads directly stored signals, reads the base signals of derived
//! signals over a padded time range and transforms them, and returns every row in series
//! order.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use rusqlite::Connection;

use crate::catalog::Catalog;
use crate::database::{self, OBSERVATION_FIELDS, TABLE};
use crate::error::EpidataError;
use crate::models::Observation;
use crate::query_builder::QueryBuilder;
use crate::selectors::{self, GeoPair, SourceSignalPair, TimePair, Values};
use crate::transform::{ReindexRows, Transform, TransformOptions};
use crate::types::TimeType;
use crate::versioning::VersionSelector;

/// Storage order of rows. Transforms rely on rows of one series arriving in time order.
const SERIES_ORDER: [&str; 7] = [
    "source",
    "signal",
    "time_type",
    "geo_type",
    "geo_value",
    "time_value",
    "issue",
];

/// Selection of the series to fetch
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesRequest {
    pub source_signals: Vec<SourceSignalPair>,
    pub geos: Vec<GeoPair>,
    /// Requested times. Empty selects all times.
    pub times: Vec<TimePair>,
    pub version: VersionSelector,
}

/// Rows of a response, and whether rows beyond the result limit were dropped
#[derive(Clone, Debug, PartialEq)]
pub struct Fetched<T> {
    pub rows: Vec<T>,
    pub truncated: bool,
}

impl<T> Fetched<T> {
    pub fn new(rows: Vec<T>, truncated: bool) -> Self {
        Fetched { rows, truncated }
    }

    /// Drop rows beyond `limit`, flagging truncation if any were dropped.
    pub fn limit(mut self, limit: usize) -> Self {
        if self.rows.len() > limit {
            self.rows.truncate(limit);
            self.truncated = true;
        }
        self
    }
}

/// Order rows by series, then by issue when each issue forms its own series, then by time.
pub fn series_order(by_issue: bool) -> impl Fn(&Observation, &Observation) -> Ordering {
    move |a, b| {
        a.source
            .cmp(&b.source)
            .then_with(|| a.signal.cmp(&b.signal))
            .then_with(|| a.time_type.cmp(&b.time_type))
            .then_with(|| a.geo_type.cmp(&b.geo_type))
            .then_with(|| a.geo_value.cmp(&b.geo_value))
            .then_with(|| {
                if by_issue {
                    a.issue().cmp(&b.issue())
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| a.time_value.cmp(&b.time_value))
            .then_with(|| a.issue().cmp(&b.issue()))
    }
}

/// Read stored rows of the given signals.
///
/// Source names are rewritten to their storage keys for the query and mapped back in the
/// results. At most `limit` rows are returned; one more is requested to detect truncation.
pub fn fetch_rows(
    catalog: &Catalog,
    conn: &Connection,
    pairs: &[SourceSignalPair],
    geos: &[GeoPair],
    times: &[TimePair],
    version: &VersionSelector,
    limit: usize,
) -> Result<Fetched<Observation>, EpidataError> {
    let (db_pairs, mapper) = catalog.resolve_alias(pairs);
    let mut builder = QueryBuilder::new(TABLE, "t");
    builder
        .select(&OBSERVATION_FIELDS)
        .where_source_signals(&db_pairs)
        .where_geo_pairs(geos)
        .where_time_pairs(times);
    version.apply(&mut builder);
    builder
        .order_by_fields(&SERIES_ORDER)
        .limit(limit.saturating_add(1));
    let query = builder.build();
    tracing::debug!(sql = %query.sql, params = query.params.len(), "fetching rows");

    let mut rows = database::fetch_observations(conn, &query)?;
    for row in &mut rows {
        row.source = mapper.external_source(&row.source, &row.signal);
    }
    Ok(Fetched::new(rows, false).limit(limit))
}

/// Time type shared by all requested times, if there is exactly one.
fn single_time_type(times: &[TimePair]) -> Option<TimeType> {
    let time_types: BTreeSet<TimeType> = times.iter().map(|pair| pair.time_type).collect();
    match time_types.len() {
        1 => time_types.into_iter().next(),
        _ => None,
    }
}

/// Merge signal keys into pairs, one per source.
fn pairs_of(keys: impl IntoIterator<Item = (String, String)>) -> Vec<SourceSignalPair> {
    let mut pairs: Vec<SourceSignalPair> = Vec::new();
    for (source, signal) in keys {
        let signals = Values::List(vec![signal]);
        match pairs.iter_mut().find(|pair| pair.source == source) {
            Some(pair) => pair.signals = pair.signals.merge(&signals),
            None => pairs.push(SourceSignalPair::new(&source, signals)),
        }
    }
    pairs
}

/// Fetch all requested series, deriving signals computed from a base signal.
///
/// Returns at most `max_results` rows in series order.
pub fn fetch_series(
    catalog: &Catalog,
    conn: &Connection,
    request: &SeriesRequest,
    max_results: usize,
    options: &TransformOptions,
) -> Result<Fetched<Observation>, EpidataError> {
    let pairs = catalog.expand_wildcards(&request.source_signals);
    if let Some(time_type) = single_time_type(&request.times) {
        catalog.check_time_type(&pairs, time_type)?;
    }
    let plan = catalog.plan(&pairs);
    let by_issue = request.version.groups_by_issue();

    let mut rows = Vec::new();
    let mut truncated = false;
    if !plan.direct.is_empty() {
        let direct = fetch_rows(
            catalog,
            conn,
            &plan.direct,
            &request.geos,
            &request.times,
            &request.version,
            max_results,
        )?;
        truncated |= direct.truncated;
        rows.extend(direct.rows);
    }

    if !plan.derived.is_empty() {
        let pad = plan
            .derived
            .iter()
            .map(|derived| derived.transform.pad_length(options.window))
            .max()
            .unwrap_or(0);
        let base_pairs = pairs_of(
            plan.derived
                .iter()
                .map(|derived| (derived.base.source.clone(), derived.base.signal.clone())),
        );
        let widened: Vec<TimePair> = request
            .times
            .iter()
            .map(|pair| pair.widen(i64::try_from(pad).unwrap_or(i64::MAX)))
            .collect();
        let base = fetch_rows(
            catalog,
            conn,
            &base_pairs,
            &request.geos,
            &widened,
            &request.version,
            max_results,
        )?;
        truncated |= base.truncated;
        let mut base_rows = base.rows;
        base_rows.sort_by(series_order(by_issue));

        for derived in &plan.derived {
            let series: Vec<&Observation> = base_rows
                .iter()
                .filter(|row| row.source == derived.base.source && row.signal == derived.base.signal)
                .collect();
            let groups = series.chunk_by(|a, b| {
                a.same_series(b) && (!by_issue || a.issue() == b.issue())
            });
            for group in groups {
                let group = group.iter().map(|row| (*row).clone());
                let output: Box<dyn Iterator<Item = Observation> + '_> = match derived.transform {
                    Transform::Identity => Box::new(group),
                    transform => Box::new(transform.apply(ReindexRows::new(group), options)),
                };
                for mut row in output {
                    if selectors::time_pairs_contain(&request.times, row.time_type, row.time_value) {
                        row.source.clone_from(&derived.signal.source);
                        row.signal.clone_from(&derived.signal.signal);
                        rows.push(row);
                    }
                }
            }
        }
    }

    rows.sort_by(series_order(by_issue));
    let fetched = Fetched::new(rows, truncated).limit(max_results);
    tracing::debug!(
        rows = fetched.rows.len(),
        truncated = fetched.truncated,
        derived = plan.derived.len(),
        "fetched series"
    );
    Ok(fetched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use crate::types::{Missing, TimeValue};

    fn day_range(start: i64, end: i64) -> Vec<TimePair> {
        vec![TimePair::new(
            TimeType::Day,
            Values::List(vec![TimeValue::Range(start, end)]),
        )]
    }

    fn county() -> Vec<GeoPair> {
        vec![GeoPair::new(
            "county",
            Values::List(vec!["01234".to_string()]),
        )]
    }

    fn request(source: &str, signal: &str, times: Vec<TimePair>) -> SeriesRequest {
        SeriesRequest {
            source_signals: vec![SourceSignalPair::single(source, signal)],
            geos: county(),
            times,
            version: VersionSelector::Latest,
        }
    }

    fn values(rows: &[Observation]) -> Vec<Option<f64>> {
        rows.iter().map(|row| row.value).collect()
    }

    #[test]
    fn test_latest_and_as_of() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        test_utils::insert_issues(&mut conn, "src", "sig", 20200414, &[20200414, 20200415, 20200416]);
        let catalog = test_utils::catalog();

        let latest = request("src", "sig", day_range(20200414, 20200414));
        let fetched = fetch_series(&catalog, &conn, &latest, 100, &TransformOptions::default()).unwrap();
        assert_eq!(
            vec![Some(20200416)],
            fetched.rows.iter().map(|r| r.issue()).collect::<Vec<_>>()
        );

        let as_of = SeriesRequest {
            version: VersionSelector::AsOf(20200415),
            ..latest.clone()
        };
        let fetched = fetch_series(&catalog, &conn, &as_of, 100, &TransformOptions::default()).unwrap();
        assert_eq!(
            vec![Some(20200415)],
            fetched.rows.iter().map(|r| r.issue()).collect::<Vec<_>>()
        );

        let before = SeriesRequest {
            version: VersionSelector::AsOf(20200413),
            ..latest
        };
        let fetched = fetch_series(&catalog, &conn, &before, 100, &TransformOptions::default()).unwrap();
        assert!(fetched.rows.is_empty());
    }

    #[test]
    fn test_all_issues_and_lag() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        test_utils::insert_issues(&mut conn, "src", "sig", 20200414, &[20200414, 20200415, 20200416]);
        let catalog = test_utils::catalog();

        let all = SeriesRequest {
            version: VersionSelector::Issues(Values::List(vec![TimeValue::Range(20200414, 20200415)])),
            ..request("src", "sig", day_range(20200414, 20200414))
        };
        let fetched = fetch_series(&catalog, &conn, &all, 100, &TransformOptions::default()).unwrap();
        assert_eq!(2, fetched.rows.len());

        let lag = SeriesRequest {
            version: VersionSelector::Lag(1),
            ..all
        };
        let fetched = fetch_series(&catalog, &conn, &lag, 100, &TransformOptions::default()).unwrap();
        assert_eq!(
            vec![Some(1)],
            fetched.rows.iter().map(|r| r.lag()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_derived_incidence() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        test_utils::insert_squares(&mut conn, "jhu-csse", "confirmed_cumulative_num", 20200401, 10);
        let catalog = test_utils::catalog();

        let incidence = request(
            "jhu-csse",
            "confirmed_incidence_num",
            day_range(20200401, 20200410),
        );
        let fetched =
            fetch_series(&catalog, &conn, &incidence, 100, &TransformOptions::default()).unwrap();
        assert_eq!(
            (1..10).map(|i| Some(f64::from(2 * i - 1))).collect::<Vec<_>>(),
            values(&fetched.rows)
        );
        let row = &fetched.rows[0];
        assert_eq!("jhu-csse", row.source);
        assert_eq!("confirmed_incidence_num", row.signal);
        assert_eq!(20200402, row.time_value);
        assert_eq!(Missing::NotApplicable, row.missing_stderr);
    }

    #[test]
    fn test_derived_uses_padding() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        test_utils::insert_squares(&mut conn, "jhu-csse", "confirmed_cumulative_num", 20200401, 10);
        let catalog = test_utils::catalog();

        // The first requested day needs the previous day's cumulative value.
        let incidence = request(
            "jhu-csse",
            "confirmed_incidence_num",
            day_range(20200405, 20200406),
        );
        let fetched =
            fetch_series(&catalog, &conn, &incidence, 100, &TransformOptions::default()).unwrap();
        assert_eq!(vec![Some(7.0), Some(9.0)], values(&fetched.rows));

        let smoothed = request(
            "jhu-csse",
            "confirmed_7dav_incidence_num",
            day_range(20200410, 20200410),
        );
        let fetched =
            fetch_series(&catalog, &conn, &smoothed, 100, &TransformOptions::default()).unwrap();
        // Mean of the differences ending on the 10th day: 5, 7, ..., 17.
        assert_eq!(vec![Some(11.0)], values(&fetched.rows));
    }

    #[test]
    fn test_derived_and_direct_together() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        test_utils::insert_squares(&mut conn, "jhu-csse", "confirmed_cumulative_num", 20200401, 3);
        let catalog = test_utils::catalog();

        let both = SeriesRequest {
            source_signals: vec![SourceSignalPair::new(
                "jhu-csse",
                Values::List(vec![
                    "confirmed_incidence_num".to_string(),
                    "confirmed_cumulative_num".to_string(),
                ]),
            )],
            ..request("jhu-csse", "unused", day_range(20200401, 20200403))
        };
        let fetched = fetch_series(&catalog, &conn, &both, 100, &TransformOptions::default()).unwrap();
        assert_eq!(
            vec![
                ("confirmed_cumulative_num", 20200401),
                ("confirmed_cumulative_num", 20200402),
                ("confirmed_cumulative_num", 20200403),
                ("confirmed_incidence_num", 20200402),
                ("confirmed_incidence_num", 20200403),
            ],
            fetched
                .rows
                .iter()
                .map(|r| (r.signal.as_str(), r.time_value))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_truncation() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        test_utils::insert_squares(&mut conn, "src", "sig", 20200401, 10);
        let catalog = test_utils::catalog();

        let all = request("src", "sig", day_range(20200401, 20200410));
        let fetched = fetch_series(&catalog, &conn, &all, 4, &TransformOptions::default()).unwrap();
        assert_eq!(4, fetched.rows.len());
        assert!(fetched.truncated);

        let fetched = fetch_series(&catalog, &conn, &all, 10, &TransformOptions::default()).unwrap();
        assert_eq!(10, fetched.rows.len());
        assert!(!fetched.truncated);
    }

    #[test]
    fn test_alias_is_mapped_back() {
        let (_dir, database) = test_utils::temp_database();
        let mut conn = database.connect().unwrap();
        test_utils::insert_squares(&mut conn, "indicator-combination", "nmf_day_doc_fbc_fbs_ght", 20200401, 2);
        let catalog = test_utils::catalog();

        let aliased = request(
            "indicator-combination-nmf",
            "nmf_day_doc_fbc_fbs_ght",
            day_range(20200401, 20200402),
        );
        let fetched = fetch_series(&catalog, &conn, &aliased, 100, &TransformOptions::default()).unwrap();
        assert_eq!(2, fetched.rows.len());
        assert!(fetched
            .rows
            .iter()
            .all(|r| r.source == "indicator-combination-nmf"));
    }

    #[test]
    fn test_time_type_mismatch() {
        let (_dir, database) = test_utils::temp_database();
        let conn = database.connect().unwrap();
        let catalog = test_utils::catalog();
        let weekly = request(
            "nchs-mortality",
            "deaths_covid_incidence_num",
            day_range(20200401, 20200402),
        );
        assert!(matches!(
            fetch_series(&catalog, &conn, &weekly, 100, &TransformOptions::default()),
            Err(EpidataError::TimeTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_series_order_by_issue() {
        let a = test_utils::observation("src", "sig", 20200402, None).with_issue(Some(20200403));
        let b = test_utils::observation("src", "sig", 20200401, None).with_issue(Some(20200405));
        assert_eq!(Ordering::Less, series_order(true)(&a, &b));
        assert_eq!(Ordering::Greater, series_order(false)(&a, &b));
    }
}
