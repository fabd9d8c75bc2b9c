//! Versioning and backfill
//!
//! Every observation may be published several times, once per issue. A [VersionSelector] picks
//! which issues a query sees. [compute_backfill] profiles how the issues of each observation
//! converge towards an anchor issue.

use serde::Serialize;

use crate::error::EpidataError;
use crate::models::Observation;
use crate::query_builder::QueryBuilder;
use crate::selectors::{self, Values};
use crate::trend::trend_value;
use crate::types::TimeValue;

/// Which issues of each observation a query returns
#[derive(Clone, Debug, PartialEq)]
pub enum VersionSelector {
    /// The greatest issue
    Latest,
    /// The greatest issue no later than the given one
    AsOf(i64),
    /// Each of the listed issues
    Issues(Values<TimeValue>),
    /// The issue published exactly this many periods after the time value
    Lag(i64),
    /// Every issue
    AllIssues,
}

impl VersionSelector {
    /// Build a selector from the mutually exclusive `issues`, `lag` and `as_of` parameters.
    pub fn from_params(
        issues: Option<&str>,
        lag: Option<i64>,
        as_of: Option<&str>,
    ) -> Result<Self, EpidataError> {
        match (issues, lag, as_of) {
            (None, None, None) => Ok(Self::Latest),
            (Some(issues), None, None) => {
                let (_, issues) = selectors::parse_day_or_week_values("issues", issues)?;
                Ok(Self::Issues(issues))
            }
            (None, Some(lag), None) => Ok(Self::Lag(lag)),
            (None, None, Some(as_of)) => {
                let (_, as_of) = selectors::parse_day_or_week_value("as_of", as_of)?;
                Ok(Self::AsOf(as_of))
            }
            _ => Err(EpidataError::ConflictingVersioning),
        }
    }

    /// Add the version filter to a query.
    pub fn apply(&self, builder: &mut QueryBuilder) {
        match self {
            Self::Latest => builder.use_latest_issue(None),
            Self::AsOf(as_of) => builder.use_latest_issue(Some(*as_of)),
            Self::Issues(issues) => builder.where_integers("issue", issues),
            Self::Lag(lag) => builder.where_equals_int("lag", *lag),
            Self::AllIssues => builder,
        };
    }

    /// Returns whether a series may contain several issues of one time value, in which case
    /// each issue forms its own series.
    pub fn groups_by_issue(&self) -> bool {
        matches!(self, Self::Issues(_) | Self::AllIssues)
    }
}

/// One issue of one observation, annotated with its backfill profile
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackfillRow {
    pub time_value: i64,
    pub issue: Option<i64>,
    pub lag: Option<i64>,
    pub value: Option<f64>,
    pub sample_size: Option<f64>,
    /// Relative change of the value since the previous issue
    pub value_rel_change: Option<f64>,
    /// Relative change of the sample size since the previous issue
    pub sample_size_rel_change: Option<f64>,
    pub is_anchor: bool,
    /// Value as a fraction of the anchor issue's value
    pub value_completeness: Option<f64>,
    /// Sample size as a fraction of the anchor issue's sample size
    pub sample_size_completeness: Option<f64>,
}

fn completeness(value: Option<f64>, anchor: Option<f64>) -> f64 {
    match anchor {
        Some(anchor) if anchor != 0.0 => value.unwrap_or(0.0) / anchor,
        _ => 1.0,
    }
}

/// Compute the backfill profile of each observation.
///
/// `rows` must hold the issues of one geo and signal, sorted by time value and then by issue.
/// The anchor of each time value is its latest issue whose lag does not exceed `anchor_lag`.
/// Time values without such an issue have no completeness.
pub fn compute_backfill(rows: &[Observation], anchor_lag: i64) -> Vec<BackfillRow> {
    let mut output = Vec::with_capacity(rows.len());
    for group in rows.chunk_by(|a, b| a.time_value == b.time_value) {
        debug_assert!(group.windows(2).all(|w| w[0].issue() <= w[1].issue()));
        let anchor = group
            .partition_point(|row| row.lag().map_or(true, |lag| lag <= anchor_lag))
            .checked_sub(1);
        let anchor_row = anchor.map(|index| &group[index]);
        for (index, row) in group.iter().enumerate() {
            let previous = index.checked_sub(1).map(|i| &group[i]);
            output.push(BackfillRow {
                time_value: row.time_value,
                issue: row.issue(),
                lag: row.lag(),
                value: row.value,
                sample_size: row.sample_size,
                value_rel_change: previous.map(|previous| {
                    trend_value(
                        row.value.unwrap_or(0.0),
                        previous.value.unwrap_or(0.0),
                        0.0,
                    )
                }),
                sample_size_rel_change: previous.map(|previous| {
                    trend_value(
                        row.sample_size.unwrap_or(0.0),
                        previous.sample_size.unwrap_or(0.0),
                        0.0,
                    )
                }),
                is_anchor: anchor == Some(index),
                value_completeness: anchor_row
                    .map(|anchor_row| completeness(row.value, anchor_row.value)),
                sample_size_completeness: anchor_row
                    .map(|anchor_row| completeness(row.sample_size, anchor_row.sample_size)),
            });
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::ParamValue;
    use crate::test_utils;

    fn issue_row(time_value: i64, issue: i64, value: Option<f64>, sample_size: Option<f64>) -> Observation {
        test_utils::observation("src", "sig", time_value, value)
            .with_issue(Some(issue))
            .with_values(value, None, sample_size)
    }

    #[test]
    fn test_from_params() {
        assert_eq!(
            VersionSelector::Latest,
            VersionSelector::from_params(None, None, None).unwrap()
        );
        assert_eq!(
            VersionSelector::AsOf(20200415),
            VersionSelector::from_params(None, None, Some("2020-04-15")).unwrap()
        );
        assert_eq!(
            VersionSelector::Lag(3),
            VersionSelector::from_params(None, Some(3), None).unwrap()
        );
        assert_eq!(
            VersionSelector::Issues(Values::List(vec![
                TimeValue::Single(20200414),
                TimeValue::Range(20200420, 20200422)
            ])),
            VersionSelector::from_params(Some("20200414,20200420-20200422"), None, None).unwrap()
        );
    }

    #[test]
    fn test_conflicting_params() {
        for (issues, lag, as_of) in [
            (Some("20200414"), Some(1), None),
            (Some("20200414"), None, Some("20200415")),
            (None, Some(1), Some("20200415")),
            (Some("20200414"), Some(1), Some("20200415")),
        ] {
            assert!(matches!(
                VersionSelector::from_params(issues, lag, as_of),
                Err(EpidataError::ConflictingVersioning)
            ));
        }
    }

    #[test]
    fn test_apply() {
        let mut builder = QueryBuilder::new("epimetric", "t");
        VersionSelector::Lag(2).apply(&mut builder);
        let query = builder.build();
        assert_eq!("SELECT t.* FROM epimetric t WHERE t.lag = :lag_0", query.sql);
        assert_eq!(Some(&ParamValue::Integer(2)), query.params.get(":lag_0"));

        let mut builder = QueryBuilder::new("epimetric", "t");
        VersionSelector::AsOf(20200415).apply(&mut builder);
        let query = builder.build();
        assert!(query.sql.contains("t_latest.issue <= :as_of_0"));

        let mut builder = QueryBuilder::new("epimetric", "t");
        VersionSelector::AllIssues.apply(&mut builder);
        assert_eq!("SELECT t.* FROM epimetric t", builder.build().sql);
    }

    #[test]
    fn test_backfill_fixture() {
        let rows = vec![
            issue_row(20200401, 20200401, Some(0.0), Some(1.0)),
            issue_row(20200401, 20200402, Some(1.0), Some(2.0)),
            issue_row(20200401, 20200403, Some(2.0), Some(3.0)),
        ];
        let backfill = compute_backfill(&rows, 3);
        assert_eq!(3, backfill.len());
        assert_eq!(
            vec![false, false, true],
            backfill.iter().map(|r| r.is_anchor).collect::<Vec<_>>()
        );
        assert_eq!(
            vec![Some(0.0), Some(0.5), Some(1.0)],
            backfill.iter().map(|r| r.value_completeness).collect::<Vec<_>>()
        );
        assert_eq!(
            vec![Some(1.0 / 3.0), Some(2.0 / 3.0), Some(1.0)],
            backfill
                .iter()
                .map(|r| r.sample_size_completeness)
                .collect::<Vec<_>>()
        );
        // 0 -> 1 has a zero reference, 1 -> 2 doubles.
        assert_eq!(
            vec![None, Some(1.0), Some(1.0)],
            backfill.iter().map(|r| r.value_rel_change).collect::<Vec<_>>()
        );
        assert_eq!(
            vec![None, Some(1.0), Some(0.5)],
            backfill
                .iter()
                .map(|r| r.sample_size_rel_change)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_backfill_anchor_is_latest_within_lag() {
        let rows = vec![
            issue_row(20200401, 20200402, Some(5.0), None),
            issue_row(20200401, 20200405, Some(8.0), None),
            issue_row(20200401, 20200420, Some(10.0), None),
        ];
        let backfill = compute_backfill(&rows, 10);
        assert_eq!(
            vec![false, true, false],
            backfill.iter().map(|r| r.is_anchor).collect::<Vec<_>>()
        );
        assert_eq!(Some(10.0 / 8.0), backfill[2].value_completeness);
        // No anchor sample size.
        assert_eq!(Some(1.0), backfill[0].sample_size_completeness);
    }

    #[test]
    fn test_backfill_without_anchor() {
        let rows = vec![
            issue_row(20200401, 20200410, Some(5.0), None),
            issue_row(20200402, 20200402, Some(2.0), None),
        ];
        let backfill = compute_backfill(&rows, 3);
        assert!(!backfill[0].is_anchor);
        assert_eq!(None, backfill[0].value_completeness);
        assert!(backfill[1].is_anchor);
        assert_eq!(Some(1.0), backfill[1].value_completeness);
        // Groups are independent.
        assert_eq!(None, backfill[1].value_rel_change);
    }

    #[test]
    fn test_backfill_zero_anchor() {
        let rows = vec![
            issue_row(20200401, 20200401, Some(3.0), None),
            issue_row(20200401, 20200402, Some(0.0), None),
        ];
        let backfill = compute_backfill(&rows, 60);
        assert_eq!(Some(1.0), backfill[0].value_completeness);
        assert_eq!(Some(-1.0), backfill[1].value_rel_change);
    }
}
