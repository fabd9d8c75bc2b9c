//! Trend classification
//!
//! A trend compares a value with a reference value relative to a floor, and classifies the
//! relative change as increasing, decreasing or steady. Each [Trend] compares one point with
//! its basis point and with the minimum and maximum of its series, all floored at the series
//! minimum.

use std::collections::HashMap;

use serde::Serialize;
use strum_macros::Display;

/// Relative change at or beyond which a trend is not steady
pub const TREND_THRESHOLD: f64 = 0.1;

/// Direction of a trend
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrendClass {
    /// A compared point does not exist
    Unknown,
    Increasing,
    Decreasing,
    Steady,
}

/// Relative change of `current` over `reference`, both measured from `floor`.
pub fn trend_value(current: f64, reference: f64, floor: f64) -> f64 {
    let current = current - floor;
    let reference = reference - floor;
    if current == reference {
        0.0
    } else if reference == 0.0 {
        1.0
    } else {
        current / reference - 1.0
    }
}

/// Classify a relative change.
pub fn classify(trend_value: f64) -> TrendClass {
    if trend_value >= TREND_THRESHOLD {
        TrendClass::Increasing
    } else if trend_value <= -TREND_THRESHOLD {
        TrendClass::Decreasing
    } else {
        TrendClass::Steady
    }
}

fn classify_points(current: Option<f64>, reference: Option<f64>, floor: Option<f64>) -> TrendClass {
    match (current, reference, floor) {
        (Some(current), Some(reference), Some(floor)) => {
            classify(trend_value(current, reference, floor))
        }
        _ => TrendClass::Unknown,
    }
}

/// Trend of one point of a series
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trend {
    pub date: i64,
    pub value: Option<f64>,
    pub basis_date: Option<i64>,
    pub basis_value: Option<f64>,
    pub basis_trend: TrendClass,
    pub min_date: Option<i64>,
    pub min_value: Option<f64>,
    pub min_trend: TrendClass,
    pub max_date: Option<i64>,
    pub max_value: Option<f64>,
    pub max_trend: TrendClass,
}

impl Trend {
    fn new(
        date: i64,
        value: Option<f64>,
        basis_date: Option<i64>,
        basis_value: Option<f64>,
        min: Option<(i64, f64)>,
        max: Option<(i64, f64)>,
    ) -> Self {
        let floor = min.map(|(_, min)| min);
        Trend {
            date,
            value,
            basis_date,
            basis_value,
            basis_trend: classify_points(value, basis_value, floor),
            min_date: min.map(|(date, _)| date),
            min_value: floor,
            min_trend: classify_points(value, floor, floor),
            max_date: max.map(|(date, _)| date),
            max_value: max.map(|(_, max)| max),
            max_trend: classify_points(value, max.map(|(_, max)| max), floor),
        }
    }
}

/// Running minimum and maximum, keeping the first occurrence of ties.
#[derive(Default)]
struct Extremes {
    min: Option<(i64, f64)>,
    max: Option<(i64, f64)>,
}

impl Extremes {
    fn update(&mut self, date: i64, value: f64) {
        if self.min.map_or(true, |(_, min)| value < min) {
            self.min = Some((date, value));
        }
        if self.max.map_or(true, |(_, max)| value > max) {
            self.max = Some((date, value));
        }
    }
}

/// Compute the trend of the point at `date` in one pass over a series.
///
/// # Arguments
///
/// * `series`: (time value, value) points of one geo and signal
/// * `date`: The time value to evaluate
/// * `basis_date`: The time value to compare against, if any
pub fn compute_trend<I>(series: I, date: i64, basis_date: Option<i64>) -> Trend
where
    I: IntoIterator<Item = (i64, Option<f64>)>,
{
    let mut value = None;
    let mut basis_value = None;
    let mut extremes = Extremes::default();
    for (time_value, point) in series {
        if time_value == date {
            value = point;
        }
        if Some(time_value) == basis_date {
            basis_value = point;
        }
        if let Some(point) = point {
            extremes.update(time_value, point);
        }
    }
    Trend::new(date, value, basis_date, basis_value, extremes.min, extremes.max)
}

/// Compute the trend of every point of a time ordered series.
///
/// Each point's basis is found by applying `shift` to its time value and looking the result up
/// among the points seen so far. The minimum and maximum are those of the points seen so far.
pub fn compute_trend_series<I, F>(series: I, shift: F) -> Vec<Trend>
where
    I: IntoIterator<Item = (i64, Option<f64>)>,
    F: Fn(i64) -> Option<i64>,
{
    let mut lookup: HashMap<i64, Option<f64>> = HashMap::new();
    let mut extremes = Extremes::default();
    let mut trends = Vec::new();
    for (time_value, value) in series {
        lookup.insert(time_value, value);
        if let Some(value) = value {
            extremes.update(time_value, value);
        }
        let basis_date = shift(time_value);
        let basis_value = basis_date.and_then(|basis| lookup.get(&basis).copied().flatten());
        trends.push(Trend::new(
            time_value,
            value,
            basis_date,
            basis_value,
            extremes.min,
            extremes.max,
        ));
    }
    trends
}
