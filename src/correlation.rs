//! Lag correlation between two series
//!
//! For each lag in `[-max_lag, max_lag]` the reference series is shifted by the lag, inner
//! joined with the other series on time value, and an ordinary least squares line
//! `other = slope * reference + intercept` is fitted to the joined points.

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::Serialize;

/// Regression of one series against another at one lag
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CorrelationResult {
    /// Periods by which the other series trails the reference
    pub lag: i64,
    pub r2: Option<f64>,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    /// Number of joined points used in the regression
    pub samples: usize,
}

struct Fit {
    r2: f64,
    slope: f64,
    intercept: f64,
}

/// Fit `y = slope * x + intercept`. Returns `None` unless `x` has some variance.
fn linear_regression(x: &Array1<f64>, y: &Array1<f64>) -> Option<Fit> {
    let mean_x = x.mean()?;
    let mean_y = y.mean()?;
    let x_centred = x - mean_x;
    let y_centred = y - mean_y;
    let sxx = x_centred.dot(&x_centred);
    if sxx == 0.0 {
        return None;
    }
    let sxy = x_centred.dot(&y_centred);
    let syy = y_centred.dot(&y_centred);
    let slope = sxy / sxx;
    let r2 = if syy == 0.0 {
        0.0
    } else {
        sxy * sxy / (sxx * syy)
    };
    Some(Fit {
        r2,
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

/// Correlate `other` against `reference` at every lag in `[-max_lag, max_lag]`.
///
/// Returns one result per lag in ascending lag order, or nothing if either series is empty.
///
/// # Arguments
///
/// * `reference`: Reference series keyed by time value
/// * `other`: Other series keyed by time value
/// * `max_lag`: Greatest absolute lag in periods
/// * `shift`: Shifts a time value by a number of periods
pub fn compute_correlations<F>(
    reference: &BTreeMap<i64, f64>,
    other: &BTreeMap<i64, f64>,
    max_lag: i64,
    shift: F,
) -> Vec<CorrelationResult>
where
    F: Fn(i64, i64) -> Option<i64>,
{
    if reference.is_empty() || other.is_empty() {
        return vec![];
    }
    (-max_lag..=max_lag)
        .map(|lag| {
            let (x, y): (Vec<f64>, Vec<f64>) = reference
                .iter()
                .filter_map(|(&time_value, &x)| {
                    let shifted = shift(time_value, lag)?;
                    other.get(&shifted).map(|&y| (x, y))
                })
                .unzip();
            let samples = x.len();
            let fit = linear_regression(&Array1::from(x), &Array1::from(y));
            CorrelationResult {
                lag,
                r2: fit.as_ref().map(|fit| fit.r2),
                slope: fit.as_ref().map(|fit| fit.slope),
                intercept: fit.as_ref().map(|fit| fit.intercept),
                samples,
            }
        })
        .collect()
}
