//! Row transforms deriving one signal from another
//!
//! A derived signal is computed from the time ordered rows of its base signal by one of the
//! [Transform] kinds. Every transform is a lazy, single pass iterator adapter over one series
//! (one source, signal, geo and, where applicable, issue).
//!
//! Input rows must be in strictly ascending time value order. Windows are only meaningful when
//! consecutive rows are consecutive periods, so callers should first fill gaps with
//! [ReindexRows].
//!
//! Transforms need history before the first output row: see [Transform::pad_length].

use std::collections::VecDeque;

use serde::Serialize;
use strum_macros::Display;

use crate::models::Observation;
use crate::types::Missing;

/// Default smoothing window in periods
pub const DEFAULT_WINDOW: usize = 7;

/// Decimal places kept in derived values
const ROUND_DECIMALS: i32 = 7;

/// How a derived signal is computed from its base signal
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Transform {
    /// The base values unchanged
    Identity,
    /// Difference between consecutive values
    Diff,
    /// Mean over a sliding window
    Smooth,
    /// Difference, then mean over a sliding window
    DiffSmooth,
}

/// Options controlling transforms
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformOptions {
    /// Smoothing window in periods
    pub window: usize,
    /// Value substituted for missing input values. With no fill value a missing input makes
    /// the output missing.
    pub fill_value: Option<f64>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        TransformOptions {
            window: DEFAULT_WINDOW,
            fill_value: None,
        }
    }
}

impl Transform {
    /// Number of periods of input needed before the first output row.
    pub fn pad_length(self, window: usize) -> usize {
        match self {
            Self::Identity => 0,
            Self::Diff => 1,
            Self::Smooth => window.saturating_sub(1),
            Self::DiffSmooth => window,
        }
    }

    /// Apply the transform to a series.
    pub fn apply<I>(self, rows: I, options: &TransformOptions) -> TransformedRows<I>
    where
        I: Iterator<Item = Observation>,
    {
        match self {
            Self::Identity => TransformedRows::Identity(rows),
            Self::Diff => TransformedRows::Diff(DiffRows::new(rows, options.fill_value)),
            Self::Smooth => TransformedRows::Smooth(SmoothRows::new(rows, options)),
            Self::DiffSmooth => TransformedRows::DiffSmooth(SmoothRows::new(
                DiffRows::new(rows, options.fill_value),
                options,
            )),
        }
    }
}

/// Round to the precision of derived values.
pub fn round_value(value: f64) -> f64 {
    let scale = 10f64.powi(ROUND_DECIMALS);
    (value * scale).round() / scale
}

/// Build an output row from the input row it is aligned with.
fn derived_row(row: Observation, value: Option<f64>, issue: Option<i64>) -> Observation {
    let value = value.filter(|value| !value.is_nan());
    let mut row = row.with_issue(issue);
    row.value = value;
    row.stderr = None;
    row.sample_size = None;
    row.direction = None;
    row.missing_value = Missing::for_derived(value);
    row.missing_stderr = Missing::NotApplicable;
    row.missing_sample_size = Missing::NotApplicable;
    row
}

/// Differences of consecutive rows
///
/// Emits one row per input row after the first, aligned with the later row of each pair.
pub struct DiffRows<I> {
    rows: I,
    fill_value: Option<f64>,
    /// Time value, value and issue of the previous row
    previous: Option<(i64, Option<f64>, Option<i64>)>,
}

impl<I: Iterator<Item = Observation>> DiffRows<I> {
    pub fn new(rows: I, fill_value: Option<f64>) -> Self {
        DiffRows {
            rows,
            fill_value,
            previous: None,
        }
    }
}

impl<I: Iterator<Item = Observation>> Iterator for DiffRows<I> {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        loop {
            let row = self.rows.next()?;
            let current = (row.time_value, row.value, row.issue());
            let Some((time_value, value, issue)) = self.previous.replace(current) else {
                continue;
            };
            debug_assert!(time_value < row.time_value, "rows are not in time order");
            let value = match (row.value.or(self.fill_value), value.or(self.fill_value)) {
                (Some(current), Some(previous)) => Some(round_value(current - previous)),
                _ => None,
            };
            let issue = match (issue, row.issue()) {
                (Some(previous), Some(current)) => Some(previous.max(current)),
                _ => None,
            };
            return Some(derived_row(row, value, issue));
        }
    }
}

/// Means over a sliding window
///
/// Emits one row per full window, aligned with the last row of the window.
pub struct SmoothRows<I> {
    rows: I,
    window: usize,
    fill_value: Option<f64>,
    /// Values and issues of the rows in the current window
    buffer: VecDeque<(Option<f64>, Option<i64>)>,
    /// Time value of the previous row
    previous: Option<i64>,
}

impl<I: Iterator<Item = Observation>> SmoothRows<I> {
    pub fn new(rows: I, options: &TransformOptions) -> Self {
        let window = options.window.max(1);
        SmoothRows {
            rows,
            window,
            fill_value: options.fill_value,
            buffer: VecDeque::with_capacity(window),
            previous: None,
        }
    }
}

impl<I: Iterator<Item = Observation>> Iterator for SmoothRows<I> {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        loop {
            let row = self.rows.next()?;
            debug_assert!(
                self.previous.map_or(true, |previous| previous < row.time_value),
                "rows are not in time order"
            );
            self.previous = Some(row.time_value);
            if self.buffer.len() == self.window {
                self.buffer.pop_front();
            }
            self.buffer.push_back((row.value, row.issue()));
            if self.buffer.len() < self.window {
                continue;
            }
            let value = self
                .buffer
                .iter()
                .map(|(value, _)| value.or(self.fill_value))
                .sum::<Option<f64>>()
                .map(|sum| round_value(sum / self.window as f64));
            let issue = self
                .buffer
                .iter()
                .map(|(_, issue)| *issue)
                .collect::<Option<Vec<i64>>>()
                .and_then(|issues| issues.into_iter().max());
            return Some(derived_row(row, value, issue));
        }
    }
}

/// Rows of a series after a transform
pub enum TransformedRows<I> {
    Identity(I),
    Diff(DiffRows<I>),
    Smooth(SmoothRows<I>),
    DiffSmooth(SmoothRows<DiffRows<I>>),
}

impl<I: Iterator<Item = Observation>> Iterator for TransformedRows<I> {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        match self {
            Self::Identity(rows) => rows.next(),
            Self::Diff(rows) => rows.next(),
            Self::Smooth(rows) => rows.next(),
            Self::DiffSmooth(rows) => rows.next(),
        }
    }
}

/// Fills gaps in a time ordered series with placeholder rows
///
/// Placeholders have no value and no issue, and are marked [Missing::NotApplicable].
pub struct ReindexRows<I> {
    rows: I,
    /// Next row read from the input, held back while a gap is filled
    pending: Option<Observation>,
    /// Time value expected next
    expected: Option<i64>,
}

impl<I: Iterator<Item = Observation>> ReindexRows<I> {
    pub fn new(rows: I) -> Self {
        ReindexRows {
            rows,
            pending: None,
            expected: None,
        }
    }
}

impl<I: Iterator<Item = Observation>> Iterator for ReindexRows<I> {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        let row = match self.pending.take() {
            Some(row) => row,
            None => self.rows.next()?,
        };
        if let Some(expected) = self.expected {
            if row.time_value > expected {
                let placeholder = Observation::new(
                    &row.source,
                    &row.signal,
                    row.time_type,
                    expected,
                    &row.geo_type,
                    &row.geo_value,
                );
                self.expected = row.time_type.shift(expected, 1);
                self.pending = Some(row);
                return Some(placeholder);
            }
        }
        self.expected = row.time_type.shift(row.time_value, 1);
        Some(row)
    }
}
