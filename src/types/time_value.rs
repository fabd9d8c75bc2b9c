//! Time values
//!
//! Observations are indexed by integer time values whose meaning depends on the [TimeType]:
//!
//! * Day values are `YYYYMMDD` integers, e.g. `20200414`.
//! * Week values are MMWR epiweeks `YYYYWW`, e.g. `202015`. Epiweeks start on a Sunday and week
//!   1 is the first week of the year containing at least four days of that year.
//!
//! Issues use the same encoding as the time values they describe, so lag is the number of
//! periods between the two.

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use time::{Date, Duration, Month};

use crate::error::EpidataError;

/// Time resolution of a signal
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TimeType {
    /// Daily values (`YYYYMMDD`)
    Day,
    /// MMWR epiweek values (`YYYYWW`)
    Week,
}

impl std::str::FromStr for TimeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            other => Err(format!("unknown time type `{other}`, expected `day` or `week`")),
        }
    }
}

impl TimeType {
    /// Number of days in one period of this type.
    fn days_per_period(self) -> i64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
        }
    }

    /// Returns the first calendar day of the period described by `value`.
    pub fn to_date(self, value: i64) -> Option<Date> {
        match self {
            Self::Day => day_to_date(value),
            Self::Week => week_to_date(value),
        }
    }

    /// Returns the time value of the period containing `date`.
    pub fn from_date(self, date: Date) -> Option<i64> {
        match self {
            Self::Day => Some(date_to_day(date)),
            Self::Week => date_to_week(date),
        }
    }

    /// Returns `value` shifted by `periods` periods (negative shifts move backwards).
    pub fn shift(self, value: i64, periods: i64) -> Option<i64> {
        let date = self.to_date(value)?;
        let seconds = periods
            .checked_mul(self.days_per_period())?
            .checked_mul(86_400)?;
        let shifted = date.checked_add(Duration::seconds(seconds))?;
        self.from_date(shifted)
    }

    /// Returns the number of periods between `time_value` and `issue`.
    pub fn lag(self, issue: i64, time_value: i64) -> Option<i64> {
        let issue = self.to_date(issue)?;
        let time_value = self.to_date(time_value)?;
        Some((issue - time_value).whole_days() / self.days_per_period())
    }

    /// Returns `value` if it is a valid time value of this type.
    pub fn validate(self, value: i64) -> Result<i64, EpidataError> {
        match self.to_date(value) {
            Some(_) => Ok(value),
            None => Err(EpidataError::InvalidTimeValue {
                time_type: self,
                value,
            }),
        }
    }
}

/// A single time value or an inclusive range of time values
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TimeValue {
    /// A single period
    Single(i64),
    /// An inclusive range of periods
    Range(i64, i64),
}

impl TimeValue {
    /// Returns whether `value` falls within this time value.
    pub fn contains(&self, value: i64) -> bool {
        match *self {
            Self::Single(single) => single == value,
            Self::Range(start, end) => start <= value && value <= end,
        }
    }

    /// Returns the first period.
    pub fn start(&self) -> i64 {
        match *self {
            Self::Single(value) | Self::Range(value, _) => value,
        }
    }

    /// Returns the last period.
    pub fn end(&self) -> i64 {
        match *self {
            Self::Single(value) | Self::Range(_, value) => value,
        }
    }

    /// Extends the start of this time value `periods` periods into the past.
    pub fn widen(&self, time_type: TimeType, periods: i64) -> Self {
        if periods == 0 {
            return *self;
        }
        let start = time_type
            .shift(self.start(), -periods)
            .unwrap_or(self.start());
        Self::Range(start, self.end())
    }
}

fn day_to_date(value: i64) -> Option<Date> {
    let year = i32::try_from(value / 10000).ok()?;
    let month = u8::try_from(value / 100 % 100).ok()?;
    let day = u8::try_from(value % 100).ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

fn date_to_day(date: Date) -> i64 {
    i64::from(date.year()) * 10000 + i64::from(u8::from(date.month())) * 100 + i64::from(date.day())
}

/// First day (a Sunday) of epiweek 1 of `year`.
fn epiweek_start(year: i32) -> Option<Date> {
    let jan1 = Date::from_calendar_date(year, Month::January, 1).ok()?;
    let offset = i64::from(jan1.weekday().number_days_from_sunday());
    if offset <= 3 {
        jan1.checked_sub(Duration::days(offset))
    } else {
        jan1.checked_add(Duration::days(7 - offset))
    }
}

fn week_to_date(value: i64) -> Option<Date> {
    let year = i32::try_from(value / 100).ok()?;
    let week = value % 100;
    if !(1..=53).contains(&week) {
        return None;
    }
    let date = epiweek_start(year)?.checked_add(Duration::weeks(week - 1))?;
    // Week 53 only exists in some years.
    (date_to_week(date)? == value).then_some(date)
}

fn date_to_week(date: Date) -> Option<i64> {
    let mut year = date.year();
    let mut start = epiweek_start(year)?;
    if date < start {
        year -= 1;
        start = epiweek_start(year)?;
    } else {
        let next = epiweek_start(year + 1)?;
        if date >= next {
            year += 1;
            start = next;
        }
    }
    let week = (date - start).whole_days() / 7 + 1;
    Some(i64::from(year) * 100 + week)
}

/// Parse a day value in `YYYYMMDD` or `YYYY-MM-DD` form.
pub fn parse_day_value(field: &'static str, raw: &str) -> Result<i64, EpidataError> {
    let raw = raw.trim();
    let digits = match raw.len() {
        8 => raw.to_string(),
        10 if raw.as_bytes()[4] == b'-' && raw.as_bytes()[7] == b'-' => raw.replace('-', ""),
        _ => return Err(invalid(field, format!("`{raw}` is not a day (YYYYMMDD)"))),
    };
    let value = parse_digits(field, &digits)?;
    TimeType::Day
        .to_date(value)
        .map(|_| value)
        .ok_or_else(|| invalid(field, format!("`{raw}` is not a valid date")))
}

/// Parse a week value in `YYYYWW` or `YYYY-WW` form.
pub fn parse_week_value(field: &'static str, raw: &str) -> Result<i64, EpidataError> {
    let raw = raw.trim();
    let digits = match raw.len() {
        6 => raw.to_string(),
        7 if raw.as_bytes()[4] == b'-' => raw.replace('-', ""),
        _ => return Err(invalid(field, format!("`{raw}` is not a week (YYYYWW)"))),
    };
    let value = parse_digits(field, &digits)?;
    TimeType::Week
        .to_date(value)
        .map(|_| value)
        .ok_or_else(|| invalid(field, format!("`{raw}` is not a valid epiweek")))
}

/// Parse a single value of the given time type.
pub fn parse_value(field: &'static str, time_type: TimeType, raw: &str) -> Result<i64, EpidataError> {
    match time_type {
        TimeType::Day => parse_day_value(field, raw),
        TimeType::Week => parse_week_value(field, raw),
    }
}

/// Parse a single value or range of the given time type.
///
/// Compact ranges are separated by a single dash (`20200401-20200410`), dashed ISO ranges by a
/// double dash (`2020-04-01--2020-04-10`).
pub fn parse_time_value(
    field: &'static str,
    time_type: TimeType,
    raw: &str,
) -> Result<TimeValue, EpidataError> {
    let raw = raw.trim();
    let bounds = if let Some((start, end)) = raw.split_once("--") {
        Some((start, end))
    } else if !raw.contains("--") && raw.matches('-').count() == 1 {
        let (start, end) = raw.split_once('-').unwrap_or((raw, raw));
        // A single dash inside a dashed week value (YYYY-WW) is not a range.
        (start.len() != 4).then_some((start, end))
    } else {
        None
    };
    match bounds {
        Some((start, end)) => {
            let start = parse_value(field, time_type, start)?;
            let end = parse_value(field, time_type, end)?;
            if start > end {
                return Err(invalid(
                    field,
                    format!("range start {start} is after range end {end}"),
                ));
            }
            Ok(if start == end {
                TimeValue::Single(start)
            } else {
                TimeValue::Range(start, end)
            })
        }
        None => parse_value(field, time_type, raw).map(TimeValue::Single),
    }
}

/// Guess the time type of a raw value from its shape.
pub fn guess_time_type(raw: &str) -> TimeType {
    let first = raw.trim().split("--").next().unwrap_or_default();
    let digits = first.chars().take_while(|c| *c != ',').filter(char::is_ascii_digit).count();
    if digits == 6 || (digits == 12 && !raw.contains("--")) {
        TimeType::Week
    } else {
        TimeType::Day
    }
}

fn parse_digits(field: &'static str, digits: &str) -> Result<i64, EpidataError> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(field, format!("`{digits}` is not numeric")));
    }
    digits
        .parse::<i64>()
        .map_err(|err| invalid(field, err.to_string()))
}

fn invalid(field: &'static str, message: String) -> EpidataError {
    EpidataError::InvalidSelector { field, message }
}
