//! Request selectors
//!
//! Clients select data with three kinds of selector, each a discriminant plus a set of values:
//!
//! * [SourceSignalPair]: a data source and some or all of its signals.
//! * [GeoPair]: a geo type and some or all of its geo values.
//! * [TimePair]: a time type and some or all of its time values, which may include ranges.
//!
//! The compact syntax is `<discriminant>:<value>,<value>;<discriminant>:*` where a lone `*`
//! selects every value of the discriminant. The legacy parameters (`data_source` + `signals`,
//! `geo_type` + `geo_values`, `time_type` + `time_values`) are converted into single pairs.

use crate::error::EpidataError;
use crate::types::time_value::{self, TimeType, TimeValue};

/// Either every value of a discriminant, or an explicit list of values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Values<T> {
    /// All values
    All,
    /// An explicit, non-empty list of values
    List(Vec<T>),
}

impl<T: PartialEq + Clone> Values<T> {
    /// Combine two value sets. `All` absorbs everything; lists are unioned preserving order.
    pub fn merge(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::List(left), Self::List(right)) => {
                let mut merged = left.clone();
                for value in right {
                    if !merged.contains(value) {
                        merged.push(value.clone());
                    }
                }
                Self::List(merged)
            }
        }
    }

    /// Returns whether every value is selected.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl Values<TimeValue> {
    /// Returns whether `value` is selected.
    pub fn contains_time(&self, value: i64) -> bool {
        match self {
            Self::All => true,
            Self::List(values) => values.iter().any(|v| v.contains(value)),
        }
    }
}

impl Values<String> {
    /// Returns whether `value` is selected.
    pub fn contains_str(&self, value: &str) -> bool {
        match self {
            Self::All => true,
            Self::List(values) => values.iter().any(|v| v == value),
        }
    }
}

/// A data source and a selection of its signals
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceSignalPair {
    pub source: String,
    pub signals: Values<String>,
}

impl SourceSignalPair {
    pub fn new(source: &str, signals: Values<String>) -> Self {
        Self {
            source: source.to_string(),
            signals,
        }
    }

    /// A pair selecting exactly one signal.
    pub fn single(source: &str, signal: &str) -> Self {
        Self::new(source, Values::List(vec![signal.to_string()]))
    }
}

/// A geo type and a selection of its geo values
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeoPair {
    pub geo_type: String,
    pub geo_values: Values<String>,
}

impl GeoPair {
    pub fn new(geo_type: &str, geo_values: Values<String>) -> Self {
        Self {
            geo_type: geo_type.to_string(),
            geo_values,
        }
    }
}

/// A time type and a selection of its time values
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimePair {
    pub time_type: TimeType,
    pub time_values: Values<TimeValue>,
}

impl TimePair {
    pub fn new(time_type: TimeType, time_values: Values<TimeValue>) -> Self {
        Self {
            time_type,
            time_values,
        }
    }

    /// Returns a copy whose values each start `periods` periods earlier.
    pub fn widen(&self, periods: i64) -> Self {
        let time_values = match &self.time_values {
            Values::All => Values::All,
            Values::List(values) => Values::List(
                values
                    .iter()
                    .map(|value| value.widen(self.time_type, periods))
                    .collect(),
            ),
        };
        Self::new(self.time_type, time_values)
    }
}

/// Returns whether any of `pairs` selects the given time value. An empty list selects all.
pub fn time_pairs_contain(pairs: &[TimePair], time_type: TimeType, time_value: i64) -> bool {
    pairs.is_empty()
        || pairs
            .iter()
            .any(|pair| pair.time_type == time_type && pair.time_values.contains_time(time_value))
}

fn invalid(field: &'static str, message: impl Into<String>) -> EpidataError {
    EpidataError::InvalidSelector {
        field,
        message: message.into(),
    }
}

/// Split a comma separated list, rejecting empty entries.
fn parse_list(field: &'static str, raw: &str) -> Result<Values<String>, EpidataError> {
    let raw = raw.trim();
    if raw == "*" {
        return Ok(Values::All);
    }
    let values = raw
        .split(',')
        .map(str::trim)
        .map(|value| {
            if value.is_empty() {
                Err(invalid(field, format!("empty value in `{raw}`")))
            } else if value == "*" {
                Err(invalid(field, "`*` must be the only value"))
            } else {
                Ok(value.to_string())
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Values::List(values))
}

/// Parse `<discriminant>:<values>;...` into merged (discriminant, values) groups.
fn parse_groups(field: &'static str, raw: &str) -> Result<Vec<(String, Values<String>)>, EpidataError> {
    let mut groups: Vec<(String, Values<String>)> = Vec::new();
    for group in raw.split(';').map(str::trim).filter(|group| !group.is_empty()) {
        let (discriminant, values) = group.split_once(':').ok_or_else(|| {
            invalid(
                field,
                format!("`{group}` does not match the format <type>:<values>"),
            )
        })?;
        let discriminant = discriminant.trim();
        if discriminant.is_empty() {
            return Err(invalid(field, format!("missing type in `{group}`")));
        }
        let values = parse_list(field, values)?;
        match groups.iter_mut().find(|(d, _)| d == discriminant) {
            Some((_, existing)) => *existing = existing.merge(&values),
            None => groups.push((discriminant.to_string(), values)),
        }
    }
    if groups.is_empty() {
        return Err(invalid(field, "at least one selector is required"));
    }
    Ok(groups)
}

/// Parse a compact source/signal selector, e.g. `jhu-csse:confirmed_incidence_num;fb-survey:*`.
pub fn parse_source_signal_arg(
    field: &'static str,
    raw: &str,
) -> Result<Vec<SourceSignalPair>, EpidataError> {
    Ok(parse_groups(field, raw)?
        .into_iter()
        .map(|(source, signals)| SourceSignalPair { source, signals })
        .collect())
}

/// Parse a compact source/signal selector that must name exactly one signal.
pub fn parse_single_source_signal_arg(
    field: &'static str,
    raw: &str,
) -> Result<SourceSignalPair, EpidataError> {
    match parse_source_signal_arg(field, raw)?.as_slice() {
        [pair @ SourceSignalPair {
            signals: Values::List(signals),
            ..
        }] if signals.len() == 1 => Ok(pair.clone()),
        _ => Err(invalid(field, "exactly one <source>:<signal> is required")),
    }
}

/// Parse a compact geo selector, e.g. `county:01234,01235;state:*`.
pub fn parse_geo_arg(field: &'static str, raw: &str) -> Result<Vec<GeoPair>, EpidataError> {
    Ok(parse_groups(field, raw)?
        .into_iter()
        .map(|(geo_type, geo_values)| GeoPair {
            geo_type,
            geo_values,
        })
        .collect())
}

/// Parse a compact geo selector that must name exactly one geo value.
pub fn parse_single_geo_arg(field: &'static str, raw: &str) -> Result<GeoPair, EpidataError> {
    match parse_geo_arg(field, raw)?.as_slice() {
        [pair @ GeoPair {
            geo_values: Values::List(values),
            ..
        }] if values.len() == 1 => Ok(pair.clone()),
        _ => Err(invalid(field, "exactly one <geo_type>:<geo_value> is required")),
    }
}

/// Parse a list of time values or ranges of a known type.
pub fn parse_time_values(
    field: &'static str,
    time_type: TimeType,
    raw: &str,
) -> Result<Values<TimeValue>, EpidataError> {
    let raw = raw.trim();
    if raw == "*" {
        return Ok(Values::All);
    }
    let values = raw
        .split(',')
        .map(|value| time_value::parse_time_value(field, time_type, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Values::List(values))
}

/// Parse a compact time selector, e.g. `day:20200401-20200410,20200415;week:*`.
pub fn parse_time_arg(field: &'static str, raw: &str) -> Result<Vec<TimePair>, EpidataError> {
    let mut pairs: Vec<TimePair> = Vec::new();
    for group in raw.split(';').map(str::trim).filter(|group| !group.is_empty()) {
        let (time_type, values) = group.split_once(':').ok_or_else(|| {
            invalid(
                field,
                format!("`{group}` does not match the format <time_type>:<values>"),
            )
        })?;
        let time_type: TimeType = time_type.trim().parse().map_err(|e: String| invalid(field, e))?;
        let values = parse_time_values(field, time_type, values)?;
        match pairs.iter_mut().find(|pair| pair.time_type == time_type) {
            Some(existing) => existing.time_values = existing.time_values.merge(&values),
            None => pairs.push(TimePair::new(time_type, values)),
        }
    }
    if pairs.is_empty() {
        return Err(invalid(field, "at least one selector is required"));
    }
    Ok(pairs)
}

/// Parse a list of day or week values whose type is inferred from their format, e.g. the
/// `issues` parameter.
pub fn parse_day_or_week_values(
    field: &'static str,
    raw: &str,
) -> Result<(TimeType, Values<TimeValue>), EpidataError> {
    let time_type = time_value::guess_time_type(raw);
    Ok((time_type, parse_time_values(field, time_type, raw)?))
}

/// Parse a single day or week value whose type is inferred from its format.
pub fn parse_day_or_week_value(
    field: &'static str,
    raw: &str,
) -> Result<(TimeType, i64), EpidataError> {
    let time_type = time_value::guess_time_type(raw);
    Ok((time_type, time_value::parse_value(field, time_type, raw)?))
}

/// Parse an explicit day or week range, e.g. the `window` parameter.
pub fn parse_day_or_week_range(
    field: &'static str,
    raw: &str,
) -> Result<(TimeType, i64, i64), EpidataError> {
    let time_type = time_value::guess_time_type(raw);
    match time_value::parse_time_value(field, time_type, raw)? {
        TimeValue::Single(value) => Ok((time_type, value, value)),
        TimeValue::Range(start, end) => Ok((time_type, start, end)),
    }
}

/// Convert the legacy `data_source` + `signal(s)` parameters into a pair.
pub fn source_signal_from_legacy(
    data_source: &str,
    signals: &str,
) -> Result<SourceSignalPair, EpidataError> {
    let data_source = data_source.trim();
    if data_source.is_empty() || data_source.contains([':', ';', ',']) {
        return Err(invalid("data_source", format!("invalid data source `{data_source}`")));
    }
    Ok(SourceSignalPair::new(data_source, parse_list("signals", signals)?))
}

/// Convert the legacy `geo_type` + `geo_value(s)` parameters into a pair.
pub fn geo_from_legacy(geo_type: &str, geo_values: &str) -> Result<GeoPair, EpidataError> {
    let geo_type = geo_type.trim();
    if geo_type.is_empty() || geo_type.contains([':', ';', ',']) {
        return Err(invalid("geo_type", format!("invalid geo type `{geo_type}`")));
    }
    Ok(GeoPair::new(geo_type, parse_list("geo_values", geo_values)?))
}

/// Convert the legacy `time_type` + `time_values` parameters into a pair.
pub fn time_from_legacy(time_type: &str, time_values: &str) -> Result<TimePair, EpidataError> {
    let time_type: TimeType = time_type
        .trim()
        .parse()
        .map_err(|e: String| invalid("time_type", e))?;
    Ok(TimePair::new(
        time_type,
        parse_time_values("time_values", time_type, time_values)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(values: &[&str]) -> Values<String> {
        Values::List(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn source_signal_compact() {
        let pairs =
            parse_source_signal_arg("signal", "src1:sig1,sig2;src2:*").unwrap();
        assert_eq!(
            vec![
                SourceSignalPair::new("src1", list(&["sig1", "sig2"])),
                SourceSignalPair::new("src2", Values::All),
            ],
            pairs
        );
    }

    #[test]
    fn source_signal_merges_duplicates() {
        let pairs = parse_source_signal_arg("signal", "src1:sig1;src1:sig2,sig1").unwrap();
        assert_eq!(
            vec![SourceSignalPair::new("src1", list(&["sig1", "sig2"]))],
            pairs
        );
        let pairs = parse_source_signal_arg("signal", "src1:sig1;src1:*").unwrap();
        assert_eq!(vec![SourceSignalPair::new("src1", Values::All)], pairs);
    }

    #[test]
    fn source_signal_malformed() {
        let error = parse_source_signal_arg("signal", "src1").unwrap_err();
        assert_eq!(
            "signal: `src1` does not match the format <type>:<values>",
            error.to_string()
        );
        assert!(parse_source_signal_arg("signal", ":sig").is_err());
        assert!(parse_source_signal_arg("signal", "src:").is_err());
        assert!(parse_source_signal_arg("signal", "src:a,,b").is_err());
        assert!(parse_source_signal_arg("signal", "src:a,*").is_err());
        assert!(parse_source_signal_arg("signal", ";").is_err());
    }

    #[test]
    fn single_source_signal() {
        assert_eq!(
            SourceSignalPair::single("src", "sig"),
            parse_single_source_signal_arg("reference", "src:sig").unwrap()
        );
        assert!(parse_single_source_signal_arg("reference", "src:a,b").is_err());
        assert!(parse_single_source_signal_arg("reference", "src:*").is_err());
        assert!(parse_single_source_signal_arg("reference", "a:b;c:d").is_err());
    }

    #[test]
    fn geo_compact() {
        let pairs = parse_geo_arg("geo", "county:01234,01235;state:*").unwrap();
        assert_eq!(
            vec![
                GeoPair::new("county", list(&["01234", "01235"])),
                GeoPair::new("state", Values::All),
            ],
            pairs
        );
        assert!(parse_single_geo_arg("geo", "state:*").is_err());
    }

    #[test]
    fn time_compact() {
        let pairs = parse_time_arg("time", "day:20200401-20200410,20200415;week:*").unwrap();
        assert_eq!(
            vec![
                TimePair::new(
                    TimeType::Day,
                    Values::List(vec![
                        TimeValue::Range(20200401, 20200410),
                        TimeValue::Single(20200415)
                    ])
                ),
                TimePair::new(TimeType::Week, Values::All),
            ],
            pairs
        );
    }

    #[test]
    fn time_unknown_type() {
        let error = parse_time_arg("time", "month:202001").unwrap_err();
        assert!(error.to_string().starts_with("time: unknown time type"));
    }

    #[test]
    fn legacy_conversion() {
        assert_eq!(
            SourceSignalPair::new("src", list(&["a", "b"])),
            source_signal_from_legacy("src", "a,b").unwrap()
        );
        assert_eq!(
            GeoPair::new("county", Values::All),
            geo_from_legacy("county", "*").unwrap()
        );
        assert_eq!(
            TimePair::new(TimeType::Day, Values::List(vec![TimeValue::Single(20200414)])),
            time_from_legacy("day", "20200414").unwrap()
        );
        assert!(source_signal_from_legacy("a:b", "c").is_err());
        assert!(time_from_legacy("hour", "1").is_err());
    }

    #[test]
    fn day_or_week_inference() {
        assert_eq!(
            (TimeType::Week, 202015),
            parse_day_or_week_value("date", "202015").unwrap()
        );
        assert_eq!(
            (TimeType::Day, 20200401, 20200430),
            parse_day_or_week_range("window", "20200401-20200430").unwrap()
        );
        let (time_type, values) = parse_day_or_week_values("issues", "20200414,20200420-20200425").unwrap();
        assert_eq!(TimeType::Day, time_type);
        assert!(values.contains_time(20200422));
        assert!(!values.contains_time(20200419));
    }

    #[test]
    fn time_pairs_membership() {
        let pairs = parse_time_arg("time", "day:20200401-20200410").unwrap();
        assert!(time_pairs_contain(&pairs, TimeType::Day, 20200405));
        assert!(!time_pairs_contain(&pairs, TimeType::Day, 20200411));
        assert!(!time_pairs_contain(&pairs, TimeType::Week, 202015));
        assert!(time_pairs_contain(&[], TimeType::Week, 202015));
    }
}
