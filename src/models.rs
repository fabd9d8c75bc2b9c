//! Data types and associated functions and methods

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::EpidataError;
use crate::printer::Format;
use crate::selectors::{self, GeoPair, SourceSignalPair, TimePair, Values};
use crate::types::{time_value, Missing, TimeType, TimeValue};
use crate::versioning::VersionSelector;

/// A single published datum
///
/// Identified by (source, signal, time_type, time_value, geo_type, geo_value, issue). The issue
/// is private so that `lag` can only change together with it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Observation {
    pub source: String,
    pub signal: String,
    pub geo_type: String,
    pub geo_value: String,
    pub time_type: TimeType,
    pub time_value: i64,
    issue: Option<i64>,
    lag: Option<i64>,
    pub value: Option<f64>,
    pub stderr: Option<f64>,
    pub sample_size: Option<f64>,
    pub direction: Option<i64>,
    pub missing_value: Missing,
    pub missing_stderr: Missing,
    pub missing_sample_size: Missing,
}

impl Observation {
    /// Return an Observation with no values or issue.
    pub fn new(
        source: &str,
        signal: &str,
        time_type: TimeType,
        time_value: i64,
        geo_type: &str,
        geo_value: &str,
    ) -> Self {
        Observation {
            source: source.to_string(),
            signal: signal.to_string(),
            geo_type: geo_type.to_string(),
            geo_value: geo_value.to_string(),
            time_type,
            time_value,
            issue: None,
            lag: None,
            value: None,
            stderr: None,
            sample_size: None,
            direction: None,
            missing_value: Missing::NotApplicable,
            missing_stderr: Missing::NotApplicable,
            missing_sample_size: Missing::NotApplicable,
        }
    }

    /// Set the issue, recomputing the lag from it.
    pub fn with_issue(mut self, issue: Option<i64>) -> Self {
        self.issue = issue;
        self.lag = issue.and_then(|issue| self.time_type.lag(issue, self.time_value));
        self
    }

    /// Set the value fields. Absent fields are marked [Missing::Other].
    pub fn with_values(
        mut self,
        value: Option<f64>,
        stderr: Option<f64>,
        sample_size: Option<f64>,
    ) -> Self {
        self.value = value;
        self.stderr = stderr;
        self.sample_size = sample_size;
        self.missing_value = Missing::NotMissing.coerce(value);
        self.missing_stderr = Missing::NotMissing.coerce(stderr);
        self.missing_sample_size = Missing::NotMissing.coerce(sample_size);
        self
    }

    pub fn issue(&self) -> Option<i64> {
        self.issue
    }

    pub fn lag(&self) -> Option<i64> {
        self.lag
    }

    /// Returns whether this row belongs to the same series as `other`.
    pub fn same_series(&self, other: &Observation) -> bool {
        self.source == other.source
            && self.signal == other.signal
            && self.time_type == other.time_type
            && self.geo_type == other.geo_type
            && self.geo_value == other.geo_value
    }
}

fn first<'a>(values: &[&'a Option<String>]) -> Option<&'a str> {
    values.iter().find_map(|value| value.as_deref())
}

fn missing(field: &'static str) -> EpidataError {
    EpidataError::InvalidSelector {
        field,
        message: "missing parameter".to_string(),
    }
}

fn default_basis_shift() -> i64 {
    7
}

fn default_max_lag() -> i64 {
    28
}

fn default_anchor_lag() -> i64 {
    60
}

/// Request data for the signal query endpoint
///
/// Accepts the compact selectors (`signal`, `geo`, `time`) and the legacy parameter names.
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_signal_request"))]
pub struct SignalRequest {
    /// Compact source/signal selector, or the signal list with `data_source`
    pub signal: Option<String>,
    /// Alias of `signal`
    pub signals: Option<String>,
    /// Legacy source name
    pub data_source: Option<String>,
    /// Compact geo selector
    pub geo: Option<String>,
    /// Alias of `geo`
    pub geos: Option<String>,
    /// Legacy geo type
    pub geo_type: Option<String>,
    /// Legacy geo value list
    pub geo_value: Option<String>,
    /// Alias of `geo_value`
    pub geo_values: Option<String>,
    /// Compact time selector
    pub time: Option<String>,
    /// Legacy time type
    pub time_type: Option<String>,
    /// Legacy time value list
    pub time_values: Option<String>,
    /// Explicit issues
    pub issues: Option<String>,
    /// Exact lag
    #[validate(range(min = 0, message = "lag must not be negative"))]
    pub lag: Option<i64>,
    /// Latest issue no later than this date
    pub as_of: Option<String>,
    /// Response format
    pub format: Option<Format>,
}

/// Validate the presence of the signal query selectors
fn validate_signal_request(request: &SignalRequest) -> Result<(), ValidationError> {
    if request.signal.is_none() && request.signals.is_none() {
        return Err(ValidationError::new("signal is required"));
    }
    if request.geo.is_none() && request.geos.is_none() && request.geo_type.is_none() {
        return Err(ValidationError::new("geo is required"));
    }
    if request.time.is_none() && request.time_type.is_none() {
        return Err(ValidationError::new("time is required"));
    }
    Ok(())
}

impl SignalRequest {
    pub fn source_signal_pairs(&self) -> Result<Vec<SourceSignalPair>, EpidataError> {
        let signals = first(&[&self.signal, &self.signals]).ok_or_else(|| missing("signal"))?;
        match &self.data_source {
            Some(data_source) => Ok(vec![selectors::source_signal_from_legacy(
                data_source,
                signals,
            )?]),
            None => selectors::parse_source_signal_arg("signal", signals),
        }
    }

    pub fn geo_pairs(&self) -> Result<Vec<GeoPair>, EpidataError> {
        if let Some(geo) = first(&[&self.geo, &self.geos]) {
            return selectors::parse_geo_arg("geo", geo);
        }
        let geo_type = self.geo_type.as_deref().ok_or_else(|| missing("geo"))?;
        let geo_values = first(&[&self.geo_value, &self.geo_values]).unwrap_or("*");
        Ok(vec![selectors::geo_from_legacy(geo_type, geo_values)?])
    }

    pub fn time_pairs(&self) -> Result<Vec<TimePair>, EpidataError> {
        if let Some(time) = &self.time {
            return selectors::parse_time_arg("time", time);
        }
        let time_type = self.time_type.as_deref().ok_or_else(|| missing("time"))?;
        let time_values = self.time_values.as_deref().unwrap_or("*");
        Ok(vec![selectors::time_from_legacy(time_type, time_values)?])
    }

    pub fn version(&self) -> Result<VersionSelector, EpidataError> {
        VersionSelector::from_params(self.issues.as_deref(), self.lag, self.as_of.as_deref())
    }
}

/// A parsed `window` parameter
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    pub time_type: TimeType,
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn parse(raw: &str) -> Result<Self, EpidataError> {
        let (time_type, start, end) = selectors::parse_day_or_week_range("window", raw)?;
        Ok(Window {
            time_type,
            start,
            end,
        })
    }

    pub fn time_pair(&self) -> TimePair {
        let value = if self.start == self.end {
            TimeValue::Single(self.start)
        } else {
            TimeValue::Range(self.start, self.end)
        };
        TimePair::new(self.time_type, Values::List(vec![value]))
    }
}

/// Request data for the single-point trend endpoint
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_trend_request"))]
pub struct TrendRequest {
    /// Compact source/signal selector
    pub signal: Option<String>,
    /// Alias of `signal`
    pub signals: Option<String>,
    /// Compact geo selector
    pub geo: Option<String>,
    /// Alias of `geo`
    pub geos: Option<String>,
    /// Range of time values to consider
    #[validate(length(min = 1, message = "window must not be empty"))]
    pub window: String,
    /// The time value to evaluate. Defaults to the end of the window.
    pub date: Option<String>,
    /// Explicit basis time value
    pub basis: Option<String>,
    /// Periods between the date and its basis when no basis is given
    #[serde(default = "default_basis_shift")]
    #[validate(range(
        min = 1,
        max = 3650,
        message = "basis_shift must be between 1 and 3650"
    ))]
    pub basis_shift: i64,
    /// Response format
    pub format: Option<Format>,
}

fn validate_trend_request(request: &TrendRequest) -> Result<(), ValidationError> {
    if request.signal.is_none() && request.signals.is_none() {
        return Err(ValidationError::new("signal is required"));
    }
    if request.geo.is_none() && request.geos.is_none() {
        return Err(ValidationError::new("geo is required"));
    }
    Ok(())
}

impl TrendRequest {
    pub fn source_signal_pairs(&self) -> Result<Vec<SourceSignalPair>, EpidataError> {
        let raw = first(&[&self.signal, &self.signals]).ok_or_else(|| missing("signal"))?;
        selectors::parse_source_signal_arg("signal", raw)
    }

    pub fn geo_pairs(&self) -> Result<Vec<GeoPair>, EpidataError> {
        let raw = first(&[&self.geo, &self.geos]).ok_or_else(|| missing("geo"))?;
        selectors::parse_geo_arg("geo", raw)
    }

    pub fn window(&self) -> Result<Window, EpidataError> {
        Window::parse(&self.window)
    }

    /// Returns the evaluated time value and its basis.
    pub fn date_and_basis(&self, window: &Window) -> Result<(i64, Option<i64>), EpidataError> {
        let date = match &self.date {
            Some(raw) => time_value::parse_value("date", window.time_type, raw)?,
            None => window.end,
        };
        let basis = match &self.basis {
            Some(raw) => Some(time_value::parse_value("basis", window.time_type, raw)?),
            None => window.time_type.shift(date, -self.basis_shift),
        };
        Ok((date, basis))
    }
}

/// Request data for the trend series endpoint
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_trend_series_request"))]
pub struct TrendSeriesRequest {
    /// Compact source/signal selector
    pub signal: Option<String>,
    /// Alias of `signal`
    pub signals: Option<String>,
    /// Compact geo selector
    pub geo: Option<String>,
    /// Alias of `geo`
    pub geos: Option<String>,
    /// Range of time values to consider
    #[validate(length(min = 1, message = "window must not be empty"))]
    pub window: String,
    /// Periods between each point and its basis
    #[serde(default = "default_basis_shift")]
    #[validate(range(
        min = 1,
        max = 3650,
        message = "basis_shift must be between 1 and 3650"
    ))]
    pub basis_shift: i64,
    /// Response format
    pub format: Option<Format>,
}

fn validate_trend_series_request(request: &TrendSeriesRequest) -> Result<(), ValidationError> {
    if request.signal.is_none() && request.signals.is_none() {
        return Err(ValidationError::new("signal is required"));
    }
    if request.geo.is_none() && request.geos.is_none() {
        return Err(ValidationError::new("geo is required"));
    }
    Ok(())
}

impl TrendSeriesRequest {
    pub fn source_signal_pairs(&self) -> Result<Vec<SourceSignalPair>, EpidataError> {
        let raw = first(&[&self.signal, &self.signals]).ok_or_else(|| missing("signal"))?;
        selectors::parse_source_signal_arg("signal", raw)
    }

    pub fn geo_pairs(&self) -> Result<Vec<GeoPair>, EpidataError> {
        let raw = first(&[&self.geo, &self.geos]).ok_or_else(|| missing("geo"))?;
        selectors::parse_geo_arg("geo", raw)
    }

    pub fn window(&self) -> Result<Window, EpidataError> {
        Window::parse(&self.window)
    }
}

/// Request data for the lag correlation endpoint
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct CorrelationRequest {
    /// The single reference source/signal
    #[validate(length(min = 1, message = "reference must not be empty"))]
    pub reference: String,
    /// Compact selector of the signals to correlate against the reference
    #[validate(length(min = 1, message = "others must not be empty"))]
    pub others: String,
    /// Compact geo selector
    #[validate(length(min = 1, message = "geo must not be empty"))]
    pub geo: String,
    /// Range of time values to consider
    #[validate(length(min = 1, message = "window must not be empty"))]
    pub window: String,
    /// Maximum lag in periods
    #[serde(default = "default_max_lag")]
    #[validate(range(min = 0, max = 365, message = "lag must be between 0 and 365"))]
    pub lag: i64,
    /// Response format
    pub format: Option<Format>,
}

impl CorrelationRequest {
    pub fn reference(&self) -> Result<SourceSignalPair, EpidataError> {
        selectors::parse_single_source_signal_arg("reference", &self.reference)
    }

    pub fn others(&self) -> Result<Vec<SourceSignalPair>, EpidataError> {
        selectors::parse_source_signal_arg("others", &self.others)
    }

    pub fn geo_pairs(&self) -> Result<Vec<GeoPair>, EpidataError> {
        selectors::parse_geo_arg("geo", &self.geo)
    }

    pub fn window(&self) -> Result<Window, EpidataError> {
        Window::parse(&self.window)
    }
}

/// Request data for the backfill profile endpoint
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackfillRequest {
    /// The single source/signal
    #[validate(length(min = 1, message = "signal must not be empty"))]
    pub signal: String,
    /// The single geo
    #[validate(length(min = 1, message = "geo must not be empty"))]
    pub geo: String,
    /// Compact time selector
    #[validate(length(min = 1, message = "time must not be empty"))]
    pub time: String,
    /// Optional restriction of the issues considered
    pub issues: Option<String>,
    /// Lag of the issue treated as complete
    #[serde(default = "default_anchor_lag")]
    #[validate(range(min = 0, message = "anchor_lag must not be negative"))]
    pub anchor_lag: i64,
    /// Response format
    pub format: Option<Format>,
}

impl BackfillRequest {
    pub fn source_signal(&self) -> Result<SourceSignalPair, EpidataError> {
        selectors::parse_single_source_signal_arg("signal", &self.signal)
    }

    pub fn geo_pair(&self) -> Result<GeoPair, EpidataError> {
        selectors::parse_single_geo_arg("geo", &self.geo)
    }

    pub fn time_pairs(&self) -> Result<Vec<TimePair>, EpidataError> {
        selectors::parse_time_arg("time", &self.time)
    }

    /// Backfill reads every issue, optionally restricted to the requested ones.
    pub fn version(&self) -> Result<VersionSelector, EpidataError> {
        match &self.issues {
            Some(issues) => VersionSelector::from_params(Some(issues), None, None),
            None => Ok(VersionSelector::AllIssues),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use axum::extract::Query;
    use serde_test::{assert_de_tokens, assert_de_tokens_error, Token};

    fn query<T: serde::de::DeserializeOwned>(query: &str) -> T {
        let uri: axum::http::Uri = format!("http://example.com/?{query}").parse().unwrap();
        Query::<T>::try_from_uri(&uri).unwrap().0
    }

    #[test]
    fn test_observation_lag_follows_issue() {
        let observation = test_utils::observation("src", "sig", 20200414, Some(1.0))
            .with_issue(Some(20200416));
        assert_eq!(Some(20200416), observation.issue());
        assert_eq!(Some(2), observation.lag());
        let observation = observation.with_issue(None);
        assert_eq!(None, observation.lag());
    }

    #[test]
    fn test_observation_week_lag() {
        let observation = Observation::new("src", "sig", TimeType::Week, 202001, "state", "pa")
            .with_issue(Some(202003));
        assert_eq!(Some(2), observation.lag());
    }

    #[test]
    fn test_with_values_sets_missing_codes() {
        let observation = Observation::new("src", "sig", TimeType::Day, 20200414, "county", "01234")
            .with_values(Some(1.0), None, Some(10.0));
        assert_eq!(Missing::NotMissing, observation.missing_value);
        assert_eq!(Missing::Other, observation.missing_stderr);
        assert_eq!(Missing::NotMissing, observation.missing_sample_size);
    }

    #[test]
    fn test_signal_request_tokens() {
        let request = SignalRequest {
            signal: Some("src:sig".to_string()),
            geo: Some("county:01234".to_string()),
            time: Some("day:20200414".to_string()),
            lag: Some(3),
            ..Default::default()
        };
        assert_de_tokens(
            &request,
            &[
                Token::Struct {
                    name: "SignalRequest",
                    len: 4,
                },
                Token::Str("signal"),
                Token::Some,
                Token::Str("src:sig"),
                Token::Str("geo"),
                Token::Some,
                Token::Str("county:01234"),
                Token::Str("time"),
                Token::Some,
                Token::Str("day:20200414"),
                Token::Str("lag"),
                Token::Some,
                Token::I64(3),
                Token::StructEnd,
            ],
        );
        request.validate().unwrap()
    }

    #[test]
    fn test_signal_request_unknown_field() {
        assert_de_tokens_error::<SignalRequest>(
            &[
                Token::Struct {
                    name: "SignalRequest",
                    len: 1,
                },
                Token::Str("foo"),
                Token::StructEnd,
            ],
            "unknown field `foo`, expected one of `signal`, `signals`, `data_source`, `geo`, `geos`, `geo_type`, `geo_value`, `geo_values`, `time`, `time_type`, `time_values`, `issues`, `lag`, `as_of`, `format`",
        )
    }

    #[test]
    #[should_panic(expected = "signal is required")]
    fn test_signal_request_missing_signal() {
        let request: SignalRequest = query("geo=county:01234&time=day:20200414");
        request.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "lag must not be negative")]
    fn test_signal_request_negative_lag() {
        let request: SignalRequest =
            query("signal=src:sig&geo=county:*&time=day:*&lag=-1");
        request.validate().unwrap()
    }

    #[test]
    fn test_signal_request_compact() {
        let request: SignalRequest =
            query("signal=src:sig1,sig2&geo=county:01234&time=day:20200401-20200410");
        request.validate().unwrap();
        assert_eq!(
            vec![SourceSignalPair::new(
                "src",
                Values::List(vec!["sig1".to_string(), "sig2".to_string()])
            )],
            request.source_signal_pairs().unwrap()
        );
        assert_eq!(
            vec![TimePair::new(
                TimeType::Day,
                Values::List(vec![TimeValue::Range(20200401, 20200410)])
            )],
            request.time_pairs().unwrap()
        );
        assert_eq!(VersionSelector::Latest, request.version().unwrap());
    }

    #[test]
    fn test_signal_request_legacy() {
        let request: SignalRequest = query(
            "data_source=src&signals=sig&geo_type=county&geo_values=01234,01235&time_type=day&time_values=20200414",
        );
        request.validate().unwrap();
        assert_eq!(
            vec![SourceSignalPair::single("src", "sig")],
            request.source_signal_pairs().unwrap()
        );
        assert_eq!(
            vec![GeoPair::new(
                "county",
                Values::List(vec!["01234".to_string(), "01235".to_string()])
            )],
            request.geo_pairs().unwrap()
        );
        assert_eq!(
            vec![TimePair::new(
                TimeType::Day,
                Values::List(vec![TimeValue::Single(20200414)])
            )],
            request.time_pairs().unwrap()
        );
    }

    #[test]
    fn test_signal_request_conflicting_versions() {
        let request: SignalRequest =
            query("signal=src:sig&geo=county:*&time=day:*&lag=1&as_of=20200415");
        assert!(matches!(
            request.version(),
            Err(EpidataError::ConflictingVersioning)
        ));
    }

    #[test]
    fn test_trend_request_defaults() {
        let request: TrendRequest =
            query("signal=src:sig&geo=county:01234&window=20200401-20200430");
        request.validate().unwrap();
        assert_eq!(7, request.basis_shift);
        let window = request.window().unwrap();
        assert_eq!(
            Window {
                time_type: TimeType::Day,
                start: 20200401,
                end: 20200430
            },
            window
        );
        assert_eq!(
            (20200430, Some(20200423)),
            request.date_and_basis(&window).unwrap()
        );
    }

    #[test]
    fn test_trend_request_explicit_basis() {
        let request: TrendRequest = query(
            "signal=src:sig&geo=county:01234&window=20200401-20200430&date=20200420&basis=20200405",
        );
        let window = request.window().unwrap();
        assert_eq!(
            (20200420, Some(20200405)),
            request.date_and_basis(&window).unwrap()
        );
    }

    #[test]
    #[should_panic(expected = "basis_shift must be between 1 and 3650")]
    fn test_trend_request_invalid_basis_shift() {
        let request: TrendRequest =
            query("signal=src:sig&geo=county:01234&window=20200401-20200430&basis_shift=0");
        request.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "basis_shift must be between 1 and 3650")]
    fn test_trend_series_request_basis_shift_too_large() {
        let request: TrendSeriesRequest =
            query("signal=src:sig&geo=county:01234&window=20200401-20200430&basis_shift=3651");
        request.validate().unwrap()
    }

    #[test]
    fn test_trend_series_week_window() {
        let request: TrendSeriesRequest =
            query("signal=src:sig&geo=state:pa&window=202001-202010");
        request.validate().unwrap();
        assert_eq!(TimeType::Week, request.window().unwrap().time_type);
    }

    #[test]
    fn test_correlation_request() {
        let request: CorrelationRequest = query(
            "reference=src:ref&others=src:a,b&geo=county:01234&window=20200401-20200430",
        );
        request.validate().unwrap();
        assert_eq!(28, request.lag);
        assert_eq!(
            SourceSignalPair::single("src", "ref"),
            request.reference().unwrap()
        );
        assert!(matches!(
            CorrelationRequest {
                reference: "src:a,b".to_string(),
                ..request
            }
            .reference(),
            Err(EpidataError::InvalidSelector {
                field: "reference",
                ..
            })
        ));
    }

    #[test]
    fn test_backfill_request() {
        let request: BackfillRequest =
            query("signal=src:sig&geo=county:01234&time=day:20200401-20200410");
        request.validate().unwrap();
        assert_eq!(60, request.anchor_lag);
        assert_eq!(VersionSelector::AllIssues, request.version().unwrap());
        assert!(BackfillRequest {
            geo: "county:*".to_string(),
            ..request
        }
        .geo_pair()
        .is_err());
    }

    #[test]
    fn test_format_parameter() {
        let request: SignalRequest =
            query("signal=src:sig&geo=county:*&time=day:*&format=csv");
        assert_eq!(Some(Format::Csv), request.format);
    }
}
