//! Query endpoints.
//!
//! Each endpoint is implemented as a struct that implements the
//! [Endpoint](crate::endpoint::Endpoint) trait.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::correlation::{compute_correlations, CorrelationResult};
use crate::endpoint::{Context, Endpoint};
use crate::error::EpidataError;
use crate::fetch::{fetch_series, Fetched, SeriesRequest};
use crate::models::{
    BackfillRequest, CorrelationRequest, Observation, SignalRequest, TrendRequest,
    TrendSeriesRequest, Window,
};
use crate::printer::Format;
use crate::selectors::{GeoPair, SourceSignalPair, Values};
use crate::trend::{compute_trend, compute_trend_series, Trend};
use crate::versioning::{compute_backfill, BackfillRow, VersionSelector};

/// Rows of every series of a window at their latest issue.
fn fetch_window(
    context: &Context<'_>,
    source_signals: Vec<SourceSignalPair>,
    geos: Vec<GeoPair>,
    window: &Window,
) -> Result<Fetched<Observation>, EpidataError> {
    let request = SeriesRequest {
        source_signals,
        geos,
        times: vec![window.time_pair()],
        version: VersionSelector::Latest,
    };
    fetch_series(
        context.catalog,
        context.conn,
        &request,
        context.max_results,
        &context.options,
    )
}

/// (time value, value) points of one series.
fn points(series: &[Observation]) -> impl Iterator<Item = (i64, Option<f64>)> + '_ {
    series.iter().map(|row| (row.time_value, row.value))
}

/// Signal query with versioning and on the fly derivation.
pub struct Covidcast {}

impl Endpoint for Covidcast {
    type Request = SignalRequest;
    type Row = Observation;
    const NAME: &'static str = "covidcast";

    fn format(request: &Self::Request) -> Format {
        request.format.unwrap_or_default()
    }

    fn execute(
        context: &Context<'_>,
        request: &Self::Request,
    ) -> Result<Fetched<Self::Row>, EpidataError> {
        let series = SeriesRequest {
            source_signals: request.source_signal_pairs()?,
            geos: request.geo_pairs()?,
            times: request.time_pairs()?,
            version: request.version()?,
        };
        let mut fetched = fetch_series(
            context.catalog,
            context.conn,
            &series,
            context.max_results,
            &context.options,
        )?;
        fetched.rows.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then_with(|| a.signal.cmp(&b.signal))
                .then_with(|| a.time_type.cmp(&b.time_type))
                .then_with(|| a.time_value.cmp(&b.time_value))
                .then_with(|| a.geo_type.cmp(&b.geo_type))
                .then_with(|| a.geo_value.cmp(&b.geo_value))
                .then_with(|| a.issue().cmp(&b.issue()))
        });
        Ok(fetched)
    }
}

/// Trend of one point of one series
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendRow {
    pub geo_type: String,
    pub geo_value: String,
    pub signal_source: String,
    pub signal_signal: String,
    #[serde(flatten)]
    pub trend: Trend,
}

impl TrendRow {
    fn new(series: &Observation, trend: Trend) -> Self {
        TrendRow {
            geo_type: series.geo_type.clone(),
            geo_value: series.geo_value.clone(),
            signal_source: series.source.clone(),
            signal_signal: series.signal.clone(),
            trend,
        }
    }
}

/// Trend of one date within a window, per series.
pub struct TrendPoint {}

impl Endpoint for TrendPoint {
    type Request = TrendRequest;
    type Row = TrendRow;
    const NAME: &'static str = "trend";

    fn format(request: &Self::Request) -> Format {
        request.format.unwrap_or_default()
    }

    fn execute(
        context: &Context<'_>,
        request: &Self::Request,
    ) -> Result<Fetched<Self::Row>, EpidataError> {
        let window = request.window()?;
        let (date, basis) = request.date_and_basis(&window)?;
        let fetched = fetch_window(
            context,
            request.source_signal_pairs()?,
            request.geo_pairs()?,
            &window,
        )?;
        let rows = fetched
            .rows
            .chunk_by(Observation::same_series)
            .map(|series| TrendRow::new(&series[0], compute_trend(points(series), date, basis)))
            .collect();
        Ok(Fetched::new(rows, fetched.truncated))
    }
}

/// Trend of every date within a window, per series.
pub struct TrendSeries {}

impl Endpoint for TrendSeries {
    type Request = TrendSeriesRequest;
    type Row = TrendRow;
    const NAME: &'static str = "trendseries";

    fn format(request: &Self::Request) -> Format {
        request.format.unwrap_or_default()
    }

    fn execute(
        context: &Context<'_>,
        request: &Self::Request,
    ) -> Result<Fetched<Self::Row>, EpidataError> {
        let window = request.window()?;
        let fetched = fetch_window(
            context,
            request.source_signal_pairs()?,
            request.geo_pairs()?,
            &window,
        )?;
        let shift = |date: i64| window.time_type.shift(date, -request.basis_shift);
        let rows = fetched
            .rows
            .chunk_by(Observation::same_series)
            .flat_map(|series| {
                compute_trend_series(points(series), shift)
                    .into_iter()
                    .map(move |trend| TrendRow::new(&series[0], trend))
            })
            .collect::<Vec<_>>();
        Ok(Fetched::new(rows, fetched.truncated).limit(context.max_results))
    }
}

/// Correlation of one series with the reference series of its geo at one lag
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CorrelationRow {
    pub geo_type: String,
    pub geo_value: String,
    pub signal_source: String,
    pub signal_signal: String,
    #[serde(flatten)]
    pub correlation: CorrelationResult,
}

/// Values of a series keyed by time value, skipping missing values.
fn value_map(series: &[Observation]) -> BTreeMap<i64, f64> {
    series
        .iter()
        .filter_map(|row| row.value.map(|value| (row.time_value, value)))
        .collect()
}

/// Lag correlation of signals with a reference signal, per geo.
pub struct Correlation {}

impl Endpoint for Correlation {
    type Request = CorrelationRequest;
    type Row = CorrelationRow;
    const NAME: &'static str = "correlation";

    fn format(request: &Self::Request) -> Format {
        request.format.unwrap_or_default()
    }

    fn execute(
        context: &Context<'_>,
        request: &Self::Request,
    ) -> Result<Fetched<Self::Row>, EpidataError> {
        let window = request.window()?;
        let geos = request.geo_pairs()?;
        let reference = fetch_window(context, vec![request.reference()?], geos.clone(), &window)?;
        let others = fetch_window(context, request.others()?, geos, &window)?;

        let reference_by_geo: HashMap<(&str, &str), BTreeMap<i64, f64>> = reference
            .rows
            .chunk_by(Observation::same_series)
            .map(|series| {
                (
                    (series[0].geo_type.as_str(), series[0].geo_value.as_str()),
                    value_map(series),
                )
            })
            .collect();

        let mut rows = Vec::new();
        for series in others.rows.chunk_by(Observation::same_series) {
            let first = &series[0];
            let Some(reference) =
                reference_by_geo.get(&(first.geo_type.as_str(), first.geo_value.as_str()))
            else {
                continue;
            };
            let results = compute_correlations(
                reference,
                &value_map(series),
                request.lag,
                |time_value, lag| window.time_type.shift(time_value, lag),
            );
            rows.extend(results.into_iter().map(|correlation| CorrelationRow {
                geo_type: first.geo_type.clone(),
                geo_value: first.geo_value.clone(),
                signal_source: first.source.clone(),
                signal_signal: first.signal.clone(),
                correlation,
            }));
        }
        Ok(Fetched::new(rows, reference.truncated || others.truncated).limit(context.max_results))
    }
}

/// Backfill profile of one signal at one geo.
pub struct Backfill {}

impl Endpoint for Backfill {
    type Request = BackfillRequest;
    type Row = BackfillRow;
    const NAME: &'static str = "backfill";

    fn format(request: &Self::Request) -> Format {
        request.format.unwrap_or_default()
    }

    fn execute(
        context: &Context<'_>,
        request: &Self::Request,
    ) -> Result<Fetched<Self::Row>, EpidataError> {
        let pair = request.source_signal()?;
        if let Values::List(signals) = &pair.signals {
            for signal in signals {
                if context.catalog.signal(&pair.source, signal).is_none() {
                    return Err(EpidataError::UnknownSignal {
                        data_source: pair.source.clone(),
                        signal: signal.clone(),
                    });
                }
            }
        }
        let series = SeriesRequest {
            source_signals: vec![pair],
            geos: vec![request.geo_pair()?],
            times: request.time_pairs()?,
            version: request.version()?,
        };
        let mut fetched = fetch_series(
            context.catalog,
            context.conn,
            &series,
            context.max_results,
            &context.options,
        )?;
        fetched.rows.sort_by(|a, b| {
            a.time_value
                .cmp(&b.time_value)
                .then_with(|| a.issue().cmp(&b.issue()))
        });
        Ok(Fetched::new(
            compute_backfill(&fetched.rows, request.anchor_lag),
            fetched.truncated,
        ))
    }
}
