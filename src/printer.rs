//! Response assembly
//!
//! Endpoints produce rows of any serialisable type. The printer turns them into one of the
//! supported response formats and records the row metrics.

use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EpidataError;
use crate::fetch::Fetched;
use crate::metrics::{ROWS_RETURNED, TRUNCATED_RESPONSES};

/// Envelope message for truncated responses
pub const TRUNCATED_MESSAGE: &str = "too many results, data truncated";

/// Response format
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// `{"result", "message", "epidata"}` envelope
    #[default]
    Classic,
    /// Bare JSON array of rows
    Json,
    /// Header row followed by one line per row
    Csv,
}

/// Envelope of a classic response
#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    result: i64,
    message: String,
    epidata: Vec<Map<String, Value>>,
}

/// A response ready to be rendered
#[derive(Debug)]
pub struct EpidataResponse {
    format: Format,
    endpoint: &'static str,
    rows: Vec<Map<String, Value>>,
    truncated: bool,
}

impl EpidataResponse {
    /// Serialise fetched rows into field maps.
    ///
    /// Rows that do not serialise to a map are wrapped as `{"value": row}`.
    pub fn new<T: Serialize>(
        format: Format,
        endpoint: &'static str,
        fetched: Fetched<T>,
    ) -> Result<Self, EpidataError> {
        let rows = fetched
            .rows
            .iter()
            .map(|row| {
                Ok(match serde_json::to_value(row)? {
                    Value::Object(map) => map,
                    other => Map::from_iter([("value".to_string(), other)]),
                })
            })
            .collect::<Result<Vec<_>, EpidataError>>()?;
        Ok(EpidataResponse {
            format,
            endpoint,
            rows,
            truncated: fetched.truncated,
        })
    }

    fn classic(self) -> Result<String, EpidataError> {
        let (result, message) = if self.rows.is_empty() {
            (-2, "no results")
        } else if self.truncated {
            (2, TRUNCATED_MESSAGE)
        } else {
            (1, "success")
        };
        Ok(serde_json::to_string(&Envelope {
            result,
            message: message.to_string(),
            epidata: self.rows,
        })?)
    }

    fn csv(self) -> Result<String, EpidataError> {
        let Some(first) = self.rows.first() else {
            return Ok(String::new());
        };
        let columns: Vec<String> = first.keys().cloned().collect();
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(&columns)?;
        for row in &self.rows {
            writer.write_record(
                columns
                    .iter()
                    .map(|column| row.get(column).map_or_else(String::new, csv_value)),
            )?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| csv::Error::from(err.into_error()))?;
        Ok(String::from_utf8(bytes)?)
    }

    fn render(self) -> Result<Response, EpidataError> {
        Ok(match self.format {
            Format::Classic => (
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                self.classic()?,
            )
                .into_response(),
            Format::Json => (
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                serde_json::to_string(&self.rows)?,
            )
                .into_response(),
            Format::Csv => (
                [(&header::CONTENT_TYPE, mime::TEXT_CSV_UTF_8.to_string())],
                self.csv()?,
            )
                .into_response(),
        })
    }
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(string) => string.clone(),
        other => other.to_string(),
    }
}

impl IntoResponse for EpidataResponse {
    fn into_response(self) -> Response {
        ROWS_RETURNED
            .with_label_values(&[self.endpoint])
            .inc_by(self.rows.len() as u64);
        if self.truncated {
            TRUNCATED_RESPONSES.with_label_values(&[self.endpoint]).inc();
        }
        match self.render() {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    }
}
