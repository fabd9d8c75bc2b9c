//! Error handling.

use axum::{
    extract::rejection::QueryRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

use crate::types::TimeType;

/// Message returned to clients for all server-side failures.
pub const DATABASE_ERROR_MESSAGE: &str = "database error";

/// Epidata server error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum EpidataError {
    /// Error reading a signal catalog reference table
    #[error("failed to read signal catalog table {path}")]
    CatalogIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a signal catalog reference table
    #[error("failed to parse signal catalog table {path}")]
    CatalogParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// More than one versioning parameter was provided
    #[error("only one of issues, lag and as_of may be specified")]
    ConflictingVersioning,

    /// Error writing CSV response data
    #[error("failed to write CSV response")]
    CsvSerialisation(#[from] csv::Error),

    /// Error executing a query or reading its results
    #[error("error querying the database")]
    Database(#[from] rusqlite::Error),

    /// Invalid missing data reason code
    #[error("invalid missing value code {0}")]
    InvalidMissingCode(u8),

    /// Malformed request selector
    #[error("{field}: {message}")]
    InvalidSelector { field: &'static str, message: String },

    /// Value that is not a valid time value of its type
    #[error("invalid {time_type} value {value}")]
    InvalidTimeValue { time_type: TimeType, value: i64 },

    /// Error deserialising the request query string
    #[error("request data is not valid")]
    RequestDataQueryRejection(#[from] QueryRejection),

    /// Error validating request data (single error)
    #[error("request data is not valid")]
    RequestDataValidationSingle(#[from] validator::ValidationError),

    /// Error validating request data (multiple errors)
    #[error("request data is not valid")]
    RequestDataValidation(#[from] validator::ValidationErrors),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error serialising response data
    #[error("failed to serialise response")]
    Serialisation(#[from] serde_json::Error),

    /// A blocking task panicked or was cancelled
    #[error("request task failed")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Error building a worker thread pool
    #[error("failed to build worker thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Time arguments do not match the time type of a requested signal
    #[error("{time_type} arguments are not supported by {time_type_signal} signal {data_source}:{signal}")]
    TimeTypeMismatch {
        time_type: TimeType,
        time_type_signal: TimeType,
        data_source: String,
        signal: String,
    },

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Single-signal endpoint requested a signal that is not in the catalog
    #[error("unknown signal {data_source}:{signal}")]
    UnknownSignal { data_source: String, signal: String },

    /// Response data was not valid UTF-8
    #[error("response is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl IntoResponse for EpidataError {
    /// Convert from an `EpidataError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// A response to send in error cases
///
/// Uses the same envelope as successful responses, with `result` set to -1 and an empty
/// `epidata` list. Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Envelope result code
    result: i64,

    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,

    /// Always empty
    epidata: Vec<serde_json::Value>,
}

impl ErrorResponse {
    /// Return a 400 bad request ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred. Its message and causes are returned to the client.
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorResponse {
            status: StatusCode::BAD_REQUEST,
            result: -1,
            message: error.to_string(),
            caused_by,
            epidata: vec![],
        }
    }

    /// Return a 500 internal server error ErrorResponse
    ///
    /// Internal details are never echoed to the client.
    fn internal_server_error() -> Self {
        ErrorResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            result: -1,
            message: DATABASE_ERROR_MESSAGE.to_string(),
            caused_by: None,
            epidata: vec![],
        }
    }
}

impl From<EpidataError> for ErrorResponse {
    /// Convert from an `EpidataError` into an `ErrorResponse`.
    fn from(error: EpidataError) -> Self {
        let response = match &error {
            // Bad request
            EpidataError::ConflictingVersioning
            | EpidataError::InvalidSelector { .. }
            | EpidataError::InvalidTimeValue { .. }
            | EpidataError::RequestDataQueryRejection(_)
            | EpidataError::RequestDataValidationSingle(_)
            | EpidataError::RequestDataValidation(_)
            | EpidataError::TimeTypeMismatch { .. }
            | EpidataError::UnknownSignal { .. } => Self::bad_request(&error),

            // Internal server error
            EpidataError::CatalogIo { .. }
            | EpidataError::CatalogParse { .. }
            | EpidataError::CsvSerialisation(_)
            | EpidataError::Database(_)
            | EpidataError::InvalidMissingCode(_)
            | EpidataError::SemaphoreAcquireError(_)
            | EpidataError::Serialisation(_)
            | EpidataError::TaskJoin(_)
            | EpidataError::ThreadPool(_)
            | EpidataError::TryFromInt(_)
            | EpidataError::Utf8(_) => Self::internal_server_error(),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::HeaderMap;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn test_epidata_error(
        error: EpidataError,
        status: StatusCode,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        let mut headers = HeaderMap::new();
        headers.insert(&header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(headers, *response.headers());
        let error_response: ErrorResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(-1, error_response.result);
        assert_eq!(message.to_string(), error_response.message);
        assert!(error_response.epidata.is_empty());
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, error_response.caused_by);
    }

    #[tokio::test]
    async fn conflicting_versioning() {
        let error = EpidataError::ConflictingVersioning;
        let message = "only one of issues, lag and as_of may be specified";
        test_epidata_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn invalid_selector() {
        let error = EpidataError::InvalidSelector {
            field: "signal",
            message: "expected <source>:<signals>".to_string(),
        };
        let message = "signal: expected <source>:<signals>";
        test_epidata_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn invalid_time_value() {
        let error = EpidataError::InvalidTimeValue {
            time_type: TimeType::Week,
            value: 201953,
        };
        let message = "invalid week value 201953";
        test_epidata_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn request_data_validation_single() {
        let validation_error = validator::ValidationError::new("foo");
        let error = EpidataError::RequestDataValidationSingle(validation_error);
        let message = "request data is not valid";
        let caused_by = Some(vec!["Validation error: foo [{}]"]);
        test_epidata_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn request_data_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("foo");
        validation_errors.add("bar", validation_error);
        let error = EpidataError::RequestDataValidation(validation_errors);
        let message = "request data is not valid";
        let caused_by = Some(vec!["bar: Validation error: foo [{}]"]);
        test_epidata_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn time_type_mismatch() {
        let error = EpidataError::TimeTypeMismatch {
            time_type: TimeType::Day,
            time_type_signal: TimeType::Week,
            data_source: "nchs-mortality".to_string(),
            signal: "deaths_covid_incidence_num".to_string(),
        };
        let message = "day arguments are not supported by week signal nchs-mortality:deaths_covid_incidence_num";
        test_epidata_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn unknown_signal() {
        let error = EpidataError::UnknownSignal {
            data_source: "foo".to_string(),
            signal: "bar".to_string(),
        };
        test_epidata_error(error, StatusCode::BAD_REQUEST, "unknown signal foo:bar", None).await;
    }

    #[tokio::test]
    async fn database_error_is_opaque() {
        let error = EpidataError::Database(rusqlite::Error::InvalidQuery);
        test_epidata_error(
            error,
            StatusCode::INTERNAL_SERVER_ERROR,
            DATABASE_ERROR_MESSAGE,
            None,
        )
        .await;
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = EpidataError::SemaphoreAcquireError(sem.acquire().await.unwrap_err());
        test_epidata_error(
            error,
            StatusCode::INTERNAL_SERVER_ERROR,
            DATABASE_ERROR_MESSAGE,
            None,
        )
        .await;
    }

    #[tokio::test]
    async fn try_from_int_error() {
        let error = EpidataError::TryFromInt(u8::try_from(-1_i8).unwrap_err());
        test_epidata_error(
            error,
            StatusCode::INTERNAL_SERVER_ERROR,
            DATABASE_ERROR_MESSAGE,
            None,
        )
        .await;
    }

    #[tokio::test]
    async fn utf8_error_is_opaque() {
        let error = EpidataError::Utf8(String::from_utf8(vec![0xff]).unwrap_err());
        test_epidata_error(
            error,
            StatusCode::INTERNAL_SERVER_ERROR,
            DATABASE_ERROR_MESSAGE,
            None,
        )
        .await;
    }
}
