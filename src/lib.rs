//! This crate provides the Epidata server. It answers queries over versioned epidemiological
//! signals: time series of observations per data source, signal, geography and time period,
//! where every observation may be republished in later issues as data are revised.
//!
//! Beyond returning stored rows the server:
//!
//! * Selects which issue of each observation to return: the latest, the latest as of a date,
//!   a fixed lag, or explicit issues.
//! * Derives signals on the fly from a stored base signal by differencing and/or smoothing.
//! * Classifies trends, correlates signals at a range of lags and profiles backfill.
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team.
//! * [Serde](serde) performs (de)serialisation of request and response data.
//! * [rusqlite] stores observations in SQLite.
//! * [ndarray] provides the arrays used in regression.
//! * [rayon] runs the metadata computation on a bounded thread pool.

pub mod app;
pub mod app_state;
pub mod catalog;
pub mod cli;
pub mod correlation;
pub mod database;
pub mod endpoint;
pub mod endpoints;
pub mod error;
pub mod fetch;
pub mod meta;
pub mod metrics;
pub mod models;
pub mod printer;
pub mod query_builder;
pub mod resource_manager;
pub mod selectors;
pub mod server;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod transform;
pub mod trend;
pub mod types;
pub mod validated_query;
pub mod versioning;
