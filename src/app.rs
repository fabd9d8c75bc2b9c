use crate::app_state::{AppState, SharedAppState};
use crate::catalog::DataSource;
use crate::cli::CommandLineArgs;
use crate::endpoint::{Context, Endpoint};
use crate::endpoints;
use crate::error::EpidataError;
use crate::fetch::Fetched;
use crate::meta::MetaRequest;
use crate::metrics;
use crate::printer::{EpidataResponse, Format};
use crate::transform::TransformOptions;
use crate::validated_query::ValidatedQuery;

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use serde::Deserialize;
use tower::Layer;
use tower::ServiceBuilder;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use validator::Validate;

/// Epidata Service type alias
///
/// This type implements [tower::Service].
pub type Service = NormalizePath<Router>;

/// Request data for the catalog listing endpoint
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct SignalsRequest {
    /// Response format
    pub format: Option<Format>,
}

/// Returns a [Router] with all endpoint routes.
///
/// # Arguments
///
/// * `state`: Shared application state
pub fn router(state: SharedAppState) -> Router {
    fn covidcast() -> Router<SharedAppState> {
        Router::new()
            .route("/covidcast", get(query::<endpoints::Covidcast>))
            .route("/covidcast/trend", get(query::<endpoints::TrendPoint>))
            .route("/covidcast/trendseries", get(query::<endpoints::TrendSeries>))
            .route("/covidcast/correlation", get(query::<endpoints::Correlation>))
            .route("/covidcast/backfill", get(query::<endpoints::Backfill>))
            .route("/covidcast/meta", get(meta))
            .route("/covidcast/signals", get(signals))
    }

    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/epidata", covidcast())
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .on_request(metrics::request_counter)
                    .on_response(metrics::record_response_metrics),
            ),
        )
        .with_state(state)
}

/// Returns a [crate::app::Service] with all routes and appropriate middleware.
///
/// # Arguments
///
/// * `state`: Shared application state
pub fn service(state: SharedAppState) -> Service {
    // Note that any middleware that should affect routing must wrap the router.
    // See
    // https://docs.rs/axum/0.6.18/axum/middleware/index.html#rewriting-request-uri-in-middleware.
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Create the shared application state.
///
/// # Arguments
///
/// * `args`: Command line arguments
pub fn init(args: &CommandLineArgs) -> Result<SharedAppState, EpidataError> {
    Ok(Arc::new(AppState::new(args)?))
}

/// Compute the signal metadata now, then every `meta_refresh_interval` seconds if non-zero.
pub fn spawn_meta_refresh(state: SharedAppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = state.args.meta_refresh_interval;
        let threads = state.args.meta_threads.unwrap_or_else(num_cpus::get);
        loop {
            let worker = state.clone();
            let result = tokio::task::spawn_blocking(move || {
                worker
                    .meta
                    .refresh(&worker.database, threads)
            })
            .await
            .map_err(EpidataError::from)
            .and_then(|result| result);
            match result {
                Ok(rows) => tracing::info!(rows, "refreshed signal metadata"),
                Err(err) => tracing::error!("failed to refresh signal metadata: {}", err),
            }
            if interval == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    })
}

/// Handler for query endpoints
///
/// The query runs on a blocking thread with its own database connection, bounded by the
/// connection limit.
///
/// # Arguments
///
/// * `state`: Shared application state
/// * `request`: Validated request parameters of the endpoint
#[tracing::instrument(level = "debug", skip_all, fields(endpoint = E::NAME))]
async fn query<E: Endpoint + 'static>(
    State(state): State<SharedAppState>,
    ValidatedQuery(request): ValidatedQuery<E::Request>,
) -> Result<EpidataResponse, EpidataError> {
    let format = E::format(&request);
    let _permit = state.resource_manager.connection().await?;
    let worker = state.clone();
    let fetched = tokio::task::spawn_blocking(move || {
        let conn = worker.database.connect()?;
        let context = Context {
            catalog: &worker.catalog,
            conn: &conn,
            max_results: worker.args.max_results,
            options: TransformOptions::default(),
        };
        E::execute(&context, &request)
    })
    .await??;
    tracing::debug!(
        rows = fetched.rows.len(),
        truncated = fetched.truncated,
        "executed query"
    );
    EpidataResponse::new(format, E::NAME, fetched)
}

/// Handler for the signal metadata endpoint
async fn meta(
    State(state): State<SharedAppState>,
    ValidatedQuery(request): ValidatedQuery<MetaRequest>,
) -> Result<EpidataResponse, EpidataError> {
    let rows = state.meta.snapshot().as_ref().clone();
    EpidataResponse::new(
        request.format.unwrap_or_default(),
        "meta",
        Fetched::new(rows, false),
    )
}

/// Handler for the catalog listing endpoint
async fn signals(
    State(state): State<SharedAppState>,
    ValidatedQuery(request): ValidatedQuery<SignalsRequest>,
) -> Result<EpidataResponse, EpidataError> {
    let sources: Vec<&DataSource> = state.catalog.sources().iter().collect();
    EpidataResponse::new(
        request.format.unwrap_or_default(),
        "signals",
        Fetched::new(sources, false),
    )
}
