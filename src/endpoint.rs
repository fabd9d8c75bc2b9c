use crate::catalog::Catalog;
use crate::error::EpidataError;
use crate::fetch::Fetched;
use crate::printer::Format;
use crate::transform::TransformOptions;

use rusqlite::Connection;
use serde::{de::DeserializeOwned, Serialize};
use validator::Validate;

/// Everything an endpoint needs to answer one request.
pub struct Context<'a> {
    /// The immutable signal catalog.
    pub catalog: &'a Catalog,

    /// Connection owned by this request.
    pub conn: &'a Connection,

    /// Maximum number of rows returned.
    pub max_results: usize,

    /// Parameters of on the fly signal derivation.
    pub options: TransformOptions,
}

/// Trait for query endpoints.
///
/// This forms the contract between the API layer and the query pipeline. The API layer
/// extracts and validates the request, then runs `execute` on a blocking thread with its own
/// database connection.
pub trait Endpoint {
    /// Query string parameters of the endpoint.
    type Request: DeserializeOwned + Validate + Send + 'static;

    /// One row of the response.
    type Row: Serialize + Send + 'static;

    /// Name of the endpoint, used to label metrics and logs.
    const NAME: &'static str;

    /// Returns the response format requested.
    fn format(request: &Self::Request) -> Format;

    /// Execute the endpoint.
    ///
    /// Returns the rows of the response and whether they were truncated.
    ///
    /// # Arguments
    ///
    /// * `context`: Catalog, connection and limits for this request
    /// * `request`: Validated request parameters
    fn execute(
        context: &Context<'_>,
        request: &Self::Request,
    ) -> Result<Fetched<Self::Row>, EpidataError>;
}
