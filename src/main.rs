//! This file defines the epidata binary entry point.

use std::process::exit;

use epidata::app;
use epidata::cli;
use epidata::metrics;
use epidata::server;
use epidata::tracing;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing(&args);
    metrics::register_metrics();
    let state = match app::init(&args) {
        Ok(state) => state,
        Err(err) => {
            ::tracing::error!("failed to initialise: {}", err);
            exit(1)
        }
    };
    app::spawn_meta_refresh(state.clone());
    let service = app::service(state);
    server::serve(&args, service).await;
    tracing::shutdown_tracing();
}
