//! This file defines the telemetrist binary entry point.

use std::sync::Arc;

use telemetrist::app;
use telemetrist::app_state::AppState;
use telemetrist::cli;
use telemetrist::metrics;
use telemetrist::server;
use telemetrist::tracing;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    println!("{:?}", args);
    tracing::init_tracing();
    metrics::register_metrics();
    let state = Arc::new(AppState::new(&args));
    let service = app::router(state);
    server::serve(&args, service).await;
}
