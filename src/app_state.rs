use crate::cli::CommandLineArgs;
use crate::pipeline::Pipeline;

use std::sync::Arc;

/// Shared application state passed to each request handler.
#[derive(Debug)]
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Ingestion pipeline: job registry, system counters and worker pool.
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Create and return an [AppState].
    ///
    /// Spawns the pipeline worker pool, so this must be called from within a Tokio runtime.
    pub fn new(args: &CommandLineArgs) -> Self {
        Self {
            args: args.clone(),
            pipeline: Pipeline::new(args),
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
