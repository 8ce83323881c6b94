//! Command Line Interface (CLI) arguments.

use clap::Parser;

/// Telemetrist command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "TELEMETRIST_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "TELEMETRIST_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "TELEMETRIST_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/telemetrist/certs/cert.pem",
        env = "TELEMETRIST_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/telemetrist/certs/key.pem",
        env = "TELEMETRIST_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for operations to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "TELEMETRIST_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Number of background workers processing uploaded datasets.
    #[arg(long, default_value_t = 4, env = "TELEMETRIST_WORKER_COUNT")]
    pub worker_count: usize,
    /// Maximum number of uploads that may be queued awaiting a worker. Submissions beyond this
    /// limit are rejected until a worker drains the queue.
    #[arg(long, default_value_t = 1024, env = "TELEMETRIST_QUEUE_CAPACITY")]
    pub queue_capacity: usize,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
