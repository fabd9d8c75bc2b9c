//! Command Line Interface (CLI) arguments.

use std::path::PathBuf;

use clap::Parser;

/// Epidata command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "EPIDATA_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "EPIDATA_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "EPIDATA_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/epidata/certs/cert.pem",
        env = "EPIDATA_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/epidata/certs/key.pem",
        env = "EPIDATA_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "EPIDATA_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "EPIDATA_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// Path to the SQLite observation database
    #[arg(long, default_value = "epidata.db", env = "EPIDATA_DATABASE")]
    pub database: PathBuf,
    /// JSON list of data sources replacing the built-in table
    #[arg(long, env = "EPIDATA_SOURCES_FILE")]
    pub sources_file: Option<PathBuf>,
    /// JSON list of signals replacing the built-in table
    #[arg(long, env = "EPIDATA_SIGNALS_FILE")]
    pub signals_file: Option<PathBuf>,
    /// Maximum number of rows in a response
    #[arg(long, default_value_t = 1_000_000, env = "EPIDATA_MAX_RESULTS")]
    pub max_results: usize,
    /// Maximum number of concurrent database connections serving requests
    #[arg(long, env = "EPIDATA_CONNECTION_LIMIT")]
    pub connection_limit: Option<usize>,
    /// Number of worker threads computing signal metadata. Defaults to the number of CPUs.
    #[arg(long, env = "EPIDATA_META_THREADS")]
    pub meta_threads: Option<usize>,
    /// Seconds between metadata recomputations. 0 computes it only at startup.
    #[arg(long, default_value_t = 3600, env = "EPIDATA_META_REFRESH_INTERVAL")]
    pub meta_refresh_interval: u64,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
