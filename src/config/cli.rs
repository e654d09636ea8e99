use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::cache::BackendKind;

/// Command-line arguments for the repcache demo server.
#[derive(Debug, Parser)]
#[command(
    name = "repcache",
    version,
    about = "Representation cache and content negotiation demo server"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "REPCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP demo server.
    Serve(Box<ServeArgs>),
    /// Resolve and validate configuration, then exit.
    #[command(name = "check-config")]
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckConfigArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache backend (map|bounded|tiered|none).
    #[arg(long = "cache-type", value_name = "TYPE")]
    pub cache_type: Option<BackendKind>,

    /// Override the bounded cache capacity in bytes.
    #[arg(long = "cache-max-size", value_name = "BYTES")]
    pub cache_max_size: Option<u64>,

    /// Override the expected entry size used to pre-size the bounded cache.
    #[arg(long = "cache-average-size", value_name = "BYTES")]
    pub cache_average_size: Option<u64>,

    /// Override the background prune interval.
    #[arg(long = "cache-prune-frequency-seconds", value_name = "SECONDS")]
    pub cache_prune_frequency_seconds: Option<u64>,

    /// Override the bounded cache write buffer length.
    #[arg(long = "cache-write-buffer", value_name = "COUNT")]
    pub cache_write_buffer: Option<usize>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
