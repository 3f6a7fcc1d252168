use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the storefront-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "storefront-cache",
    version,
    about = "Storefront response cache and invalidation service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STOREFRONT_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve storefront content behind the response cache.
    Serve(Box<ServeArgs>),
    /// Run the performance checklist against the resolved configuration.
    Check(CheckArgs),
    /// Evict cached entries by key pattern or by mutated entity.
    Invalidate(InvalidateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverrides {
    /// Override the backing store (memory|file|redis).
    #[arg(long = "cache-driver", value_name = "DRIVER")]
    pub cache_driver: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Override the directory used by the file store.
    #[arg(long = "cache-file-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_file_directory: Option<PathBuf>,

    /// Override the per-call store timeout.
    #[arg(long = "cache-store-timeout-ms", value_name = "MILLIS")]
    pub cache_store_timeout_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

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

    /// Toggle the response cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the directory of pre-rendered storefront content.
    #[arg(long = "content-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub content_root: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Print the report as JSON.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Key pattern relative to the namespace, e.g. `model:product:*`.
    #[arg(
        value_name = "PATTERN",
        required_unless_present = "entity",
        conflicts_with = "entity"
    )]
    pub pattern: Option<String>,

    /// Entity type whose cached state changed.
    #[arg(long, value_name = "TYPE", requires = "id")]
    pub entity: Option<String>,

    /// Identifier of the changed entity.
    #[arg(long, value_name = "ID", requires = "entity")]
    pub id: Option<String>,
}
