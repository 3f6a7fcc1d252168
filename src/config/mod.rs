//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::keys::{MAX_PLAIN_SEGMENT_LEN, is_plain_segment};
use crate::cache::policy::{Lifetime, PolicyConfig};
use crate::cache::{CacheConfig, InvalidationScope, StoreDriver};
use crate::instrumentation::{GradeThresholds, MonitoringConfig};

mod cli;

pub use cli::{
    CheckArgs, CliArgs, Command, InvalidateArgs, ServeArgs, ServeOverrides, StoreOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "storefront-cache";
const ENV_PREFIX: &str = "STOREFRONT";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8080;
const DEFAULT_ADMIN_PORT: u16 = 8081;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CONTENT_ROOT: &str = "public";
const DEFAULT_SLOW_THRESHOLD_MS: u64 = 1000;
const DEFAULT_GRADE_EXCELLENT_MS: u64 = 200;
const DEFAULT_GRADE_GOOD_MS: u64 = 500;
const DEFAULT_GRADE_WARNING_MS: u64 = 1000;
/// Ten years. Longer lifetimes cannot be expressed as expiry timestamps reliably.
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 86_400;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub invalidation: InvalidationSettings,
    pub http_caching: HttpCachingSettings,
    pub monitoring: MonitoringSettings,
    pub eager_loading: EagerLoadingSettings,
    pub content: ContentSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub lifetime_seconds: NonZeroU64,
    pub driver: StoreDriver,
    pub namespace: String,
    pub tag: String,
    pub memory_capacity: NonZeroUsize,
    pub file_directory: PathBuf,
    pub redis_url: String,
    pub store_timeout_ms: NonZeroU64,
    pub response_body_limit_bytes: NonZeroUsize,
    pub session_cookie: String,
}

#[derive(Debug, Clone)]
pub struct InvalidationSettings {
    pub scope: InvalidationScope,
}

/// Browser lifetimes per route class. A max-age of zero switches the class to
/// validators-only responses.
#[derive(Debug, Clone)]
pub struct HttpCachingSettings {
    pub static_max_age: Duration,
    pub catalog: Lifetime,
    pub default: Lifetime,
}

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub log_execution_time: bool,
    pub log_memory_usage: bool,
    pub slow_threshold: Duration,
    pub grades: GradeThresholds,
}

#[derive(Debug, Clone)]
pub struct EagerLoadingSettings {
    pub default_relations: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub root: PathBuf,
}

impl Settings {
    /// Every value at its default, ignoring files, environment and CLI.
    pub fn from_defaults() -> Result<Self, LoadError> {
        Self::from_raw(RawSettings::default())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(self)
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            static_max_age: self.http_caching.static_max_age,
            catalog: self.http_caching.catalog,
            default: self.http_caching.default,
        }
    }

    pub fn monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            log_execution_time: self.monitoring.log_execution_time,
            log_memory_usage: self.monitoring.log_memory_usage,
            slow_threshold: self.monitoring.slow_threshold,
            grades: self.monitoring.grades,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Check(args)) => raw.apply_store_overrides(&args.store),
        Some(Command::Invalidate(args)) => raw.apply_store_overrides(&args.store),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    invalidation: RawInvalidationSettings,
    http_caching: RawHttpCachingSettings,
    monitoring: RawMonitoringSettings,
    eager_loading: RawEagerLoadingSettings,
    content: RawContentSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(root) = overrides.content_root.as_ref() {
            self.content.root = Some(root.clone());
        }

        self.apply_store_overrides(&overrides.store);
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(driver) = overrides.cache_driver.as_ref() {
            self.cache.driver = Some(driver.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(directory) = overrides.cache_file_directory.as_ref() {
            self.cache.file_directory = Some(directory.clone());
        }
        if let Some(timeout) = overrides.cache_store_timeout_ms {
            self.cache.store_timeout_ms = Some(timeout);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            invalidation,
            http_caching,
            monitoring,
            eager_loading,
            content,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let invalidation = build_invalidation_settings(invalidation)?;
        let http_caching = build_http_caching_settings(http_caching)?;
        let monitoring = build_monitoring_settings(monitoring)?;
        let eager_loading = build_eager_loading_settings(eager_loading);
        let content = build_content_settings(content)?;

        Ok(Self {
            server,
            logging,
            cache,
            invalidation,
            http_caching,
            monitoring,
            eager_loading,
            content,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "admin listener must not share the public address",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    let driver = match cache.driver {
        Some(driver) => parse_driver(&driver)?,
        None => defaults.driver,
    };

    let namespace = key_segment(
        cache.namespace.unwrap_or(defaults.namespace),
        "cache.namespace",
    )?;
    let tag = key_segment(cache.tag.unwrap_or(defaults.response_tag), "cache.tag")?;

    let lifetime_seconds = non_zero_u64(
        cache.lifetime_seconds.unwrap_or(defaults.lifetime_seconds),
        "cache.lifetime_seconds",
    )?;
    bounded_lifetime(lifetime_seconds.get(), "cache.lifetime_seconds")?;
    let memory_capacity = non_zero_usize(
        cache
            .memory_capacity
            .unwrap_or(defaults.memory_capacity as u64),
        "cache.memory_capacity",
    )?;
    let store_timeout_ms = non_zero_u64(
        cache.store_timeout_ms.unwrap_or(defaults.store_timeout_ms),
        "cache.store_timeout_ms",
    )?;
    let response_body_limit_bytes = non_zero_usize(
        cache
            .response_body_limit_bytes
            .unwrap_or(defaults.response_body_limit_bytes as u64),
        "cache.response_body_limit_bytes",
    )?;

    let file_directory = cache.file_directory.unwrap_or(defaults.file_directory);
    if driver == StoreDriver::File && file_directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.file_directory",
            "path must not be empty",
        ));
    }

    let redis_url = cache
        .redis_url
        .map(|value| value.trim().to_string())
        .unwrap_or(defaults.redis_url);
    if driver == StoreDriver::Redis && redis_url.is_empty() {
        return Err(LoadError::invalid("cache.redis_url", "must not be empty"));
    }

    let session_cookie = cache.session_cookie.unwrap_or(defaults.session_cookie);
    if session_cookie.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.session_cookie",
            "must not be empty",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        lifetime_seconds,
        driver,
        namespace,
        tag,
        memory_capacity,
        file_directory,
        redis_url,
        store_timeout_ms,
        response_body_limit_bytes,
        session_cookie,
    })
}

fn parse_driver(value: &str) -> Result<StoreDriver, LoadError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "memory" | "array" => Ok(StoreDriver::Memory),
        "file" => Ok(StoreDriver::File),
        "redis" => Ok(StoreDriver::Redis),
        other => Err(LoadError::invalid(
            "cache.driver",
            format!("unknown driver `{other}` (expected memory|file|redis)"),
        )),
    }
}

fn build_invalidation_settings(
    invalidation: RawInvalidationSettings,
) -> Result<InvalidationSettings, LoadError> {
    let scope = match invalidation.scope.as_deref().map(str::trim) {
        None => InvalidationScope::default(),
        Some("exact") => InvalidationScope::Exact,
        Some("entity") => InvalidationScope::Entity,
        Some("entity_and_responses") => InvalidationScope::EntityAndResponses,
        Some(other) => {
            return Err(LoadError::invalid(
                "invalidation.scope",
                format!("unknown scope `{other}` (expected exact|entity|entity_and_responses)"),
            ));
        }
    };
    Ok(InvalidationSettings { scope })
}

fn build_http_caching_settings(
    http: RawHttpCachingSettings,
) -> Result<HttpCachingSettings, LoadError> {
    let defaults = PolicyConfig::default();
    let seconds = |value: Option<u64>, default: Duration, key: &'static str| match value {
        Some(value) => bounded_lifetime(value, key).map(Duration::from_secs),
        None => Ok(default),
    };

    let settings = HttpCachingSettings {
        static_max_age: seconds(
            http.static_max_age_seconds,
            defaults.static_max_age,
            "http_caching.static_max_age_seconds",
        )?,
        catalog: Lifetime {
            max_age: seconds(
                http.catalog_max_age_seconds,
                defaults.catalog.max_age,
                "http_caching.catalog_max_age_seconds",
            )?,
            stale_while_revalidate: seconds(
                http.catalog_stale_while_revalidate_seconds,
                defaults.catalog.stale_while_revalidate,
                "http_caching.catalog_stale_while_revalidate_seconds",
            )?,
        },
        default: Lifetime {
            max_age: seconds(
                http.default_max_age_seconds,
                defaults.default.max_age,
                "http_caching.default_max_age_seconds",
            )?,
            stale_while_revalidate: seconds(
                http.default_stale_while_revalidate_seconds,
                defaults.default.stale_while_revalidate,
                "http_caching.default_stale_while_revalidate_seconds",
            )?,
        },
    };

    if settings.catalog.max_age.is_zero() && !settings.catalog.stale_while_revalidate.is_zero() {
        return Err(LoadError::invalid(
            "http_caching.catalog_stale_while_revalidate_seconds",
            "requires a non-zero catalog max-age",
        ));
    }
    if settings.default.max_age.is_zero() && !settings.default.stale_while_revalidate.is_zero() {
        return Err(LoadError::invalid(
            "http_caching.default_stale_while_revalidate_seconds",
            "requires a non-zero default max-age",
        ));
    }

    Ok(settings)
}

fn build_monitoring_settings(
    monitoring: RawMonitoringSettings,
) -> Result<MonitoringSettings, LoadError> {
    let slow_threshold_ms = monitoring
        .slow_threshold_ms
        .unwrap_or(DEFAULT_SLOW_THRESHOLD_MS);

    let excellent = monitoring
        .grade_excellent_ms
        .unwrap_or(DEFAULT_GRADE_EXCELLENT_MS);
    let good = monitoring.grade_good_ms.unwrap_or(DEFAULT_GRADE_GOOD_MS);
    let warning = monitoring
        .grade_warning_ms
        .unwrap_or(DEFAULT_GRADE_WARNING_MS);
    if !(excellent < good && good < warning) {
        return Err(LoadError::invalid(
            "monitoring.grade_*_ms",
            format!("thresholds must increase: {excellent} < {good} < {warning}"),
        ));
    }

    Ok(MonitoringSettings {
        log_execution_time: monitoring.log_execution_time.unwrap_or(true),
        log_memory_usage: monitoring.log_memory_usage.unwrap_or(false),
        slow_threshold: Duration::from_millis(slow_threshold_ms),
        grades: GradeThresholds {
            excellent: Duration::from_millis(excellent),
            good: Duration::from_millis(good),
            warning: Duration::from_millis(warning),
        },
    })
}

fn build_eager_loading_settings(eager: RawEagerLoadingSettings) -> EagerLoadingSettings {
    let default_relations = eager
        .default_relations
        .unwrap_or_else(|| CacheConfig::default().eager_relations)
        .into_iter()
        .map(|(model, relations)| (model.to_ascii_lowercase(), relations))
        .collect();
    EagerLoadingSettings { default_relations }
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let root = content
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("content.root", "path must not be empty"));
    }
    Ok(ContentSettings { root })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    lifetime_seconds: Option<u64>,
    driver: Option<String>,
    namespace: Option<String>,
    tag: Option<String>,
    memory_capacity: Option<u64>,
    file_directory: Option<PathBuf>,
    redis_url: Option<String>,
    store_timeout_ms: Option<u64>,
    response_body_limit_bytes: Option<u64>,
    session_cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpCachingSettings {
    static_max_age_seconds: Option<u64>,
    catalog_max_age_seconds: Option<u64>,
    catalog_stale_while_revalidate_seconds: Option<u64>,
    default_max_age_seconds: Option<u64>,
    default_stale_while_revalidate_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMonitoringSettings {
    log_execution_time: Option<bool>,
    log_memory_usage: Option<bool>,
    slow_threshold_ms: Option<u64>,
    grade_excellent_ms: Option<u64>,
    grade_good_ms: Option<u64>,
    grade_warning_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEagerLoadingSettings {
    default_relations: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    root: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Namespace and tag end up verbatim in every key, so they must be plain identifiers.
fn bounded_lifetime(seconds: u64, key: &'static str) -> Result<u64, LoadError> {
    if seconds > MAX_LIFETIME_SECS {
        return Err(LoadError::invalid(
            key,
            format!("must be at most {MAX_LIFETIME_SECS} seconds"),
        ));
    }
    Ok(seconds)
}

fn key_segment(value: String, key: &'static str) -> Result<String, LoadError> {
    let value = value.trim().to_string();
    if !is_plain_segment(&value) {
        return Err(LoadError::invalid(
            key,
            format!(
                "must be 1-{MAX_PLAIN_SEGMENT_LEN} ASCII letters, digits, '_', '.' or '-' and not start with '.'"
            ),
        ));
    }
    Ok(value)
}
