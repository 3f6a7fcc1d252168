use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_HIT_TOTAL, METRIC_INVALIDATED_KEYS_TOTAL, METRIC_MISS_TOTAL, METRIC_NOT_MODIFIED_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::instrumentation::{
    METRIC_OPERATION_MS, METRIC_SLOW_OPERATION_TOTAL, METRIC_STORE_ERROR_TOTAL,
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of responses served from the response cache."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of cacheable requests that had to be rendered."
        );
        describe_counter!(
            METRIC_NOT_MODIFIED_TOTAL,
            Unit::Count,
            "Total number of 304 Not Modified responses."
        );
        describe_counter!(
            METRIC_STORE_ERROR_TOTAL,
            Unit::Count,
            "Total number of backing store failures swallowed by the fail-open adapter."
        );
        describe_counter!(
            METRIC_INVALIDATED_KEYS_TOTAL,
            Unit::Count,
            "Total number of keys evicted by pattern invalidation."
        );
        describe_histogram!(
            METRIC_OPERATION_MS,
            Unit::Milliseconds,
            "Latency of measured operations in milliseconds."
        );
        describe_counter!(
            METRIC_SLOW_OPERATION_TOTAL,
            Unit::Count,
            "Total number of operations slower than the configured threshold."
        );
    });
}
