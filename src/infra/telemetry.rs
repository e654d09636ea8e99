use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

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

/// Register units and help text for every metric the crate emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "repcache_hit_total",
            Unit::Count,
            "Total number of requests served from a stored representation."
        );
        describe_counter!(
            "repcache_miss_total",
            Unit::Count,
            "Total number of requests that ran the producer."
        );
        describe_counter!(
            "repcache_store_dropped_total",
            Unit::Count,
            "Total number of stores dropped because the write buffer was full."
        );
        describe_counter!(
            "repcache_evict_total",
            Unit::Count,
            "Total number of representations evicted for expiry or capacity."
        );
        describe_counter!(
            "repcache_reencode_total",
            Unit::Count,
            "Total number of bodies produced by re-encoding a stored coding."
        );
        describe_counter!(
            "repcache_not_acceptable_total",
            Unit::Count,
            "Total number of requests answered with 406 Not Acceptable."
        );
        describe_histogram!(
            "repcache_produce_ms",
            Unit::Milliseconds,
            "Producer latency on cache misses in milliseconds."
        );
    });
}
