use std::sync::Once;

use metrics::{Unit, describe_counter};
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pagecache_hit_total",
            Unit::Count,
            "Total number of requests served from the cache."
        );
        describe_counter!(
            "pagecache_miss_total",
            Unit::Count,
            "Total number of cacheable requests forwarded to the origin."
        );
        describe_counter!(
            "pagecache_expired_total",
            Unit::Count,
            "Total number of entries evicted for exceeding the ttl."
        );
        describe_counter!(
            "pagecache_store_write_error_total",
            Unit::Count,
            "Total number of chunk writes the disk mirror failed to persist."
        );
        describe_counter!(
            "pagecache_purge_total",
            Unit::Count,
            "Total number of accepted path purge requests."
        );
        describe_counter!(
            "pagecache_flush_total",
            Unit::Count,
            "Total number of accepted flush requests."
        );
    });
}
