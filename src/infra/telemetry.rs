use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
            "chirp_rpc_requests_total",
            Unit::Count,
            "Procedure calls by procedure and outcome."
        );
        describe_histogram!(
            "chirp_rpc_duration_ms",
            Unit::Milliseconds,
            "Procedure call latency in milliseconds."
        );
        describe_counter!(
            "chirp_posts_created_total",
            Unit::Count,
            "Total number of posts persisted."
        );
        describe_counter!(
            "chirp_rate_limited_total",
            Unit::Count,
            "Post creations rejected by the per-author rate limit."
        );
        describe_counter!(
            "chirp_query_cache_hit_total",
            Unit::Count,
            "Query results served from the shared query cache."
        );
        describe_counter!(
            "chirp_query_cache_miss_total",
            Unit::Count,
            "Queries that had to reach the store or identity provider."
        );
        describe_counter!(
            "chirp_query_cache_evicted_total",
            Unit::Count,
            "Query results dropped to keep the query cache within its limit."
        );
        describe_counter!(
            "chirp_static_page_cache_total",
            Unit::Count,
            "Static post page lookups by outcome."
        );
        describe_gauge!(
            "chirp_static_pages_cached",
            Unit::Count,
            "Number of rendered post pages currently cached."
        );
    });
}
