//! Metrics-based observability hooks for routing, provider calls, and persistence.
//!
//! ```rust
//! use gchat::ChatHooks;
//! use gobserve::MetricsObservabilityHooks;
//!
//! fn accepts_chat_hooks(_hooks: &dyn ChatHooks) {}
//!
//! let hooks = MetricsObservabilityHooks;
//! accepts_chat_hooks(&hooks);
//! ```

use std::time::Duration;

use gchat::ChatHooks;
use gcommon::PrincipalId;
use gmemory::MemoryError;
use gprovider::ProviderError;

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObservabilityHooks;

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

impl ChatHooks for MetricsObservabilityHooks {
    fn on_route_resolved(&self, model_id: &str, provider: &str) {
        metrics::counter!(
            "gantry_chat_route_resolved_total",
            "model" => model_id.to_string(),
            "provider" => provider.to_string()
        )
        .increment(1);
    }

    fn on_idempotent_replay(&self, _principal: &PrincipalId, _key: &str) {
        metrics::counter!("gantry_chat_idempotent_replay_total").increment(1);
    }

    fn on_provider_call_start(&self, provider: &str, model_id: &str, stream: bool) {
        metrics::counter!(
            "gantry_provider_call_start_total",
            "provider" => provider.to_string(),
            "model" => model_id.to_string(),
            "stream" => stream.to_string()
        )
        .increment(1);
    }

    fn on_provider_call_complete(
        &self,
        provider: &str,
        model_id: &str,
        status: u16,
        elapsed: Duration,
    ) {
        metrics::counter!(
            "gantry_provider_call_complete_total",
            "provider" => provider.to_string(),
            "model" => model_id.to_string(),
            "status_class" => status_class(status)
        )
        .increment(1);
        metrics::histogram!(
            "gantry_provider_call_duration_seconds",
            "provider" => provider.to_string(),
            "model" => model_id.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    fn on_provider_call_failure(
        &self,
        provider: &str,
        model_id: &str,
        error: &ProviderError,
        elapsed: Duration,
    ) {
        metrics::counter!(
            "gantry_provider_call_failure_total",
            "provider" => provider.to_string(),
            "model" => model_id.to_string(),
            "error_kind" => format!("{:?}", error.kind)
        )
        .increment(1);
        metrics::histogram!(
            "gantry_provider_call_duration_seconds",
            "provider" => provider.to_string(),
            "model" => model_id.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    fn on_stream_cancelled(&self, provider: &str, model_id: &str, elapsed: Duration) {
        metrics::counter!(
            "gantry_provider_stream_cancelled_total",
            "provider" => provider.to_string(),
            "model" => model_id.to_string()
        )
        .increment(1);
        metrics::histogram!(
            "gantry_provider_stream_cancelled_after_seconds",
            "provider" => provider.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    fn on_persistence_failure(&self, _conversation_id: &str, error: &MemoryError) {
        metrics::counter!(
            "gantry_persistence_failure_total",
            "error_kind" => format!("{:?}", error.kind)
        )
        .increment(1);
    }
}

#[cfg(test)]
mod status_tests {
    use super::status_class;

    #[test]
    fn statuses_are_bucketed_by_class() {
        assert_eq!(status_class(200), "2xx");
        assert_eq!(status_class(429), "4xx");
        assert_eq!(status_class(503), "5xx");
        assert_eq!(status_class(0), "other");
    }
}
