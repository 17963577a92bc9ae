//! Tracing-based observability hooks for routing, provider calls, and persistence.
//!
//! ```rust
//! use gchat::ChatHooks;
//! use gobserve::TracingObservabilityHooks;
//!
//! fn accepts_chat_hooks(_hooks: &dyn ChatHooks) {}
//!
//! let hooks = TracingObservabilityHooks;
//! accepts_chat_hooks(&hooks);
//! ```

use std::time::Duration;

use gchat::ChatHooks;
use gcommon::PrincipalId;
use gmemory::MemoryError;
use gprovider::ProviderError;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObservabilityHooks;

impl ChatHooks for TracingObservabilityHooks {
    fn on_route_resolved(&self, model_id: &str, provider: &str) {
        tracing::debug!(phase = "routing", event = "resolved", model = model_id, provider);
    }

    fn on_idempotent_replay(&self, principal: &PrincipalId, key: &str) {
        tracing::info!(
            phase = "idempotency",
            event = "replay",
            principal = %principal,
            idempotency_key = key
        );
    }

    fn on_provider_call_start(&self, provider: &str, model_id: &str, stream: bool) {
        tracing::info!(
            phase = "provider",
            event = "call_start",
            provider,
            model = model_id,
            stream
        );
    }

    fn on_provider_call_complete(
        &self,
        provider: &str,
        model_id: &str,
        status: u16,
        elapsed: Duration,
    ) {
        if (200..300).contains(&status) {
            tracing::info!(
                phase = "provider",
                event = "call_complete",
                provider,
                model = model_id,
                status,
                elapsed_ms = elapsed.as_millis() as u64
            );
        } else {
            tracing::warn!(
                phase = "provider",
                event = "call_complete",
                provider,
                model = model_id,
                status,
                elapsed_ms = elapsed.as_millis() as u64
            );
        }
    }

    fn on_provider_call_failure(
        &self,
        provider: &str,
        model_id: &str,
        error: &ProviderError,
        elapsed: Duration,
    ) {
        tracing::error!(
            phase = "provider",
            event = "call_failure",
            provider,
            model = model_id,
            elapsed_ms = elapsed.as_millis() as u64,
            error_kind = ?error.kind,
            retryable = error.retryable,
            error = %error
        );
    }

    fn on_stream_cancelled(&self, provider: &str, model_id: &str, elapsed: Duration) {
        tracing::warn!(
            phase = "provider",
            event = "stream_cancelled",
            provider,
            model = model_id,
            elapsed_ms = elapsed.as_millis() as u64
        );
    }

    fn on_persistence_failure(&self, conversation_id: &str, error: &MemoryError) {
        tracing::error!(
            phase = "persistence",
            event = "append_failure",
            conversation_id,
            error_kind = ?error.kind,
            error = %error
        );
    }
}
