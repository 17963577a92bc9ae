//! Lifecycle hooks for observing chat completion requests.
//!
//! ```rust
//! use gchat::{ChatHooks, NoopChatHooks};
//!
//! fn accepts_hooks(_hooks: &dyn ChatHooks) {}
//!
//! let hooks = NoopChatHooks;
//! accepts_hooks(&hooks);
//! ```

use std::time::Duration;

use gcommon::PrincipalId;
use gmemory::MemoryError;
use gprovider::ProviderError;

pub trait ChatHooks: Send + Sync {
    fn on_route_resolved(&self, _model_id: &str, _provider: &str) {}

    fn on_idempotent_replay(&self, _principal: &PrincipalId, _key: &str) {}

    fn on_provider_call_start(&self, _provider: &str, _model_id: &str, _stream: bool) {}

    fn on_provider_call_complete(
        &self,
        _provider: &str,
        _model_id: &str,
        _status: u16,
        _elapsed: Duration,
    ) {
    }

    fn on_provider_call_failure(
        &self,
        _provider: &str,
        _model_id: &str,
        _error: &ProviderError,
        _elapsed: Duration,
    ) {
    }

    fn on_stream_cancelled(&self, _provider: &str, _model_id: &str, _elapsed: Duration) {}

    fn on_persistence_failure(&self, _conversation_id: &str, _error: &MemoryError) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopChatHooks;

impl ChatHooks for NoopChatHooks {}
