use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use gchat::ChatHooks;
use gcommon::PrincipalId;
use gmemory::MemoryError;
use gprovider::ProviderError;

/// Runs the wrapped hooks and drops any panic they raise.
pub struct SafeChatHooks<H> {
    inner: H,
}

impl<H> SafeChatHooks<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H> ChatHooks for SafeChatHooks<H>
where
    H: ChatHooks,
{
    fn on_route_resolved(&self, model_id: &str, provider: &str) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_route_resolved(model_id, provider)
        }));
    }

    fn on_idempotent_replay(&self, principal: &PrincipalId, key: &str) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_idempotent_replay(principal, key)
        }));
    }

    fn on_provider_call_start(&self, provider: &str, model_id: &str, stream: bool) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_provider_call_start(provider, model_id, stream)
        }));
    }

    fn on_provider_call_complete(
        &self,
        provider: &str,
        model_id: &str,
        status: u16,
        elapsed: Duration,
    ) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner
                .on_provider_call_complete(provider, model_id, status, elapsed)
        }));
    }

    fn on_provider_call_failure(
        &self,
        provider: &str,
        model_id: &str,
        error: &ProviderError,
        elapsed: Duration,
    ) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner
                .on_provider_call_failure(provider, model_id, error, elapsed)
        }));
    }

    fn on_stream_cancelled(&self, provider: &str, model_id: &str, elapsed: Duration) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_stream_cancelled(provider, model_id, elapsed)
        }));
    }

    fn on_persistence_failure(&self, conversation_id: &str, error: &MemoryError) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_persistence_failure(conversation_id, error)
        }));
    }
}

/// Forwards every callback to each registered hook in order. A panicking
/// hook does not stop the rest from running.
#[derive(Clone, Default)]
pub struct FanoutChatHooks {
    hooks: Vec<Arc<dyn ChatHooks>>,
}

impl FanoutChatHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hooks: Arc<dyn ChatHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn each(&self, call: impl Fn(&dyn ChatHooks)) {
        for hooks in &self.hooks {
            let _ = catch_unwind(AssertUnwindSafe(|| call(hooks.as_ref())));
        }
    }
}

impl ChatHooks for FanoutChatHooks {
    fn on_route_resolved(&self, model_id: &str, provider: &str) {
        self.each(|hooks| hooks.on_route_resolved(model_id, provider));
    }

    fn on_idempotent_replay(&self, principal: &PrincipalId, key: &str) {
        self.each(|hooks| hooks.on_idempotent_replay(principal, key));
    }

    fn on_provider_call_start(&self, provider: &str, model_id: &str, stream: bool) {
        self.each(|hooks| hooks.on_provider_call_start(provider, model_id, stream));
    }

    fn on_provider_call_complete(
        &self,
        provider: &str,
        model_id: &str,
        status: u16,
        elapsed: Duration,
    ) {
        self.each(|hooks| hooks.on_provider_call_complete(provider, model_id, status, elapsed));
    }

    fn on_provider_call_failure(
        &self,
        provider: &str,
        model_id: &str,
        error: &ProviderError,
        elapsed: Duration,
    ) {
        self.each(|hooks| hooks.on_provider_call_failure(provider, model_id, error, elapsed));
    }

    fn on_stream_cancelled(&self, provider: &str, model_id: &str, elapsed: Duration) {
        self.each(|hooks| hooks.on_stream_cancelled(provider, model_id, elapsed));
    }

    fn on_persistence_failure(&self, conversation_id: &str, error: &MemoryError) {
        self.each(|hooks| hooks.on_persistence_failure(conversation_id, error));
    }
}
