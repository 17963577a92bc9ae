use std::sync::{Arc, Mutex};
use std::time::Duration;

use gchat::ChatHooks;
use gcommon::PrincipalId;
use gmemory::MemoryError;
use gprovider::ProviderError;

use crate::{
    FanoutChatHooks, MetricsObservabilityHooks, SafeChatHooks, TracingObservabilityHooks,
};

fn drive_all_callbacks(hooks: &dyn ChatHooks) {
    let provider_error = ProviderError::timeout("provider timeout");
    let memory_error = MemoryError::storage("disk full");

    hooks.on_route_resolved("m1", "openai");
    hooks.on_idempotent_replay(&PrincipalId::from("user-1"), "key-1");
    hooks.on_provider_call_start("openai", "m1", false);
    hooks.on_provider_call_complete("openai", "m1", 200, Duration::from_millis(15));
    hooks.on_provider_call_complete("openai", "m1", 429, Duration::from_millis(5));
    hooks.on_provider_call_failure("openai", "m1", &provider_error, Duration::from_millis(30));
    hooks.on_stream_cancelled("openai", "m1", Duration::from_millis(40));
    hooks.on_persistence_failure("conv_1", &memory_error);
}

#[test]
fn tracing_hooks_smoke_test_all_callbacks() {
    drive_all_callbacks(&TracingObservabilityHooks);
}

#[test]
fn metrics_hooks_smoke_test_all_callbacks() {
    drive_all_callbacks(&MetricsObservabilityHooks);
}

#[derive(Clone, Default)]
struct RecordingChatHooks {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingChatHooks {
    fn events(&self) -> Vec<&'static str> {
        self.events.lock().expect("events lock").clone()
    }

    fn push(&self, event: &'static str) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl ChatHooks for RecordingChatHooks {
    fn on_route_resolved(&self, _model_id: &str, _provider: &str) {
        self.push("route_resolved");
    }

    fn on_idempotent_replay(&self, _principal: &PrincipalId, _key: &str) {
        self.push("idempotent_replay");
    }

    fn on_provider_call_start(&self, _provider: &str, _model_id: &str, _stream: bool) {
        self.push("call_start");
    }

    fn on_provider_call_complete(
        &self,
        _provider: &str,
        _model_id: &str,
        _status: u16,
        _elapsed: Duration,
    ) {
        self.push("call_complete");
    }

    fn on_provider_call_failure(
        &self,
        _provider: &str,
        _model_id: &str,
        _error: &ProviderError,
        _elapsed: Duration,
    ) {
        self.push("call_failure");
    }

    fn on_stream_cancelled(&self, _provider: &str, _model_id: &str, _elapsed: Duration) {
        self.push("stream_cancelled");
    }

    fn on_persistence_failure(&self, _conversation_id: &str, _error: &MemoryError) {
        self.push("persistence_failure");
    }
}

struct PanicChatHooks;

impl ChatHooks for PanicChatHooks {
    fn on_route_resolved(&self, _model_id: &str, _provider: &str) {
        panic!("route hook panic");
    }

    fn on_idempotent_replay(&self, _principal: &PrincipalId, _key: &str) {
        panic!("replay hook panic");
    }

    fn on_provider_call_start(&self, _provider: &str, _model_id: &str, _stream: bool) {
        panic!("start hook panic");
    }

    fn on_provider_call_complete(
        &self,
        _provider: &str,
        _model_id: &str,
        _status: u16,
        _elapsed: Duration,
    ) {
        panic!("complete hook panic");
    }

    fn on_provider_call_failure(
        &self,
        _provider: &str,
        _model_id: &str,
        _error: &ProviderError,
        _elapsed: Duration,
    ) {
        panic!("failure hook panic");
    }

    fn on_stream_cancelled(&self, _provider: &str, _model_id: &str, _elapsed: Duration) {
        panic!("cancel hook panic");
    }

    fn on_persistence_failure(&self, _conversation_id: &str, _error: &MemoryError) {
        panic!("persistence hook panic");
    }
}

#[test]
fn safe_chat_hooks_forward_to_inner_hooks() {
    let recording = RecordingChatHooks::default();
    let hooks = SafeChatHooks::new(recording.clone());

    drive_all_callbacks(&hooks);

    assert_eq!(
        recording.events(),
        vec![
            "route_resolved",
            "idempotent_replay",
            "call_start",
            "call_complete",
            "call_complete",
            "call_failure",
            "stream_cancelled",
            "persistence_failure",
        ]
    );
}

#[test]
fn safe_chat_hooks_swallow_panics() {
    let hooks = SafeChatHooks::new(PanicChatHooks);
    drive_all_callbacks(&hooks);
}

#[test]
fn fanout_keeps_calling_hooks_after_a_panic() {
    let recording = RecordingChatHooks::default();
    let hooks = FanoutChatHooks::new()
        .with(Arc::new(PanicChatHooks))
        .with(Arc::new(TracingObservabilityHooks))
        .with(Arc::new(recording.clone()));

    assert_eq!(hooks.len(), 3);
    hooks.on_route_resolved("m1", "openai");
    hooks.on_stream_cancelled("openai", "m1", Duration::from_millis(1));

    assert_eq!(recording.events(), vec!["route_resolved", "stream_cancelled"]);
}

#[test]
fn empty_fanout_is_a_no_op() {
    let hooks = FanoutChatHooks::new();
    assert!(hooks.is_empty());
    drive_all_callbacks(&hooks);
}
