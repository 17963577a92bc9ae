//! Production-friendly observability hooks for chat completion requests.
//!
//! ```rust
//! use gobserve::{MetricsObservabilityHooks, SafeChatHooks, TracingObservabilityHooks};
//!
//! let _chat_hooks = SafeChatHooks::new(TracingObservabilityHooks);
//! let _metrics = SafeChatHooks::new(MetricsObservabilityHooks);
//! ```

mod metrics_hooks;
mod safe_hooks;
mod tracing_hooks;

pub use metrics_hooks::MetricsObservabilityHooks;
pub use safe_hooks::{FanoutChatHooks, SafeChatHooks};
pub use tracing_hooks::TracingObservabilityHooks;

pub mod prelude {
    pub use crate::{
        FanoutChatHooks, MetricsObservabilityHooks, SafeChatHooks, TracingObservabilityHooks,
    };
}

#[cfg(test)]
mod tests;
