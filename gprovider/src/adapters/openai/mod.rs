//! OpenAI-compatible chat-completions adapter.

mod provider;
mod serde_api;
mod transport;

pub use provider::{OpenAiProvider, PROVIDER_KIND};
pub use transport::{
    DEFAULT_TIMEOUT, HttpMethod, OpenAiHttpTransport, OpenAiTransport, TransportRequest,
    TransportResponse, collect_body,
};
