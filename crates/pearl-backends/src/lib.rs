//! Embedding provider adapters and chat backend adapters for the pearl gateway,
//! unified behind one streaming contract. Everything here does real I/O
//! (`reqwest`, `eventsource-stream`) — the pure classification/routing logic
//! lives in `pearl-core`.

pub mod chat;
pub mod embedding;
pub mod error;
pub mod oauth;
pub mod providers;
pub mod registry;
pub mod retry;

pub use chat::{ChatBackend, ChatChunk, ChatStream, FinishReason, UnifiedChatRequest};
pub use embedding::EmbeddingProvider;
pub use error::BackendError;
pub use registry::BackendRegistry;
pub use retry::RetryPolicy;

/// Builds a client with the per-request timeout every adapter dispatches
/// through, so a hung backend surfaces as a retryable [`BackendError::Network`]
/// instead of hanging the request indefinitely.
pub fn http_client(request_timeout_ms: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(request_timeout_ms))
        .build()
        .expect("reqwest client with static config must build")
}
