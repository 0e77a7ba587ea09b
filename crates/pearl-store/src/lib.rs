//! Persistence layer for the pearl gateway: the SQLite-backed memory store,
//! the append-only transcript log, the JSONL request log, and the shared
//! OAuth credentials file.

pub mod credentials;
pub mod error;
pub mod request_log;
pub mod schema;
pub mod store;
pub mod transcript;

pub use credentials::{CredentialsFile, TokenSet};
pub use error::{Result, StoreError};
pub use request_log::{RequestLog, RequestLogEntry, TokenUsage};
pub use store::{MemoryUpdate, OrderBy, QueryFilter, Store, StoreStats};
pub use transcript::{TranscriptLog, TranscriptRecord};
