//! The memory subsystem of the pearl gateway: retrieval, augmentation,
//! extraction, persistence-claim validation, and sunrise session recovery.
//! Composes `pearl-core`'s pure logic with `pearl-store`'s persistence and
//! `pearl-backends`'s LLM calls.

pub mod augmenter;
pub mod extractor;
mod llm_text;
pub mod retriever;
pub mod sunrise;
pub mod validator;

pub use augmenter::{AugmentOptions, AugmentResult, Augmenter};
pub use extractor::{ExtractedMemory, ExtractionResult, Extractor, ExtractorOptions};
pub use retriever::{RetrieveOptions, Retriever, RetrieverError};
pub use validator::{GuardAction, GuardOutcome};
