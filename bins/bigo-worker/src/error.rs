use bigo_common::timing::TimingParseError;
use bigo_common::{StoreError, UnsupportedLanguage};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::CacheError;
use crate::llm::GenerationError;

/// Failures inside one submission's branch; each becomes a persisted
/// `failed` state carrying this message
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    #[error("Sandbox infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Execution Timed Out after {0}ms")]
    TimedOut(u64),

    #[error("Program exited with code {code}: {stderr}")]
    RuntimeError { code: i64, stderr: String },

    #[error(transparent)]
    Parse(#[from] TimingParseError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Explanation failed: {0}")]
    Explanation(#[source] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures surfaced to the caller of `process`; nothing is persisted
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Submission not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}
