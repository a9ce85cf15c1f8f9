use thiserror::Error;

/// Requested language is not in the supported set (configuration error)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Persistence failures, shared by every backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt wrapper entry at {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("submission {0} not found")]
    SubmissionNotFound(uuid::Uuid),
}

/// Language registry loading failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read language config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid language config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    UnknownLanguage(#[from] UnsupportedLanguage),
}
