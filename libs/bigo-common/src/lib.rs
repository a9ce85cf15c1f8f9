pub mod config;
pub mod error;
pub mod language;
pub mod queue;
pub mod redis;
pub mod store;
pub mod timing;
pub mod types;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{StoreError, UnsupportedLanguage};
pub use language::LanguageRegistry;
pub use queue::{MemoryQueue, SubmissionQueue};
pub use store::{Claim, MemoryStore, SubmissionStore, WrapperStore};
pub use types::{
    Language, NewSubmission, SignatureWrapperEntry, Submission, SubmissionMode, SubmissionStatus,
    SubmissionUpdate,
};
