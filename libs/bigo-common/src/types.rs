use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::UnsupportedLanguage;

/// Strongly-typed language enum
/// Aliases accepted at the boundary (python3, c++, node, js) collapse here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
    JavaScript,
}

impl Language {
    /// Returns all language variants
    /// This is the single source of truth for available languages
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::C,
            Language::Cpp,
            Language::Java,
            Language::Python,
            Language::JavaScript,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    /// Parse a language tag (case-insensitive, aliases allowed)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission lifecycle
/// pending → processing → {completed, failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SubmissionStatus {
    /// Terminal submissions are never reprocessed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Failed)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Processing => "processing",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Requested analysis mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    /// Signature-cached wrapper when a signature is found, direct run otherwise
    Standard,
    /// Remote boilerplate generation, `KEY_TIME=` markers
    Complexity,
}

/// Submission record (the unit of work)
///
/// `id`, `code`, `language`, `mode` and `input` are written once at creation.
/// Everything else is written by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub code: String,
    /// Language as declared by the client; parsed by the pipeline
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SubmissionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub output: Option<String>,
    /// Single-sample wall-clock duration (ms) from direct execution
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub execution_time_small: Option<f64>,
    #[serde(default)]
    pub execution_time_medium: Option<f64>,
    #[serde(default)]
    pub execution_time_large: Option<f64>,
    #[serde(default)]
    pub estimated_complexity: Option<String>,
    /// Mirrors `estimated_complexity` for older readers
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub ai_explanation: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied at creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmission {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub mode: Option<SubmissionMode>,
    #[serde(default)]
    pub input: Option<String>,
}

impl Submission {
    /// Build a fresh record; it starts in `processing` because creation is
    /// immediately followed by an enqueue
    pub fn create(new: NewSubmission) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code: new.code,
            language: new.language,
            mode: new.mode,
            input: new.input,
            status: SubmissionStatus::Processing,
            output: None,
            execution_time: None,
            execution_time_small: None,
            execution_time_medium: None,
            execution_time_large: None,
            estimated_complexity: None,
            complexity: None,
            ai_explanation: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update and bump `updated_at`
    pub fn apply(&mut self, update: SubmissionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.output.is_some() {
            self.output = update.output;
        }
        if update.execution_time.is_some() {
            self.execution_time = update.execution_time;
        }
        if update.execution_time_small.is_some() {
            self.execution_time_small = update.execution_time_small;
        }
        if update.execution_time_medium.is_some() {
            self.execution_time_medium = update.execution_time_medium;
        }
        if update.execution_time_large.is_some() {
            self.execution_time_large = update.execution_time_large;
        }
        if update.estimated_complexity.is_some() {
            self.estimated_complexity = update.estimated_complexity;
        }
        if update.complexity.is_some() {
            self.complexity = update.complexity;
        }
        if update.ai_explanation.is_some() {
            self.ai_explanation = update.ai_explanation;
        }
        if update.error_message.is_some() {
            self.error_message = update.error_message;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionUpdate {
    pub status: Option<SubmissionStatus>,
    pub output: Option<String>,
    pub execution_time: Option<f64>,
    pub execution_time_small: Option<f64>,
    pub execution_time_medium: Option<f64>,
    pub execution_time_large: Option<f64>,
    pub estimated_complexity: Option<String>,
    pub complexity: Option<String>,
    pub ai_explanation: Option<String>,
    pub error_message: Option<String>,
}

impl SubmissionUpdate {
    pub fn processing() -> Self {
        Self {
            status: Some(SubmissionStatus::Processing),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(SubmissionStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Cache row keyed by (language, normalized signature)
///
/// `id` doubles as the claim token: only the holder may fill in or delete
/// the placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureWrapperEntry {
    pub id: Uuid,
    pub language: Language,
    pub normalized_signature: String,
    pub wrapper_template: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SignatureWrapperEntry {
    pub fn placeholder(language: Language, normalized_signature: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            language,
            normalized_signature: normalized_signature.to_string(),
            wrapper_template: None,
            created_at: Utc::now(),
        }
    }
}

/// Completion event published by workers, consumed by API metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub submission_id: Uuid,
    pub language: String,
    pub status: SubmissionStatus,
    pub duration_ms: f64,
}
