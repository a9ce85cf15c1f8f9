/// Persistence Seams - Submission and Wrapper Stores
///
/// **Core Responsibility:**
/// `SubmissionStore` and `WrapperStore` are what the pipeline and the API
/// talk to. The Redis backend lives in `crate::redis`; `MemoryStore`
/// implements the same contracts in-process (tests, local runs).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Language, SignatureWrapperEntry, Submission, SubmissionUpdate};

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert_submission(&self, submission: &Submission) -> Result<Uuid, StoreError>;

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError>;

    /// Partial update; fails with `SubmissionNotFound` for unknown ids
    async fn update_submission(&self, id: Uuid, update: SubmissionUpdate) -> Result<(), StoreError>;

    /// Records for the given ids in request order; unknown ids are skipped
    async fn list_submissions(&self, ids: &[Uuid]) -> Result<Vec<Submission>, StoreError>;

    /// Per-submission run lock (insert-if-absent with expiry)
    async fn try_lock_run(&self, id: Uuid, token: Uuid, ttl: Duration) -> Result<bool, StoreError>;

    /// Releases the run lock if `token` still owns it
    async fn unlock_run(&self, id: Uuid, token: Uuid) -> Result<(), StoreError>;
}

/// Outcome of an insert-if-absent on a wrapper cache key
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Placeholder inserted; the caller must fill it in or release it
    Claimed(SignatureWrapperEntry),
    /// Another caller already holds the key
    Taken,
}

#[async_trait]
pub trait WrapperStore: Send + Sync {
    /// Atomically insert a placeholder (template = null) iff no entry exists.
    /// A non-zero `lease` expires the placeholder if it is never filled in.
    async fn try_claim(
        &self,
        language: Language,
        signature: &str,
        lease: Duration,
    ) -> Result<Claim, StoreError>;

    async fn get_entry(
        &self,
        language: Language,
        signature: &str,
    ) -> Result<Option<SignatureWrapperEntry>, StoreError>;

    async fn get_template(
        &self,
        language: Language,
        signature: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_entry(language, signature)
            .await?
            .and_then(|entry| entry.wrapper_template))
    }

    /// Fill in the claimant's placeholder and drop its lease.
    /// Returns false when `entry` no longer owns the key.
    async fn set_template(
        &self,
        entry: &SignatureWrapperEntry,
        template: &str,
    ) -> Result<bool, StoreError>;

    /// Delete the claimant's placeholder. Returns false when `entry` no
    /// longer owns the key.
    async fn release(&self, entry: &SignatureWrapperEntry) -> Result<bool, StoreError>;
}

struct Leased<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Leased<T> {
    fn new(value: T, lease: Duration) -> Self {
        let expires_at = if lease.is_zero() {
            None
        } else {
            Some(Instant::now() + lease)
        };
        Self { value, expires_at }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

type WrapperKey = (Language, String);

/// In-process store with the same atomicity guarantees as the Redis backend
/// (every operation runs under one mutex)
#[derive(Default)]
pub struct MemoryStore {
    submissions: Mutex<HashMap<Uuid, Submission>>,
    wrappers: Mutex<HashMap<WrapperKey, Leased<SignatureWrapperEntry>>>,
    run_locks: Mutex<HashMap<Uuid, Leased<Uuid>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored submission, in no particular order
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn live_entry(
        wrappers: &mut HashMap<WrapperKey, Leased<SignatureWrapperEntry>>,
        key: &WrapperKey,
    ) -> Option<SignatureWrapperEntry> {
        match wrappers.get(key) {
            Some(leased) if leased.is_live() => Some(leased.value.clone()),
            Some(_) => {
                wrappers.remove(key);
                None
            }
            None => None,
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::CorruptEntry {
        key: "memory".to_string(),
        reason: "store mutex poisoned".to_string(),
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert_submission(&self, submission: &Submission) -> Result<Uuid, StoreError> {
        let mut submissions = self.submissions.lock().map_err(poisoned)?;
        submissions.insert(submission.id, submission.clone());
        Ok(submission.id)
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        let submissions = self.submissions.lock().map_err(poisoned)?;
        Ok(submissions.get(&id).cloned())
    }

    async fn update_submission(&self, id: Uuid, update: SubmissionUpdate) -> Result<(), StoreError> {
        let mut submissions = self.submissions.lock().map_err(poisoned)?;
        let submission = submissions
            .get_mut(&id)
            .ok_or(StoreError::SubmissionNotFound(id))?;
        submission.apply(update);
        Ok(())
    }

    async fn list_submissions(&self, ids: &[Uuid]) -> Result<Vec<Submission>, StoreError> {
        let submissions = self.submissions.lock().map_err(poisoned)?;
        Ok(ids.iter().filter_map(|id| submissions.get(id).cloned()).collect())
    }

    async fn try_lock_run(&self, id: Uuid, token: Uuid, ttl: Duration) -> Result<bool, StoreError> {
        let mut locks = self.run_locks.lock().map_err(poisoned)?;
        if locks.get(&id).is_some_and(|lock| lock.is_live()) {
            return Ok(false);
        }
        locks.insert(id, Leased::new(token, ttl));
        Ok(true)
    }

    async fn unlock_run(&self, id: Uuid, token: Uuid) -> Result<(), StoreError> {
        let mut locks = self.run_locks.lock().map_err(poisoned)?;
        if locks.get(&id).is_some_and(|lock| lock.value == token) {
            locks.remove(&id);
        }
        Ok(())
    }
}

#[async_trait]
impl WrapperStore for MemoryStore {
    async fn try_claim(
        &self,
        language: Language,
        signature: &str,
        lease: Duration,
    ) -> Result<Claim, StoreError> {
        let mut wrappers = self.wrappers.lock().map_err(poisoned)?;
        let key = (language, signature.to_string());
        if Self::live_entry(&mut wrappers, &key).is_some() {
            return Ok(Claim::Taken);
        }
        let entry = SignatureWrapperEntry::placeholder(language, signature);
        wrappers.insert(key, Leased::new(entry.clone(), lease));
        Ok(Claim::Claimed(entry))
    }

    async fn get_entry(
        &self,
        language: Language,
        signature: &str,
    ) -> Result<Option<SignatureWrapperEntry>, StoreError> {
        let mut wrappers = self.wrappers.lock().map_err(poisoned)?;
        Ok(Self::live_entry(&mut wrappers, &(language, signature.to_string())))
    }

    async fn set_template(
        &self,
        entry: &SignatureWrapperEntry,
        template: &str,
    ) -> Result<bool, StoreError> {
        let mut wrappers = self.wrappers.lock().map_err(poisoned)?;
        let key = (entry.language, entry.normalized_signature.clone());
        match Self::live_entry(&mut wrappers, &key) {
            Some(current) if current.id == entry.id => {
                let mut filled = current;
                filled.wrapper_template = Some(template.to_string());
                wrappers.insert(key, Leased::new(filled, Duration::ZERO));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, entry: &SignatureWrapperEntry) -> Result<bool, StoreError> {
        let mut wrappers = self.wrappers.lock().map_err(poisoned)?;
        let key = (entry.language, entry.normalized_signature.clone());
        match Self::live_entry(&mut wrappers, &key) {
            Some(current) if current.id == entry.id => {
                wrappers.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
