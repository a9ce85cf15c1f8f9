use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::queue::SubmissionQueue;
use crate::store::{Claim, SubmissionStore, WrapperStore};
use crate::types::{CompletionEvent, Language, SignatureWrapperEntry, Submission, SubmissionUpdate};

// Redis key semantics - API and worker must never drift

pub const SUBMISSION_PREFIX: &str = "bigo:submission";
pub const WRAPPER_PREFIX: &str = "bigo:wrapper";
pub const RUN_LOCK_PREFIX: &str = "bigo:run";
pub const SUBMISSION_QUEUE: &str = "bigo:queue:submissions";
pub const COMPLETIONS_CHANNEL: &str = "bigo:metrics:completions";

pub fn submission_key(id: &Uuid) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, id)
}

/// One hash per (language, normalized signature)
pub fn wrapper_key(language: &Language, signature: &str) -> String {
    format!("{}:{}:{}", WRAPPER_PREFIX, language, signature)
}

pub fn run_lock_key(id: &Uuid) -> String {
    format!("{}:{}", RUN_LOCK_PREFIX, id)
}

// Insert-if-absent: the whole check-and-write runs atomically server-side
const CLAIM_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'id', ARGV[1], 'language', ARGV[2], 'normalized_signature', ARGV[3], 'created_at', ARGV[4])
if tonumber(ARGV[5]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[5])
end
return 1
"#;

const SET_TEMPLATE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'id') ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'wrapper_template', ARGV[2])
redis.call('PERSIST', KEYS[1])
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'id') == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

const UNLOCK_RUN_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed submission and wrapper store
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    claim: Script,
    set_template: Script,
    release: Script,
    unlock_run: Script,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            claim: Script::new(CLAIM_SCRIPT),
            set_template: Script::new(SET_TEMPLATE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            unlock_run: Script::new(UNLOCK_RUN_SCRIPT),
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

fn parse_wrapper_entry(
    key: &str,
    mut fields: HashMap<String, String>,
) -> Result<SignatureWrapperEntry, StoreError> {
    let corrupt = |reason: String| StoreError::CorruptEntry {
        key: key.to_string(),
        reason,
    };
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| corrupt(format!("missing field {}", name)))
    };

    let id = Uuid::parse_str(&take("id")?).map_err(|e| corrupt(e.to_string()))?;
    let language: Language = take("language")?.parse().map_err(|e| corrupt(format!("{}", e)))?;
    let normalized_signature = take("normalized_signature")?;
    let created_at = DateTime::parse_from_rfc3339(&take("created_at")?)
        .map_err(|e| corrupt(e.to_string()))?
        .with_timezone(&Utc);
    let wrapper_template = fields.remove("wrapper_template");

    Ok(SignatureWrapperEntry {
        id,
        language,
        normalized_signature,
        wrapper_template,
        created_at,
    })
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn insert_submission(&self, submission: &Submission) -> Result<Uuid, StoreError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(submission)?;
        conn.set::<_, _, ()>(submission_key(&submission.id), payload)
            .await?;
        Ok(submission.id)
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(submission_key(&id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    async fn update_submission(&self, id: Uuid, update: SubmissionUpdate) -> Result<(), StoreError> {
        // Single writer per submission (run lock), so read-modify-write is safe
        let mut submission = self
            .get_submission(id)
            .await?
            .ok_or(StoreError::SubmissionNotFound(id))?;
        submission.apply(update);

        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&submission)?;
        let written: Option<String> = redis::cmd("SET")
            .arg(submission_key(&id))
            .arg(payload)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        if written.is_none() {
            return Err(StoreError::SubmissionNotFound(id));
        }
        Ok(())
    }

    async fn list_submissions(&self, ids: &[Uuid]) -> Result<Vec<Submission>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = ids.iter().map(submission_key).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }

    async fn try_lock_run(&self, id: Uuid, token: Uuid, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(run_lock_key(&id))
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl).max(1))
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn unlock_run(&self, id: Uuid, token: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .unlock_run
            .key(run_lock_key(&id))
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WrapperStore for RedisStore {
    async fn try_claim(
        &self,
        language: Language,
        signature: &str,
        lease: Duration,
    ) -> Result<Claim, StoreError> {
        let mut conn = self.conn.clone();
        let entry = SignatureWrapperEntry::placeholder(language, signature);
        let inserted: i64 = self
            .claim
            .key(wrapper_key(&language, signature))
            .arg(entry.id.to_string())
            .arg(language.as_str())
            .arg(signature)
            .arg(entry.created_at.to_rfc3339())
            .arg(millis(lease))
            .invoke_async(&mut conn)
            .await?;
        if inserted == 1 {
            debug!(%language, signature, claim_id = %entry.id, "Claimed wrapper placeholder");
            Ok(Claim::Claimed(entry))
        } else {
            debug!(%language, signature, "Wrapper key already claimed");
            Ok(Claim::Taken)
        }
    }

    async fn get_entry(
        &self,
        language: Language,
        signature: &str,
    ) -> Result<Option<SignatureWrapperEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let key = wrapper_key(&language, signature);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_wrapper_entry(&key, fields)
            .map(Some)
            .inspect_err(|e| warn!(error = %e, "Unreadable wrapper entry"))
    }

    async fn set_template(
        &self,
        entry: &SignatureWrapperEntry,
        template: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let updated: i64 = self
            .set_template
            .key(wrapper_key(&entry.language, &entry.normalized_signature))
            .arg(entry.id.to_string())
            .arg(template)
            .invoke_async(&mut conn)
            .await?;
        if updated != 1 {
            debug!(claim_id = %entry.id, "Template refused, claim no longer held");
        }
        Ok(updated == 1)
    }

    async fn release(&self, entry: &SignatureWrapperEntry) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(wrapper_key(&entry.language, &entry.normalized_signature))
            .arg(entry.id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}

/// Submission id queue (LPUSH / BRPOP)
///
/// BRPOP blocks the connection it runs on; give the queue its own
/// `ConnectionManager` rather than sharing the store's.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SubmissionQueue for RedisQueue {
    async fn enqueue(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(SUBMISSION_QUEUE, id.to_string()).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, StoreError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(SUBMISSION_QUEUE)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        match popped {
            Some((_, raw)) => Uuid::parse_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::CorruptEntry {
                    key: SUBMISSION_QUEUE.to_string(),
                    reason: format!("bad submission id {:?}: {}", raw, e),
                }),
            None => Ok(None),
        }
    }

    async fn depth(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(SUBMISSION_QUEUE).await?)
    }
}

/// Publish a completion event for API-side metrics
pub async fn publish_completion(
    conn: &mut ConnectionManager,
    event: &CompletionEvent,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(event)?;
    conn.publish::<_, _, ()>(COMPLETIONS_CHANNEL, payload).await?;
    Ok(())
}
