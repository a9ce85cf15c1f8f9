/// Wrapper Cache
///
/// **Core Responsibility:**
/// Return the wrapper template for a (language, signature), generating it at
/// most once across every worker sharing the store.
///
/// **Protocol:**
/// 1. Fast path: a stored template is returned as-is
/// 2. Otherwise claim the key with an atomic insert-if-absent placeholder
/// 3. The claimant generates, validates and stores the template
/// 4. Everyone else polls at a fixed interval; an entry that disappears
///    (claimant released it, or its lease ran out) is claimed again
/// 5. A claimant that fails deletes its own placeholder before surfacing
///    the error
///
/// The poll budget is shared across re-claims, so `obtain` always terminates.

use bigo_common::config::CacheConfig;
use bigo_common::{Claim, Language, SignatureWrapperEntry, StoreError, WrapperStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::llm::{CodeGenerator, GenerationError};
use crate::transformer::USER_CODE_MARKER;

/// Substrings a usable wrapper must contain
const REQUIRED_TOKENS: [&str; 4] = [USER_CODE_MARKER, "SMALL:", "MEDIUM:", "LARGE:"];

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Timed out waiting for wrapper {signature} after {attempts} polls")]
    ClaimTimeout { signature: String, attempts: u32 },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Generated wrapper for {signature} is missing {}", .missing.join(", "))]
    InvalidTemplate {
        signature: String,
        missing: Vec<&'static str>,
    },

    #[error("Claim on {signature} expired before the wrapper was stored")]
    ClaimLost { signature: String },

    /// The placeholder could not be deleted; other workers will wait on it
    /// until its lease runs out
    #[error("{cause} (failed to release wrapper claim on {signature}: {source})")]
    LockRelease {
        signature: String,
        source: StoreError,
        cause: Box<CacheError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Check that a template has the injection marker and all three labels
pub fn validate_wrapper(template: &str) -> Result<(), Vec<&'static str>> {
    let missing: Vec<&'static str> = REQUIRED_TOKENS
        .iter()
        .copied()
        .filter(|token| !template.contains(token))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

pub struct WrapperCache {
    store: Arc<dyn WrapperStore>,
    generator: Arc<dyn CodeGenerator>,
    config: CacheConfig,
}

impl WrapperCache {
    pub fn new(store: Arc<dyn WrapperStore>, generator: Arc<dyn CodeGenerator>, config: CacheConfig) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    pub async fn obtain(&self, language: Language, signature: &str) -> Result<String, CacheError> {
        if let Some(template) = self.store.get_template(language, signature).await? {
            debug!(%signature, "Wrapper cache hit");
            return Ok(template);
        }

        let lease = Duration::from_millis(self.config.claim_ttl_ms);
        let mut attempts = 0u32;

        loop {
            match self.store.try_claim(language, signature, lease).await? {
                Claim::Claimed(entry) => {
                    info!(%signature, claim = %entry.id, "Claimed wrapper generation");
                    return self.fill_claim(&entry).await;
                }
                Claim::Taken => {
                    debug!(%signature, "Wrapper claim held elsewhere, waiting");
                }
            }

            loop {
                if attempts >= self.config.poll_attempts {
                    return Err(CacheError::ClaimTimeout {
                        signature: signature.to_string(),
                        attempts,
                    });
                }
                attempts += 1;
                tokio::time::sleep(self.config.poll_interval()).await;

                match self.store.get_entry(language, signature).await? {
                    Some(SignatureWrapperEntry {
                        wrapper_template: Some(template),
                        ..
                    }) => {
                        debug!(%signature, attempts, "Wrapper became available");
                        return Ok(template);
                    }
                    Some(_) => continue,
                    None => {
                        debug!(%signature, attempts, "Wrapper claim vanished, retrying claim");
                        break;
                    }
                }
            }
        }
    }

    /// Claimant path: any failure releases the placeholder
    async fn fill_claim(&self, entry: &SignatureWrapperEntry) -> Result<String, CacheError> {
        let cause = match self.generate_and_store(entry).await {
            Ok(template) => return Ok(template),
            Err(cause) => cause,
        };

        let signature = &entry.normalized_signature;
        warn!(%signature, error = %cause, "Wrapper generation failed, releasing claim");

        match self.store.release(entry).await {
            Ok(true) => Err(cause),
            Ok(false) => {
                debug!(%signature, "Claim already gone at release");
                Err(cause)
            }
            Err(source) => {
                error!(
                    %signature,
                    claim = %entry.id,
                    error = %source,
                    "Failed to release wrapper claim; waiters blocked until lease expiry"
                );
                Err(CacheError::LockRelease {
                    signature: signature.clone(),
                    source,
                    cause: Box::new(cause),
                })
            }
        }
    }

    async fn generate_and_store(&self, entry: &SignatureWrapperEntry) -> Result<String, CacheError> {
        let signature = &entry.normalized_signature;
        let template = self.generator.generate_wrapper(signature).await?;

        validate_wrapper(&template).map_err(|missing| CacheError::InvalidTemplate {
            signature: signature.clone(),
            missing,
        })?;

        if !self.store.set_template(entry, &template).await? {
            return Err(CacheError::ClaimLost {
                signature: signature.clone(),
            });
        }
        info!(%signature, "Stored wrapper template");
        Ok(template)
    }
}
