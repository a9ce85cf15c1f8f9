/// Test Doubles - Fakes shared by the worker's unit tests

use async_trait::async_trait;
use bigo_common::config::CacheConfig;
use bigo_common::{
    Claim, Language, MemoryStore, SignatureWrapperEntry, StoreError, UnsupportedLanguage, WrapperStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::{ExecutionEngine, ExecutionOutput, TIMEOUT_EXIT_CODE};
use crate::llm::{CodeGenerator, ComplexityMetrics, Explainer, GenerationError};

pub const VALID_WRAPPER: &str =
    "{{USER_CODE}}\nprint('SMALL: 0.001')\nprint('MEDIUM: 0.002')\nprint('LARGE: 0.004')\n";

pub fn cache_config() -> CacheConfig {
    CacheConfig {
        poll_interval_ms: 10,
        poll_attempts: 50,
        claim_ttl_ms: 0,
    }
}

/// Generator that counts calls and can be told to fail or stall
pub struct CountingGenerator {
    wrapper_calls: AtomicUsize,
    boilerplate_calls: AtomicUsize,
    fail_first: usize,
    delay: Duration,
    template: String,
}

impl CountingGenerator {
    pub fn new() -> Self {
        Self {
            wrapper_calls: AtomicUsize::new(0),
            boilerplate_calls: AtomicUsize::new(0),
            fail_first: 0,
            delay: Duration::ZERO,
            template: VALID_WRAPPER.to_string(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = template.to_string();
        self
    }

    pub fn wrapper_calls(&self) -> usize {
        self.wrapper_calls.load(Ordering::SeqCst)
    }

    pub fn boilerplate_calls(&self) -> usize {
        self.boilerplate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeGenerator for CountingGenerator {
    async fn generate_boilerplate(&self, _language: Language, code: &str) -> Result<String, GenerationError> {
        let call = self.boilerplate_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(GenerationError::Remote("Simulated LLM API Timeout".to_string()));
        }
        Ok(format!("{}\n# instrumented", code))
    }

    async fn generate_wrapper(&self, _signature: &str) -> Result<String, GenerationError> {
        let call = self.wrapper_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.fail_first {
            return Err(GenerationError::Remote("Simulated LLM API Timeout".to_string()));
        }
        Ok(self.template.clone())
    }
}

/// Engine returning a canned output and recording every program it ran
pub struct FakeEngine {
    output: ExecutionOutput,
    runs: Mutex<Vec<(Language, String, Option<String>)>>,
}

impl FakeEngine {
    pub fn with_stdout(stdout: &str) -> Self {
        Self::with_output(ExecutionOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: 7,
            timed_out: false,
        })
    }

    pub fn timing_out() -> Self {
        Self::with_output(ExecutionOutput {
            stdout: String::new(),
            stderr: "Execution Timed Out".to_string(),
            exit_code: TIMEOUT_EXIT_CODE,
            duration_ms: 2000,
            timed_out: true,
        })
    }

    pub fn with_output(output: ExecutionOutput) -> Self {
        Self {
            output,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> Vec<(Language, String, Option<String>)> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionEngine for FakeEngine {
    async fn execute(
        &self,
        language: Language,
        code: &str,
        stdin: Option<&str>,
    ) -> Result<ExecutionOutput, UnsupportedLanguage> {
        self.runs
            .lock()
            .unwrap()
            .push((language, code.to_string(), stdin.map(str::to_string)));
        Ok(self.output.clone())
    }
}

pub struct StaticExplainer;

#[async_trait]
impl Explainer for StaticExplainer {
    async fn explain(&self, _code: &str, metrics: &ComplexityMetrics) -> Result<String, GenerationError> {
        Ok(format!(
            "explained {}",
            metrics.estimated_complexity.as_deref().unwrap_or("single run")
        ))
    }
}

/// Memory store whose `release` always errors
pub struct FailingReleaseStore {
    inner: MemoryStore,
}

impl FailingReleaseStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl WrapperStore for FailingReleaseStore {
    async fn try_claim(&self, language: Language, signature: &str, lease: Duration) -> Result<Claim, StoreError> {
        self.inner.try_claim(language, signature, lease).await
    }

    async fn get_entry(
        &self,
        language: Language,
        signature: &str,
    ) -> Result<Option<SignatureWrapperEntry>, StoreError> {
        self.inner.get_entry(language, signature).await
    }

    async fn set_template(&self, entry: &SignatureWrapperEntry, template: &str) -> Result<bool, StoreError> {
        self.inner.set_template(entry, template).await
    }

    async fn release(&self, entry: &SignatureWrapperEntry) -> Result<bool, StoreError> {
        Err(StoreError::CorruptEntry {
            key: entry.normalized_signature.clone(),
            reason: "connection reset".to_string(),
        })
    }
}
