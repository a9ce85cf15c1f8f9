use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    pub language_config_path: Option<String>,
    pub worker_concurrency: usize,
    pub run_lock_ttl_ms: u64,
    pub sandbox: SandboxConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
}

/// Resource limits for one sandboxed run
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub image: String,
    pub timeout_ms: u64,
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: i64,
    /// Parent directory for per-run scratch directories
    pub workdir: PathBuf,
}

/// Wrapper-cache claim and polling budget
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub poll_interval_ms: u64,
    pub poll_attempts: u32,
    pub claim_ttl_ms: u64,
}

/// Remote generation/explanation model
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            port: parsed(&lookup, "PORT").unwrap_or(3000),
            language_config_path: lookup("LANGUAGE_CONFIG_PATH").filter(|p| !p.is_empty()),
            worker_concurrency: parsed(&lookup, "WORKER_CONCURRENCY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),
            run_lock_ttl_ms: parsed(&lookup, "RUN_LOCK_TTL_MS").unwrap_or(300_000),
            sandbox: SandboxConfig {
                image: lookup("SANDBOX_IMAGE").unwrap_or_else(|| "sandbox-runner".to_string()),
                timeout_ms: parsed(&lookup, "SANDBOX_TIMEOUT_MS").unwrap_or(10_000),
                memory_mb: parsed(&lookup, "SANDBOX_MEMORY_MB").unwrap_or(512),
                cpus: parsed(&lookup, "SANDBOX_CPUS").unwrap_or(0.5),
                pids_limit: parsed(&lookup, "SANDBOX_PIDS_LIMIT").unwrap_or(64),
                workdir: lookup("SANDBOX_WORKDIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| env::temp_dir().join("bigo-sandbox")),
            },
            cache: CacheConfig {
                poll_interval_ms: parsed(&lookup, "WRAPPER_POLL_INTERVAL_MS").unwrap_or(500),
                poll_attempts: parsed(&lookup, "WRAPPER_POLL_ATTEMPTS").unwrap_or(60),
                claim_ttl_ms: parsed(&lookup, "WRAPPER_CLAIM_TTL_MS").unwrap_or(120_000),
            },
            llm: LlmConfig {
                api_key: lookup("GEMINI_API_KEY").filter(|k| !k.is_empty()),
                model: lookup("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.5-flash".to_string()),
                base_url: lookup("GEMINI_BASE_URL")
                    .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
                timeout_ms: parsed(&lookup, "LLM_TIMEOUT_MS").unwrap_or(30_000),
            },
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CacheConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.port, 3000);
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.sandbox.image, "sandbox-runner");
        assert_eq!(config.sandbox.timeout_ms, 10_000);
        assert_eq!(config.sandbox.memory_mb, 512);
        assert_eq!(config.cache.poll_interval_ms, 500);
        assert_eq!(config.cache.poll_attempts, 60);
        assert!(config.llm.api_key.is_none());
        assert!(config.language_config_path.is_none());
    }

    #[test]
    fn test_config_overrides() {
        let config = config_with(&[
            ("SANDBOX_TIMEOUT_MS", "2500"),
            ("SANDBOX_CPUS", "1.5"),
            ("WORKER_CONCURRENCY", "8"),
            ("GEMINI_API_KEY", "secret"),
            ("WRAPPER_POLL_ATTEMPTS", "3"),
        ]);
        assert_eq!(config.sandbox.timeout(), Duration::from_millis(2500));
        assert_eq!(config.sandbox.cpus, 1.5);
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.llm.api_key.as_deref(), Some("secret"));
        assert_eq!(config.cache.poll_attempts, 3);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_with(&[
            ("PORT", "not-a-port"),
            ("WORKER_CONCURRENCY", "0"),
            ("GEMINI_API_KEY", ""),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.worker_concurrency, 4);
        assert!(config.llm.api_key.is_none());
    }
}
