mod builtin;
mod cache;
mod engine;
mod error;
mod evaluator;
mod llm;
mod pipeline;
mod pool;
mod transformer;

#[cfg(test)]
mod testing;

use anyhow::Context;
use bigo_common::redis::{RedisQueue, RedisStore};
use bigo_common::{Config, LanguageRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::builtin::BuiltinGenerator;
use crate::cache::WrapperCache;
use crate::engine::DockerEngine;
use crate::llm::{CodeGenerator, Explainer, GeminiClient, TemplateExplainer};
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::pool::WorkerPool;
use crate::transformer::CodeTransformer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Big-O worker booting...");
    let config = Config::from_env();

    let registry = match &config.language_config_path {
        Some(path) => LanguageRegistry::load_from_file(path)
            .with_context(|| format!("Failed to load language config from {}", path))?,
        None => LanguageRegistry::builtin(),
    };
    let registry = Arc::new(registry);
    info!(languages = ?registry.enabled_languages(), "Language registry ready");

    let client = ::redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let store_conn = ::redis::aio::ConnectionManager::new(client.clone())
        .await
        .context("Failed to connect to Redis")?;
    // BRPOP blocks its connection
    let queue_conn = ::redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    let store = Arc::new(RedisStore::new(store_conn.clone()));
    let queue = Arc::new(RedisQueue::new(queue_conn));

    let engine = Arc::new(DockerEngine::new(registry.clone(), config.sandbox.clone())?);

    let (generator, explainer): (Arc<dyn CodeGenerator>, Arc<dyn Explainer>) = match &config.llm.api_key {
        Some(key) => {
            let gemini = Arc::new(GeminiClient::new(&config.llm, key.clone()).context("Failed to build model client")?);
            info!(model = %config.llm.model, "Using remote code generation");
            (gemini.clone() as Arc<dyn CodeGenerator>, gemini as Arc<dyn Explainer>)
        }
        None => {
            warn!("GEMINI_API_KEY not set, using built-in wrappers and template explanations");
            (
                Arc::new(BuiltinGenerator) as Arc<dyn CodeGenerator>,
                Arc::new(TemplateExplainer) as Arc<dyn Explainer>,
            )
        }
    };

    let pipeline = Pipeline::new(PipelineDeps {
        submissions: store.clone(),
        engine,
        cache: WrapperCache::new(store, generator.clone(), config.cache.clone()),
        transformer: CodeTransformer::new(generator),
        explainer,
        registry,
        run_lock_ttl: Duration::from_millis(config.run_lock_ttl_ms),
    });

    let pool = WorkerPool::new(Arc::new(pipeline), queue, config.worker_concurrency).with_events(store_conn);

    // Setup graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            // Dropping the sender would stop the pool
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, draining in-flight submissions...");
        let _ = shutdown_tx.send(true);
    });

    info!(concurrency = config.worker_concurrency, "Listening for submissions");
    let stats = pool.run(shutdown_rx).await;

    info!(?stats, "Worker shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
