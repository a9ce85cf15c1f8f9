mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use bigo_common::redis::{RedisQueue, RedisStore};
use bigo_common::{Config, LanguageRegistry, SubmissionQueue, SubmissionStore};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub struct AppState {
    pub submissions: Arc<dyn SubmissionStore>,
    pub queue: Arc<dyn SubmissionQueue>,
    pub registry: Arc<LanguageRegistry>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Big-O API booting...");
    let config = Config::from_env();

    metrics::init_metrics();
    info!("Metrics registry initialized");

    let client = redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let redis_conn = ConnectionManager::new(client.clone())
        .await
        .context("Failed to connect to Redis")?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    let registry = match &config.language_config_path {
        Some(path) => LanguageRegistry::load_from_file(path)
            .with_context(|| format!("Failed to load language config from {}", path))?,
        None => LanguageRegistry::builtin(),
    };
    info!(languages = ?registry.enabled_languages(), "Loaded language configuration");

    let state = Arc::new(AppState {
        submissions: Arc::new(RedisStore::new(redis_conn.clone())),
        queue: Arc::new(RedisQueue::new(redis_conn)),
        registry: Arc::new(registry),
        start_time: Instant::now(),
    });

    // Start background metrics subscriber
    tokio::spawn(metrics::completion_subscriber(client));

    let app = routes::routes().with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
