// Prometheus metrics for the Big-O API

use bigo_common::redis::COMPLETIONS_CHANNEL;
use bigo_common::types::CompletionEvent;
use futures_util::StreamExt;
use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::{debug, error, info, warn};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref SUBMISSIONS_CREATED: CounterVec = CounterVec::new(
        Opts::new("bigo_submissions_created_total", "Total number of submissions created"),
        &["language"]
    )
    .expect("metric can be created");

    pub static ref SUBMISSIONS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("bigo_submissions_rejected_total", "Total submissions rejected by validation"),
        &["reason"]
    )
    .expect("metric can be created");

    pub static ref SUBMISSIONS_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("bigo_submissions_completed_total", "Total submissions reaching a terminal state"),
        &["language", "status"]
    )
    .expect("metric can be created");

    // Whole pipeline, including wrapper generation and explanation
    pub static ref PIPELINE_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "bigo_pipeline_duration_ms",
            "Submission pipeline duration in milliseconds"
        )
        .buckets(vec![250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0]),
        &["language"]
    )
    .expect("metric can be created");

    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "bigo_queue_depth",
        "Submissions waiting for a worker"
    )
    .expect("metric can be created");
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(SUBMISSIONS_CREATED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(SUBMISSIONS_REJECTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(SUBMISSIONS_COMPLETED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(PIPELINE_DURATION.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(QUEUE_DEPTH.clone()))
        .expect("collector can be registered");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn record_submission_created(language: &str) {
    SUBMISSIONS_CREATED.with_label_values(&[language]).inc();
}

pub fn record_submission_rejected(reason: &str) {
    SUBMISSIONS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_submission_completed(language: &str, status: &str, duration_ms: f64) {
    SUBMISSIONS_COMPLETED.with_label_values(&[language, status]).inc();
    PIPELINE_DURATION.with_label_values(&[language]).observe(duration_ms);
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}

/// Background task: turn worker completion events into metrics
pub async fn completion_subscriber(client: redis::Client) {
    let mut pubsub = match client.get_async_connection().await {
        Ok(conn) => conn.into_pubsub(),
        Err(e) => {
            error!(error = %e, "Failed to create pubsub connection");
            return;
        }
    };

    if let Err(e) = pubsub.subscribe(COMPLETIONS_CHANNEL).await {
        error!(error = %e, "Failed to subscribe to completions channel");
        return;
    }

    info!("Metrics subscriber started - listening for submission completions");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => continue,
        };

        match serde_json::from_str::<CompletionEvent>(&payload) {
            Ok(event) => {
                record_submission_completed(&event.language, &event.status.to_string(), event.duration_ms);
                debug!(
                    submission_id = %event.submission_id,
                    language = %event.language,
                    status = %event.status,
                    "Recorded completion metrics"
                );
            }
            Err(e) => warn!(error = %e, "Ignoring malformed completion event"),
        }
    }
    warn!("Completions channel closed, metrics subscriber stopped");
}
