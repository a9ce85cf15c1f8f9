// HTTP route handlers for the Big-O API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bigo_common::{NewSubmission, StoreError, Submission, SubmissionMode, SubmissionUpdate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{metrics, AppState};

const ENQUEUE_FAILED_MESSAGE: &str = "Failed to enqueue submission";

#[derive(Debug, Deserialize)]
pub struct CreateSubmissionRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSubmissionResponse {
    pub submission_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<Uuid>,
}

/// Error responses, rendered as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(Uuid),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(id) => (StatusCode::NOT_FOUND, format!("Submission {} not found", id)),
            ApiError::Store(e) => {
                error!(error = %e, "Store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn parse_mode(mode: Option<&str>) -> Result<Option<SubmissionMode>, ApiError> {
    match mode {
        None => Ok(None),
        Some("standard") => Ok(Some(SubmissionMode::Standard)),
        Some("complexity") => Ok(Some(SubmissionMode::Complexity)),
        Some(other) => Err(ApiError::BadRequest(format!("Unsupported mode: {}", other))),
    }
}

/// POST /submissions - persist a submission and hand it to the workers
pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSubmissionRequest>,
) -> Result<(StatusCode, Json<CreateSubmissionResponse>), ApiError> {
    let language = match state.registry.resolve(&payload.language) {
        Ok(language) => language,
        Err(e) => {
            metrics::record_submission_rejected("unsupported_language");
            return Err(ApiError::BadRequest(e.to_string()));
        }
    };
    let mode = parse_mode(payload.mode.as_deref()).inspect_err(|_| {
        metrics::record_submission_rejected("unsupported_mode");
    })?;
    if payload.code.trim().is_empty() {
        metrics::record_submission_rejected("empty_code");
        return Err(ApiError::BadRequest("Code must not be empty".to_string()));
    }

    let submission = Submission::create(NewSubmission {
        code: payload.code,
        language: payload.language,
        mode,
        input: payload.input,
    });
    let id = state.submissions.insert_submission(&submission).await?;

    if let Err(e) = state.queue.enqueue(id).await {
        warn!(submission_id = %id, error = %e, "Failed to enqueue submission");
        // No worker will ever pick this record up
        if let Err(mark) = state
            .submissions
            .update_submission(id, SubmissionUpdate::failed(ENQUEUE_FAILED_MESSAGE))
            .await
        {
            error!(submission_id = %id, error = %mark, "Failed to mark unqueued submission as failed");
        }
        return Err(e.into());
    }

    metrics::record_submission_created(language.as_str());
    info!(submission_id = %id, %language, mode = ?mode, "Submission queued");

    Ok((StatusCode::CREATED, Json(CreateSubmissionResponse { submission_id: id })))
}

/// GET /submissions/:id
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Submission>, ApiError> {
    state
        .submissions
        .get_submission(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// POST /submissions/batch - records in request order, unknown ids skipped
pub async fn batch_submissions(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<Vec<Submission>>, ApiError> {
    let records = state.submissions.list_submissions(&payload.ids).await?;
    Ok(Json(records))
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let languages: Vec<&str> = state
        .registry
        .enabled_languages()
        .iter()
        .map(|l| l.as_str())
        .collect();
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "languages": languages,
    }))
}

/// GET /metrics - Prometheus text format
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.queue.depth().await {
        Ok(depth) => metrics::set_queue_depth(depth),
        Err(e) => warn!(error = %e, "Failed to read queue depth"),
    }
    match metrics::render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use bigo_common::{LanguageRegistry, MemoryQueue, MemoryStore, SubmissionQueue, SubmissionStatus, SubmissionStore};
    use http_body_util::BodyExt;
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
    }

    fn app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        TestApp {
            router: router_with(store.clone(), queue.clone()),
            store,
            queue,
        }
    }

    fn router_with(store: Arc<MemoryStore>, queue: Arc<dyn SubmissionQueue>) -> Router {
        let state = Arc::new(AppState {
            submissions: store,
            queue,
            registry: Arc::new(LanguageRegistry::builtin()),
            start_time: Instant::now(),
        });
        routes::routes().with_state(state)
    }

    /// Queue backend that is down
    struct UnreachableQueue;

    #[async_trait::async_trait]
    impl SubmissionQueue for UnreachableQueue {
        async fn enqueue(&self, _id: Uuid) -> Result<(), StoreError> {
            Err(StoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }

        async fn dequeue(&self, _timeout: Duration) -> Result<Option<Uuid>, StoreError> {
            Ok(None)
        }

        async fn depth(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_submission_persists_and_enqueues() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(post_json(
                "/submissions",
                json!({ "code": "print(1)", "language": "python", "mode": "complexity" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        let id: Uuid = body["submission_id"].as_str().unwrap().parse().unwrap();

        let stored = app.store.get_submission(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Processing);
        assert_eq!(stored.mode, Some(SubmissionMode::Complexity));
        assert_eq!(stored.language, "python");

        let queued = app.queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert_eq!(queued, Some(id));
    }

    #[tokio::test]
    async fn test_enqueue_failure_marks_submission_failed() {
        let store = Arc::new(MemoryStore::new());
        let router = router_with(store.clone(), Arc::new(UnreachableQueue));

        let response = router
            .oneshot(post_json(
                "/submissions",
                json!({ "code": "print(1)", "language": "python" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let stored = store.submissions();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, SubmissionStatus::Failed);
        assert_eq!(stored[0].error_message.as_deref(), Some(ENQUEUE_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn test_unsupported_language_rejected() {
        let app = app();
        let response = app
            .router
            .oneshot(post_json("/submissions", json!({ "code": "x", "language": "cobol" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Unsupported language: cobol");
        assert_eq!(app.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_mode_rejected() {
        let app = app();
        let response = app
            .router
            .oneshot(post_json(
                "/submissions",
                json!({ "code": "x", "language": "python", "mode": "turbo" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_submission_and_404() {
        let app = app();
        let submission = Submission::create(NewSubmission {
            code: "print(1)".to_string(),
            language: "python".to_string(),
            mode: None,
            input: None,
        });
        let id = app.store.insert_submission(&submission).await.unwrap();

        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/submissions/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], id.to_string());
        assert_eq!(body["status"], "processing");

        let missing = app
            .router
            .oneshot(get(&format!("/submissions/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_skips_unknown_ids() {
        let app = app();
        let mut ids = Vec::new();
        for code in ["a = 1", "b = 2"] {
            let submission = Submission::create(NewSubmission {
                code: code.to_string(),
                language: "python".to_string(),
                mode: None,
                input: None,
            });
            ids.push(app.store.insert_submission(&submission).await.unwrap());
        }

        let response = app
            .router
            .oneshot(post_json(
                "/submissions/batch",
                json!({ "ids": [ids[1], Uuid::new_v4(), ids[0]] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let returned: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_str().unwrap())
            .collect();
        assert_eq!(returned, vec![ids[1].to_string(), ids[0].to_string()]);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = app();
        let health = app.router.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        let body = body_json(health).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["languages"].as_array().unwrap().len(), 5);

        let metrics = app.router.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(metrics.status(), StatusCode::OK);
    }
}
