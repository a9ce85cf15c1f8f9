// Route definitions for the Big-O API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submissions", post(handlers::create_submission))
        .route("/submissions/batch", post(handlers::batch_submissions))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
}
