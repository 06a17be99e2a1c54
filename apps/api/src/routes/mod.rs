pub mod cv;
pub mod health;
pub mod internal;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Multipart headroom above the 10 MB document limit, so an at-limit upload
/// is rejected by validation (with a structured error) rather than by the
/// body-size layer.
const BODY_LIMIT_BYTES: usize = cv::MAX_UPLOAD_BYTES + 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // CV ingestion pipeline
        .route("/cv/upload", post(cv::handle_upload))
        .route("/cv/extract-and-save", post(cv::handle_extract_and_save))
        .route(
            "/cv/extraction-status/:id",
            get(cv::handle_extraction_status),
        )
        .route("/cv/storage-health", get(cv::handle_storage_health))
        // Service-to-service
        .route(
            "/internal/llm-usage-log",
            post(internal::handle_llm_usage_log),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .with_state(state)
}
