use std::sync::Arc;

use sqlx::PgPool;

use crate::audit::LlmAuditSink;
use crate::config::Config;
use crate::extractor::ExtractionClient;
use crate::storage::CvStorage;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub storage: Arc<CvStorage>,
    pub extractor: Arc<ExtractionClient>,
    pub audit: LlmAuditSink,
    pub config: Config,
}
