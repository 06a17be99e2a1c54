//! Service-to-service routes, guarded by a timestamped HMAC signature rather
//! than gateway identity headers.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::LlmUsageParams;
use crate::auth::verify_internal_signature;
use crate::errors::AppError;
use crate::models::audit::LlmCallStatus;
use crate::state::AppState;

const LLM_USAGE_LOG_PATH: &str = "/internal/llm-usage-log";

/// Audit entry posted by an internal service on behalf of one LLM call.
#[derive(Debug, Deserialize)]
pub struct LlmUsageLogRequest {
    pub tenant_id: Uuid,
    pub operation_type: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub status: Option<LlmCallStatus>,
    #[serde(default)]
    pub response_time_ms: Option<i64>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub parent_operation_id: Option<Uuid>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Authoritative cost computed by the reporting service; persisted
    /// verbatim when present.
    #[serde(default)]
    pub pre_calculated_cost: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct LlmUsageLogResponse {
    /// `null` when the append was absorbed by the best-effort sink.
    pub log_id: Option<Uuid>,
}

/// POST /internal/llm-usage-log
pub async fn handle_llm_usage_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LlmUsageLogRequest>,
) -> Result<Json<LlmUsageLogResponse>, AppError> {
    authorize_internal(&state, &headers)?;

    let log_id = state
        .audit
        .record(LlmUsageParams {
            tenant_id: request.tenant_id,
            operation_type: request.operation_type,
            provider: request.provider,
            model: request.model,
            prompt_tokens: request.prompt_tokens,
            completion_tokens: request.completion_tokens,
            status: request.status,
            response_time_ms: request.response_time_ms,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            user_id: request.user_id,
            parent_operation_id: request.parent_operation_id,
            error_message: request.error_message,
            metadata: request.metadata,
            pre_calculated_cost: request.pre_calculated_cost,
        })
        .await;

    Ok(Json(LlmUsageLogResponse { log_id }))
}

fn authorize_internal(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let timestamp = headers
        .get("x-timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    verify_internal_signature(
        &state.config.internal_api_secret,
        "POST",
        LLM_USAGE_LOG_PATH,
        timestamp,
        signature,
        Utc::now().timestamp(),
    )
    .map_err(|_| AppError::Unauthorized)
}
