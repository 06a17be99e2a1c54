//! Append-only LLM usage audit rows.

#![allow(dead_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Outcome of one external LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmCallStatus {
    Success,
    Failed,
    Timeout,
    RateLimited,
}

impl LlmCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmCallStatus::Success => "success",
            LlmCallStatus::Failed => "failed",
            LlmCallStatus::Timeout => "timeout",
            LlmCallStatus::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for LlmCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `llm_audit_logs`. Insert-only; never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LlmAuditLogRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub operation_type: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost: f64,
    pub status: String,
    pub response_time_ms: Option<i64>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub request_id: Uuid,
    pub parent_operation_id: Option<Uuid>,
    pub error_message: Option<String>,
    /// Free-form bag for forward compatibility with unknown operation shapes.
    /// The only untyped escape hatch in the crate.
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}
