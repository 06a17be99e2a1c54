//! LLM usage audit sink.
//!
//! Append-only and best-effort: a failed audit write is logged and swallowed,
//! never surfaced to the operation that triggered it. Cost is taken verbatim
//! from the reporting service when available; the in-code price table is a
//! fallback only.

use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::models::audit::LlmCallStatus;

/// Fallback list prices in USD per million tokens: (provider, model, input, output).
/// Rounded list prices; the authoritative figure is whatever the extraction
/// service reports.
const PRICE_TABLE: &[(&str, &str, f64, f64)] = &[
    ("openai", "gpt-4o", 2.50, 10.00),
    ("openai", "gpt-4o-mini", 0.15, 0.60),
    ("openai", "gpt-4.1", 2.00, 8.00),
    ("openai", "gpt-4.1-mini", 0.40, 1.60),
    ("anthropic", "claude-sonnet-4-5", 3.00, 15.00),
    ("anthropic", "claude-haiku-3-5", 0.80, 4.00),
    ("google", "gemini-1.5-pro", 1.25, 5.00),
    ("google", "gemini-1.5-flash", 0.075, 0.30),
];

/// Computes the fallback cost for a call, rounded to 6 decimals.
/// Unknown (provider, model) pairs yield `None`.
pub fn calculate_cost(
    provider: &str,
    model: &str,
    prompt_tokens: i64,
    completion_tokens: i64,
) -> Option<f64> {
    let (_, _, input_price, output_price) = PRICE_TABLE.iter().find(|(p, m, _, _)| {
        p.eq_ignore_ascii_case(provider) && m.eq_ignore_ascii_case(model)
    })?;

    let cost = prompt_tokens as f64 * input_price / 1e6
        + completion_tokens as f64 * output_price / 1e6;
    Some(round6(cost))
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Input for one audit entry. `pre_calculated_cost` is the authoritative
/// figure reported by the calling service, persisted verbatim when present.
#[derive(Debug, Clone, Default)]
pub struct LlmUsageParams {
    pub tenant_id: Uuid,
    pub operation_type: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub status: Option<LlmCallStatus>,
    pub response_time_ms: Option<i64>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub parent_operation_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
    pub pre_calculated_cost: Option<f64>,
}

impl LlmUsageParams {
    /// Cost to persist: authoritative if reported, else price-table fallback,
    /// else zero with a warning.
    pub fn resolved_cost(&self) -> f64 {
        if let Some(cost) = self.pre_calculated_cost {
            return round6(cost);
        }
        match calculate_cost(
            &self.provider,
            &self.model,
            self.prompt_tokens,
            self.completion_tokens,
        ) {
            Some(cost) => cost,
            None => {
                warn!(
                    provider = %self.provider,
                    model = %self.model,
                    "no price table entry; recording zero cost"
                );
                0.0
            }
        }
    }
}

/// Write-only sink over `llm_audit_logs`.
#[derive(Clone)]
pub struct LlmAuditSink {
    pool: PgPool,
}

impl LlmAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends one audit entry. Returns the log id, or `None` if the write
    /// failed — the failure is logged and never propagated to the caller.
    pub async fn record(&self, params: LlmUsageParams) -> Option<Uuid> {
        match self.insert(&params).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    operation = %params.operation_type,
                    tenant = %params.tenant_id,
                    "audit log write failed (ignored): {e}"
                );
                None
            }
        }
    }

    async fn insert(&self, params: &LlmUsageParams) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        let request_id = Uuid::new_v4();
        let status = params.status.unwrap_or(LlmCallStatus::Success);
        let total_tokens = params.prompt_tokens + params.completion_tokens;

        sqlx::query(
            r#"
            INSERT INTO llm_audit_logs
                (id, tenant_id, operation_type, provider, model,
                 prompt_tokens, completion_tokens, total_tokens, estimated_cost,
                 status, response_time_ms, entity_type, entity_id, user_id,
                 request_id, parent_operation_id, error_message, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(id)
        .bind(params.tenant_id)
        .bind(&params.operation_type)
        .bind(&params.provider)
        .bind(&params.model)
        .bind(params.prompt_tokens)
        .bind(params.completion_tokens)
        .bind(total_tokens)
        .bind(params.resolved_cost())
        .bind(status.as_str())
        .bind(params.response_time_ms)
        .bind(&params.entity_type)
        .bind(params.entity_id)
        .bind(params.user_id)
        .bind(request_id)
        .bind(params.parent_operation_id)
        .bind(&params.error_message)
        .bind(&params.metadata)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_pair_cost() {
        // 1M input + 1M output of gpt-4o-mini: 0.15 + 0.60
        let cost = calculate_cost("openai", "gpt-4o-mini", 1_000_000, 1_000_000).unwrap();
        assert!((cost - 0.75).abs() < 1e-9, "cost was {cost}");
    }

    #[test]
    fn test_cost_is_rounded_to_six_decimals() {
        let cost = calculate_cost("openai", "gpt-4o", 333, 77).unwrap();
        // 333 * 2.50/1e6 + 77 * 10.00/1e6 = 0.0008325 + 0.00077
        assert!((cost - 0.001603).abs() < 1e-9, "cost was {cost}");
        assert_eq!(cost, (cost * 1e6).round() / 1e6);
    }

    #[test]
    fn test_provider_and_model_match_is_case_insensitive() {
        assert!(calculate_cost("OpenAI", "GPT-4o", 1000, 1000).is_some());
    }

    #[test]
    fn test_unknown_pair_is_none() {
        assert!(calculate_cost("acme", "supermodel-9000", 1000, 1000).is_none());
    }

    #[test]
    fn test_authoritative_cost_wins_over_table() {
        let params = LlmUsageParams {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            prompt_tokens: 1_000_000,
            completion_tokens: 1_000_000,
            pre_calculated_cost: Some(0.123456),
            ..Default::default()
        };
        assert_eq!(params.resolved_cost(), 0.123456);
    }

    #[test]
    fn test_unknown_pair_resolves_to_zero() {
        let params = LlmUsageParams {
            provider: "acme".into(),
            model: "supermodel-9000".into(),
            prompt_tokens: 5000,
            completion_tokens: 5000,
            ..Default::default()
        };
        assert_eq!(params.resolved_cost(), 0.0);
    }
}
