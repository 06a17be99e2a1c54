//! Database access for the pipeline table.
//!
//! All status writes live here and carry a `WHERE status = $expected`
//! compare-and-swap, so the worker, the async-mode out-of-band writer, and
//! any concurrent tick can never push a record through an illegal edge.

use anyhow::{bail, Result};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::extraction::{ErrorPhase, ExtractionRow, ExtractionStatus};
use crate::models::payload::CvExtractionResult;
use crate::storage::SavedBlob;

/// Inputs for a freshly uploaded record.
#[derive(Debug)]
pub struct NewExtraction<'a> {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub employee_id: Uuid,
    pub original_filename: &'a str,
    pub file_type: &'a str,
}

/// Inserts the pipeline record (in `pending`) and its blob bookkeeping row in
/// one transaction. The blob itself must already be on disk.
pub async fn create_extraction(
    pool: &PgPool,
    new: NewExtraction<'_>,
    blob: &SavedBlob,
) -> Result<ExtractionRow> {
    let mut tx = pool.begin().await?;

    let row: ExtractionRow = sqlx::query_as(
        r#"
        INSERT INTO cv_extractions
            (id, tenant_id, employee_id, original_filename, file_type, status, retry_count)
        VALUES ($1, $2, $3, $4, $5, 'pending', 0)
        RETURNING *
        "#,
    )
    .bind(new.id)
    .bind(new.tenant_id)
    .bind(new.employee_id)
    .bind(new.original_filename)
    .bind(new.file_type)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO cv_files
            (id, extraction_id, tenant_id, file_path, file_size, mime_type, original_filename)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.id)
    .bind(new.tenant_id)
    .bind(&blob.file_path)
    .bind(blob.file_size)
    .bind(&blob.mime_type)
    .bind(&blob.original_filename)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(extraction_id = %new.id, employee_id = %new.employee_id, "created pipeline record");
    Ok(row)
}

pub async fn get_extraction(
    pool: &PgPool,
    id: Uuid,
    tenant_id: Uuid,
) -> Result<Option<ExtractionRow>> {
    Ok(
        sqlx::query_as("SELECT * FROM cv_extractions WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await?,
    )
}

/// Newest record for an employee, any status. Used by the re-enqueue endpoint.
pub async fn latest_for_employee(
    pool: &PgPool,
    tenant_id: Uuid,
    employee_id: Uuid,
) -> Result<Option<ExtractionRow>> {
    Ok(sqlx::query_as(
        r#"
        SELECT * FROM cv_extractions
        WHERE tenant_id = $1 AND employee_id = $2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(employee_id)
    .fetch_optional(pool)
    .await?)
}

/// Pass 1 selection: oldest pending records first (FIFO by upload time).
pub async fn fetch_pending(pool: &PgPool, limit: i64) -> Result<Vec<ExtractionRow>> {
    Ok(sqlx::query_as(
        "SELECT * FROM cv_extractions WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

/// Pass 2 selection: extracted records, oldest update first.
pub async fn fetch_extracted(pool: &PgPool, limit: i64) -> Result<Vec<ExtractionRow>> {
    Ok(sqlx::query_as(
        "SELECT * FROM cv_extractions WHERE status = 'extracted' ORDER BY updated_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

/// Compare-and-swap status transition. Returns `false` when the record was
/// not in the expected pre-state (another writer got there first).
pub async fn try_transition(
    pool: &PgPool,
    id: Uuid,
    from: ExtractionStatus,
    to: ExtractionStatus,
) -> Result<bool> {
    if !ExtractionStatus::can_transition(from, to) {
        bail!("illegal transition {from} -> {to} for extraction {id}");
    }

    let result =
        sqlx::query("UPDATE cv_extractions SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(pool)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// Sync-mode success: stores the payload and cost figures and moves
/// `processing -> extracted`. Tolerates losing the race to an out-of-band
/// writer that already delivered results.
pub async fn mark_extracted(
    pool: &PgPool,
    id: Uuid,
    payload: &CvExtractionResult,
    extracted_text: Option<&str>,
    llm_tokens_used: Option<i64>,
    llm_cost: Option<f64>,
    llm_model_used: Option<&str>,
) -> Result<bool> {
    let payload_json = serde_json::to_value(payload)?;
    let result = sqlx::query(
        r#"
        UPDATE cv_extractions SET
            status = 'extracted',
            extraction_result = $2,
            extracted_text = $3,
            llm_tokens_used = $4,
            llm_cost = $5,
            llm_model_used = $6,
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(id)
    .bind(payload_json)
    .bind(extracted_text)
    .bind(llm_tokens_used)
    .bind(llm_cost)
    .bind(llm_model_used)
    .execute(pool)
    .await?;

    let swapped = result.rows_affected() == 1;
    if !swapped {
        warn!(extraction_id = %id, "extracted results arrived for a record no longer processing");
    }
    Ok(swapped)
}

/// Terminal failure from any live state: records message and phase.
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    phase: ErrorPhase,
    message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE cv_extractions SET
            status = 'failed',
            error_message = $2,
            error_phase = $3,
            updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(id)
    .bind(message)
    .bind(phase.as_str())
    .execute(pool)
    .await?;
    info!(extraction_id = %id, phase = %phase, "extraction failed");
    Ok(())
}

/// Bounded-retry back-edge: `importing -> extracted` with the retry counter
/// bumped and the failure recorded for operators.
pub async fn requeue_after_import_failure(
    pool: &PgPool,
    id: Uuid,
    message: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE cv_extractions SET
            status = 'extracted',
            retry_count = retry_count + 1,
            error_message = $2,
            error_phase = 'database_save',
            updated_at = NOW()
        WHERE id = $1 AND status = 'importing'
        "#,
    )
    .bind(id)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Touches `updated_at` only. The idempotent re-enqueue endpoint uses this so
/// repeated calls are observable but otherwise no-ops.
pub async fn touch(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE cv_extractions SET updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Reaper: fails records stuck in `processing` past the deadline. Returns the
/// ids it reaped.
pub async fn reap_stuck_processing(pool: &PgPool, deadline_secs: i64) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE cv_extractions SET
            status = 'failed',
            error_message = 'extraction exceeded the processing deadline',
            error_phase = 'python_extraction',
            updated_at = NOW()
        WHERE status = 'processing'
          AND updated_at < NOW() - make_interval(secs => $1)
        RETURNING id
        "#,
    )
    .bind(deadline_secs as f64)
    .fetch_all(pool)
    .await?;

    let ids: Vec<Uuid> = rows.into_iter().map(|(id,)| id).collect();
    if !ids.is_empty() {
        warn!(count = ids.len(), "reaped stuck processing records");
    }
    Ok(ids)
}
