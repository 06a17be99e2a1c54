//! Axum route handlers for the CV ingestion surface.

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::extraction::{ExtractionRow, ExtractionStatus, ImportStats};
use crate::pipeline::repo::{self, NewExtraction};
use crate::state::AppState;
use crate::storage::SaveMeta;

/// Hard cap on uploaded document size.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const MIME_PDF: &str = "application/pdf";
const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub extraction_id: Uuid,
    pub employee_id: Uuid,
    pub status: ExtractionStatus,
}

#[derive(Debug, Deserialize)]
pub struct ExtractAndSaveRequest {
    pub employee_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ExtractAndSaveResponse {
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: ExtractionStatus,
    pub employee_id: Uuid,
    pub elapsed_seconds: f64,
    pub updated_at: DateTime<Utc>,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_phase: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StorageHealthResponse {
    pub status: String,
    pub writable: bool,
    pub path: String,
    pub environment: String,
    pub file_count: u64,
    pub total_size_bytes: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /cv/upload
///
/// Stores the document and creates the pipeline record in `pending`. No
/// extraction happens inline; the background worker picks the record up on
/// its next tick. Validation failures leave no side effects.
pub async fn handle_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut employee_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("cv").to_string();
                let mime = field.content_type().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("failed to read upload: {e}")))?;
                file = Some((filename, mime, bytes));
            }
            "employee_id" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("failed to read field: {e}")))?;
                employee_id = Some(
                    raw.parse::<Uuid>()
                        .map_err(|_| AppError::Validation(format!("invalid employee_id '{raw}'")))?,
                );
            }
            _ => {} // ignore unknown fields
        }
    }

    let (original_filename, mime_type, data) = file.ok_or(AppError::MissingFile)?;
    let employee_id =
        employee_id.ok_or_else(|| AppError::Validation("employee_id is required".to_string()))?;

    let file_type = validate_document(&mime_type, data.len())?;

    // Blob first: the record only becomes worker-visible once the bytes are
    // durably on disk.
    let extraction_id = Uuid::new_v4();
    let blob = state
        .storage
        .save(
            &data,
            &original_filename,
            &SaveMeta {
                extraction_id,
                tenant_id: auth.tenant_id,
                mime_type: mime_type.clone(),
            },
        )
        .await
        .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

    let row = repo::create_extraction(
        &state.db,
        NewExtraction {
            id: extraction_id,
            tenant_id: auth.tenant_id,
            employee_id,
            original_filename: &original_filename,
            file_type,
        },
        &blob,
    )
    .await
    .map_err(AppError::Internal)?;

    Ok(Json(UploadResponse {
        extraction_id: row.id,
        employee_id: row.employee_id,
        status: ExtractionStatus::Pending,
    }))
}

/// POST /cv/extract-and-save
///
/// Idempotent enqueue: a `pending` record is touched and reported; a record
/// already past `pending` is reported without side effects.
pub async fn handle_extract_and_save(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<ExtractAndSaveRequest>,
) -> Result<Json<ExtractAndSaveResponse>, AppError> {
    let row = repo::latest_for_employee(&state.db, auth.tenant_id, request.employee_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| {
            AppError::NotFound(format!("no uploaded CV for employee {}", request.employee_id))
        })?;

    let message = match row.status() {
        ExtractionStatus::Pending => {
            repo::touch(&state.db, row.id).await.map_err(AppError::Internal)?;
            "CV queued for processing"
        }
        ExtractionStatus::Completed => "CV already processed",
        ExtractionStatus::Failed => "CV processing previously failed",
        _ => "CV processing already in progress",
    };

    Ok(Json(ExtractAndSaveResponse {
        job_id: row.id,
        message: message.to_string(),
    }))
}

/// GET /cv/extraction-status/:id
///
/// Safe to poll at high frequency; terminal records return stable payloads.
pub async fn handle_extraction_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let row = repo::get_extraction(&state.db, id, auth.tenant_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("extraction {id} not found")))?;

    Ok(Json(build_status_response(&row, Utc::now())))
}

/// GET /cv/storage-health
///
/// Ops probe for the blob store backend.
pub async fn handle_storage_health(
    State(state): State<AppState>,
) -> Result<Json<StorageHealthResponse>, AppError> {
    let health = state.storage.health_check().await;
    let (file_count, total_size_bytes) = state.storage.directory_stats().await.unwrap_or((0, 0));

    Ok(Json(StorageHealthResponse {
        status: health.status,
        writable: health.writable,
        path: health.path,
        environment: health.environment.as_str().to_string(),
        file_count,
        total_size_bytes,
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

/// MIME and size validation for uploaded documents. Returns the canonical
/// file type label.
fn validate_document(mime_type: &str, size: usize) -> Result<&'static str, AppError> {
    let file_type = match mime_type {
        MIME_PDF => "pdf",
        MIME_DOCX => "docx",
        other => {
            return Err(AppError::UnsupportedType(format!(
                "'{other}' is not an accepted CV format (pdf or docx)"
            )))
        }
    };
    if size > MAX_UPLOAD_BYTES {
        return Err(AppError::TooLarge {
            max_bytes: MAX_UPLOAD_BYTES,
        });
    }
    Ok(file_type)
}

fn build_status_response(row: &ExtractionRow, now: DateTime<Utc>) -> StatusResponse {
    let status = row.status();

    // Terminal records report a frozen elapsed time so repeated polls see
    // identical payloads.
    let elapsed_seconds = match row.processing_time_seconds {
        Some(t) => t,
        None if status.is_terminal() => {
            (row.updated_at - row.created_at).num_milliseconds() as f64 / 1000.0
        }
        None => (now - row.created_at).num_milliseconds() as f64 / 1000.0,
    };

    let summary = if status == ExtractionStatus::Completed {
        row.import_stats
            .as_ref()
            .and_then(|v| serde_json::from_value::<ImportStats>(v.clone()).ok())
            .map(|stats| build_summary(&stats))
    } else {
        None
    };

    StatusResponse {
        status,
        employee_id: row.employee_id,
        elapsed_seconds,
        updated_at: row.updated_at,
        progress: status.progress(),
        message: status.message().to_string(),
        import_stats: row.import_stats.clone(),
        summary,
        error: row.error_message.clone(),
        error_phase: row.error_phase.clone(),
    }
}

fn build_summary(stats: &ImportStats) -> String {
    format!(
        "Imported {} education, {} work experience, {} language, {} certification and {} skill rows",
        stats.education_created,
        stats.work_experience_created,
        stats.languages_created,
        stats.certifications_created,
        stats.skills_created,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(status: &str) -> ExtractionRow {
        let created = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        ExtractionRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
            original_filename: "cv.pdf".to_string(),
            file_type: "pdf".to_string(),
            status: status.to_string(),
            extraction_result: None,
            extracted_text: None,
            import_stats: None,
            llm_tokens_used: None,
            llm_cost: None,
            llm_model_used: None,
            processing_time_seconds: None,
            error_message: None,
            error_phase: None,
            retry_count: 0,
            created_at: created,
            updated_at: created + chrono::Duration::seconds(30),
        }
    }

    #[test]
    fn test_validate_document_accepts_pdf_and_docx() {
        assert_eq!(validate_document(MIME_PDF, 100).unwrap(), "pdf");
        assert_eq!(validate_document(MIME_DOCX, 100).unwrap(), "docx");
    }

    #[test]
    fn test_validate_document_rejects_other_mime() {
        let err = validate_document("text/plain", 100).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedType(_)));
    }

    #[test]
    fn test_validate_document_size_boundary() {
        // exactly at the limit is accepted; one byte over is not
        assert!(validate_document(MIME_PDF, MAX_UPLOAD_BYTES).is_ok());
        let err = validate_document(MIME_PDF, MAX_UPLOAD_BYTES + 1).unwrap_err();
        assert!(matches!(err, AppError::TooLarge { .. }));
    }

    #[test]
    fn test_status_response_progress_and_message() {
        let response = build_status_response(&row("processing"), Utc::now());
        assert_eq!(response.progress, 50);
        assert_eq!(response.status, ExtractionStatus::Processing);
        assert!(response.error.is_none());
    }

    #[test]
    fn test_terminal_status_elapsed_is_stable_across_polls() {
        let failed = row("failed");
        let first = build_status_response(&failed, Utc::now());
        let second = build_status_response(
            &failed,
            Utc::now() + chrono::Duration::seconds(120),
        );
        assert_eq!(first.elapsed_seconds, second.elapsed_seconds);
        assert_eq!(first.elapsed_seconds, 30.0);
    }

    #[test]
    fn test_live_status_elapsed_tracks_now() {
        let pending = row("pending");
        let at = pending.created_at + chrono::Duration::seconds(42);
        let response = build_status_response(&pending, at);
        assert_eq!(response.elapsed_seconds, 42.0);
    }

    #[test]
    fn test_completed_status_includes_summary() {
        let mut completed = row("completed");
        completed.processing_time_seconds = Some(12.5);
        completed.import_stats = Some(
            serde_json::to_value(ImportStats {
                education_created: 2,
                work_experience_created: 3,
                skills_created: 7,
                ..Default::default()
            })
            .unwrap(),
        );
        let response = build_status_response(&completed, Utc::now());
        assert_eq!(response.elapsed_seconds, 12.5);
        let summary = response.summary.unwrap();
        assert!(summary.contains("2 education"));
        assert!(summary.contains("7 skill"));
    }
}
