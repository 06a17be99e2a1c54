//! Pipeline record types: the durable `cv_extractions` row, its status state
//! machine, and the blob bookkeeping row.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of one CV ingestion attempt.
///
/// Stored as lowercase text in the `status` column. Transitions are validated
/// through [`ExtractionStatus::can_transition`]; database writes additionally
/// guard with a `WHERE status = $expected` compare-and-swap so an out-of-band
/// writer (async extraction mode) can never race a tick into an illegal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Processing,
    Extracted,
    Importing,
    Completed,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Processing => "processing",
            ExtractionStatus::Extracted => "extracted",
            ExtractionStatus::Importing => "importing",
            ExtractionStatus::Completed => "completed",
            ExtractionStatus::Failed => "failed",
        }
    }

    /// Legal edges of the pipeline state machine.
    ///
    /// Forward edges only, except the bounded-retry back-edges that return a
    /// record to `extracted` after a failed import attempt.
    pub fn can_transition(from: ExtractionStatus, to: ExtractionStatus) -> bool {
        use ExtractionStatus::*;
        matches!(
            (from, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Extracted)
                | (Processing, Failed)
                | (Extracted, Importing)
                | (Extracted, Failed)
                | (Importing, Completed)
                | (Importing, Extracted)
                | (Importing, Failed)
                | (Failed, Extracted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExtractionStatus::Completed | ExtractionStatus::Failed)
    }

    /// Display-only progress hint for pollers. Not a contract on work done.
    pub fn progress(&self) -> u8 {
        match self {
            ExtractionStatus::Pending => 10,
            ExtractionStatus::Processing => 50,
            ExtractionStatus::Extracted => 75,
            ExtractionStatus::Importing => 90,
            ExtractionStatus::Completed => 100,
            ExtractionStatus::Failed => 0,
        }
    }

    /// Short human-readable message surfaced by the status endpoint.
    pub fn message(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "CV uploaded, waiting for processing",
            ExtractionStatus::Processing => "Extracting text and structure from the CV",
            ExtractionStatus::Extracted => "Extraction finished, waiting for import",
            ExtractionStatus::Importing => "Saving extracted data to the employee profile",
            ExtractionStatus::Completed => "CV processed successfully",
            ExtractionStatus::Failed => "CV processing failed",
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExtractionStatus::Pending),
            "processing" => Ok(ExtractionStatus::Processing),
            "extracted" => Ok(ExtractionStatus::Extracted),
            "importing" => Ok(ExtractionStatus::Importing),
            "completed" => Ok(ExtractionStatus::Completed),
            "failed" => Ok(ExtractionStatus::Failed),
            other => Err(format!("unknown extraction status '{other}'")),
        }
    }
}

/// Failure phase recorded on transition to `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    PythonConnection,
    PythonAuthFailed,
    PythonBadRequest,
    PythonExtraction,
    DatabaseSave,
    LlmLogging,
    Unknown,
}

impl ErrorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPhase::PythonConnection => "python_connection",
            ErrorPhase::PythonAuthFailed => "python_auth_failed",
            ErrorPhase::PythonBadRequest => "python_bad_request",
            ErrorPhase::PythonExtraction => "python_extraction",
            ErrorPhase::DatabaseSave => "database_save",
            ErrorPhase::LlmLogging => "llm_logging",
            ErrorPhase::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `cv_extractions` — the single source of truth for the pipeline.
///
/// `status` is kept as text in the row struct and parsed on demand; every
/// writer goes through `pipeline::repo`, which only produces legal values.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExtractionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub employee_id: Uuid,
    pub original_filename: String,
    pub file_type: String,
    pub status: String,
    pub extraction_result: Option<Value>,
    pub extracted_text: Option<String>,
    pub import_stats: Option<Value>,
    pub llm_tokens_used: Option<i64>,
    pub llm_cost: Option<f64>,
    pub llm_model_used: Option<String>,
    pub processing_time_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub error_phase: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionRow {
    pub fn status(&self) -> ExtractionStatus {
        // Rows are only ever written with enum-produced values.
        self.status
            .parse()
            .unwrap_or(ExtractionStatus::Failed)
    }
}

/// One row of `cv_files` — blob bookkeeping, unique per extraction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CvFileRow {
    pub id: Uuid,
    pub extraction_id: Uuid,
    pub tenant_id: Uuid,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub original_filename: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Created/updated counts written to `import_stats` when a record completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportStats {
    pub personal_fields_updated: u32,
    pub education_created: u32,
    pub work_experience_created: u32,
    pub companies_created: u32,
    pub languages_created: u32,
    pub language_dictionary_created: u32,
    pub certifications_created: u32,
    pub certifications_linked: u32,
    pub skills_created: u32,
    pub custom_skills_created: u32,
    pub role_updated: bool,
    pub imported_at: Option<DateTime<Utc>>,
}

impl ImportStats {
    /// Total rows inserted across all entity categories.
    pub fn rows_created(&self) -> u32 {
        self.education_created
            + self.work_experience_created
            + self.companies_created
            + self.languages_created
            + self.language_dictionary_created
            + self.certifications_created
            + self.skills_created
            + self.custom_skills_created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            ExtractionStatus::Pending,
            ExtractionStatus::Processing,
            ExtractionStatus::Extracted,
            ExtractionStatus::Importing,
            ExtractionStatus::Completed,
            ExtractionStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<ExtractionStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_forward_transitions_are_legal() {
        use ExtractionStatus::*;
        assert!(ExtractionStatus::can_transition(Pending, Processing));
        assert!(ExtractionStatus::can_transition(Processing, Extracted));
        assert!(ExtractionStatus::can_transition(Extracted, Importing));
        assert!(ExtractionStatus::can_transition(Importing, Completed));
    }

    #[test]
    fn test_every_state_may_fail_except_terminals() {
        use ExtractionStatus::*;
        for s in [Pending, Processing, Extracted, Importing] {
            assert!(ExtractionStatus::can_transition(s, Failed), "{s} -> failed");
        }
        assert!(!ExtractionStatus::can_transition(Completed, Failed));
        assert!(!ExtractionStatus::can_transition(Failed, Failed));
    }

    #[test]
    fn test_retry_back_edges() {
        use ExtractionStatus::*;
        assert!(ExtractionStatus::can_transition(Importing, Extracted));
        assert!(ExtractionStatus::can_transition(Failed, Extracted));
    }

    #[test]
    fn test_no_backward_or_skip_transitions() {
        use ExtractionStatus::*;
        assert!(!ExtractionStatus::can_transition(Pending, Extracted));
        assert!(!ExtractionStatus::can_transition(Pending, Completed));
        assert!(!ExtractionStatus::can_transition(Processing, Pending));
        assert!(!ExtractionStatus::can_transition(Extracted, Processing));
        assert!(!ExtractionStatus::can_transition(Completed, Pending));
        assert!(!ExtractionStatus::can_transition(Failed, Pending));
        assert!(!ExtractionStatus::can_transition(Failed, Processing));
    }

    #[test]
    fn test_transition_matrix_is_exactly_the_diagram() {
        use ExtractionStatus::*;
        let all = [Pending, Processing, Extracted, Importing, Completed, Failed];
        let legal = [
            (Pending, Processing),
            (Pending, Failed),
            (Processing, Extracted),
            (Processing, Failed),
            (Extracted, Importing),
            (Extracted, Failed),
            (Importing, Completed),
            (Importing, Extracted),
            (Importing, Failed),
            (Failed, Extracted),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    ExtractionStatus::can_transition(from, to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_progress_mapping() {
        assert_eq!(ExtractionStatus::Pending.progress(), 10);
        assert_eq!(ExtractionStatus::Processing.progress(), 50);
        assert_eq!(ExtractionStatus::Extracted.progress(), 75);
        assert_eq!(ExtractionStatus::Importing.progress(), 90);
        assert_eq!(ExtractionStatus::Completed.progress(), 100);
        assert_eq!(ExtractionStatus::Failed.progress(), 0);
    }

    #[test]
    fn test_import_stats_rows_created_sums_insert_categories() {
        let stats = ImportStats {
            personal_fields_updated: 3, // updates, not inserts
            education_created: 2,
            work_experience_created: 4,
            companies_created: 1,
            languages_created: 2,
            language_dictionary_created: 1,
            certifications_created: 1,
            certifications_linked: 1, // links, not inserts
            skills_created: 5,
            custom_skills_created: 2,
            role_updated: true,
            imported_at: None,
        };
        assert_eq!(stats.rows_created(), 2 + 4 + 1 + 2 + 1 + 1 + 5 + 2);
    }
}
