//! Extraction Service client — the single point of contact with the external
//! CV analysis service.
//!
//! ARCHITECTURAL RULE: no other module talks to the extraction service
//! directly. The worker owns the calls; everything else sees only the
//! pipeline record.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::extraction::ErrorPhase;
use crate::models::payload::CvExtractionResult;

const SERVICE_NAME: &str = "cv-pipeline-api";
const SYNC_PATH: &str = "/cv-analyzer/analyze-file";
const ASYNC_PATH: &str = "/cv-analyzer/analyze-file-async";

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("connection to extraction service failed: {0}")]
    Connection(String),

    #[error("extraction request timed out after {0:?}")]
    Timeout(Duration),

    #[error("extraction service rejected credentials: {0}")]
    AuthFailed(String),

    #[error("extraction service rejected request: {0}")]
    BadRequest(String),

    #[error("extraction service error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("unexpected extraction failure: {0}")]
    Unexpected(String),
}

impl ExtractorError {
    /// Maps a failure onto the phase label recorded on the pipeline record.
    pub fn phase(&self) -> ErrorPhase {
        match self {
            ExtractorError::Connection(_) => ErrorPhase::PythonConnection,
            ExtractorError::Timeout(_) => ErrorPhase::PythonExtraction,
            ExtractorError::AuthFailed(_) => ErrorPhase::PythonAuthFailed,
            ExtractorError::BadRequest(_) => ErrorPhase::PythonBadRequest,
            ExtractorError::Server { .. } => ErrorPhase::PythonExtraction,
            ExtractorError::Unexpected(_) => ErrorPhase::Unknown,
        }
    }
}

/// Synchronous-mode response: the structured payload consumed by the
/// importer, plus the cost accounting the service reports.
#[derive(Debug, Deserialize)]
pub struct AnalyzeFileResponse {
    #[serde(flatten)]
    pub result: CvExtractionResult,
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub llm_tokens_used: Option<i64>,
    #[serde(default)]
    pub extraction_cost: Option<f64>,
    #[serde(default)]
    pub llm_model_used: Option<String>,
}

/// Asynchronous-mode acknowledgement. Results arrive out-of-band on the
/// pipeline record.
#[derive(Debug, Deserialize)]
pub struct AnalyzeFileAck {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct ExtractionClient {
    client: Client,
    base_url: String,
    token: String,
    sync_timeout: Duration,
    async_timeout: Duration,
}

impl ExtractionClient {
    pub fn new(
        base_url: String,
        token: String,
        sync_timeout: Duration,
        async_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            sync_timeout,
            async_timeout,
        }
    }

    /// Synchronous extraction: POSTs the file and waits for the full result.
    pub async fn analyze_file(
        &self,
        file: Vec<u8>,
        filename: &str,
    ) -> Result<AnalyzeFileResponse, ExtractorError> {
        let request_id = Uuid::new_v4();
        let form = Form::new().part("file", file_part(file, filename)?);

        debug!(%request_id, filename, "sync extraction request");

        let response = self
            .client
            .post(format!("{}{SYNC_PATH}", self.base_url))
            .bearer_auth(&self.token)
            .header("x-service-name", SERVICE_NAME)
            .header("x-request-id", request_id.to_string())
            .multipart(form)
            .timeout(self.sync_timeout)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e, self.sync_timeout))?;

        let response = check_status(response).await?;
        response
            .json::<AnalyzeFileResponse>()
            .await
            .map_err(|e| ExtractorError::Unexpected(format!("malformed response body: {e}")))
    }

    /// Asynchronous extraction: POSTs the file and returns on acknowledgement.
    /// The service writes results back to the pipeline record itself.
    pub async fn analyze_file_async(
        &self,
        file: Vec<u8>,
        filename: &str,
        extraction_id: Uuid,
    ) -> Result<AnalyzeFileAck, ExtractorError> {
        let request_id = Uuid::new_v4();
        let form = Form::new()
            .part("file", file_part(file, filename)?)
            .text("extraction_id", extraction_id.to_string())
            .text("parallel", "true");

        debug!(%request_id, %extraction_id, "async extraction request");

        let response = self
            .client
            .post(format!("{}{ASYNC_PATH}", self.base_url))
            .bearer_auth(&self.token)
            .header("x-service-name", SERVICE_NAME)
            .header("x-request-id", request_id.to_string())
            .multipart(form)
            .timeout(self.async_timeout)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e, self.async_timeout))?;

        let response = check_status(response).await?;
        response
            .json::<AnalyzeFileAck>()
            .await
            .map_err(|e| ExtractorError::Unexpected(format!("malformed ack body: {e}")))
    }

    fn classify_send_error(&self, err: reqwest::Error, deadline: Duration) -> ExtractorError {
        if err.is_timeout() {
            ExtractorError::Timeout(deadline)
        } else if err.is_connect() {
            ExtractorError::Connection(err.to_string())
        } else {
            ExtractorError::Unexpected(err.to_string())
        }
    }
}

/// Maps non-success status codes onto the error taxonomy.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ExtractorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body))
}

fn classify_status(status: StatusCode, body: String) -> ExtractorError {
    match status {
        StatusCode::UNAUTHORIZED => ExtractorError::AuthFailed(body),
        StatusCode::BAD_REQUEST => ExtractorError::BadRequest(body),
        s if s.is_server_error() => ExtractorError::Server {
            status: s.as_u16(),
            body,
        },
        s => ExtractorError::Unexpected(format!("unexpected status {s}: {body}")),
    }
}

fn file_part(file: Vec<u8>, filename: &str) -> Result<Part, ExtractorError> {
    Part::bytes(file)
        .file_name(filename.to_string())
        .mime_str("application/octet-stream")
        .map_err(|e| ExtractorError::Unexpected(format!("invalid multipart part: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_maps_to_auth_phase() {
        let err = classify_status(StatusCode::UNAUTHORIZED, "bad token".into());
        assert_eq!(err.phase(), ErrorPhase::PythonAuthFailed);
    }

    #[test]
    fn test_bad_request_maps_to_bad_request_phase() {
        let err = classify_status(StatusCode::BAD_REQUEST, "no file".into());
        assert_eq!(err.phase(), ErrorPhase::PythonBadRequest);
    }

    #[test]
    fn test_server_errors_map_to_extraction_phase() {
        for code in [500u16, 502, 503] {
            let err = classify_status(StatusCode::from_u16(code).unwrap(), String::new());
            assert_eq!(err.phase(), ErrorPhase::PythonExtraction, "status {code}");
        }
    }

    #[test]
    fn test_other_statuses_map_to_unknown() {
        let err = classify_status(StatusCode::IM_A_TEAPOT, String::new());
        assert_eq!(err.phase(), ErrorPhase::Unknown);
    }

    #[test]
    fn test_timeout_and_connection_phases() {
        assert_eq!(
            ExtractorError::Timeout(Duration::from_secs(480)).phase(),
            ErrorPhase::PythonExtraction
        );
        assert_eq!(
            ExtractorError::Connection("refused".into()).phase(),
            ErrorPhase::PythonConnection
        );
    }

    #[test]
    fn test_sync_response_parses_payload_and_cost() {
        let body = r#"{
            "personal_info": {"full_name": "Ada Lovelace", "email": "ada@example.com"},
            "skills": [{"name": "Rust", "confidence": 0.9}],
            "extracted_text": "Ada Lovelace...",
            "llm_tokens_used": 1234,
            "extraction_cost": 0.021,
            "llm_model_used": "gpt-4o"
        }"#;
        let parsed: AnalyzeFileResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.llm_tokens_used, Some(1234));
        assert_eq!(parsed.result.skills.len(), 1);
        assert_eq!(
            parsed.result.personal_info.unwrap().full_name.as_deref(),
            Some("Ada Lovelace")
        );
    }
}
