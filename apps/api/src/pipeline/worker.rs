//! Background worker: a single cooperative poller that advances pipeline
//! records through the state machine.
//!
//! One tick = reaper pass, then start up to `start_batch` pending records,
//! then import up to `import_batch` extracted records. Both passes run
//! sequentially within the tick; a record in `processing` is visible to
//! neither. At-most-one worker per deployment is an operational assumption,
//! so status partitioning plus per-write compare-and-swap is the only
//! coordination needed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::audit::{LlmAuditSink, LlmUsageParams};
use crate::extractor::ExtractionClient;
use crate::importer;
use crate::models::audit::LlmCallStatus;
use crate::models::extraction::{ErrorPhase, ExtractionRow, ExtractionStatus};
use crate::models::payload::CvExtractionResult;
use crate::pipeline::repo;
use crate::storage::CvStorage;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    /// Pending records started per tick.
    pub start_batch: i64,
    /// Extracted records imported per tick.
    pub import_batch: i64,
    pub max_retries: i32,
    /// Sync mode waits for the extraction result inline; async mode expects
    /// the extraction service to write results back out-of-band.
    pub sync_mode: bool,
    /// Records stuck in `processing` longer than this are failed by the
    /// reaper. Default: twice the sync extraction timeout.
    pub stuck_deadline: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            start_batch: 5,
            import_batch: 10,
            max_retries: 3,
            sync_mode: true,
            stuck_deadline: Duration::from_secs(960),
        }
    }
}

/// What to do with a record after a failed import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `extracted`; a later tick retries the import.
    Requeue,
    /// Retries exhausted; pin to `failed` permanently.
    PinFailed,
}

/// Pure retry policy: requeue while the counter is below the bound.
pub fn retry_decision(retry_count: i32, max_retries: i32) -> RetryDecision {
    if retry_count < max_retries {
        RetryDecision::Requeue
    } else {
        RetryDecision::PinFailed
    }
}

pub struct CvWorker {
    pool: PgPool,
    storage: Arc<CvStorage>,
    extractor: Arc<ExtractionClient>,
    audit: LlmAuditSink,
    config: WorkerConfig,
}

impl CvWorker {
    pub fn new(
        pool: PgPool,
        storage: Arc<CvStorage>,
        extractor: Arc<ExtractionClient>,
        audit: LlmAuditSink,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pool,
            storage,
            extractor,
            audit,
            config,
        }
    }

    /// Runs until the shutdown signal flips. Cancellation is cooperative: an
    /// in-flight tick finishes the record it is on, then the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            sync_mode = self.config.sync_mode,
            "CV worker started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("CV worker stopping at tick boundary");
                    break;
                }
            }
        }
    }

    /// One tick: reap stuck records, start pending, import extracted.
    pub async fn tick(&self) {
        if let Err(e) =
            repo::reap_stuck_processing(&self.pool, self.config.stuck_deadline.as_secs() as i64)
                .await
        {
            error!("reaper pass failed: {e}");
        }

        self.start_pending_pass().await;
        self.import_extracted_pass().await;
    }

    /// Pass 1: claim pending records FIFO and hand them to the extraction
    /// service.
    async fn start_pending_pass(&self) {
        let batch = match repo::fetch_pending(&self.pool, self.config.start_batch).await {
            Ok(batch) => batch,
            Err(e) => {
                error!("failed to fetch pending records: {e}");
                return;
            }
        };

        for row in batch {
            if let Err(e) = self.start_extraction(&row).await {
                error!(extraction_id = %row.id, "start_extraction failed: {e}");
            }
        }
    }

    async fn start_extraction(&self, row: &ExtractionRow) -> anyhow::Result<()> {
        let claimed = repo::try_transition(
            &self.pool,
            row.id,
            ExtractionStatus::Pending,
            ExtractionStatus::Processing,
        )
        .await?;
        if !claimed {
            // Another writer moved it since selection; nothing to do.
            return Ok(());
        }

        let file = match self
            .storage
            .read_by_extraction_id(&self.pool, row.id)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                repo::mark_failed(
                    &self.pool,
                    row.id,
                    ErrorPhase::Unknown,
                    &format!("stored CV unreadable: {e}"),
                )
                .await?;
                return Ok(());
            }
        };

        if self.config.sync_mode {
            self.run_sync_extraction(row, file).await
        } else {
            self.run_async_extraction(row, file).await
        }
    }

    /// Sync mode: the worker itself receives the result and advances the
    /// record to `extracted`.
    async fn run_sync_extraction(&self, row: &ExtractionRow, file: Vec<u8>) -> anyhow::Result<()> {
        let started = Instant::now();
        match self
            .extractor
            .analyze_file(file, &row.original_filename)
            .await
        {
            Ok(response) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                repo::mark_extracted(
                    &self.pool,
                    row.id,
                    &response.result,
                    response.extracted_text.as_deref(),
                    response.llm_tokens_used,
                    response.extraction_cost,
                    response.llm_model_used.as_deref(),
                )
                .await?;

                // Best-effort cost accounting; never affects the pipeline.
                self.audit
                    .record(LlmUsageParams {
                        tenant_id: row.tenant_id,
                        operation_type: "cv_extraction_complete".to_string(),
                        provider: "extraction-service".to_string(),
                        model: response
                            .llm_model_used
                            .clone()
                            .unwrap_or_else(|| "unknown".to_string()),
                        prompt_tokens: response.llm_tokens_used.unwrap_or(0),
                        completion_tokens: 0,
                        status: Some(LlmCallStatus::Success),
                        response_time_ms: Some(elapsed_ms),
                        entity_type: Some("cv_extraction".to_string()),
                        entity_id: Some(row.id),
                        pre_calculated_cost: response.extraction_cost,
                        metadata: Some(json!({
                            "employee_id": row.employee_id,
                            "file_type": row.file_type.clone(),
                        })),
                        ..Default::default()
                    })
                    .await;
                Ok(())
            }
            Err(e) => {
                repo::mark_failed(&self.pool, row.id, e.phase(), &e.to_string()).await?;
                Ok(())
            }
        }
    }

    /// Async mode: fire the request and leave the record in `processing`; the
    /// extraction service writes results back out-of-band and pass 2 picks
    /// the record up on a later tick.
    async fn run_async_extraction(&self, row: &ExtractionRow, file: Vec<u8>) -> anyhow::Result<()> {
        match self
            .extractor
            .analyze_file_async(file, &row.original_filename, row.id)
            .await
        {
            Ok(ack) => {
                info!(
                    extraction_id = %row.id,
                    message = ack.message.as_deref().unwrap_or("accepted"),
                    "async extraction dispatched"
                );
                Ok(())
            }
            Err(e) => {
                repo::mark_failed(&self.pool, row.id, e.phase(), &e.to_string()).await?;
                Ok(())
            }
        }
    }

    /// Pass 2: claim extracted records and run the importer, with bounded
    /// retries on failure.
    async fn import_extracted_pass(&self) {
        let batch = match repo::fetch_extracted(&self.pool, self.config.import_batch).await {
            Ok(batch) => batch,
            Err(e) => {
                error!("failed to fetch extracted records: {e}");
                return;
            }
        };

        for row in batch {
            if let Err(e) = self.import_one(&row).await {
                error!(extraction_id = %row.id, "import pass failed: {e}");
            }
        }
    }

    async fn import_one(&self, row: &ExtractionRow) -> anyhow::Result<()> {
        let Some(result_json) = &row.extraction_result else {
            // Violates the extracted-state invariant; don't retry what can't succeed.
            repo::mark_failed(
                &self.pool,
                row.id,
                ErrorPhase::Unknown,
                "record reached extracted with no extraction result",
            )
            .await?;
            return Ok(());
        };

        let payload: CvExtractionResult = match serde_json::from_value(result_json.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                repo::mark_failed(
                    &self.pool,
                    row.id,
                    ErrorPhase::Unknown,
                    &format!("extraction result failed validation: {e}"),
                )
                .await?;
                return Ok(());
            }
        };

        let claimed = repo::try_transition(
            &self.pool,
            row.id,
            ExtractionStatus::Extracted,
            ExtractionStatus::Importing,
        )
        .await?;
        if !claimed {
            return Ok(());
        }

        match importer::run_import(&self.pool, row, &payload).await {
            Ok(stats) => {
                info!(
                    extraction_id = %row.id,
                    rows = stats.rows_created(),
                    retries = row.retry_count,
                    "extraction completed"
                );
                Ok(())
            }
            Err(e) => {
                match retry_decision(row.retry_count, self.config.max_retries) {
                    RetryDecision::Requeue => {
                        warn!(
                            extraction_id = %row.id,
                            attempt = row.retry_count + 1,
                            "import failed, re-queueing: {e}"
                        );
                        repo::requeue_after_import_failure(&self.pool, row.id, &e.to_string())
                            .await?;
                    }
                    RetryDecision::PinFailed => {
                        let message =
                            format!("import failed after {} retries: {e}", row.retry_count);
                        repo::mark_failed(&self.pool, row.id, ErrorPhase::DatabaseSave, &message)
                            .await?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_decision_requeues_below_bound() {
        assert_eq!(retry_decision(0, 3), RetryDecision::Requeue);
        assert_eq!(retry_decision(2, 3), RetryDecision::Requeue);
    }

    #[test]
    fn test_retry_decision_pins_at_bound() {
        assert_eq!(retry_decision(3, 3), RetryDecision::PinFailed);
        assert_eq!(retry_decision(4, 3), RetryDecision::PinFailed);
    }

    #[test]
    fn test_retry_counter_never_exceeds_bound() {
        // Simulate the failure loop: each requeue increments the counter once;
        // the first decision at the bound pins the record instead.
        let max = 3;
        let mut retry_count = 0;
        loop {
            match retry_decision(retry_count, max) {
                RetryDecision::Requeue => retry_count += 1,
                RetryDecision::PinFailed => break,
            }
        }
        assert_eq!(retry_count, max);
    }

    #[test]
    fn test_default_stuck_deadline_is_twice_sync_timeout() {
        let config = WorkerConfig::default();
        assert_eq!(config.stuck_deadline, Duration::from_secs(2 * 480));
    }
}
