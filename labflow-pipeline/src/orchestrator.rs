//! ABOUTME: Per-document pipeline orchestrator: ocr -> analysis -> saving -> complete
//! ABOUTME: Sole writer of progress; one live task per document, cancellable at suspension points

use dashmap::DashMap;
use futures::Stream;
use labflow_core::error::{LabFlowError, Result};
use labflow_core::traits::extractor::ExtractionAgent;
use labflow_core::traits::insight::InsightAgent;
use labflow_core::traits::object_store::StorageGateway;
use labflow_core::traits::ocr::OcrAgent;
use labflow_core::traits::record_store::{NewDocument, RecordStore};
use labflow_core::types::{Document, MimeKind, ProcessingStage, ProgressEvent};
use labflow_events::{document_stream, ProgressBus};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const PROGRESS_OCR: u8 = 10;
const PROGRESS_ANALYSIS: u8 = 50;
const PROGRESS_SAVING: u8 = 90;

/// Timing configuration for orchestrator tasks.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// End-to-end deadline per document.
    pub deadline: Duration,
    /// Minimum visible dwell before entering the saving stage, so UIs that
    /// poll stage transitions never skip it.
    pub dwell: Duration,
    /// Backoff schedule for transient OCR failures; length bounds retries.
    pub ocr_retry_delays: Vec<Duration>,
    /// Delay before the single analysis-write retry.
    pub write_retry_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(600),
            dwell: Duration::from_millis(500),
            ocr_retry_delays: vec![Duration::from_secs(1), Duration::from_secs(4)],
            write_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Collaborators the orchestrator drives.
pub struct PipelineDeps {
    pub record_store: Arc<dyn RecordStore>,
    pub object_store: Arc<dyn StorageGateway>,
    pub ocr: Arc<dyn OcrAgent>,
    pub extractor: Arc<dyn ExtractionAgent>,
    pub insight: Arc<dyn InsightAgent>,
}

struct TaskEntry {
    generation: u64,
    token: CancellationToken,
}

enum DriveError {
    Cancelled,
    Failed(LabFlowError),
}

struct OrchestratorInner {
    deps: PipelineDeps,
    bus: ProgressBus,
    config: OrchestratorConfig,
    tasks: DashMap<String, TaskEntry>,
    next_generation: AtomicU64,
}

/// The pipeline facade the public API layer consumes: upload, retry, delete,
/// stream. Cheap to clone; all clones share the task registry.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl PipelineOrchestrator {
    pub fn new(deps: PipelineDeps, bus: ProgressBus, config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                deps,
                bus,
                config,
                tasks: DashMap::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.inner.bus
    }

    /// Store the upload, create the record, and start a pipeline task.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn ingest(&self, bytes: &[u8], filename: &str, mime: MimeKind) -> Result<Document> {
        if bytes.is_empty() {
            return Err(LabFlowError::InputInvalid {
                message: "uploaded file is empty".to_string(),
            });
        }

        let stored = self.inner.deps.object_store.put(bytes, filename, mime).await?;
        let document_id = Uuid::new_v4().to_string();
        let document = self
            .inner
            .deps
            .record_store
            .create_document(NewDocument {
                document_id,
                filename: filename.to_string(),
                mime_kind: mime,
                storage_ref: stored.storage_ref,
                fetch_url: stored.fetch_url,
            })
            .await?;

        info!(document_id = %document.id, "document ingested");
        self.spawn(&document.id);
        Ok(document)
    }

    /// Start (or restart) the pipeline task for a document. Any previous
    /// task for the id is cancelled first; exactly one task is live per
    /// document.
    pub fn spawn(&self, document_id: &str) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some(previous) = self.inner.tasks.insert(
            document_id.to_string(),
            TaskEntry {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let this = self.clone();
        let id = document_id.to_string();
        tokio::spawn(async move {
            this.process(id, token, generation).await;
        });
    }

    /// Retry a failed or stuck document: cancel any live task, reset the
    /// record, publish the reset, and start fresh. Complete documents are
    /// refused with `NotRetryable`.
    #[instrument(skip(self))]
    pub async fn retry(&self, document_id: &str) -> Result<Document> {
        self.cancel_task(document_id);
        let document = self.inner.deps.record_store.reset_for_retry(document_id).await?;
        self.inner.bus.publish(&ProgressEvent::snapshot(&document));
        info!("document reset for retry");
        self.spawn(document_id);
        Ok(document)
    }

    /// Delete a document: cancel its task, drop the record (cascading to
    /// analysis and markers), close its progress topic, and best-effort
    /// delete the stored object.
    #[instrument(skip(self))]
    pub async fn delete(&self, document_id: &str) -> Result<()> {
        self.cancel_task(document_id);
        let document = self.inner.deps.record_store.get_document(document_id).await?;
        self.inner.deps.record_store.delete_document(document_id).await?;
        self.inner.bus.close_topic(document_id);

        match self.inner.deps.object_store.delete(&document.storage_ref).await {
            Ok(()) | Err(LabFlowError::NotFound { .. }) => {}
            Err(error) => {
                warn!(%error, storage_ref = %document.storage_ref, "best-effort storage delete failed");
            }
        }
        info!("document deleted");
        Ok(())
    }

    /// The stream one HTTP subscriber consumes: a catch-up snapshot of the
    /// current state, then live events until terminal.
    pub async fn stream(
        &self,
        document_id: &str,
    ) -> Result<impl Stream<Item = ProgressEvent> + Send> {
        // Subscribe before reading the snapshot so no transition is lost in
        // between; the stream suppresses the resulting duplicate, if any.
        let subscription = self.inner.bus.subscribe(document_id);
        let document = self.inner.deps.record_store.get_document(document_id).await?;
        Ok(document_stream(
            ProgressEvent::snapshot(&document),
            subscription,
        ))
    }

    fn cancel_task(&self, document_id: &str) {
        if let Some((_, entry)) = self.inner.tasks.remove(document_id) {
            entry.token.cancel();
            debug!(document_id, "pipeline task cancelled");
        }
    }

    #[instrument(skip(self, document_id, token, generation), fields(document_id = %document_id))]
    async fn process(&self, document_id: String, token: CancellationToken, generation: u64) {
        let deadline = self.inner.config.deadline;
        let outcome = tokio::time::timeout(deadline, self.drive(&document_id, &token)).await;

        match outcome {
            Ok(Ok(())) => info!("document pipeline completed"),
            Ok(Err(DriveError::Cancelled)) => debug!("pipeline task stopped by cancellation"),
            Ok(Err(DriveError::Failed(err))) => self.fail(&document_id, &token, &err).await,
            Err(_elapsed) => {
                let err = LabFlowError::Timeout {
                    message: format!("processing deadline of {deadline:?} exceeded"),
                };
                self.fail(&document_id, &token, &err).await;
            }
        }

        self.inner
            .tasks
            .remove_if(&document_id, |_, entry| entry.generation == generation);
    }

    async fn drive(&self, document_id: &str, token: &CancellationToken) -> std::result::Result<(), DriveError> {
        let document = self
            .inner
            .deps
            .record_store
            .get_document(document_id)
            .await
            .map_err(DriveError::Failed)?;

        self.advance(document_id, token, ProcessingStage::OcrExtraction, PROGRESS_OCR)
            .await?;
        let raw_text = self.run_ocr(&document, token).await?;

        self.advance(document_id, token, ProcessingStage::AiAnalysis, PROGRESS_ANALYSIS)
            .await?;
        let extraction = self
            .guarded(token, self.inner.deps.extractor.extract(&raw_text))
            .await?;
        let insights = self
            .guarded(token, self.inner.deps.insight.generate(&extraction))
            .await?;

        // Visible dwell between analysis completion and the saving stage.
        self.sleep_guarded(token, self.inner.config.dwell).await?;

        self.advance(document_id, token, ProcessingStage::SavingResults, PROGRESS_SAVING)
            .await?;
        self.persist(document_id, token, &raw_text, &insights).await?;

        // Terminal event with the full completed snapshot.
        self.publish_current(document_id).await;
        Ok(())
    }

    /// Write the stage transition, then publish the resulting snapshot.
    /// Every state observable in the record store is also observable as an
    /// event, modulo drop-oldest on slow subscribers.
    async fn advance(
        &self,
        document_id: &str,
        token: &CancellationToken,
        stage: ProcessingStage,
        progress: u8,
    ) -> std::result::Result<(), DriveError> {
        self.guarded(
            token,
            self.inner
                .deps
                .record_store
                .update_progress(document_id, stage, progress),
        )
        .await?;
        self.publish_current(document_id).await;
        Ok(())
    }

    async fn run_ocr(
        &self,
        document: &Document,
        token: &CancellationToken,
    ) -> std::result::Result<String, DriveError> {
        let mut attempt = 0;
        loop {
            match self
                .guarded(
                    token,
                    self.inner
                        .deps
                        .ocr
                        .extract_text(&document.fetch_url, document.mime_kind),
                )
                .await
            {
                Ok(text) => return Ok(text),
                Err(DriveError::Failed(err))
                    if err.is_transient()
                        && attempt < self.inner.config.ocr_retry_delays.len() =>
                {
                    let delay = self.inner.config.ocr_retry_delays[attempt];
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient ocr failure, backing off"
                    );
                    self.sleep_guarded(token, delay).await?;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn persist(
        &self,
        document_id: &str,
        token: &CancellationToken,
        raw_text: &str,
        insights: &labflow_core::types::HealthInsights,
    ) -> std::result::Result<(), DriveError> {
        match self
            .guarded(
                token,
                self.inner
                    .deps
                    .record_store
                    .write_analysis(document_id, raw_text, insights),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(DriveError::Cancelled) => Err(DriveError::Cancelled),
            Err(DriveError::Failed(first)) => {
                warn!(error = %first, "analysis write failed, retrying once");
                self.sleep_guarded(token, self.inner.config.write_retry_delay)
                    .await?;
                self.guarded(
                    token,
                    self.inner
                        .deps
                        .record_store
                        .write_analysis(document_id, raw_text, insights),
                )
                .await
                .map_err(|retry_err| match retry_err {
                    DriveError::Cancelled => DriveError::Cancelled,
                    DriveError::Failed(_) => DriveError::Failed(LabFlowError::RecordStoreUnavailable {
                        message: "persistence failure".to_string(),
                        source: None,
                    }),
                })
            }
        }
    }

    /// Terminal error handling. Performs no writes when the task was
    /// cancelled: the record may already be deleted or owned by a newer
    /// task.
    async fn fail(&self, document_id: &str, token: &CancellationToken, err: &LabFlowError) {
        if token.is_cancelled() {
            debug!(error = %err, "suppressing failure writes for cancelled task");
            return;
        }
        warn!(error = %err, kind = err.kind(), "document pipeline failed");

        match self
            .inner
            .deps
            .record_store
            .mark_error(document_id, &err.to_string())
            .await
        {
            Ok(()) => self.publish_current(document_id).await,
            Err(LabFlowError::NotFound { .. }) => {
                debug!("document vanished before error could be recorded");
            }
            Err(mark_err) => {
                error!(error = %mark_err, "failed to record pipeline error");
            }
        }
    }

    async fn publish_current(&self, document_id: &str) {
        match self.inner.deps.record_store.get_document(document_id).await {
            Ok(document) => self.inner.bus.publish(&ProgressEvent::snapshot(&document)),
            Err(err) => debug!(error = %err, "skipping publish, document unavailable"),
        }
    }

    /// Await a fallible step, racing it against cancellation.
    async fn guarded<T>(
        &self,
        token: &CancellationToken,
        step: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, DriveError> {
        tokio::select! {
            _ = token.cancelled() => Err(DriveError::Cancelled),
            result = step => result.map_err(DriveError::Failed),
        }
    }

    async fn sleep_guarded(
        &self,
        token: &CancellationToken,
        duration: Duration,
    ) -> std::result::Result<(), DriveError> {
        tokio::select! {
            _ = token.cancelled() => Err(DriveError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_timings() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.deadline, Duration::from_secs(600));
        assert_eq!(config.dwell, Duration::from_millis(500));
        assert_eq!(
            config.ocr_retry_delays,
            vec![Duration::from_secs(1), Duration::from_secs(4)]
        );
        assert_eq!(config.write_retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn stage_progress_constants() {
        assert_eq!(PROGRESS_OCR, 10);
        assert_eq!(PROGRESS_ANALYSIS, 50);
        assert_eq!(PROGRESS_SAVING, 90);
    }
}
