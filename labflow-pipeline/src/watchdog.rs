//! ABOUTME: Background sweeper flipping abandoned in-flight documents to error
//! ABOUTME: Never resurrects tasks; recovery is explicit via user-initiated retry

use labflow_core::traits::record_store::RecordStore;
use labflow_core::types::ProgressEvent;
use labflow_events::ProgressBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Terminal message written for stuck documents.
pub const STUCK_MESSAGE: &str = "processing timed out";

/// Sweep cadence and staleness threshold.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub sweep_interval: Duration,
    pub stuck_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(300),
        }
    }
}

/// Periodic sweeper for documents whose pipeline stopped making progress.
pub struct StuckDocumentWatchdog {
    record_store: Arc<dyn RecordStore>,
    bus: ProgressBus,
    config: WatchdogConfig,
}

/// Handle for stopping a running watchdog.
pub struct WatchdogHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn stopped(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

impl StuckDocumentWatchdog {
    pub fn new(record_store: Arc<dyn RecordStore>, bus: ProgressBus, config: WatchdogConfig) -> Self {
        Self {
            record_store,
            bus,
            config,
        }
    }

    /// Start the periodic sweep loop.
    pub fn start(self) -> WatchdogHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                sweep_interval_secs = self.config.sweep_interval.as_secs(),
                stuck_threshold_secs = self.config.stuck_threshold.as_secs(),
                "stuck-document watchdog started"
            );
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
            debug!("stuck-document watchdog stopped");
        });
        WatchdogHandle { token, join }
    }

    /// One sweep: flip every stale processing document to error and publish
    /// the terminal event. Failures here never cascade; the pipeline task,
    /// if any, may already be gone.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> usize {
        let threshold = chrono::Duration::from_std(self.config.stuck_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let stuck = match self.record_store.find_stuck(threshold).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(error = %err, "stuck-document query failed");
                return 0;
            }
        };

        let mut flipped = 0;
        for document_id in stuck {
            match self.record_store.mark_error(&document_id, STUCK_MESSAGE).await {
                Ok(()) => {
                    flipped += 1;
                    info!(%document_id, "stuck document flipped to error");
                    match self.record_store.get_document(&document_id).await {
                        Ok(document) => self.bus.publish(&ProgressEvent::snapshot(&document)),
                        Err(err) => debug!(error = %err, "stuck document vanished after flip"),
                    }
                }
                Err(labflow_core::LabFlowError::NotFound { .. }) => {
                    debug!(%document_id, "stuck document deleted before flip");
                }
                Err(err) => {
                    error!(%document_id, error = %err, "failed to flip stuck document");
                }
            }
        }
        flipped
    }
}
