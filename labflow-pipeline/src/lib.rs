//! ABOUTME: Document pipeline: per-document orchestrator tasks and the watchdog
//! ABOUTME: Owns task lifetimes, cancellation, and the write-then-publish discipline

pub mod orchestrator;
pub mod watchdog;

pub use orchestrator::{OrchestratorConfig, PipelineDeps, PipelineOrchestrator};
pub use watchdog::{StuckDocumentWatchdog, WatchdogConfig, WatchdogHandle, STUCK_MESSAGE};
