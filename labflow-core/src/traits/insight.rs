//! ABOUTME: Insight agent capability: extraction to human-readable report

use crate::error::Result;
use crate::types::{HealthDataExtraction, HealthInsights};
use async_trait::async_trait;

/// Insight generation over an extraction.
///
/// The returned value has `data` reattached from the input extraction;
/// implementations must not let the model rewrite the markers.
#[async_trait]
pub trait InsightAgent: Send + Sync {
    async fn generate(&self, extraction: &HealthDataExtraction) -> Result<HealthInsights>;
}
