//! ABOUTME: LLM-backed agents: marker extraction and insight generation
//! ABOUTME: Shares one defensive repair/validate path for untrusted model output

pub mod extraction;
pub mod insight;
pub mod range;
pub mod repair;

pub use extraction::HealthDataExtractor;
pub use insight::{InsightGenerator, DEFAULT_DISCLAIMER};
pub use range::{assess, parse_reference_range, MarkerAssessment, ReferenceRange};
