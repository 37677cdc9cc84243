//! ABOUTME: Provider clients: OpenAI-compatible chat completions and document OCR
//! ABOUTME: Thin reqwest wrappers mapping transport failures onto the error taxonomy

pub mod chat;
pub mod ocr;

pub use chat::{ChatConfig, CompletionClient, OpenAiCompatClient};
pub use ocr::{MistralOcrClient, OcrConfig};
