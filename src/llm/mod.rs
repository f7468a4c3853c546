//! Language-model integration: capability trait, chat client, prompt sanitizer

pub mod client;
pub mod sanitize;

pub use client::{ChatCompletionClient, LlmClient, LlmError};
pub use sanitize::{sanitize_text, InputKind};
