// src/llm/mod.rs

mod chat;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::prompt::Prompt;

pub use chat::ChatClient;

/// The language-model collaborator: turns a prompt into raw completion text.
///
/// Implementations do not interpret the completion; parsing and validation
/// happen downstream.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "model"
    }
}
