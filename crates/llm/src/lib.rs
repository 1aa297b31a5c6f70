//! Insight Cascade LLM
//!
//! Provides a unified interface for the text and plan generation service:
//! - OpenAI (and OpenAI-compatible endpoints)
//! - Google Gemini
//!
//! Also includes the HTTP client factory shared with the warehouse client.

pub mod gemini;
pub mod http_client;
pub mod openai;
pub mod provider;
pub mod types;

use std::sync::Arc;

// Re-export main types
pub use gemini::GeminiProvider;
pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use types::*;

/// Build the provider selected by `config.provider`.
pub fn create_provider(config: ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(config)?),
        ProviderType::Gemini => Arc::new(GeminiProvider::new(config)?),
    };
    Ok(provider)
}
