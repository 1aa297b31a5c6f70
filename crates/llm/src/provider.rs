//! LLM Provider Trait
//!
//! Defines the common interface for all generation providers. The pipeline
//! only ever calls [`LlmProvider::generate`]; the richer `send_message` is the
//! seam each backend implements.

use async_trait::async_trait;

use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, ResponseFormat,
};

/// Trait that all generation providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Send a message and get a complete response.
    ///
    /// # Arguments
    /// * `messages` - Conversation history
    /// * `system` - Optional system prompt
    /// * `request_options` - Output format and sampling overrides
    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    /// Check if the provider is reachable with the configured credentials.
    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }

    /// Get the configuration for this provider.
    fn config(&self) -> &ProviderConfig;

    /// Single-prompt generation.
    ///
    /// With `structured` set the provider is asked for a single JSON
    /// document. An empty answer is an error, never an empty string.
    async fn generate(&self, prompt: &str, structured: bool) -> LlmResult<String> {
        let options = LlmRequestOptions {
            response_format: if structured {
                ResponseFormat::Json
            } else {
                ResponseFormat::Text
            },
            ..Default::default()
        };
        let response = self
            .send_message(vec![Message::user(prompt)], None, options)
            .await?;

        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(LlmError::EmptyResponse {
                provider: self.name().to_string(),
            }),
        }
    }
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Helper function to parse HTTP error status codes
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
