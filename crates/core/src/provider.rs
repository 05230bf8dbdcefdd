//! The model backend contract.
//!
//! A Provider knows how to send a list of messages (plus optional tool
//! specifications) to a model and get back either text or tool-execution
//! requests, as a complete message or as a stream of chunks.
//!
//! Backends differ in whether they implement function calling natively;
//! that difference is described by [`ModelProfile`] and absorbed by the
//! request gateway, never by callers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::{ToolCallRequest, ToolSpecification};

/// Whether the model may answer in plain text or must call a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
}

/// Requested shape of the completion text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

/// What the runtime knows about a model's protocol support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model identifier sent to the backend
    pub name: String,

    /// Backend implements function calling natively
    #[serde(default = "default_true")]
    pub native_tools: bool,

    /// Backend accepts several tool calls in one turn
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

fn default_true() -> bool {
    true
}

impl ModelProfile {
    /// A model with native function calling.
    pub fn native(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_tools: true,
            parallel_tool_calls: true,
        }
    }

    /// A model that needs tool calls emulated through JSON output.
    pub fn emulated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_tools: false,
            parallel_tool_calls: false,
        }
    }
}

/// A single request to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model can call natively
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpecification>,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    #[serde(default)]
    pub parallel_tool_calls: bool,

    #[serde(default)]
    pub response_format: ResponseFormat,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

impl ProviderRequest {
    /// A plain text request with no tools.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: false,
            response_format: ResponseFormat::Text,
            stream: false,
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,

    /// Prompt tokens served from the backend's prompt cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
}

impl Usage {
    /// Fold another usage report into this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(cached) = other.cached_tokens {
            *self.cached_tokens.get_or_insert(0) += cached;
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Fully assembled tool calls (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// Every model backend implements this trait. The gateway calls `stream()`
/// without knowing which backend sits behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                tool_calls: response.message.tool_calls,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Whether the backend is reachable.
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(format!("echo:{}", request.messages.len())),
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                    cached_tokens: None,
                }),
                model: request.model,
            })
        }
    }

    #[test]
    fn request_defaults_to_plain_text() {
        let req = ProviderRequest::new("gpt-4o", vec![Message::user("hi")]);
        assert_eq!(req.tool_choice, ToolChoice::Auto);
        assert_eq!(req.response_format, ResponseFormat::Text);
        assert!(req.tools.is_empty());
        assert!(req.temperature.abs() < f32::EPSILON);
    }

    #[test]
    fn profiles() {
        assert!(ModelProfile::native("gpt-4o").native_tools);
        let emulated = ModelProfile::emulated("deepseek-r1");
        assert!(!emulated.native_tools);
        assert!(!emulated.parallel_tool_calls);
    }

    #[test]
    fn usage_accumulates_cached_tokens() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cached_tokens: None,
        });
        total.accumulate(&Usage {
            prompt_tokens: 20,
            completion_tokens: 5,
            total_tokens: 25,
            cached_tokens: Some(12),
        });
        assert_eq!(total.total_tokens, 40);
        assert_eq!(total.cached_tokens, Some(12));
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let provider = FixedProvider;
        let mut rx = provider
            .stream(ProviderRequest::new("m", vec![Message::user("a"), Message::user("b")]))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("echo:2"));
        assert_eq!(chunk.usage.unwrap().total_tokens, 5);
        assert!(rx.recv().await.is_none());
    }
}
