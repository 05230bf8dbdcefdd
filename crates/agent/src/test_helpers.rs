//! Shared test helpers for agent tests.

use sleuth_core::error::ProviderError;
use sleuth_core::message::Message;
use sleuth_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use sleuth_core::tool::ToolCallRequest;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::prompts;

pub type Scripted = Result<ProviderResponse, ProviderError>;

/// A mock provider that answers summarization requests with a fixed text
/// and every other request with the next scripted response.
///
/// An exhausted script answers with a non-retryable error so a runaway
/// loop fails fast instead of spinning through backoff.
pub struct RoutingProvider {
    script: Mutex<VecDeque<Scripted>>,
    summary: Option<String>,
    summary_delay: Duration,
    requests: Mutex<Vec<ProviderRequest>>,
    summary_requests: Mutex<Vec<ProviderRequest>>,
}

impl RoutingProvider {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            summary: None,
            summary_delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            summary_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_summary(mut self, text: &str) -> Self {
        self.summary = Some(text.to_string());
        self
    }

    pub fn with_summary_delay(mut self, delay: Duration) -> Self {
        self.summary_delay = delay;
        self
    }

    /// Non-summary requests, in arrival order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn summary_requests(&self) -> Vec<ProviderRequest> {
        self.summary_requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for RoutingProvider {
    fn name(&self) -> &str {
        "routing_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let is_summary = request
            .messages
            .first()
            .is_some_and(|m| m.content == prompts::SUMMARIZE_SYSTEM);

        if is_summary {
            self.summary_requests.lock().unwrap().push(request);
            if !self.summary_delay.is_zero() {
                tokio::time::sleep(self.summary_delay).await;
            }
            return match &self.summary {
                Some(text) => Ok(text_response(text)),
                None => Err(ProviderError::BadRequest("no summary scripted".into())),
            };
        }

        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::BadRequest("script exhausted".into())))
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
        cached_tokens: None,
    })
}

/// A plain text response.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// A response carrying the given tool calls.
pub fn calls_response(calls: Vec<ToolCallRequest>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_calls("", calls),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Shorthand for a tool call with JSON arguments.
pub fn call(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(name, arguments)
}
