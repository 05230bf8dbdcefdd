//! Background compression of large tool results into learnings.
//!
//! A summary is started as soon as a step's result is known and runs while
//! the loop asks the model for the next step. The loop only waits for it
//! at the join point before the following decision.

use sleuth_config::AgentConfig;
use sleuth_core::event::DomainEvent;
use sleuth_core::provider::{ModelProfile, ToolChoice};
use sleuth_core::tool::ToolCallRequest;
use sleuth_core::CancelFlag;
use sleuth_gateway::{GatewayResult, RequestGateway};
use std::collections::HashSet;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::prompts;
use crate::token::estimate_tokens;

/// An in-flight summary of one step's result. Dropping it stops the work.
pub struct PendingSummary {
    handle: AbortOnDropHandle<Option<String>>,
}

impl std::fmt::Debug for PendingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSummary")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl PendingSummary {
    pub fn spawn<F>(work: F) -> Self
    where
        F: std::future::Future<Output = Option<String>> + Send + 'static,
    {
        Self {
            handle: AbortOnDropHandle::new(tokio::spawn(work)),
        }
    }

    /// Wait for the summary; on failure, a blank summary or cancellation, use `raw`.
    pub async fn settle_or_fallback(self, raw: &str, cancel: &CancelFlag) -> String {
        let mut handle = self.handle;
        let settled = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.abort();
                None
            }
            joined = &mut handle => match joined {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, "Summary task failed");
                    None
                }
            },
        };
        settled
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| raw.to_string())
    }
}

/// Decides which results are summarized and starts the work.
#[derive(Debug, Clone)]
pub struct SummarizationPipeline {
    gateway: RequestGateway,
    model: ModelProfile,
    threshold_tokens: usize,
    summarizable: HashSet<String>,
}

impl SummarizationPipeline {
    /// The pipeline never echoes tokens, whatever `gateway` does.
    pub fn new(gateway: &RequestGateway, model: ModelProfile, config: &AgentConfig) -> Self {
        Self {
            gateway: gateway.without_echo(),
            model,
            threshold_tokens: config.summarize_threshold_tokens,
            summarizable: config.summarizable_tools.iter().cloned().collect(),
        }
    }

    /// Summarize with a different (usually cheaper) model.
    pub fn with_model(mut self, model: ModelProfile) -> Self {
        self.model = model;
        self
    }

    pub fn should_summarize(&self, tool_name: &str, result: &str) -> bool {
        self.summarizable.contains(tool_name) && estimate_tokens(result) > self.threshold_tokens
    }

    /// Start summarizing `result` if it is large enough; `None` otherwise.
    pub fn maybe_summarize(
        &self,
        query: &str,
        call: &ToolCallRequest,
        params: &str,
        result: &str,
    ) -> Option<PendingSummary> {
        if !self.should_summarize(&call.name, result) {
            return None;
        }

        let approx_tokens = estimate_tokens(result);
        debug!(tool = %call.name, approx_tokens, "Summarizing large result");
        self.gateway
            .events()
            .publish(DomainEvent::SummarizationStarted {
                tool_name: call.name.clone(),
                approx_tokens,
                timestamp: chrono::Utc::now(),
            });

        let messages = prompts::summarize_messages(
            query,
            call.arg_str("reasoning").unwrap_or_default(),
            &call.name,
            params,
            result,
        );
        let gateway = self.gateway.clone();
        let model = self.model.clone();
        Some(PendingSummary::spawn(async move {
            match gateway.send(&model, &messages, &[], ToolChoice::Auto).await {
                GatewayResult::Response(response) => Some(response.text),
                GatewayResult::Cancelled => None,
                GatewayResult::Error(e) => {
                    warn!(error = %e, "Summarization failed; keeping raw result");
                    None
                }
            }
        }))
    }
}
