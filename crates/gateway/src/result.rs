//! Closed outcome of a gateway call.

use serde::Serialize;
use sleuth_core::error::ProviderError;
use sleuth_core::provider::Usage;
use sleuth_core::tool::ToolCallRequest;
use thiserror::Error;

/// A usable model response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GatewayResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
}

impl GatewayResponse {
    /// Neither text nor tool calls: treated like a transient failure.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Why a gateway call produced no response.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error(
        "no usable response after {attempts} attempts{}",
        .last.as_ref().map_or(String::new(), |e| format!(": {e}"))
    )]
    Exhausted {
        attempts: u32,
        last: Option<ProviderError>,
    },

    #[error("request rejected by backend: {0}")]
    NonRetryable(ProviderError),
}

/// Result of [`RequestGateway::send`](crate::RequestGateway::send).
///
/// Expected failures are values, never panics or propagated errors.
#[derive(Debug, Clone)]
pub enum GatewayResult {
    Response(GatewayResponse),
    Cancelled,
    Error(GatewayError),
}

impl GatewayResult {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayResult::Cancelled)
    }

    pub fn response(&self) -> Option<&GatewayResponse> {
        match self {
            GatewayResult::Response(r) => Some(r),
            _ => None,
        }
    }

    /// The response text, if there was a response.
    pub fn into_text(self) -> Option<String> {
        match self {
            GatewayResult::Response(r) => Some(r.text),
            _ => None,
        }
    }
}
