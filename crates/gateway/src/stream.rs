//! Collects a provider stream into one response, echoing tokens as they arrive.

use sleuth_core::error::ProviderError;
use sleuth_core::provider::{StreamChunk, Usage};
use sleuth_core::tool::ToolCallRequest;
use sleuth_core::CancelFlag;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Live echo of completion text.
pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything a stream delivered before it finished.
#[derive(Debug, Default)]
pub struct Collected {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
}

#[derive(Debug)]
pub enum StreamOutcome {
    Completed(Collected),
    Cancelled,
    Failed(ProviderError),
}

/// Drain `rx` until the final chunk or channel close.
///
/// Every token is emitted under the cancel guard, so once the flag is set
/// nothing more reaches `on_token`.
pub async fn collect(
    mut rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
    cancel: &CancelFlag,
    on_token: Option<&TokenCallback>,
) -> StreamOutcome {
    let mut collected = Collected::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            next = rx.recv() => next,
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return StreamOutcome::Failed(e),
            None => break,
        };

        if let Some(delta) = chunk.content.as_deref().filter(|d| !d.is_empty()) {
            let emitted = cancel.guard(|| {
                if let Some(callback) = on_token {
                    callback(delta);
                }
            });
            if emitted.is_none() {
                return StreamOutcome::Cancelled;
            }
            collected.text.push_str(delta);
        }
        collected.tool_calls.extend(chunk.tool_calls);
        if chunk.usage.is_some() {
            collected.usage = chunk.usage;
        }
        if chunk.done {
            break;
        }
    }

    // A completion observed after cancel is discarded
    match cancel.guard(|| collected) {
        Some(collected) => StreamOutcome::Completed(collected),
        None => StreamOutcome::Cancelled,
    }
}
