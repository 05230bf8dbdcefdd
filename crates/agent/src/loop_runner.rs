//! The search loop: decide, execute, record, until the model finalizes or
//! the budget runs out.

use chrono::Utc;
use futures::future::join_all;
use sleuth_config::AgentConfig;
use sleuth_core::event::DomainEvent;
use sleuth_core::provider::{ModelProfile, ToolChoice, Usage};
use sleuth_core::tool::{ToolCallRequest, ToolRegistry, ToolSpecification};
use sleuth_gateway::{GatewayResult, RequestGateway};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::finalize::{self, Finalize, ABORT, ANSWER};
use crate::guard::{LoopGuard, FALLBACK_TOOL};
use crate::history::{param_info, ActionHistory, ToolCall};
use crate::outcome::{Outcome, SessionOutcome};
use crate::permitted::{permitted_tools, Budget, BudgetVerdict, LoopState, SYMBOL_SEARCH};
use crate::prompts::{self, Guidance, KnowledgeEntry};
use crate::summarize::SummarizationPipeline;
use crate::symbols::{coalesce_inner_classes, compress_symbols};
use crate::token::estimate_messages_tokens;
use crate::workspace::ContextProvider;

const GIVE_UP: &str = "Unable to get a response from the model; giving up search";

/// Progress text shown when a step starts.
pub fn step_label(tool_name: &str) -> &'static str {
    match tool_name {
        "searchSymbols" => "Searching for symbols",
        "getUsages" => "Finding usages",
        "getRelatedClasses" => "Finding related code",
        "getClassSkeletons" => "Getting class overview",
        "getClassSources" => "Fetching class source",
        "getMethodSources" => "Fetching method source",
        "getCallGraphTo" | "getCallGraphFrom" => "Walking the call graph",
        "searchSubstrings" => "Searching for substrings",
        "searchFilenames" => "Searching for filenames",
        "getFileContents" => "Getting file contents",
        _ => "Processing request",
    }
}

/// Mutable state of one session.
struct Session {
    history: ActionHistory,
    guard: LoopGuard,
    knowledge: Vec<KnowledgeEntry>,
    usage: Usage,
    turn: usize,
    /// Sticky once set, by the budget or the loop guard
    beast_mode: bool,
    /// Some step produced a useful result
    discovered: bool,
}

impl Session {
    fn new(fallback_available: bool) -> Self {
        Self {
            history: ActionHistory::new(),
            guard: LoopGuard::new(fallback_available),
            knowledge: Vec::new(),
            usage: Usage::default(),
            turn: 0,
            beast_mode: false,
            discovered: false,
        }
    }

    fn record_usage(&mut self, usage: Option<&Usage>) {
        if let Some(usage) = usage {
            self.usage.accumulate(usage);
        }
    }
}

/// Drives one query from first decision to outcome.
pub struct AgentLoop {
    /// Gateway for decisions; its cancel flag governs the whole session
    gateway: RequestGateway,

    /// Model that makes decisions
    model: ModelProfile,

    /// Model for seed evaluation and summaries
    summary_model: ModelProfile,

    tools: Arc<ToolRegistry>,

    summarizer: SummarizationPipeline,

    budget: Budget,

    /// Workspace fragments evaluated before the first decision
    context: Option<Arc<dyn ContextProvider>>,
}

impl AgentLoop {
    pub fn new(
        gateway: RequestGateway,
        model: ModelProfile,
        tools: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Self {
        let summarizer = SummarizationPipeline::new(&gateway, model.clone(), config);
        Self {
            gateway,
            summary_model: model.clone(),
            model,
            tools,
            summarizer,
            budget: Budget::from_config(config),
            context: None,
        }
    }

    /// Use a separate model for seed evaluation and summaries.
    pub fn with_summary_model(mut self, model: ModelProfile) -> Self {
        self.summarizer = self.summarizer.with_model(model.clone());
        self.summary_model = model;
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    /// Run a full search session for `query`.
    pub async fn run(&self, query: &str) -> SessionOutcome {
        let mut session = Session::new(self.tools.contains(FALLBACK_TOOL));
        info!(model = %self.model.name, "Starting search");

        let outcome = self.drive(query, &mut session).await;

        info!(
            outcome = outcome.label(),
            steps = session.history.len(),
            total_tokens = session.usage.total_tokens,
            "Search finished"
        );
        SessionOutcome {
            outcome,
            usage: session.usage,
            steps: session.history.len(),
        }
    }

    async fn drive(&self, query: &str, session: &mut Session) -> Outcome {
        let cancel = self.gateway.cancel_flag().clone();
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        if let Some(end) = self.evaluate_context(query, session).await {
            return end;
        }

        loop {
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            let history_tokens = session.history.approx_tokens();
            match self.budget.assess(history_tokens, session.discovered) {
                BudgetVerdict::Stop => {
                    warn!(history_tokens, budget = self.budget.tokens, "Token budget exhausted");
                    return Outcome::BudgetExhausted {
                        reason: format!(
                            "Action history reached ~{history_tokens} of {} tokens",
                            self.budget.tokens
                        ),
                    };
                }
                BudgetVerdict::BeastMode => self.engage_beast_mode(session, history_tokens),
                BudgetVerdict::Continue => {}
            }
            if session.guard.beast_mode() {
                self.engage_beast_mode(session, history_tokens);
            }

            session.history.settle_earlier_summaries(&cancel).await;
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            let state = LoopState {
                steps_executed: session.history.len(),
                beast_mode: session.beast_mode,
                has_symbol_index: self.tools.contains(SYMBOL_SEARCH),
                symbol_search_done: session.history.has_called(SYMBOL_SEARCH),
            };
            let specs = self.specifications(&permitted_tools(&state));
            if specs.is_empty() {
                return Outcome::Failed {
                    reason: "No search tools are available".into(),
                };
            }

            let guidance = if session.beast_mode {
                Guidance::Beast
            } else if session.discovered {
                Guidance::Normal
            } else {
                Guidance::StartBroad
            };
            let messages = prompts::decide_messages(
                &session.knowledge,
                &session.history.render(),
                guidance,
                query,
            );
            debug!(
                turn = session.turn + 1,
                tools = specs.len(),
                approx_tokens = estimate_messages_tokens(&messages),
                "Deciding next step"
            );

            let response = match self
                .gateway
                .send(&self.model, &messages, &specs, ToolChoice::Required)
                .await
            {
                GatewayResult::Response(response) => response,
                GatewayResult::Cancelled => return Outcome::Cancelled,
                GatewayResult::Error(e) => {
                    warn!(error = %e, "Decision request failed");
                    return Outcome::Failed {
                        reason: format!("{GIVE_UP}: {e}"),
                    };
                }
            };
            session.record_usage(response.usage.as_ref());
            if response.tool_calls.is_empty() {
                return Outcome::Failed {
                    reason: GIVE_UP.into(),
                };
            }

            session.turn += 1;
            let turn = session.turn;

            let (proposed, unavailable): (Vec<ToolCallRequest>, Vec<ToolCallRequest>) = response
                .tool_calls
                .into_iter()
                .partition(|call| specs.iter().any(|spec| spec.name == call.name));
            let rejected: Vec<ToolCall> = unavailable
                .into_iter()
                .map(|call| {
                    warn!(tool = %call.name, "Model called a tool that was not offered");
                    let message = format!("Error: {} is not available this turn", call.name);
                    let mut step = ToolCall::new(call, turn);
                    step.set_result(message);
                    step
                })
                .collect();

            if let Some(call) = proposed.iter().find(|c| finalize::is_finalize(&c.name)) {
                if proposed.len() > 1 {
                    debug!(
                        dropped = proposed.len() - 1,
                        "Finalize call takes precedence over other calls"
                    );
                }
                match finalize::validate(call) {
                    Ok(Finalize::Answer {
                        explanation,
                        identifiers,
                    }) => {
                        return Outcome::Answer {
                            explanation,
                            identifiers: coalesce_inner_classes(&identifiers),
                        };
                    }
                    Ok(Finalize::Abort { explanation }) => {
                        return Outcome::Aborted { explanation };
                    }
                    Err(reason) => {
                        warn!(tool = %call.name, %reason, "Rejected finalize call");
                        let mut step = ToolCall::new(call.clone(), turn);
                        step.set_result(format!("Error: {reason}"));
                        let steps = std::iter::once(step).chain(rejected);
                        if cancel.guard(|| session.history.extend(steps)).is_none() {
                            return Outcome::Cancelled;
                        }
                        continue;
                    }
                }
            }

            let calls: Vec<ToolCallRequest> = proposed
                .into_iter()
                .map(|call| session.guard.admit(call))
                .collect();

            let first_sequence = session.history.len() + 1;
            let Some(executed) = self.execute_turn(query, calls, turn, first_sequence).await else {
                return Outcome::Cancelled;
            };
            session.discovered |= executed.iter().any(|(_, success)| *success);
            let steps = executed.into_iter().map(|(step, _)| step).chain(rejected);
            if cancel.guard(|| session.history.extend(steps)).is_none() {
                return Outcome::Cancelled;
            }
        }
    }

    fn engage_beast_mode(&self, session: &mut Session, history_tokens: usize) {
        if session.beast_mode {
            return;
        }
        session.beast_mode = true;
        info!(history_tokens, "Beast mode engaged; only finalize tools remain");
        self.gateway.events().publish(DomainEvent::BeastModeEngaged {
            history_tokens,
            timestamp: Utc::now(),
        });
    }

    /// Ask the model which of the workspace fragments matter.
    ///
    /// `Some` ends the session.
    async fn evaluate_context(&self, query: &str, session: &mut Session) -> Option<Outcome> {
        let context = self.context.as_ref()?;
        let fragments = context.fragments().await;
        if fragments.is_empty() {
            return None;
        }

        self.gateway
            .events()
            .publish(DomainEvent::system("Evaluating context"));
        let messages = prompts::seed_messages(query, &fragments);
        debug!(
            fragments = fragments.len(),
            approx_tokens = estimate_messages_tokens(&messages),
            "Evaluating initial context"
        );

        match self
            .gateway
            .without_echo()
            .send(&self.summary_model, &messages, &[], ToolChoice::Auto)
            .await
        {
            GatewayResult::Response(response) => {
                session.record_usage(response.usage.as_ref());
                session.knowledge.push(KnowledgeEntry {
                    description: "Initial context".into(),
                    content: response.text,
                });
                None
            }
            GatewayResult::Cancelled => Some(Outcome::Cancelled),
            GatewayResult::Error(e) => {
                warn!(error = %e, "Context evaluation failed");
                Some(Outcome::Failed {
                    reason: format!("Error evaluating context: {e}"),
                })
            }
        }
    }

    /// Specifications of `names`, with finalize tools supplied by the loop itself.
    fn specifications(&self, names: &[&str]) -> Vec<ToolSpecification> {
        let (finalizers, registered): (Vec<&str>, Vec<&str>) =
            names.iter().copied().partition(|name| finalize::is_finalize(name));
        let mut specs: Vec<ToolSpecification> = finalizers
            .into_iter()
            .filter_map(|name| match name {
                ANSWER => Some(finalize::answer_spec()),
                ABORT => Some(finalize::abort_spec()),
                _ => None,
            })
            .collect();
        specs.extend(self.tools.list_specs(&registered));
        specs
    }

    /// Execute one turn's calls concurrently, in order of the returned steps.
    ///
    /// `None` if cancelled while waiting on the tools; the unfinished tool
    /// tasks are aborted.
    async fn execute_turn(
        &self,
        query: &str,
        calls: Vec<ToolCallRequest>,
        turn: usize,
        first_sequence: usize,
    ) -> Option<Vec<(ToolCall, bool)>> {
        let events = self.gateway.events();
        for (offset, call) in calls.iter().enumerate() {
            let params = param_info(call);
            let label = step_label(&call.name);
            info!(tool = %call.name, %params, "{label}");
            events.publish(DomainEvent::StepStarted {
                sequence: first_sequence + offset,
                tool_name: call.name.clone(),
                label: label.to_string(),
                timestamp: Utc::now(),
            });
        }

        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let tools = Arc::clone(&self.tools);
                AbortOnDropHandle::new(tokio::spawn(async move {
                    let started = Instant::now();
                    let result = tools.execute(&call).await;
                    (result, started.elapsed())
                }))
            })
            .collect();

        let cancel = self.gateway.cancel_flag();
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            joined = join_all(handles) => joined,
        };

        let steps = calls
            .into_iter()
            .zip(joined)
            .map(|(call, joined)| {
                let (output, success) = match joined {
                    Ok((Ok(result), elapsed)) => {
                        publish_executed(self, &call.name, result.success, elapsed.as_millis());
                        (result.output, result.success)
                    }
                    Ok((Err(e), elapsed)) => {
                        warn!(tool = %call.name, error = %e, "Tool failed");
                        publish_executed(self, &call.name, false, elapsed.as_millis());
                        (format!("Error: {e}"), false)
                    }
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool task failed");
                        (format!("Error: {e}"), false)
                    }
                };
                (self.record_step(query, call, turn, output, success), success)
            })
            .collect();
        Some(steps)
    }

    /// Build the history step for one executed call, starting a summary if
    /// the result is large.
    fn record_step(
        &self,
        query: &str,
        call: ToolCallRequest,
        turn: usize,
        output: String,
        success: bool,
    ) -> ToolCall {
        let mut step = ToolCall::new(call, turn);
        let params = step.param_info();
        match self
            .summarizer
            .maybe_summarize(query, &step.request, &params, &output)
        {
            Some(pending) => {
                step.set_result(output);
                step.attach_summary(pending);
            }
            None if success && step.request.name == SYMBOL_SEARCH => {
                let symbols: Vec<String> = output
                    .split(", ")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                step.set_result(compress_symbols("Relevant symbols", &symbols));
            }
            None => {
                step.set_result(output);
            }
        }
        step
    }
}

fn publish_executed(agent: &AgentLoop, tool_name: &str, success: bool, duration_ms: u128) {
    agent.gateway.events().publish(DomainEvent::ToolExecuted {
        tool_name: tool_name.to_string(),
        success,
        duration_ms: u64::try_from(duration_ms).unwrap_or(u64::MAX),
        timestamp: Utc::now(),
    });
}
