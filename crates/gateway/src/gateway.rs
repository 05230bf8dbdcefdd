//! The request gateway: one unit of work against a model backend.
//!
//! [`RequestGateway::send`] hides everything that makes backends unreliable
//! or heterogeneous from the agent loop:
//!
//! - transient failures and blank completions are retried with capped
//!   exponential backoff, sleeping in short ticks so cancellation is prompt
//! - a backend that ignores `tool_choice = required` is told again, up to the
//!   same attempt ceiling
//! - backends without native function calling get the tools described in
//!   text and answer with a JSON envelope that is decoded into tool calls
//! - every exchange is written to the audit log
//!
//! Expected failures come back as [`GatewayResult`] values.

use sleuth_config::AppConfig;
use sleuth_core::error::ProviderError;
use sleuth_core::event::{DomainEvent, EventBus};
use sleuth_core::message::Message;
use sleuth_core::provider::{
    ModelProfile, Provider, ProviderRequest, ResponseFormat, ToolChoice, Usage,
};
use sleuth_core::tool::ToolSpecification;
use sleuth_core::CancelFlag;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::AuditLogger;
use crate::backoff::{sleep_with_cancel, RetryPolicy};
use crate::emulation;
use crate::result::{GatewayError, GatewayResponse, GatewayResult};
use crate::stream::{self, StreamOutcome, TokenCallback};

/// Appended when a backend answers without calling a tool it was required to call.
pub const REINFORCEMENT: &str = "At least one tool execution request is REQUIRED. Please call a tool.";

enum Attempt {
    Response(GatewayResponse),
    Cancelled,
    Failed(ProviderError),
}

/// Cloneable handle; clones share the provider, audit log, event bus and cancel flag.
#[derive(Clone)]
pub struct RequestGateway {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    audit: Arc<AuditLogger>,
    events: Arc<EventBus>,
    cancel: CancelFlag,
    on_token: Option<TokenCallback>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("provider", &self.provider.name())
            .field("policy", &self.policy)
            .field("echo", &self.on_token.is_some())
            .finish()
    }
}

impl RequestGateway {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            policy: RetryPolicy::default(),
            audit: Arc::new(AuditLogger::disabled()),
            events: Arc::new(EventBus::default()),
            cancel: CancelFlag::new(),
            on_token: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    /// A gateway with retry policy, sampling and audit log taken from `config`.
    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let audit = match config.gateway.audit_path() {
            Some(path) => {
                debug!(path = %path.display(), "Auditing model exchanges");
                AuditLogger::to_file(path)
            }
            None => AuditLogger::disabled(),
        };
        Self::new(provider)
            .with_policy(RetryPolicy::from_config(&config.gateway))
            .with_audit(Arc::new(audit))
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Echo completion text as it streams in.
    pub fn with_token_callback(mut self, callback: TokenCallback) -> Self {
        self.on_token = Some(callback);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// A clone that does not echo tokens, for background work.
    pub fn without_echo(&self) -> Self {
        let mut quiet = self.clone();
        quiet.on_token = None;
        quiet
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `messages` to `model`, offering `tools` under `choice`.
    pub async fn send(
        &self,
        model: &ModelProfile,
        messages: &[Message],
        tools: &[ToolSpecification],
        choice: ToolChoice,
    ) -> GatewayResult {
        if self.cancel.is_cancelled() {
            return GatewayResult::Cancelled;
        }

        let emulate = !tools.is_empty() && !model.native_tools;
        let mut conversation = if emulate || tools.is_empty() {
            emulation::fold_tool_history(messages)
        } else {
            messages.to_vec()
        };
        if emulate && !emulation::instructions_present(&conversation) {
            emulation::inject_instructions(&mut conversation, tools);
        }
        let enforce = choice == ToolChoice::Required && !tools.is_empty();

        let mut usage = Usage::default();
        let mut last_toolless: Option<GatewayResponse> = None;
        for enforcement in 1..=self.policy.max_attempts {
            let request = self.build_request(model, conversation.clone(), tools, choice, emulate);
            let (mut response, envelope_error) = match self.send_with_retry(request, !emulate).await {
                GatewayResult::Response(response) if emulate => decode_emulated(response),
                GatewayResult::Response(response) => (response, None),
                other => return other,
            };
            if let Some(u) = &response.usage {
                usage.accumulate(u);
            }

            if !enforce || !response.tool_calls.is_empty() {
                response.usage = Some(usage);
                return GatewayResult::Response(response);
            }

            info!(
                attempt = enforcement,
                max_attempts = self.policy.max_attempts,
                "Backend ignored required tool choice; reinforcing"
            );
            self.events.publish(DomainEvent::system("Enforcing tool selection"));
            if !response.text.trim().is_empty() {
                conversation.push(Message::assistant(response.text.clone()));
            }
            let reinforcement = if emulate {
                emulation::retry_feedback(envelope_error.as_ref())
            } else {
                REINFORCEMENT.to_string()
            };
            conversation.push(Message::user(reinforcement));
            last_toolless = Some(response);
        }

        match last_toolless {
            Some(mut response) => {
                warn!("Backend never produced a tool call; returning its last reply");
                response.usage = Some(usage);
                GatewayResult::Response(response)
            }
            None => GatewayResult::Error(GatewayError::Exhausted {
                attempts: self.policy.max_attempts,
                last: None,
            }),
        }
    }

    fn build_request(
        &self,
        model: &ModelProfile,
        messages: Vec<Message>,
        tools: &[ToolSpecification],
        choice: ToolChoice,
        emulate: bool,
    ) -> ProviderRequest {
        let mut request = ProviderRequest::new(model.name.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.stream = true;
        if emulate {
            request.response_format = ResponseFormat::JsonObject;
        } else if !tools.is_empty() {
            request.tools = tools.to_vec();
            request.tool_choice = choice;
            request.parallel_tool_calls = model.parallel_tool_calls;
        }
        request
    }

    /// Retry one request until it produces a non-blank response.
    async fn send_with_retry(&self, request: ProviderRequest, echo: bool) -> GatewayResult {
        let max_attempts = self.policy.max_attempts;
        let mut last_error: Option<ProviderError> = None;

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                self.audit.cancelled();
                return GatewayResult::Cancelled;
            }

            self.audit.request(&request);
            let reason = match self.attempt_once(request.clone(), echo).await {
                Attempt::Response(response) if !response.is_blank() => {
                    self.audit.response(&response);
                    if let Some(usage) = &response.usage {
                        self.audit.cache_usage(usage);
                    }
                    self.events.publish(DomainEvent::ResponseGenerated {
                        model: request.model.clone(),
                        tokens_used: response.usage.as_ref().map_or(0, |u| u.total_tokens),
                        timestamp: chrono::Utc::now(),
                    });
                    return GatewayResult::Response(response);
                }
                Attempt::Response(_) => {
                    self.audit.error(&"Empty response");
                    "empty response".to_string()
                }
                Attempt::Cancelled => {
                    self.audit.cancelled();
                    return GatewayResult::Cancelled;
                }
                Attempt::Failed(e) => {
                    self.audit.error(&e);
                    if !e.is_retryable() {
                        warn!(error = %e, "Request rejected; not retrying");
                        return GatewayResult::Error(GatewayError::NonRetryable(e));
                    }
                    let reason = e.to_string();
                    last_error = Some(e);
                    reason
                }
            };

            if attempt == max_attempts {
                break;
            }
            let backoff = self.policy.backoff_for(attempt);
            warn!(
                attempt,
                max_attempts,
                backoff_secs = backoff.as_secs(),
                reason = %reason,
                "Model request failed; retrying"
            );
            self.events.publish(DomainEvent::RetryScheduled {
                attempt,
                max_attempts,
                backoff_secs: backoff.as_secs(),
                reason,
                timestamp: chrono::Utc::now(),
            });
            if !sleep_with_cancel(backoff, self.policy.tick, &self.cancel).await {
                self.audit.cancelled();
                return GatewayResult::Cancelled;
            }
        }

        GatewayResult::Error(GatewayError::Exhausted {
            attempts: max_attempts,
            last: last_error,
        })
    }

    async fn attempt_once(&self, request: ProviderRequest, echo: bool) -> Attempt {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Attempt::Cancelled,
            opened = self.provider.stream(request) => opened,
        };
        let rx = match opened {
            Ok(rx) => rx,
            Err(e) => return Attempt::Failed(e),
        };
        let on_token = if echo { self.on_token.as_ref() } else { None };
        match stream::collect(rx, &self.cancel, on_token).await {
            StreamOutcome::Completed(c) => Attempt::Response(GatewayResponse {
                text: c.text,
                tool_calls: c.tool_calls,
                usage: c.usage,
            }),
            StreamOutcome::Cancelled => Attempt::Cancelled,
            StreamOutcome::Failed(e) => Attempt::Failed(e),
        }
    }
}

/// Turn a JSON-envelope completion into tool calls, or keep the raw text
/// along with the reason it could not be decoded.
fn decode_emulated(response: GatewayResponse) -> (GatewayResponse, Option<emulation::EnvelopeError>) {
    match emulation::decode_envelope(&response.text) {
        Ok(calls) => {
            let (tool_calls, reasoning) = emulation::split_reasoning(calls);
            let decoded = GatewayResponse {
                text: reasoning,
                tool_calls,
                usage: response.usage,
            };
            (decoded, None)
        }
        Err(e) => {
            warn!(error = %e, "Could not decode tool-call envelope; using raw text");
            (response, Some(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sleuth_core::provider::ProviderResponse;
    use sleuth_core::tool::{ParamType, ToolCallRequest};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    type Scripted = Result<ProviderResponse, ProviderError>;

    /// Replays scripted responses and records every request.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, i: usize) -> ProviderRequest {
            self.requests.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Network("script exhausted".into())))
        }
    }

    /// Never answers.
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            std::future::pending().await
        }
    }

    fn text(content: &str) -> Scripted {
        Ok(ProviderResponse {
            message: Message::assistant(content),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
                cached_tokens: None,
            }),
            model: "m".into(),
        })
    }

    fn calls(calls: Vec<ToolCallRequest>) -> Scripted {
        Ok(ProviderResponse {
            message: Message::assistant_with_calls("", calls),
            usage: None,
            model: "m".into(),
        })
    }

    fn transient() -> Scripted {
        Err(ProviderError::Network("connection reset".into()))
    }

    fn tools() -> Vec<ToolSpecification> {
        vec![
            ToolSpecification::new("searchSymbols", "Find symbols")
                .param("patterns", ParamType::string_array(), "Patterns"),
        ]
    }

    fn search_call() -> ToolCallRequest {
        ToolCallRequest::new("searchSymbols", serde_json::json!({"patterns": ["Foo"]}))
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_then_success() {
        let provider = ScriptedProvider::new(vec![transient(), transient(), transient(), text("found")]);
        let gateway = RequestGateway::new(provider.clone());

        let start = tokio::time::Instant::now();
        let result = gateway
            .send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto)
            .await;
        let elapsed = start.elapsed();

        assert_eq!(result.response().map(|r| r.text.as_str()), Some("found"));
        assert_eq!(provider.calls(), 4);
        assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_an_error_value() {
        let provider = ScriptedProvider::new(vec![]);
        let gateway = RequestGateway::new(provider.clone()).with_policy(RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        });
        let result = gateway
            .send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto)
            .await;
        match result {
            GatewayResult::Error(GatewayError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::AuthenticationFailed(
            "bad key".into(),
        ))]);
        let gateway = RequestGateway::new(provider.clone());
        let result = gateway
            .send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto)
            .await;
        assert!(matches!(
            result,
            GatewayResult::Error(GatewayError::NonRetryable(ProviderError::AuthenticationFailed(_)))
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_response_is_retried() {
        let provider = ScriptedProvider::new(vec![text("   "), text("ok")]);
        let gateway = RequestGateway::new(provider.clone());
        let result = gateway
            .send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto)
            .await;
        assert_eq!(result.into_text().as_deref(), Some("ok"));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn cancel_during_call_returns_cancelled() {
        let gateway = RequestGateway::new(Arc::new(HangingProvider));
        let cancel = gateway.cancel_flag().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            gateway.send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto),
        )
        .await
        .expect("gateway did not observe cancellation");
        assert!(result.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retries() {
        let provider = ScriptedProvider::new(vec![transient(), transient(), text("late")]);
        let gateway = RequestGateway::new(provider.clone());
        let cancel = gateway.cancel_flag().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });
        let result = gateway
            .send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto)
            .await;
        assert!(result.is_cancelled());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn required_tool_choice_is_reinforced() {
        let provider = ScriptedProvider::new(vec![text("Let me think about it"), calls(vec![search_call()])]);
        let gateway = RequestGateway::new(provider.clone());
        let result = gateway
            .send(
                &ModelProfile::native("m"),
                &[Message::user("q")],
                &tools(),
                ToolChoice::Required,
            )
            .await;

        let response = result.response().unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(provider.calls(), 2);

        let second = provider.request(1);
        assert_eq!(second.tool_choice, ToolChoice::Required);
        let n = second.messages.len();
        assert_eq!(second.messages[n - 2].content, "Let me think about it");
        assert_eq!(second.messages[n - 1].content, REINFORCEMENT);
    }

    #[tokio::test]
    async fn reinforcement_gives_up_with_last_reply() {
        let provider = ScriptedProvider::new(vec![text("no"), text("still no")]);
        let gateway = RequestGateway::new(provider.clone()).with_policy(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });
        let result = gateway
            .send(
                &ModelProfile::native("m"),
                &[Message::user("q")],
                &tools(),
                ToolChoice::Required,
            )
            .await;
        let response = result.response().unwrap();
        assert_eq!(response.text, "still no");
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 24);
    }

    #[tokio::test]
    async fn emulated_backend_gets_envelope_protocol() {
        let provider = ScriptedProvider::new(vec![text(
            r#"{"tool_calls":[{"name":"think","arguments":{"reasoning":"look for Foo"}},{"name":"searchSymbols","arguments":{"patterns":["Foo"]}}]}"#,
        )]);
        let gateway = RequestGateway::new(provider.clone());
        let result = gateway
            .send(
                &ModelProfile::emulated("r1"),
                &[Message::system("sys"), Message::user("where is Foo")],
                &tools(),
                ToolChoice::Required,
            )
            .await;

        let response = result.response().unwrap();
        assert_eq!(response.text, "look for Foo");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "searchSymbols");

        let sent = provider.request(0);
        assert!(sent.tools.is_empty());
        assert_eq!(sent.response_format, ResponseFormat::JsonObject);
        assert!(sent.messages.last().unwrap().content.contains("1 available tools:"));
    }

    #[tokio::test]
    async fn malformed_envelope_falls_back_to_raw_text() {
        let provider = ScriptedProvider::new(vec![text("The answer is in Foo.java")]);
        let gateway = RequestGateway::new(provider.clone());
        let result = gateway
            .send(
                &ModelProfile::emulated("r1"),
                &[Message::user("where is Foo")],
                &tools(),
                ToolChoice::Auto,
            )
            .await;
        let response = result.response().unwrap();
        assert_eq!(response.text, "The answer is in Foo.java");
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn emulated_reinforcement_explains_bad_envelope() {
        let provider = ScriptedProvider::new(vec![
            text(r#"{"calls": []}"#),
            text(r#"{"tool_calls":[{"name":"searchSymbols","arguments":{"patterns":["Foo"]}}]}"#),
        ]);
        let gateway = RequestGateway::new(provider.clone());
        let result = gateway
            .send(
                &ModelProfile::emulated("r1"),
                &[Message::user("where is Foo")],
                &tools(),
                ToolChoice::Required,
            )
            .await;

        assert_eq!(result.response().unwrap().tool_calls.len(), 1);
        let second = provider.request(1);
        let n = second.messages.len();
        assert_eq!(second.messages[n - 2].content, r#"{"calls": []}"#);
        let feedback = &second.messages[n - 1].content;
        assert!(feedback.starts_with(
            "Your previous response was invalid or did not contain tool_calls: response has no `tool_calls` array"
        ));
        assert_ne!(feedback.as_str(), REINFORCEMENT);
    }

    #[tokio::test]
    async fn tokens_are_echoed_unless_quiet() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let provider = ScriptedProvider::new(vec![text("hello"), text("quiet")]);
        let gateway = RequestGateway::new(provider)
            .with_token_callback(Arc::new(move |t: &str| sink.lock().unwrap().push_str(t)));

        gateway
            .send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto)
            .await;
        gateway
            .without_echo()
            .send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto)
            .await;
        assert_eq!(*seen.lock().unwrap(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn audit_log_records_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm.log");
        let provider = ScriptedProvider::new(vec![transient(), text("found it")]);
        let gateway = RequestGateway::new(provider).with_audit(Arc::new(AuditLogger::to_file(&path)));

        gateway
            .send(&ModelProfile::native("m"), &[Message::user("where")], &[], ToolChoice::Auto)
            .await;

        let log = std::fs::read_to_string(&path).unwrap();
        let headers: Vec<&str> = log
            .lines()
            .filter(|l| l.starts_with("# "))
            .map(|l| l.split(" at ").next().unwrap())
            .collect();
        assert_eq!(headers, vec!["# Request", "# Error", "# Request", "# Response"]);
        assert!(log.contains("connection reset"));
        assert!(log.contains("found it"));
    }

    #[tokio::test]
    async fn completion_event_is_published() {
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let provider = ScriptedProvider::new(vec![text("ok")]);
        let gateway = RequestGateway::new(provider).with_events(events);
        gateway
            .send(&ModelProfile::native("m"), &[Message::user("q")], &[], ToolChoice::Auto)
            .await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::ResponseGenerated { tokens_used: 12, .. }
        ));
    }
}
