//! Action history: the loop's working memory.

use sleuth_core::tool::ToolCallRequest;
use sleuth_core::CancelFlag;

use crate::summarize::PendingSummary;
use crate::token::estimate_tokens;

/// One executed step.
///
/// `result` is set exactly once. `learnings` is set at most once, and only
/// after `result`.
#[derive(Debug)]
pub struct ToolCall {
    pub request: ToolCallRequest,
    /// Decision turn that produced this step (1-based)
    pub turn: usize,
    result: Option<String>,
    learnings: Option<String>,
    pending: Option<PendingSummary>,
}

impl ToolCall {
    pub fn new(request: ToolCallRequest, turn: usize) -> Self {
        Self {
            request,
            turn,
            result: None,
            learnings: None,
            pending: None,
        }
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn learnings(&self) -> Option<&str> {
        self.learnings.as_deref()
    }

    /// Returns `false` (and changes nothing) if a result is already set.
    pub fn set_result(&mut self, result: impl Into<String>) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(result.into());
        true
    }

    /// Returns `false` if there is no result yet or learnings are already set.
    pub fn set_learnings(&mut self, learnings: impl Into<String>) -> bool {
        if self.result.is_none() || self.learnings.is_some() {
            return false;
        }
        self.learnings = Some(learnings.into());
        true
    }

    pub fn attach_summary(&mut self, pending: PendingSummary) {
        self.pending = Some(pending);
    }

    pub fn has_pending_summary(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for this step's summary, if any, and store it as learnings.
    pub async fn settle_summary(&mut self, cancel: &CancelFlag) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let raw = self.result.clone().unwrap_or_default();
        let learned = pending.settle_or_fallback(&raw, cancel).await;
        self.set_learnings(learned);
    }

    /// The step's parameters as attributes, e.g. `patterns=[".*Foo.*"]`.
    pub fn param_info(&self) -> String {
        param_info(&self.request)
    }

    /// Render as a `<step>` element.
    pub fn format(&self, sequence: usize) -> String {
        let body = match (&self.learnings, &self.result) {
            (Some(learnings), _) => format!("<learnings>\n{learnings}\n</learnings>"),
            (None, Some(result)) => format!("<result>\n{result}\n</result>"),
            (None, None) => "<result>\n</result>".to_string(),
        };
        let params = self.param_info();
        let attrs = if params.is_empty() {
            String::new()
        } else {
            format!(" {params}")
        };
        format!(
            "<step sequence=\"{sequence}\" tool=\"{}\"{attrs}>\n{body}\n</step>\n",
            self.request.name
        )
    }
}

/// Parameters of `call` other than `reasoning`, as `name=json` pairs.
pub fn param_info(call: &ToolCallRequest) -> String {
    let Some(args) = call.arguments.as_object() else {
        return String::new();
    };
    args.iter()
        .filter(|(k, v)| *k != "reasoning" && !v.is_null())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append-only sequence of executed steps.
#[derive(Debug, Default)]
pub struct ActionHistory {
    steps: Vec<ToolCall>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[ToolCall] {
        &self.steps
    }

    pub fn extend(&mut self, steps: impl IntoIterator<Item = ToolCall>) {
        self.steps.extend(steps);
    }

    pub fn latest_turn(&self) -> usize {
        self.steps.last().map_or(0, |s| s.turn)
    }

    pub fn has_called(&self, tool: &str) -> bool {
        self.steps.iter().any(|s| s.request.name == tool)
    }

    /// Join summaries of every turn before the most recent one.
    ///
    /// The most recent turn's summaries keep running while the next
    /// decision is made.
    pub async fn settle_earlier_summaries(&mut self, cancel: &CancelFlag) {
        let latest = self.latest_turn();
        for step in self
            .steps
            .iter_mut()
            .filter(|s| s.turn < latest && s.has_pending_summary())
        {
            step.settle_summary(cancel).await;
        }
    }

    /// The `<action-history>` block, or nothing when empty.
    pub fn render(&self) -> String {
        if self.steps.is_empty() {
            return String::new();
        }
        let mut out = String::from("<action-history>\n");
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&step.format(i + 1));
        }
        out.push_str("</action-history>\n");
        out
    }

    /// Approximate size of the rendered history.
    pub fn approx_tokens(&self) -> usize {
        estimate_tokens(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn step(name: &str, args: Value, turn: usize) -> ToolCall {
        ToolCall::new(ToolCallRequest::new(name, args), turn)
    }

    #[test]
    fn result_is_set_once() {
        let mut s = step("getUsages", json!({"symbols": ["a.B"]}), 1);
        assert!(s.set_result("first"));
        assert!(!s.set_result("second"));
        assert_eq!(s.result(), Some("first"));
    }

    #[test]
    fn learnings_require_result_and_are_set_once() {
        let mut s = step("getUsages", json!({}), 1);
        assert!(!s.set_learnings("too early"));
        s.set_result("raw");
        assert!(s.set_learnings("short"));
        assert!(!s.set_learnings("again"));
        assert_eq!(s.learnings(), Some("short"));
    }

    #[test]
    fn params_skip_reasoning() {
        let s = step(
            "searchSymbols",
            json!({"patterns": [".*Foo.*"], "reasoning": "why"}),
            1,
        );
        assert_eq!(s.param_info(), r#"patterns=[".*Foo.*"]"#);
    }

    #[test]
    fn step_format_prefers_learnings() {
        let mut s = step("getClassSources", json!({"classNames": ["a.Foo"]}), 1);
        s.set_result("class Foo {}");
        assert_eq!(
            s.format(3),
            "<step sequence=\"3\" tool=\"getClassSources\" classNames=[\"a.Foo\"]>\n<result>\nclass Foo {}\n</result>\n</step>\n"
        );
        s.set_learnings("Foo is empty");
        assert!(s.format(3).contains("<learnings>\nFoo is empty\n</learnings>"));
        assert!(!s.format(3).contains("<result>"));
    }

    #[test]
    fn history_render_and_size() {
        let mut history = ActionHistory::new();
        assert_eq!(history.render(), "");
        assert_eq!(history.approx_tokens(), 0);

        let mut s = step("searchSymbols", json!({"patterns": ["Foo"]}), 1);
        s.set_result("a.Foo");
        history.extend([s]);
        let rendered = history.render();
        assert!(rendered.starts_with("<action-history>\n<step sequence=\"1\""));
        assert!(rendered.ends_with("</action-history>\n"));
        assert!(history.approx_tokens() > 0);
        assert!(history.has_called("searchSymbols"));
        assert_eq!(history.latest_turn(), 1);
    }

    #[tokio::test]
    async fn only_earlier_turns_are_joined() {
        let mut history = ActionHistory::new();
        let mut first = step("getUsages", json!({"symbols": ["a"]}), 1);
        first.set_result("raw one");
        first.attach_summary(PendingSummary::spawn(async { Some("learned one".to_string()) }));
        let mut second = step("getUsages", json!({"symbols": ["b"]}), 2);
        second.set_result("raw two");
        second.attach_summary(PendingSummary::spawn(async { Some("learned two".to_string()) }));
        history.extend([first, second]);

        history.settle_earlier_summaries(&CancelFlag::new()).await;
        assert_eq!(history.steps()[0].learnings(), Some("learned one"));
        assert_eq!(history.steps()[1].learnings(), None);
        assert!(history.steps()[1].has_pending_summary());
    }
}
