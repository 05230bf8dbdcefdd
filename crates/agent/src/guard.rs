//! Duplicate detection for tool calls.
//!
//! Every executed call leaves behind signatures of the form
//! `tool:param=value`, one per list element for list-valued parameters. A
//! proposed call sharing any signature with an executed one is a repeat and
//! is swapped for a neighborhood exploration call seeded with every
//! identifier seen so far. If every signature of that substitute has already
//! been executed, the original goes through once and the session is pushed
//! into beast mode.

use serde_json::Value;
use sleuth_core::tool::ToolCallRequest;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::finalize;

/// Tool used as the substitute for a repeated call.
pub const FALLBACK_TOOL: &str = "getRelatedClasses";

/// Parameter excluded from signatures: it is commentary, not a search input.
const REASONING_PARAM: &str = "reasoning";

/// Canonical signatures of `call`.
pub fn signatures(call: &ToolCallRequest) -> Vec<String> {
    let Some(args) = call.arguments.as_object() else {
        return vec![format!("{}:", call.name)];
    };

    let mut out = Vec::new();
    for (param, value) in args.iter().filter(|(k, _)| *k != REASONING_PARAM) {
        match value {
            Value::Array(items) if items.is_empty() => {
                out.push(format!("{}:{param}=empty", call.name));
            }
            Value::Array(items) => {
                out.extend(items.iter().map(|item| format!("{}:{param}={}", call.name, scalar(item))));
            }
            other => out.push(format!("{}:{param}={}", call.name, scalar(other))),
        }
    }
    if out.is_empty() {
        out.push(format!("{}:", call.name));
    }
    out
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Identifiers a call refers to, reduced to their owning class where needed.
fn referenced_identifiers(call: &ToolCallRequest) -> Vec<String> {
    match call.name.as_str() {
        "getClassSkeletons" | "getClassSources" | "getRelatedClasses" => call.arg_strings("classNames"),
        "getMethodSources" => call
            .arg_strings("methodNames")
            .into_iter()
            .filter_map(|m| owner_of(&m).map(str::to_string))
            .collect(),
        "getUsages" => call
            .arg_strings("symbols")
            .into_iter()
            .map(|s| owner_of(&s).map_or(s.clone(), str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn owner_of(symbol: &str) -> Option<&str> {
    symbol.rfind('.').filter(|&i| i > 0).map(|i| &symbol[..i])
}

/// Per-session duplicate detector.
#[derive(Debug, Default)]
pub struct LoopGuard {
    signatures: HashSet<String>,
    tracked: BTreeSet<String>,
    beast_mode: bool,
    fallback_available: bool,
}

impl LoopGuard {
    /// `fallback_available` says whether [`FALLBACK_TOOL`] can be executed;
    /// without it repeats pass through untouched.
    pub fn new(fallback_available: bool) -> Self {
        Self {
            fallback_available,
            ..Self::default()
        }
    }

    /// Set once a forged substitute would itself repeat. Never cleared.
    pub fn beast_mode(&self) -> bool {
        self.beast_mode
    }

    pub fn tracked(&self) -> &BTreeSet<String> {
        &self.tracked
    }

    fn seen_any(&self, call: &ToolCallRequest) -> bool {
        signatures(call).iter().any(|s| self.signatures.contains(s))
    }

    fn seen_all(&self, call: &ToolCallRequest) -> bool {
        signatures(call).iter().all(|s| self.signatures.contains(s))
    }

    /// The call to execute in place of `proposed`.
    pub fn sanitize(&mut self, proposed: ToolCallRequest) -> ToolCallRequest {
        if !self.fallback_available || finalize::is_finalize(&proposed.name) {
            return proposed;
        }
        if !self.seen_any(&proposed) {
            return proposed;
        }

        let forged = ToolCallRequest::new(
            FALLBACK_TOOL,
            serde_json::json!({ "classNames": self.tracked.iter().collect::<Vec<_>>() }),
        );
        if self.seen_all(&forged) {
            debug!(tool = %proposed.name, "Substitute would repeat too; engaging beast mode");
            self.beast_mode = true;
            return proposed;
        }
        debug!(
            tool = %proposed.name,
            tracked = self.tracked.len(),
            "Repeated tool call replaced with {FALLBACK_TOOL}"
        );
        forged
    }

    /// Remember an executed call.
    pub fn record(&mut self, call: &ToolCallRequest) {
        if finalize::is_finalize(&call.name) {
            return;
        }
        self.signatures.extend(signatures(call));
        self.tracked.extend(referenced_identifiers(call));
    }

    /// Sanitize and record in one step.
    pub fn admit(&mut self, proposed: ToolCallRequest) -> ToolCallRequest {
        let call = self.sanitize(proposed);
        self.record(&call);
        call
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new(name, args)
    }

    #[test]
    fn list_parameters_expand() {
        let sigs = signatures(&call(
            "searchSymbols",
            json!({"patterns": [".*Foo.*", ".*Bar.*"], "reasoning": "x"}),
        ));
        assert_eq!(sigs, vec!["searchSymbols:patterns=.*Foo.*", "searchSymbols:patterns=.*Bar.*"]);
        assert_eq!(
            signatures(&call("getUsages", json!({"symbols": []}))),
            vec!["getUsages:symbols=empty"]
        );
        assert_eq!(signatures(&call("ping", json!({}))), vec!["ping:"]);
    }

    #[test]
    fn repeat_is_replaced_by_related_classes() {
        let mut guard = LoopGuard::new(true);
        let first = guard.admit(call("getUsages", json!({"symbols": ["a.B.m"], "reasoning": "r1"})));
        assert_eq!(first.name, "getUsages");

        let second = guard.admit(call("getUsages", json!({"symbols": ["a.B.m"], "reasoning": "r2"})));
        assert_eq!(second.name, FALLBACK_TOOL);
        assert_eq!(second.arg_strings("classNames"), vec!["a.B"]);
        assert!(!guard.beast_mode());
    }

    #[test]
    fn detection_is_order_independent() {
        let mut guard = LoopGuard::new(true);
        guard.admit(call("searchSymbols", json!({"patterns": ["b", "a"]})));
        let repeat = guard.sanitize(call("searchSymbols", json!({"patterns": ["a"]})));
        assert_eq!(repeat.name, FALLBACK_TOOL);

        let mut guard = LoopGuard::new(true);
        guard.admit(call("searchSymbols", json!({"patterns": ["a"]})));
        let repeat = guard.sanitize(call("searchSymbols", json!({"patterns": ["b", "a"]})));
        assert_eq!(repeat.name, FALLBACK_TOOL);
    }

    #[test]
    fn repeated_substitute_engages_beast_mode_and_keeps_original() {
        let mut guard = LoopGuard::new(true);
        guard.admit(call("getClassSources", json!({"classNames": ["a.Foo"]})));
        // First repeat forges getRelatedClasses([a.Foo])
        let forged = guard.admit(call("getClassSources", json!({"classNames": ["a.Foo"]})));
        assert_eq!(forged.name, FALLBACK_TOOL);

        let original = call("getClassSources", json!({"classNames": ["a.Foo"]}));
        let passed = guard.admit(original.clone());
        assert_eq!(passed, original);
        assert!(guard.beast_mode());
    }

    #[test]
    fn substitute_with_unexplored_class_is_still_forged() {
        let mut guard = LoopGuard::new(true);
        guard.admit(call("getClassSources", json!({"classNames": ["a.Foo"]})));
        let forged = guard.admit(call("getClassSources", json!({"classNames": ["a.Foo"]})));
        assert_eq!(forged.name, FALLBACK_TOOL);
        guard.admit(call("getClassSources", json!({"classNames": ["a.Bar"]})));

        // getRelatedClasses(a.Foo) already ran, getRelatedClasses(a.Bar) has not
        let next = guard.admit(call("getClassSources", json!({"classNames": ["a.Bar"]})));
        assert_eq!(next.name, FALLBACK_TOOL);
        assert_eq!(next.arg_strings("classNames"), vec!["a.Bar", "a.Foo"]);
        assert!(!guard.beast_mode());

        // Now both are covered
        let last = guard.admit(call("getClassSources", json!({"classNames": ["a.Bar"]})));
        assert_eq!(last.name, "getClassSources");
        assert!(guard.beast_mode());
    }

    #[test]
    fn tracked_identifiers() {
        let mut guard = LoopGuard::new(true);
        guard.record(&call("getMethodSources", json!({"methodNames": ["a.B.run", "main"]})));
        guard.record(&call("getUsages", json!({"symbols": ["a.C.f", "D"]})));
        guard.record(&call("getClassSkeletons", json!({"classNames": ["x.Y"]})));
        guard.record(&call("searchSymbols", json!({"patterns": ["ignored.Z"]})));
        let tracked: Vec<&str> = guard.tracked().iter().map(String::as_str).collect();
        assert_eq!(tracked, vec!["D", "a.B", "a.C", "x.Y"]);
    }

    #[test]
    fn finalize_and_missing_fallback_pass_through() {
        let mut guard = LoopGuard::new(true);
        let answer = call("answer", json!({"explanation": "x", "classNames": []}));
        guard.admit(answer.clone());
        assert_eq!(guard.sanitize(answer.clone()), answer);

        let mut bare = LoopGuard::new(false);
        let usage = call("searchSubstrings", json!({"patterns": ["foo"]}));
        bare.admit(usage.clone());
        assert_eq!(bare.sanitize(usage.clone()), usage);
    }
}
