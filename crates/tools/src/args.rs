//! Argument helpers shared by the text tools.

use regex::Regex;
use serde_json::Value;
use sleuth_core::error::ToolError;

pub const REASONING_DESCRIPTION: &str =
    "Explanation of what you're looking for in this request so the summarizer can accurately capture it.";

/// A list-of-strings argument. A bare string counts as a one-element list.
pub fn string_list(arguments: &Value, key: &str) -> Vec<String> {
    match arguments.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

pub fn reasoning(arguments: &Value) -> &str {
    arguments
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Compile every non-blank pattern; any invalid pattern fails the call.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ToolError> {
    patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            Regex::new(p).map_err(|e| ToolError::InvalidArguments(format!("Invalid pattern '{p}': {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_lists() {
        let args = json!({"patterns": ["a", 3, "b"], "single": "x"});
        assert_eq!(string_list(&args, "patterns"), vec!["a", "b"]);
        assert_eq!(string_list(&args, "single"), vec!["x"]);
        assert!(string_list(&args, "missing").is_empty());
    }

    #[test]
    fn blank_patterns_are_dropped_and_bad_ones_rejected() {
        let ok = compile_patterns(&["".into(), "fo+".into()]).unwrap();
        assert_eq!(ok.len(), 1);
        assert!(compile_patterns(&["(unclosed".into()]).is_err());
    }
}
