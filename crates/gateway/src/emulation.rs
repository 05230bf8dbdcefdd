//! Tool-call emulation for backends without native function calling.
//!
//! The model is told about the tools in plain text and asked to answer with
//! a JSON envelope:
//!
//! ```json
//! {"version": 1, "tool_calls": [{"name": "searchSymbols", "arguments": {"patterns": ["Foo"]}}]}
//! ```
//!
//! `version` is optional. The decoder is lenient about surrounding markdown
//! fences, bare arrays, and arguments delivered as a JSON-encoded string,
//! but anything else that does not fit the schema is an [`EnvelopeError`].

use serde_json::Value;
use sleuth_core::message::{Message, Role};
use sleuth_core::tool::{ToolCallRequest, ToolSpecification};
use thiserror::Error;

/// The only envelope version this decoder understands.
pub const ENVELOPE_VERSION: u64 = 1;

/// Name of the pseudo-tool whose calls carry reasoning instead of work.
pub const THINK_TOOL: &str = "think";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("response has no `tool_calls` array")]
    MissingToolCalls,

    #[error("tool call {index} is missing `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("tool call {index} has arguments that are not a JSON object")]
    NonObjectArguments { index: usize },

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(String),
}

const FORMAT_DESCRIPTION: &str = r#"Respond with a single JSON object containing a `tool_calls` array. Each entry in the array represents one invocation of a tool.
No additional keys or text are allowed outside of that JSON object.
Each tool call must have a `name` that matches one of the available tools, and an `arguments` object containing valid parameters as required by that tool.

Here is the format visualized, where $foo indicates that you will make appropriate substitutions for the given tool call
{
  "tool_calls": [
    {
      "name": "$tool_name1",
      "arguments": {
        "$arg1": "$value1",
        "$arg2": "$value2",
        ...
      }
    },
    {
      "name": "$tool_name2",
      "arguments": {
        "$arg3": "$value3",
        ...
      }
    }
  ]
}"#;

/// Plain-text description of `tools` and of the envelope format.
pub fn emulation_instructions(tools: &[ToolSpecification]) -> String {
    let described: Vec<String> = tools
        .iter()
        .map(|tool| {
            let params = if tool.parameters.is_empty() {
                "(No parameters)".to_string()
            } else {
                tool.parameters
                    .iter()
                    .map(|p| {
                        format!(
                            "<parameter name=\"{}\" type=\"{}\" required=\"{}\">\n{}\n</parameter>",
                            p.name,
                            p.kind.label(),
                            p.required,
                            p.description
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            format!(
                "<tool name=\"{}\">\n{}\n{}\n</tool>",
                tool.name, tool.description, params
            )
        })
        .collect();

    format!(
        "{} available tools:\n{}\n\n{}\n\nInclude all the tool calls necessary to satisfy the request in a single object!\n",
        tools.len(),
        described.join("\n"),
        FORMAT_DESCRIPTION
    )
}

/// Reinforcement for an emulated reply that produced no tool calls, naming
/// what was wrong with it and repeating the expected format.
pub fn retry_feedback(error: Option<&EnvelopeError>) -> String {
    let reason = error.map_or_else(|| "no tool calls were requested".to_string(), ToString::to_string);
    format!(
        "Your previous response was invalid or did not contain tool_calls: {reason}\n\n{FORMAT_DESCRIPTION}"
    )
}

/// Whether an earlier turn already carries the instruction block.
pub fn instructions_present(messages: &[Message]) -> bool {
    messages
        .iter()
        .any(|m| m.content.contains("available tools:") && m.content.contains("tool_calls"))
}

/// Append the instruction block to the last message.
pub fn inject_instructions(messages: &mut Vec<Message>, tools: &[ToolSpecification]) {
    let instructions = emulation_instructions(tools);
    match messages.pop() {
        Some(last) => messages.push(Message::user(format!("{}\n\n{}", last.content, instructions))),
        None => messages.push(Message::user(instructions)),
    }
}

/// Rewrite a conversation so that it contains no tool-protocol messages.
///
/// Runs of tool results are folded into the next user message as
/// `<toolcall>` blocks (or into a new user message if nothing follows), and
/// assistant tool calls are spelled out as envelope JSON.
pub fn fold_tool_history(messages: &[Message]) -> Vec<Message> {
    let mut folded = Vec::with_capacity(messages.len());
    let mut pending: Vec<String> = Vec::new();

    for message in messages {
        match message.role {
            Role::Tool => pending.push(format!(
                "<toolcall id=\"{}\" name=\"{}\">\n{}\n</toolcall>",
                message.tool_call_id.as_deref().unwrap_or_default(),
                message.tool_name.as_deref().unwrap_or_default(),
                message.content
            )),
            Role::User if !pending.is_empty() => {
                let mut blocks = std::mem::take(&mut pending).join("\n\n");
                blocks.push_str("\n\n");
                blocks.push_str(&message.content);
                folded.push(Message::user(blocks));
            }
            Role::Assistant if !message.tool_calls.is_empty() => {
                flush(&mut pending, &mut folded);
                let envelope = encode_envelope(&message.tool_calls);
                let content = if message.content.trim().is_empty() {
                    envelope
                } else {
                    format!("{}\n\n{}", message.content, envelope)
                };
                folded.push(Message::assistant(content));
            }
            _ => {
                flush(&mut pending, &mut folded);
                folded.push(message.clone());
            }
        }
    }
    flush(&mut pending, &mut folded);
    folded
}

fn flush(pending: &mut Vec<String>, folded: &mut Vec<Message>) {
    if !pending.is_empty() {
        folded.push(Message::user(std::mem::take(pending).join("\n\n")));
    }
}

/// Serialize calls in the envelope format the model is asked to produce.
pub fn encode_envelope(calls: &[ToolCallRequest]) -> String {
    let entries: Vec<Value> = calls
        .iter()
        .map(|c| serde_json::json!({"name": c.name, "arguments": c.arguments}))
        .collect();
    serde_json::json!({ "tool_calls": entries }).to_string()
}

/// Parse an envelope out of a completion.
pub fn decode_envelope(raw: &str) -> Result<Vec<ToolCallRequest>, EnvelopeError> {
    let body = strip_fences(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut object) => {
            if let Some(version) = object.get("version") {
                let supported = match version {
                    Value::Number(n) => n.as_u64() == Some(ENVELOPE_VERSION),
                    Value::String(s) => s.trim() == ENVELOPE_VERSION.to_string(),
                    _ => false,
                };
                if !supported {
                    return Err(EnvelopeError::UnsupportedVersion(version.to_string()));
                }
            }
            match object.remove("tool_calls") {
                Some(Value::Array(entries)) => entries,
                _ => return Err(EnvelopeError::MissingToolCalls),
            }
        }
        _ => return Err(EnvelopeError::MissingToolCalls),
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| decode_call(index, entry))
        .collect()
}

fn decode_call(index: usize, entry: Value) -> Result<ToolCallRequest, EnvelopeError> {
    let Value::Object(mut entry) = entry else {
        return Err(EnvelopeError::MissingField { index, field: "name" });
    };
    let name = match entry.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name,
        _ => return Err(EnvelopeError::MissingField { index, field: "name" }),
    };
    let arguments = match entry.remove("arguments") {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => return Err(EnvelopeError::NonObjectArguments { index }),
        },
        Some(Value::Null) | None => {
            return Err(EnvelopeError::MissingField {
                index,
                field: "arguments",
            });
        }
        Some(_) => return Err(EnvelopeError::NonObjectArguments { index }),
    };

    let mut call = ToolCallRequest::new(name, arguments);
    call.id = format!("call_{index}");
    Ok(call)
}

/// The JSON between the first and last ``` fence, or the whole text.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let (Some(start), Some(end)) = (trimmed.find("```"), trimmed.rfind("```")) else {
        return trimmed;
    };
    if end <= start {
        return trimmed;
    }
    let inner = &trimmed[start + 3..end];
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

/// Remove `think` calls, returning their reasoning joined as text.
pub fn split_reasoning(calls: Vec<ToolCallRequest>) -> (Vec<ToolCallRequest>, String) {
    let (thoughts, work): (Vec<_>, Vec<_>) = calls.into_iter().partition(|c| c.name == THINK_TOOL);
    let reasoning = thoughts
        .iter()
        .filter_map(|c| c.arg_str("reasoning"))
        .collect::<Vec<_>>()
        .join("\n\n");
    (work, reasoning)
}
