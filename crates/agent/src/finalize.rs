//! The two reserved tools that end a session.

use sleuth_core::tool::{ParamType, ToolCallRequest, ToolSpecification};

pub const ANSWER: &str = "answer";
pub const ABORT: &str = "abort";

pub fn is_finalize(name: &str) -> bool {
    name == ANSWER || name == ABORT
}

pub fn answer_spec() -> ToolSpecification {
    ToolSpecification::new(
        ANSWER,
        "Provide a final answer to the query. Use this when you have enough information to fully address the query.",
    )
    .param(
        "explanation",
        ParamType::String,
        "Explanation of the answer, in markdown, including all relevant source code the reader needs",
    )
    .param(
        "classNames",
        ParamType::string_array(),
        "Fully qualified names of the classes that are relevant to the answer",
    )
}

pub fn abort_spec() -> ToolSpecification {
    ToolSpecification::new(
        ABORT,
        "Abort the search process when you determine the question is not relevant to this codebase or when an answer cannot be found. Use this as a last resort when you're confident no useful answer can be provided.",
    )
    .param(
        "explanation",
        ParamType::String,
        "Explanation of why the question cannot be answered or is not relevant to this codebase",
    )
}

/// A well-formed finalize request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalize {
    Answer {
        explanation: String,
        identifiers: Vec<String>,
    },
    Abort {
        explanation: String,
    },
}

/// Check a finalize call; the error text is shown to the model.
pub fn validate(call: &ToolCallRequest) -> Result<Finalize, String> {
    let explanation = call
        .arg_str("explanation")
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| "Empty or missing explanation parameter".to_string())?
        .to_string();

    match call.name.as_str() {
        ANSWER => Ok(Finalize::Answer {
            explanation,
            identifiers: call.arg_strings("classNames"),
        }),
        ABORT => Ok(Finalize::Abort { explanation }),
        other => Err(format!("{other} is not a finalize tool")),
    }
}
