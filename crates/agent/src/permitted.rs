//! Which tools the model may call on a given turn, and when to stop.

use sleuth_config::AgentConfig;

use crate::finalize::{ABORT, ANSWER};

/// Broad discovery over the symbol index.
pub const SEARCH_TOOLS: &[&str] = &["searchSymbols", "getUsages"];
/// Neighborhood exploration.
pub const RELATED_TOOLS: &[&str] = &["getRelatedClasses"];
/// Detailed inspection of known code units.
pub const INSPECT_TOOLS: &[&str] = &[
    "getClassSkeletons",
    "getClassSources",
    "getMethodSources",
    "getCallGraphTo",
    "getCallGraphFrom",
];
/// Plain-text search; unlocked by a symbol search when a symbol index exists.
pub const TEXT_TOOLS: &[&str] = &["searchSubstrings", "searchFilenames", "getFileContents"];

/// The tool that unlocks [`TEXT_TOOLS`].
pub const SYMBOL_SEARCH: &str = "searchSymbols";

/// Everything the tool gate looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopState {
    pub steps_executed: usize,
    pub beast_mode: bool,
    pub has_symbol_index: bool,
    pub symbol_search_done: bool,
}

/// Names of the tools offered for the next decision.
pub fn permitted_tools(state: &LoopState) -> Vec<&'static str> {
    let mut tools = Vec::new();
    if state.steps_executed > 0 || state.beast_mode {
        tools.extend([ANSWER, ABORT]);
    }
    if state.beast_mode {
        return tools;
    }

    if state.has_symbol_index {
        tools.extend_from_slice(SEARCH_TOOLS);
        tools.extend_from_slice(RELATED_TOOLS);
        tools.extend_from_slice(INSPECT_TOOLS);
    }
    if !state.has_symbol_index || state.symbol_search_done {
        tools.extend_from_slice(TEXT_TOOLS);
    }
    tools
}

/// Outcome of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetVerdict {
    Continue,
    /// Only finalize tools from now on
    BeastMode,
    Stop,
}

/// Soft token budget over the action history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    pub tokens: usize,
    pub beast_ratio: f64,
    pub stop_ratio: f64,
}

impl Budget {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            tokens: config.token_budget,
            beast_ratio: config.beast_mode_ratio,
            stop_ratio: config.stop_ratio,
        }
    }

    /// `discovered`: at least one step produced something useful.
    pub fn assess(&self, history_tokens: usize, discovered: bool) -> BudgetVerdict {
        let used = history_tokens as f64;
        let budget = self.tokens as f64;
        if used >= self.stop_ratio * budget {
            BudgetVerdict::Stop
        } else if discovered && used >= self.beast_ratio * budget {
            BudgetVerdict::BeastMode
        } else {
            BudgetVerdict::Continue
        }
    }
}
