//! The search agent.
//!
//! Each session follows a **Decide → Execute → Record** cycle:
//!
//! 1. **Decide**: ask the model for the next tool calls, offering only the
//!    tools the current state permits
//! 2. **Execute**: run the calls concurrently after the loop guard has
//!    replaced repeats
//! 3. **Record**: append the steps to the action history, starting
//!    background summaries for large results
//!
//! The loop ends when the model calls `answer` or `abort`, the token budget
//! runs out, the model stops cooperating, or the session is cancelled.

pub mod finalize;
pub mod guard;
pub mod history;
pub mod loop_runner;
pub mod outcome;
pub mod permitted;
pub mod prompts;
pub mod summarize;
pub mod symbols;
pub mod token;
pub mod workspace;

#[cfg(test)]
mod test_helpers;

pub use finalize::Finalize;
pub use guard::LoopGuard;
pub use history::{ActionHistory, ToolCall};
pub use loop_runner::AgentLoop;
pub use outcome::{Outcome, SessionOutcome};
pub use permitted::{permitted_tools, Budget, BudgetVerdict, LoopState};
pub use summarize::{PendingSummary, SummarizationPipeline};
pub use workspace::{ContextFragment, ContextProvider, StaticContext};
