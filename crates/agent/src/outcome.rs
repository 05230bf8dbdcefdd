//! How a search session ended.

use serde::Serialize;
use sleuth_core::provider::Usage;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The model answered; `identifiers` are the code units it relied on
    Answer {
        explanation: String,
        identifiers: Vec<String>,
    },
    Aborted {
        explanation: String,
    },
    BudgetExhausted {
        reason: String,
    },
    Failed {
        reason: String,
    },
    Cancelled,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Answer { .. } => "answer",
            Outcome::Aborted { .. } => "aborted",
            Outcome::BudgetExhausted { .. } => "budget_exhausted",
            Outcome::Failed { .. } => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// The end of a session plus what it cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub outcome: Outcome,
    pub usage: Usage,
    /// Steps recorded in the action history
    pub steps: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kind_tag() {
        let outcome = SessionOutcome {
            outcome: Outcome::Aborted {
                explanation: "not here".into(),
            },
            usage: Usage::default(),
            steps: 2,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"]["kind"], "aborted");
        assert_eq!(json["outcome"]["explanation"], "not here");
        assert_eq!(json["steps"], 2);
    }

    #[test]
    fn labels() {
        assert_eq!(Outcome::Cancelled.label(), "cancelled");
        assert_eq!(
            Outcome::Failed {
                reason: "x".into()
            }
            .label(),
            "failed"
        );
    }
}
