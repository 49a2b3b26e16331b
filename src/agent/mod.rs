//! Agent runner interface
//!
//! The scheduler drives agents only through `AgentRunner` and only looks at the
//! tri-state `AgentOutcome`.
//!
//! - `command` - `CommandAgentRunner`, runs a configured executable per invocation

pub mod command;

pub use command::CommandAgentRunner;

use crate::models::WorkUnit;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Completed,
    /// Paused waiting for a human answer
    Suspended { question: String },
    Failed { error: String },
}

/// What an agent invocation reports back. On the wire this is a single JSON
/// object such as `{"status": "completed", "session_id": "abc"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub outcome: AgentOutcome,
}

impl AgentResult {
    pub fn completed(session_id: Option<String>) -> Self {
        Self {
            session_id,
            outcome: AgentOutcome::Completed,
        }
    }

    pub fn suspended(session_id: Option<String>, question: impl Into<String>) -> Self {
        Self {
            session_id,
            outcome: AgentOutcome::Suspended {
                question: question.into(),
            },
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            session_id: None,
            outcome: AgentOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, AgentOutcome::Completed)
    }
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run the unit's current phase inside its worktree.
    async fn run_phase(&self, unit: &WorkUnit, worktree: &Path) -> AgentResult;

    /// Ask the agent to commit outstanding work before the merge.
    async fn run_commit(&self, unit: &WorkUnit, worktree: &Path) -> AgentResult;

    /// Resume a session whose chunk document was not marked ACTIVE.
    async fn resume_for_active_status(
        &self,
        session_id: &str,
        unit: &WorkUnit,
        worktree: &Path,
    ) -> AgentResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_wire_format() {
        let parsed: AgentResult =
            serde_json::from_str(r#"{"status":"completed","session_id":"s-1"}"#).unwrap();
        assert_eq!(parsed, AgentResult::completed(Some("s-1".to_string())));

        let parsed: AgentResult =
            serde_json::from_str(r#"{"status":"suspended","question":"Which DB?"}"#).unwrap();
        assert_eq!(parsed, AgentResult::suspended(None, "Which DB?"));

        let json = serde_json::to_value(AgentResult::failed("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "error": "boom"}));
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(serde_json::from_str::<AgentResult>(r#"{"status":"maybe"}"#).is_err());
    }
}
