// Data models for work units, status history and conflict verdicts

pub mod conflict;
pub mod state_machine;

pub use conflict::{AnalysisStage, ConflictAnalysis, ConflictVerdict};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkUnitPhase {
    Goal,
    Plan,
    Implement,
    Complete,
}

impl WorkUnitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkUnitPhase::Goal => "GOAL",
            WorkUnitPhase::Plan => "PLAN",
            WorkUnitPhase::Implement => "IMPLEMENT",
            WorkUnitPhase::Complete => "COMPLETE",
        }
    }

    /// The phase that follows a completed invocation of this one.
    /// `None` for COMPLETE, which hands off to the completion gate instead.
    pub fn next(&self) -> Option<WorkUnitPhase> {
        match self {
            WorkUnitPhase::Goal => Some(WorkUnitPhase::Plan),
            WorkUnitPhase::Plan => Some(WorkUnitPhase::Implement),
            WorkUnitPhase::Implement => Some(WorkUnitPhase::Complete),
            WorkUnitPhase::Complete => None,
        }
    }
}

impl fmt::Display for WorkUnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkUnitPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GOAL" => Ok(WorkUnitPhase::Goal),
            "PLAN" => Ok(WorkUnitPhase::Plan),
            "IMPLEMENT" => Ok(WorkUnitPhase::Implement),
            "COMPLETE" => Ok(WorkUnitPhase::Complete),
            _ => Err(format!(
                "Unknown phase: '{}'. Expected one of: GOAL, PLAN, IMPLEMENT, COMPLETE",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkUnitStatus {
    Ready,
    Running,
    Blocked,
    NeedsAttention,
    Done,
}

impl WorkUnitStatus {
    /// Returns all statuses in display order
    pub fn all() -> &'static [WorkUnitStatus] {
        &[
            WorkUnitStatus::Ready,
            WorkUnitStatus::Running,
            WorkUnitStatus::Blocked,
            WorkUnitStatus::NeedsAttention,
            WorkUnitStatus::Done,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkUnitStatus::Ready => "READY",
            WorkUnitStatus::Running => "RUNNING",
            WorkUnitStatus::Blocked => "BLOCKED",
            WorkUnitStatus::NeedsAttention => "NEEDS_ATTENTION",
            WorkUnitStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for WorkUnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkUnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "READY" => Ok(WorkUnitStatus::Ready),
            "RUNNING" => Ok(WorkUnitStatus::Running),
            "BLOCKED" => Ok(WorkUnitStatus::Blocked),
            "NEEDS_ATTENTION" => Ok(WorkUnitStatus::NeedsAttention),
            "DONE" => Ok(WorkUnitStatus::Done),
            _ => Err(format!(
                "Unknown status: '{}'. Expected one of: READY, RUNNING, BLOCKED, NEEDS_ATTENTION, DONE",
                s
            )),
        }
    }
}

/// Schedulable record for one chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkUnit {
    pub chunk: String,
    pub phase: WorkUnitPhase,
    pub status: WorkUnitStatus,
    pub priority: i64,
    pub blocked_by: Vec<String>,
    pub worktree: Option<String>,
    pub session_id: Option<String>,
    pub attention_reason: Option<String>,
    /// Unit that was bumped out of active work to make room for this one
    pub displaced_chunk: Option<String>,
    pub completion_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkUnit {
    /// A freshly enqueued unit: READY at the GOAL phase.
    pub fn new(chunk: &str) -> Self {
        let now = Utc::now();
        Self {
            chunk: chunk.to_string(),
            phase: WorkUnitPhase::Goal,
            status: WorkUnitStatus::Ready,
            priority: 0,
            blocked_by: Vec::new(),
            worktree: None,
            session_id: None,
            attention_reason: None,
            displaced_chunk: None,
            completion_retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_phase(mut self, phase: WorkUnitPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Route the unit to an operator with a human-readable reason.
    pub fn mark_needs_attention(&mut self, reason: impl Into<String>) {
        self.status = WorkUnitStatus::NeedsAttention;
        self.attention_reason = Some(reason.into());
        self.worktree = None;
    }
}

/// Immutable audit record of a status change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusLogEntry {
    pub chunk: String,
    pub old_status: WorkUnitStatus,
    pub new_status: WorkUnitStatus,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_unit_is_ready_goal() {
        let unit = WorkUnit::new("auth_flow");
        assert_eq!(unit.status, WorkUnitStatus::Ready);
        assert_eq!(unit.phase, WorkUnitPhase::Goal);
        assert_eq!(unit.priority, 0);
        assert!(unit.worktree.is_none());
    }

    #[test]
    fn test_phase_progression() {
        assert_eq!(WorkUnitPhase::Goal.next(), Some(WorkUnitPhase::Plan));
        assert_eq!(WorkUnitPhase::Plan.next(), Some(WorkUnitPhase::Implement));
        assert_eq!(WorkUnitPhase::Implement.next(), Some(WorkUnitPhase::Complete));
        assert_eq!(WorkUnitPhase::Complete.next(), None);
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&WorkUnitStatus::NeedsAttention).unwrap();
        assert_eq!(json, "\"NEEDS_ATTENTION\"");
        let parsed: WorkUnitStatus = "needs_attention".parse().unwrap();
        assert_eq!(parsed, WorkUnitStatus::NeedsAttention);
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("PAUSED".parse::<WorkUnitStatus>().is_err());
        assert!("DEPLOY".parse::<WorkUnitPhase>().is_err());
    }
}
