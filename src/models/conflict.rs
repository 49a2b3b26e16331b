// Conflict oracle verdict types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictVerdict {
    Independent,
    Serialize,
    AskOperator,
}

impl ConflictVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictVerdict::Independent => "INDEPENDENT",
            ConflictVerdict::Serialize => "SERIALIZE",
            ConflictVerdict::AskOperator => "ASK_OPERATOR",
        }
    }
}

impl fmt::Display for ConflictVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConflictVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INDEPENDENT" => Ok(ConflictVerdict::Independent),
            "SERIALIZE" => Ok(ConflictVerdict::Serialize),
            "ASK_OPERATOR" => Ok(ConflictVerdict::AskOperator),
            _ => Err(format!(
                "Unknown verdict: '{}'. Expected one of: INDEPENDENT, SERIALIZE, ASK_OPERATOR",
                s
            )),
        }
    }
}

/// How much is known about a chunk. Ordered from least to most informative,
/// so the analysis stage for a pair is the `min` of the two.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStage {
    Proposed,
    Goal,
    Plan,
    Completed,
}

impl AnalysisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Proposed => "PROPOSED",
            AnalysisStage::Goal => "GOAL",
            AnalysisStage::Plan => "PLAN",
            AnalysisStage::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PROPOSED" => Ok(AnalysisStage::Proposed),
            "GOAL" => Ok(AnalysisStage::Goal),
            "PLAN" => Ok(AnalysisStage::Plan),
            "COMPLETED" => Ok(AnalysisStage::Completed),
            _ => Err(format!(
                "Unknown analysis stage: '{}'. Expected one of: PROPOSED, GOAL, PLAN, COMPLETED",
                s
            )),
        }
    }
}

/// Memoized verdict for an unordered chunk pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictAnalysis {
    pub chunk_a: String,
    pub chunk_b: String,
    pub verdict: ConflictVerdict,
    pub confidence: f64,
    pub reason: String,
    pub analysis_stage: AnalysisStage,
    pub overlapping_files: Vec<String>,
    pub overlapping_symbols: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ConflictAnalysis {
    pub fn new(
        chunk_a: &str,
        chunk_b: &str,
        verdict: ConflictVerdict,
        confidence: f64,
        reason: impl Into<String>,
        analysis_stage: AnalysisStage,
    ) -> Self {
        let (a, b) = normalize_pair(chunk_a, chunk_b);
        Self {
            chunk_a: a.to_string(),
            chunk_b: b.to_string(),
            verdict,
            confidence,
            reason: reason.into(),
            analysis_stage,
            overlapping_files: Vec::new(),
            overlapping_symbols: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_overlapping_files(mut self, files: Vec<String>) -> Self {
        self.overlapping_files = files;
        self
    }

    pub fn with_overlapping_symbols(mut self, symbols: Vec<String>) -> Self {
        self.overlapping_symbols = symbols;
        self
    }

    /// The chunk on the other side of the pair, if `chunk` is part of it.
    pub fn other(&self, chunk: &str) -> Option<&str> {
        if self.chunk_a == chunk {
            Some(&self.chunk_b)
        } else if self.chunk_b == chunk {
            Some(&self.chunk_a)
        } else {
            None
        }
    }
}

/// Order a pair so that `a <= b`. Every cache read and write goes through this.
pub fn normalize_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
