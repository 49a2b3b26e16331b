// Oracle tuning values

use serde::{Deserialize, Serialize};

pub const SELF_PAIR_CONFIDENCE: f64 = 1.0;
pub const COMPLETED_OVERLAP_CONFIDENCE: f64 = 0.95;
pub const COMPLETED_DISJOINT_CONFIDENCE: f64 = 0.95;
pub const COMPLETED_NO_REFERENCES_CONFIDENCE: f64 = 0.9;
pub const PLAN_SERIALIZE_CONFIDENCE: f64 = 0.8;
pub const PLAN_PARTIAL_OVERLAP_CONFIDENCE: f64 = 0.5;
pub const PLAN_NO_LOCATIONS_CONFIDENCE: f64 = 0.3;
pub const PLAN_DISJOINT_CONFIDENCE: f64 = 0.8;
pub const GOAL_SHARED_TERMS_CONFIDENCE: f64 = 0.4;
pub const GOAL_DISJOINT_CONFIDENCE: f64 = 0.5;
pub const PROPOSED_CONFIDENCE: f64 = 0.2;

/// Thresholds and term rules. None of these are known to be optimal, so every
/// one of them can be overridden from `orchestrator.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    /// PLAN stage: more shared files than this serializes the pair
    pub serialize_file_threshold: usize,
    /// GOAL stage: tokens shorter than this are ignored
    pub min_token_chars: usize,
    /// GOAL stage: tokens at least this long are significant on length alone
    pub long_token_chars: usize,
    /// GOAL stage: words ignored on top of the built-in stopword list
    pub extra_stopwords: Vec<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            serialize_file_threshold: 2,
            min_token_chars: 4,
            long_token_chars: 7,
            extra_stopwords: Vec::new(),
        }
    }
}
