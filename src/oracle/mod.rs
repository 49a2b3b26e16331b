//! Conflict oracle
//!
//! Decides whether two chunks may run concurrently, using the most detailed
//! information both chunks have reached.
//!
//! - `config` - thresholds, term rules and confidence constants
//! - `plan` - `Location:` extraction for the PLAN stage
//! - `goal` - keyword similarity for the GOAL stage
//! - `symbols` - reference containment for the COMPLETED stage
//!
//! The oracle never fails: missing or broken documents lower the stage, and the
//! lower stages answer conservatively.

pub mod config;
pub mod goal;
pub mod plan;
pub mod symbols;

pub use config::OracleConfig;
pub use goal::{GoalComparison, GoalSimilarity, KeywordOverlap};

use crate::chunks::{ChunkDocError, ChunkGoal, ChunkReader};
use crate::database::StateStore;
use crate::models::{AnalysisStage, ConflictAnalysis, ConflictVerdict};
use config::*;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

static HTML_COMMENT_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Remove `<!-- ... -->` blocks. An unterminated comment runs to the end of the text.
pub fn strip_html_comments(text: &str) -> Cow<'_, str> {
    if !text.contains("<!--") {
        return Cow::Borrowed(text);
    }
    let pattern = HTML_COMMENT_PATTERN.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
    let mut stripped = pattern.replace_all(text, "").into_owned();
    if let Some(open) = stripped.find("<!--") {
        stripped.truncate(open);
    }
    Cow::Owned(stripped)
}

/// What the oracle knows about one chunk
struct ChunkSnapshot {
    stage: AnalysisStage,
    goal: Option<ChunkGoal>,
    locations: BTreeSet<String>,
}

impl ChunkSnapshot {
    fn references(&self) -> Vec<String> {
        self.goal
            .as_ref()
            .map(|g| {
                g.frontmatter
                    .code_references
                    .iter()
                    .map(|r| r.reference.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn goal_body(&self) -> &str {
        self.goal.as_ref().map(|g| g.body.as_str()).unwrap_or("")
    }
}

pub struct ConflictOracle {
    store: Arc<StateStore>,
    reader: Arc<dyn ChunkReader>,
    similarity: Box<dyn GoalSimilarity>,
    config: OracleConfig,
}

impl ConflictOracle {
    pub fn new(store: Arc<StateStore>, reader: Arc<dyn ChunkReader>, config: OracleConfig) -> Self {
        Self {
            store,
            reader,
            similarity: Box::new(KeywordOverlap),
            config,
        }
    }

    /// Swap the GOAL-stage comparison strategy
    pub fn with_similarity(mut self, similarity: Box<dyn GoalSimilarity>) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn snapshot(&self, chunk: &str) -> ChunkSnapshot {
        let goal = match self.reader.read_goal(chunk) {
            Ok(goal) => goal,
            Err(ChunkDocError::NotFound(_)) => {
                return ChunkSnapshot {
                    stage: AnalysisStage::Proposed,
                    goal: None,
                    locations: BTreeSet::new(),
                }
            }
            Err(e) => {
                log::warn!("[Oracle] Treating {} as proposed: {}", chunk, e);
                return ChunkSnapshot {
                    stage: AnalysisStage::Proposed,
                    goal: None,
                    locations: BTreeSet::new(),
                };
            }
        };

        // Finished chunks keep their plan locations for pairs that fall back to PLAN
        let locations = match self.reader.read_plan(chunk) {
            Ok(Some(plan)) => plan::extract_locations(&plan),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                log::warn!("[Oracle] Ignoring unreadable plan for {}: {}", chunk, e);
                BTreeSet::new()
            }
        };

        let stage = if goal.status().is_finalized() {
            AnalysisStage::Completed
        } else if locations.is_empty() {
            AnalysisStage::Goal
        } else {
            AnalysisStage::Plan
        };

        ChunkSnapshot {
            stage,
            goal: Some(goal),
            locations,
        }
    }

    /// Most detailed stage the chunk's documents support
    pub fn detect_stage(&self, chunk: &str) -> AnalysisStage {
        self.snapshot(chunk).stage
    }

    /// Run a fresh analysis and persist it.
    pub fn analyze_conflict(&self, chunk_a: &str, chunk_b: &str) -> ConflictAnalysis {
        if chunk_a == chunk_b {
            return self.self_pair(chunk_a);
        }
        let a = self.snapshot(chunk_a);
        let b = self.snapshot(chunk_b);
        self.analyze_snapshots(chunk_a, &a, chunk_b, &b)
    }

    /// Cached verdict when it was computed at the pair's current stage or better,
    /// otherwise a fresh analysis.
    pub fn should_serialize(&self, chunk_a: &str, chunk_b: &str) -> ConflictAnalysis {
        if chunk_a == chunk_b {
            return self.self_pair(chunk_a);
        }
        let a = self.snapshot(chunk_a);
        let b = self.snapshot(chunk_b);
        let stage = a.stage.min(b.stage);

        match self.store.get_conflict_analysis(chunk_a, chunk_b) {
            Ok(Some(cached)) if cached.analysis_stage >= stage => return cached,
            Ok(_) => {}
            Err(e) => log::warn!(
                "[Oracle] Cache lookup for ({}, {}) failed: {}",
                chunk_a,
                chunk_b,
                e
            ),
        }

        self.analyze_snapshots(chunk_a, &a, chunk_b, &b)
    }

    fn self_pair(&self, chunk: &str) -> ConflictAnalysis {
        ConflictAnalysis::new(
            chunk,
            chunk,
            ConflictVerdict::Serialize,
            SELF_PAIR_CONFIDENCE,
            "A chunk always conflicts with itself",
            self.detect_stage(chunk),
        )
    }

    fn analyze_snapshots(
        &self,
        chunk_a: &str,
        a: &ChunkSnapshot,
        chunk_b: &str,
        b: &ChunkSnapshot,
    ) -> ConflictAnalysis {
        let stage = a.stage.min(b.stage);
        let analysis = match stage {
            AnalysisStage::Completed => self.analyze_completed(chunk_a, a, chunk_b, b),
            AnalysisStage::Plan => self.analyze_plan(chunk_a, a, chunk_b, b),
            AnalysisStage::Goal => self.analyze_goal(chunk_a, a, chunk_b, b),
            AnalysisStage::Proposed => ConflictAnalysis::new(
                chunk_a,
                chunk_b,
                ConflictVerdict::AskOperator,
                PROPOSED_CONFIDENCE,
                "Insufficient information: at least one chunk has no goal yet",
                stage,
            ),
        };

        log::info!(
            "[Oracle] {} vs {} at {}: {} ({:.2})",
            chunk_a,
            chunk_b,
            stage,
            analysis.verdict,
            analysis.confidence
        );

        if let Err(e) = self.store.save_conflict_analysis(&analysis) {
            log::warn!(
                "[Oracle] Failed to cache analysis for ({}, {}): {}",
                chunk_a,
                chunk_b,
                e
            );
        }
        analysis
    }

    fn analyze_completed(
        &self,
        chunk_a: &str,
        a: &ChunkSnapshot,
        chunk_b: &str,
        b: &ChunkSnapshot,
    ) -> ConflictAnalysis {
        let refs_a = a.references();
        let refs_b = b.references();
        let stage = AnalysisStage::Completed;

        if refs_a.is_empty() || refs_b.is_empty() {
            return ConflictAnalysis::new(
                chunk_a,
                chunk_b,
                ConflictVerdict::Independent,
                COMPLETED_NO_REFERENCES_CONFIDENCE,
                "No code references to compare",
                stage,
            );
        }

        let overlapping = symbols::find_overlapping_symbols(&refs_a, &refs_b);
        if overlapping.is_empty() {
            ConflictAnalysis::new(
                chunk_a,
                chunk_b,
                ConflictVerdict::Independent,
                COMPLETED_DISJOINT_CONFIDENCE,
                "Code references do not overlap",
                stage,
            )
        } else {
            ConflictAnalysis::new(
                chunk_a,
                chunk_b,
                ConflictVerdict::Serialize,
                COMPLETED_OVERLAP_CONFIDENCE,
                format!("Overlapping code references: {}", overlapping.join(", ")),
                stage,
            )
            .with_overlapping_symbols(overlapping)
        }
    }

    fn analyze_plan(
        &self,
        chunk_a: &str,
        a: &ChunkSnapshot,
        chunk_b: &str,
        b: &ChunkSnapshot,
    ) -> ConflictAnalysis {
        let stage = AnalysisStage::Plan;
        if a.locations.is_empty() || b.locations.is_empty() {
            return ConflictAnalysis::new(
                chunk_a,
                chunk_b,
                ConflictVerdict::AskOperator,
                PLAN_NO_LOCATIONS_CONFIDENCE,
                "Plan declares no file locations",
                stage,
            );
        }

        let shared: Vec<String> = a.locations.intersection(&b.locations).cloned().collect();
        let (verdict, confidence, reason) = if shared.is_empty() {
            (
                ConflictVerdict::Independent,
                PLAN_DISJOINT_CONFIDENCE,
                "Planned file locations are disjoint".to_string(),
            )
        } else if shared.len() > self.config.serialize_file_threshold {
            (
                ConflictVerdict::Serialize,
                PLAN_SERIALIZE_CONFIDENCE,
                format!("{} planned files overlap: {}", shared.len(), shared.join(", ")),
            )
        } else {
            (
                ConflictVerdict::AskOperator,
                PLAN_PARTIAL_OVERLAP_CONFIDENCE,
                format!("Planned files overlap: {}", shared.join(", ")),
            )
        };

        ConflictAnalysis::new(chunk_a, chunk_b, verdict, confidence, reason, stage)
            .with_overlapping_files(shared)
    }

    fn analyze_goal(
        &self,
        chunk_a: &str,
        a: &ChunkSnapshot,
        chunk_b: &str,
        b: &ChunkSnapshot,
    ) -> ConflictAnalysis {
        let comparison = self
            .similarity
            .compare(a.goal_body(), b.goal_body(), &self.config);

        if comparison.shared_terms.is_empty() {
            ConflictAnalysis::new(
                chunk_a,
                chunk_b,
                ConflictVerdict::Independent,
                GOAL_DISJOINT_CONFIDENCE,
                "Goals share no significant terms",
                AnalysisStage::Goal,
            )
        } else {
            ConflictAnalysis::new(
                chunk_a,
                chunk_b,
                ConflictVerdict::AskOperator,
                GOAL_SHARED_TERMS_CONFIDENCE,
                format!("Goals share terms: {}", comparison.shared_terms.join(", ")),
                AnalysisStage::Goal,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::InMemoryChunkReader;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<StateStore>, Arc<InMemoryChunkReader>, ConflictOracle) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::open(temp_dir.path().join("test.db")).unwrap());
        let reader = Arc::new(InMemoryChunkReader::new());
        let oracle = ConflictOracle::new(store.clone(), reader.clone(), OracleConfig::default());
        (temp_dir, store, reader, oracle)
    }

    fn goal(status: &str, body: &str) -> String {
        format!("---\nstatus: {}\n---\n{}", status, body)
    }

    fn completed(refs: &[&str]) -> String {
        let mut doc = String::from("---\nstatus: ACTIVE\ncode_references:\n");
        for r in refs {
            doc.push_str(&format!("  - ref: \"{}\"\n", r));
        }
        doc.push_str("---\n");
        doc
    }

    #[test]
    fn test_strip_html_comments() {
        assert_eq!(strip_html_comments("a<!-- x -->b"), "ab");
        assert_eq!(strip_html_comments("a<!--\nmulti\nline\n-->b<!-- c -->d"), "abd");
        assert_eq!(strip_html_comments("keep<!-- never closed"), "keep");
        assert!(matches!(strip_html_comments("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_stage_detection() {
        let (_dir, _store, reader, oracle) = setup();
        assert_eq!(oracle.detect_stage("missing"), AnalysisStage::Proposed);

        reader.set_goal("broken", "no frontmatter");
        assert_eq!(oracle.detect_stage("broken"), AnalysisStage::Proposed);

        reader.set_goal("g", &goal("FUTURE", "text"));
        assert_eq!(oracle.detect_stage("g"), AnalysisStage::Goal);

        reader.set_plan("g", "<!-- Location: src/x.rs -->\n");
        assert_eq!(oracle.detect_stage("g"), AnalysisStage::Goal);

        reader.set_plan("g", "Location: src/x.rs\n");
        assert_eq!(oracle.detect_stage("g"), AnalysisStage::Plan);

        for status in ["ACTIVE", "SUPERSEDED", "HISTORICAL"] {
            reader.set_goal("c", &goal(status, ""));
            assert_eq!(oracle.detect_stage("c"), AnalysisStage::Completed);
        }
    }

    #[test]
    fn test_proposed_asks_operator() {
        let (_dir, _store, reader, oracle) = setup();
        reader.set_goal("a", &goal("FUTURE", "text"));
        let result = oracle.analyze_conflict("a", "b");
        assert_eq!(result.verdict, ConflictVerdict::AskOperator);
        assert_eq!(result.confidence, PROPOSED_CONFIDENCE);
        assert_eq!(result.analysis_stage, AnalysisStage::Proposed);
    }

    #[test]
    fn test_plan_disjoint_is_independent() {
        let (_dir, _store, reader, oracle) = setup();
        reader.set_goal("a", &goal("IMPLEMENTING", ""));
        reader.set_goal("b", &goal("IMPLEMENTING", ""));
        reader.set_plan("a", "Location: src/a.rs\n");
        reader.set_plan("b", "Location: src/b.rs\n");

        let result = oracle.analyze_conflict("a", "b");
        assert_eq!(result.verdict, ConflictVerdict::Independent);
        assert!(result.confidence >= 0.7);
        assert_eq!(result.analysis_stage, AnalysisStage::Plan);
    }

    #[test]
    fn test_plan_overlap_thresholds() {
        let (_dir, _store, reader, oracle) = setup();
        let three = "Location: src/x.rs\nLocation: src/y.rs\nLocation: src/z.rs\n";
        for chunk in ["a", "b", "c"] {
            reader.set_goal(chunk, &goal("IMPLEMENTING", ""));
            reader.set_plan(chunk, three);
        }
        reader.set_goal("d", &goal("IMPLEMENTING", ""));
        reader.set_plan("d", "Location: src/x.rs\nLocation: src/q.rs\n");

        for (x, y) in [("a", "b"), ("a", "c"), ("b", "c")] {
            let result = oracle.analyze_conflict(x, y);
            assert_eq!(result.verdict, ConflictVerdict::Serialize);
            assert_eq!(result.overlapping_files.len(), 3);
        }

        let partial = oracle.analyze_conflict("a", "d");
        assert_eq!(partial.verdict, ConflictVerdict::AskOperator);
        assert_eq!(partial.confidence, PLAN_PARTIAL_OVERLAP_CONFIDENCE);
        assert_eq!(partial.overlapping_files, vec!["src/x.rs"]);
    }

    #[test]
    fn test_goal_stage_ignores_template_comments() {
        let (_dir, _store, reader, oracle) = setup();
        let template = "<!--\nDescribe the goal. Example: Location: src/example_module.rs\nTouches the SessionManager and request_router.\n-->\n";
        reader.set_goal("a", &goal("FUTURE", &format!("{}Tidy the README badges.", template)));
        reader.set_goal("b", &goal("FUTURE", &format!("{}Bump the lint level.", template)));

        let result = oracle.analyze_conflict("a", "b");
        assert_eq!(result.analysis_stage, AnalysisStage::Goal);
        assert_eq!(result.verdict, ConflictVerdict::Independent);
    }

    #[test]
    fn test_goal_shared_terms_ask_operator() {
        let (_dir, _store, reader, oracle) = setup();
        reader.set_goal("a", &goal("FUTURE", "Cache lookups in session_store"));
        reader.set_goal("b", &goal("FUTURE", "Expire entries from session_store"));

        let result = oracle.analyze_conflict("a", "b");
        assert_eq!(result.verdict, ConflictVerdict::AskOperator);
        assert_eq!(result.confidence, GOAL_SHARED_TERMS_CONFIDENCE);
    }

    #[test]
    fn test_completed_stage() {
        let (_dir, _store, reader, oracle) = setup();
        reader.set_goal("a", &completed(&["src/lib.rs#Engine"]));
        reader.set_goal("b", &completed(&["src/lib.rs#Engine::start"]));
        reader.set_goal("c", &completed(&["src/other.rs#Thing"]));
        reader.set_goal("d", &completed(&[]));

        let overlap = oracle.analyze_conflict("a", "b");
        assert_eq!(overlap.verdict, ConflictVerdict::Serialize);
        assert_eq!(overlap.confidence, COMPLETED_OVERLAP_CONFIDENCE);
        assert_eq!(overlap.overlapping_symbols, vec!["src/lib.rs#Engine::start"]);

        let disjoint = oracle.analyze_conflict("a", "c");
        assert_eq!(disjoint.verdict, ConflictVerdict::Independent);
        assert_eq!(disjoint.confidence, COMPLETED_DISJOINT_CONFIDENCE);

        let empty = oracle.analyze_conflict("a", "d");
        assert_eq!(empty.verdict, ConflictVerdict::Independent);
        assert_eq!(empty.confidence, COMPLETED_NO_REFERENCES_CONFIDENCE);
    }

    #[test]
    fn test_mixed_stages_use_lower_stage() {
        let (_dir, _store, reader, oracle) = setup();
        reader.set_goal("done", &completed(&["src/lib.rs"]));
        reader.set_goal("planned", &goal("IMPLEMENTING", ""));
        reader.set_plan("planned", "Location: src/lib.rs\n");

        let result = oracle.analyze_conflict("done", "planned");
        assert_eq!(result.analysis_stage, AnalysisStage::Plan);
        // No PLAN.md on the finalized side
        assert_eq!(result.verdict, ConflictVerdict::AskOperator);
        assert_eq!(result.confidence, PLAN_NO_LOCATIONS_CONFIDENCE);
    }

    #[test]
    fn test_finalized_chunk_plan_locations_compared_at_plan_stage() {
        let (_dir, _store, reader, oracle) = setup();
        reader.set_goal("done", &completed(&["src/a.rs"]));
        reader.set_plan("done", "Location: src/a.rs
");
        reader.set_goal("planned", &goal("IMPLEMENTING", ""));
        reader.set_plan("planned", "Location: src/b.rs
");

        assert_eq!(oracle.detect_stage("done"), AnalysisStage::Completed);
        let result = oracle.analyze_conflict("done", "planned");
        assert_eq!(result.analysis_stage, AnalysisStage::Plan);
        assert_eq!(result.verdict, ConflictVerdict::Independent);
        assert_eq!(result.confidence, PLAN_DISJOINT_CONFIDENCE);

        reader.set_plan("planned", "Location: src/a.rs
");
        let result = oracle.analyze_conflict("done", "planned");
        assert_eq!(result.verdict, ConflictVerdict::AskOperator);
        assert_eq!(result.overlapping_files, vec!["src/a.rs".to_string()]);
    }

    #[test]
    fn test_self_pair_not_cached() {
        let (_dir, store, _reader, oracle) = setup();
        let result = oracle.should_serialize("solo", "solo");
        assert_eq!(result.verdict, ConflictVerdict::Serialize);
        assert!(store.get_conflict_analysis("solo", "solo").unwrap().is_none());
    }

    #[test]
    fn test_analysis_is_persisted_and_symmetric() {
        let (_dir, store, reader, oracle) = setup();
        reader.set_goal("a", &goal("FUTURE", "x"));
        reader.set_goal("b", &goal("FUTURE", "y"));
        oracle.analyze_conflict("b", "a");

        let ab = store.get_conflict_analysis("a", "b").unwrap().unwrap();
        let ba = store.get_conflict_analysis("b", "a").unwrap().unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_cache_reused_only_at_current_stage() {
        let (_dir, store, reader, oracle) = setup();
        reader.set_goal("a", &goal("IMPLEMENTING", ""));
        reader.set_goal("b", &goal("IMPLEMENTING", ""));
        reader.set_plan("a", "Location: src/a.rs\n");
        reader.set_plan("b", "Location: src/b.rs\n");

        // A planted cached verdict at the current stage wins over recomputation
        let planted = ConflictAnalysis::new(
            "a",
            "b",
            ConflictVerdict::Serialize,
            0.99,
            "operator decided",
            AnalysisStage::Plan,
        );
        store.save_conflict_analysis(&planted).unwrap();
        assert_eq!(oracle.should_serialize("a", "b").reason, "operator decided");

        // A stale lower-stage entry is recomputed
        let stale = ConflictAnalysis::new(
            "a",
            "b",
            ConflictVerdict::AskOperator,
            0.2,
            "stale",
            AnalysisStage::Proposed,
        );
        store.save_conflict_analysis(&stale).unwrap();
        let fresh = oracle.should_serialize("b", "a");
        assert_eq!(fresh.verdict, ConflictVerdict::Independent);
        assert_eq!(fresh.analysis_stage, AnalysisStage::Plan);
        assert_eq!(
            store.get_conflict_analysis("a", "b").unwrap().unwrap().verdict,
            ConflictVerdict::Independent
        );
    }

    struct AlwaysShared;

    impl GoalSimilarity for AlwaysShared {
        fn compare(&self, _a: &str, _b: &str, _config: &OracleConfig) -> GoalComparison {
            GoalComparison {
                shared_terms: vec!["everything".to_string()],
            }
        }
    }

    #[test]
    fn test_custom_similarity_strategy() {
        let (_dir, _store, reader, oracle) = setup();
        let oracle = oracle.with_similarity(Box::new(AlwaysShared));
        reader.set_goal("a", &goal("FUTURE", "alpha"));
        reader.set_goal("b", &goal("FUTURE", "omega"));
        assert_eq!(
            oracle.analyze_conflict("a", "b").verdict,
            ConflictVerdict::AskOperator
        );
    }
}
