// GOAL-stage similarity

use std::collections::BTreeSet;

use super::config::OracleConfig;
use super::strip_html_comments;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "because", "been", "before",
    "being", "below", "between", "both", "chunk", "chunks", "could", "does", "doing",
    "down", "during", "each", "ensure", "existing", "from", "further", "goal", "goals",
    "have", "having", "here", "implement", "implementation", "implemented", "into",
    "just", "like", "make", "more", "most", "must", "need", "needs", "only", "other",
    "over", "plan", "same", "should", "some", "success", "such", "support", "than",
    "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "until", "update", "very", "were", "what", "when", "where",
    "which", "while", "will", "with", "within", "without", "would", "your",
];

/// Result of comparing two goal texts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoalComparison {
    pub shared_terms: Vec<String>,
}

/// Pluggable goal-text comparison. The stage machinery only looks at whether
/// any shared terms came back.
pub trait GoalSimilarity: Send + Sync {
    fn compare(&self, goal_a: &str, goal_b: &str, config: &OracleConfig) -> GoalComparison;
}

/// Shared significant keywords
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordOverlap;

impl GoalSimilarity for KeywordOverlap {
    fn compare(&self, goal_a: &str, goal_b: &str, config: &OracleConfig) -> GoalComparison {
        let a = significant_tokens(goal_a, config);
        let b = significant_tokens(goal_b, config);
        GoalComparison {
            shared_terms: a.intersection(&b).cloned().collect(),
        }
    }
}

/// Identifier-like or long words from the text, lower-cased.
///
/// A token counts when it is long enough, not a stopword, and looks specific:
/// it has an underscore, had an uppercase letter, or is long on its own.
pub fn significant_tokens(text: &str, config: &OracleConfig) -> BTreeSet<String> {
    let text = strip_html_comments(text);
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|raw| raw.chars().count() >= config.min_token_chars)
        .filter_map(|raw| {
            let lowered = raw.to_lowercase();
            if STOPWORDS.contains(&lowered.as_str())
                || config.extra_stopwords.iter().any(|w| w.eq_ignore_ascii_case(&lowered))
            {
                return None;
            }
            let specific = raw.contains('_')
                || raw.chars().any(|c| c.is_uppercase())
                || raw.chars().count() >= config.long_token_chars;
            specific.then_some(lowered)
        })
        .collect()
}
