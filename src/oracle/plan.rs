// `Location:` extraction from plan text

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use super::strip_html_comments;

static LOCATION_PATTERN: OnceLock<Regex> = OnceLock::new();
static ANNOTATION_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Matches `Location: x`, `- Location: x`, `**Location:** x` and `**Location**: x`,
/// case-insensitively.
fn location_pattern() -> &'static Regex {
    LOCATION_PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*(?:[-*+][ \t]+)?(?:\*\*|__)?location(?:\*\*|__)?[ \t]*:(?:\*\*|__)?[ \t]*(.*)$")
            .unwrap()
    })
}

fn annotation_pattern() -> &'static Regex {
    ANNOTATION_PATTERN.get_or_init(|| Regex::new(r"\s*\([^)]*\)\s*$").unwrap())
}

fn clean_location(raw: &str) -> Option<String> {
    let without_note = annotation_pattern().replace(raw.trim(), "");
    let path = without_note.trim().trim_matches('`').trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// File paths declared by `Location:` lines, ignoring anything inside HTML comments.
pub fn extract_locations(plan: &str) -> BTreeSet<String> {
    let text = strip_html_comments(plan);
    location_pattern()
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| clean_location(m.as_str()))
        .collect()
}
