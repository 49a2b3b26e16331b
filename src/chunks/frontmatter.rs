// Goal document frontmatter

use serde::{Deserialize, Serialize};

use super::{ChunkDocError, ChunkGoal};

/// Lifecycle status a chunk declares about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    Future,
    Implementing,
    Active,
    Superseded,
    Historical,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Future => "FUTURE",
            ChunkStatus::Implementing => "IMPLEMENTING",
            ChunkStatus::Active => "ACTIVE",
            ChunkStatus::Superseded => "SUPERSEDED",
            ChunkStatus::Historical => "HISTORICAL",
        }
    }

    /// Implementation has landed and code references are final
    pub fn is_finalized(&self) -> bool {
        matches!(
            self,
            ChunkStatus::Active | ChunkStatus::Superseded | ChunkStatus::Historical
        )
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A symbolic pointer into the codebase, `[project::]path[#Symbol::Nested]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReference {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implements: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalFrontmatter {
    pub status: ChunkStatus,
    #[serde(default)]
    pub code_references: Vec<CodeReference>,
}

/// Split `---` fenced frontmatter from the body. Returns `None` when the document
/// does not open with a fence or the fence is never closed.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }

    let start = first.len();
    let mut offset = start;
    for line in lines {
        if line.trim_end() == "---" {
            let yaml = &content[start..offset];
            let body = &content[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

/// Parse a GOAL.md document. `location` is only used in error messages.
pub fn parse_goal_document(location: &str, content: &str) -> Result<ChunkGoal, ChunkDocError> {
    let (yaml, body) = split_frontmatter(content)
        .ok_or_else(|| ChunkDocError::MissingFrontmatter(location.to_string()))?;

    let frontmatter: GoalFrontmatter =
        serde_yaml::from_str(yaml).map_err(|e| ChunkDocError::InvalidFrontmatter {
            location: location.to_string(),
            message: e.to_string(),
        })?;

    Ok(ChunkGoal {
        frontmatter,
        body: body.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_frontmatter() {
        let doc = "---\nstatus: ACTIVE\ncode_references:\n  - ref: src/auth.rs#Session::login\n    implements: login flow\n  - ref: core::src/lib.rs\nowner: someone\n---\nBody text\n";
        let goal = parse_goal_document("GOAL.md", doc).unwrap();

        assert_eq!(goal.status(), ChunkStatus::Active);
        assert_eq!(goal.frontmatter.code_references.len(), 2);
        assert_eq!(
            goal.frontmatter.code_references[0].reference,
            "src/auth.rs#Session::login"
        );
        assert_eq!(
            goal.frontmatter.code_references[0].implements.as_deref(),
            Some("login flow")
        );
        assert!(goal.frontmatter.code_references[1].implements.is_none());
        assert_eq!(goal.body, "Body text\n");
    }

    #[test]
    fn test_missing_frontmatter() {
        assert!(matches!(
            parse_goal_document("GOAL.md", "# Just markdown\n"),
            Err(ChunkDocError::MissingFrontmatter(_))
        ));
        assert!(matches!(
            parse_goal_document("GOAL.md", "---\nstatus: ACTIVE\n"),
            Err(ChunkDocError::MissingFrontmatter(_))
        ));
    }

    #[test]
    fn test_invalid_frontmatter() {
        for doc in [
            "---\nstatus: DONE_ISH\n---\n",
            "---\ncode_references: []\n---\n",
            "---\nstatus: [unclosed\n---\n",
        ] {
            assert!(
                matches!(
                    parse_goal_document("GOAL.md", doc),
                    Err(ChunkDocError::InvalidFrontmatter { .. })
                ),
                "expected InvalidFrontmatter for {:?}",
                doc
            );
        }
    }

    #[test]
    fn test_crlf_fences() {
        let goal = parse_goal_document("GOAL.md", "---\r\nstatus: FUTURE\r\n---\r\nbody").unwrap();
        assert_eq!(goal.status(), ChunkStatus::Future);
        assert_eq!(goal.body, "body");
    }

    #[test]
    fn test_finalized_statuses() {
        assert!(ChunkStatus::Active.is_finalized());
        assert!(ChunkStatus::Superseded.is_finalized());
        assert!(ChunkStatus::Historical.is_finalized());
        assert!(!ChunkStatus::Implementing.is_finalized());
        assert!(!ChunkStatus::Future.is_finalized());
    }
}
