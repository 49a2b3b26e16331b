// Symbolic reference containment

use std::collections::BTreeSet;

/// Parsed `[project::]path[#Symbol[::Nested...]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef<'a> {
    pub project: Option<&'a str>,
    pub path: &'a str,
    pub symbol: Vec<&'a str>,
}

pub fn parse_symbol_ref(reference: &str) -> SymbolRef<'_> {
    let reference = reference.trim();
    let (location, symbol) = match reference.split_once('#') {
        Some((location, symbol)) => (location, symbol),
        None => (reference, ""),
    };
    let (project, path) = match location.split_once("::") {
        Some((project, path)) => (Some(project), path),
        None => (None, location),
    };
    SymbolRef {
        project,
        path,
        symbol: symbol.split("::").filter(|s| !s.is_empty()).collect(),
    }
}

impl SymbolRef<'_> {
    /// True when one reference is the other or lies inside it.
    pub fn overlaps(&self, other: &SymbolRef<'_>) -> bool {
        if let (Some(a), Some(b)) = (self.project, other.project) {
            if a != b {
                return false;
            }
        }
        if self.path != other.path {
            return false;
        }
        let shared = self.symbol.len().min(other.symbol.len());
        self.symbol[..shared] == other.symbol[..shared]
    }
}

/// Containment in either direction
pub fn is_contained(a: &str, b: &str) -> bool {
    parse_symbol_ref(a).overlaps(&parse_symbol_ref(b))
}

/// Every overlapping pair, reported by its more specific reference.
pub fn find_overlapping_symbols(refs_a: &[String], refs_b: &[String]) -> Vec<String> {
    let mut found = BTreeSet::new();
    for a in refs_a {
        let parsed_a = parse_symbol_ref(a);
        for b in refs_b {
            let parsed_b = parse_symbol_ref(b);
            if parsed_a.overlaps(&parsed_b) {
                let narrower = if parsed_a.symbol.len() >= parsed_b.symbol.len() {
                    a
                } else {
                    b
                };
                found.insert(narrower.trim().to_string());
            }
        }
    }
    found.into_iter().collect()
}
