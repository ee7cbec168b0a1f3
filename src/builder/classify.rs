//! Keyword/pattern heuristics that label a generated code fragment with a
//! type, a complexity, and an operation-count estimate. Pure functions of
//! their inputs; the rule tables are ordered and first-match-wins.

use crate::builder::chunk::{ChunkComplexity, ChunkType};

/// Complexity rules in priority order: critical > complex > medium.
/// A single critical keyword dominates regardless of other content.
const COMPLEXITY_RULES: &[(ChunkComplexity, &[&str])] = &[
    (
        ChunkComplexity::Critical,
        &["validation", "error", "critical", "key"],
    ),
    (
        ChunkComplexity::Complex,
        &["if(", "vlookup", "index", "match", "nested"],
    ),
    (
        ChunkComplexity::Medium,
        &["formulas", "format", "sum", "average"],
    ),
];

/// Substrings that look like one host API call each.
const OPERATION_PATTERNS: &[&str] = &[
    "getrange",
    "values =",
    "formulas =",
    "format.",
    "add(",
    "delete(",
    "insert(",
    "load(",
    "sync()",
];

pub fn analyze_code_complexity(code: &str) -> ChunkComplexity {
    let lower = code.to_lowercase();
    for (complexity, keywords) in COMPLEXITY_RULES {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *complexity;
        }
    }
    ChunkComplexity::Simple
}

/// Positional/keyword rules evaluated in fixed order. Stage 0 is always
/// setup and stage 1 defaults to headers; later stages are classified from
/// the code text, falling back to data entry.
pub fn determine_chunk_type(code: &str, stage: u32) -> ChunkType {
    let lower = code.to_lowercase();

    // Only sheet creation counts as setup past stage 0; getActiveWorksheet
    // appears in virtually every chunk and would swallow the later rules.
    if stage == 0 || lower.contains("worksheets.add") {
        ChunkType::Setup
    } else if lower.contains("header") || stage == 1 {
        ChunkType::Headers
    } else if lower.contains("values") && !lower.contains("format") {
        ChunkType::Data
    } else if lower.contains("formulas") || code.contains('=') {
        ChunkType::Formulas
    } else if lower.contains("format") || lower.contains("color") || lower.contains("font") {
        ChunkType::Formatting
    } else if lower.contains("validation") || lower.contains("datavalidation") {
        ChunkType::Validation
    } else {
        ChunkType::Data
    }
}

/// Count occurrences of API-call-shaped substrings; floor of 1.
pub fn estimate_operations(code: &str) -> u32 {
    let lower = code.to_lowercase();
    let count: usize = OPERATION_PATTERNS
        .iter()
        .map(|pattern| lower.matches(pattern).count())
        .sum();
    (count as u32).max(1)
}
