//! Best-effort normalization of raw generator output into executable code.
//!
//! Generated chunks are expected to be a statement sequence wrapped in
//! `await Excel.run(async (context) => { ... });`. The sanitizer strips
//! prose and markdown around that wrapper, checks structural balance, and
//! applies an ordered list of repair strategies. It never fails: code that
//! cannot be fully repaired is logged and handed on; execution failure and
//! the retry loop are the real correctness backstop.

use regex::Regex;
use tracing::warn;

/// Entry marker of a well-formed chunk.
pub const ENTRY_MARKER: &str = "await Excel.run";
/// Closing of the entry wrapper; prose after the last occurrence is dropped.
const EXIT_MARKER: &str = "});";

/// Lines that look like code when no entry marker is present at all.
const CODE_LINE_HINTS: &[&str] = &[
    "Excel.run",
    "const sheet",
    "sheet.getRange",
    "async (context)",
];

/// Statement tails that mean the final line was cut off mid-statement.
const INCOMPLETE_TAILS: &[&str] = &[
    "const", "let", "var", "sheet.", "context.", "format.", "getRange(", "values =",
    "formulas =", "{", "(", "[", ",", "+", "-", "*", "/", "^", "=", "&&", "||", ".",
];

// ---------------------------------------------------------------------------
// Structural checks
// ---------------------------------------------------------------------------

fn unbalanced(code: &str, open: char, close: char) -> i64 {
    let opens = code.matches(open).count() as i64;
    let closes = code.matches(close).count() as i64;
    opens - closes
}

fn has_odd_quote_count(code: &str) -> bool {
    code.matches('"').count() % 2 == 1
}

fn last_line(code: &str) -> &str {
    code.lines().last().unwrap_or("").trim_end()
}

fn line_ends_incomplete(line: &str) -> bool {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return false;
    }
    INCOMPLETE_TAILS.iter().any(|tail| trimmed.ends_with(tail))
        || trimmed.matches('"').count() % 2 == 1
}

/// Structural problems worth logging; empty means clean.
pub fn structural_issues(code: &str) -> Vec<String> {
    let mut issues = Vec::new();

    for (open, close, name) in [('{', '}', "braces"), ('(', ')', "parentheses"), ('[', ']', "brackets")] {
        let delta = unbalanced(code, open, close);
        if delta != 0 {
            issues.push(format!("unmatched {} (delta {})", name, delta));
        }
    }

    let flat = flat_array_violations(code);
    if flat > 0 {
        issues.push(format!(
            "{} flat array assignment(s); values/formulas must be nested arrays",
            flat
        ));
    }

    if code.contains(ENTRY_MARKER) && !code.contains("context.sync()") {
        issues.push("missing context.sync() before closure".to_string());
    }

    if has_odd_quote_count(code) {
        issues.push("odd quote count (unclosed string)".to_string());
    }

    if line_ends_incomplete(last_line(code)) {
        issues.push(format!("final line cut off: {:?}", last_line(code)));
    }

    issues
}

/// Count `.values = [...]` / `.formulas = [...]` assignments whose payload is
/// a flat array. Single values and single rows must still be wrapped in an
/// outer array.
pub fn flat_array_violations(code: &str) -> usize {
    let re = Regex::new(r"\.(?:values|formulas)\s*=\s*\[\s*([^\[\s])").unwrap();
    re.captures_iter(code).count()
}

/// Does the code look finished? Balance, closed strings, no truncated tail.
pub fn is_code_complete(code: &str) -> bool {
    if code.trim().is_empty() {
        return false;
    }
    if line_ends_incomplete(last_line(code)) {
        return false;
    }
    if has_odd_quote_count(code) {
        return false;
    }
    unbalanced(code, '{', '}') == 0
        && unbalanced(code, '(', ')') == 0
        && unbalanced(code, '[', ']') == 0
}

// ---------------------------------------------------------------------------
// Stripping
// ---------------------------------------------------------------------------

fn strip_markdown_fences(raw: &str) -> String {
    let fence_open = Regex::new(r"(?m)^```(?:javascript|js)?\s*$").unwrap();
    let mut cleaned = fence_open.replace_all(raw, "").to_string();
    // Inline-opened fences like "```js\ncode"
    if let Some(stripped) = cleaned.trim_start().strip_prefix("```") {
        cleaned = stripped
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
            .to_string();
    }
    cleaned.trim().to_string()
}

/// Drop explanatory text before the entry marker and after the last exit
/// marker. When no entry marker exists, fall back to the first line that
/// looks like code.
fn strip_surrounding_prose(code: &str) -> String {
    let lines: Vec<&str> = code.lines().collect();

    let start = lines
        .iter()
        .position(|line| line.contains(ENTRY_MARKER))
        .or_else(|| {
            lines
                .iter()
                .position(|line| CODE_LINE_HINTS.iter().any(|hint| line.contains(hint)))
        });

    let mut kept = match start {
        Some(idx) => lines[idx..].join("\n"),
        None => code.to_string(),
    };

    if let Some(pos) = kept.rfind(EXIT_MARKER) {
        kept.truncate(pos + EXIT_MARKER.len());
    }

    kept
}

// ---------------------------------------------------------------------------
// Repair strategies
// ---------------------------------------------------------------------------

/// One repair attempt. Returns `Some(new_code)` if it changed anything.
type RepairFn = fn(&str) -> Option<String>;

pub struct RepairStrategy {
    pub name: &'static str,
    apply: RepairFn,
}

/// Strategies in application order. After each change the completeness check
/// runs again, so later strategies only see what earlier ones could not fix.
/// The final fallback drops the truncated line entirely.
pub const REPAIR_STRATEGIES: &[RepairStrategy] = &[
    RepairStrategy {
        name: "wrap_flat_arrays",
        apply: wrap_flat_arrays,
    },
    RepairStrategy {
        name: "balance_brackets",
        apply: balance_brackets,
    },
    RepairStrategy {
        name: "insert_missing_sync",
        apply: insert_missing_sync,
    },
    RepairStrategy {
        name: "complete_truncated_tail",
        apply: complete_truncated_tail,
    },
    RepairStrategy {
        name: "drop_trailing_incomplete",
        apply: drop_trailing_incomplete,
    },
];

/// Rewrite single-line flat assignments `.values = ["a"]` as `[["a"]]`.
fn wrap_flat_arrays(code: &str) -> Option<String> {
    let re = Regex::new(r#"^(\s*.*?\.(?:values|formulas)\s*=\s*)\[(.*)\](;?)\s*$"#).unwrap();
    let mut changed = false;
    let lines: Vec<String> = code
        .lines()
        .map(|line| {
            if let Some(cap) = re.captures(line) {
                let inner = cap[2].trim();
                if !inner.starts_with('[') && !inner.is_empty() {
                    changed = true;
                    return format!("{}[[{}]]{}", &cap[1], inner, &cap[3]);
                }
            }
            line.to_string()
        })
        .collect();

    changed.then(|| lines.join("\n"))
}

/// Append missing closing brackets/braces/parens to balance counts.
/// Skipped while a string is still open; closing the quote comes first.
fn balance_brackets(code: &str) -> Option<String> {
    if has_odd_quote_count(code) {
        return None;
    }

    let missing_brackets = unbalanced(code, '[', ']').max(0) as usize;
    let missing_braces = unbalanced(code, '{', '}').max(0) as usize;
    let missing_parens = unbalanced(code, '(', ')').max(0) as usize;
    if missing_brackets + missing_braces + missing_parens == 0 {
        return None;
    }

    let mut fixed = code.to_string();
    fixed.push_str(&"]".repeat(missing_brackets));
    if missing_braces > 0 {
        fixed.push('\n');
        fixed.push_str(&"}".repeat(missing_braces));
    }
    fixed.push_str(&")".repeat(missing_parens));
    if missing_braces > 0 || missing_parens > 0 {
        fixed.push(';');
    }
    Some(fixed)
}

/// Insert the mandatory `await context.sync();` before the final closure.
fn insert_missing_sync(code: &str) -> Option<String> {
    if !code.contains(ENTRY_MARKER) || code.contains("context.sync()") {
        return None;
    }

    let mut lines: Vec<String> = code.lines().map(String::from).collect();
    let closing = lines.iter().rposition(|line| line.contains('}'))?;
    lines.insert(closing, "    await context.sync();".to_string());
    Some(lines.join("\n"))
}

/// Deterministic continuation for a recognizable truncated tail: close the
/// open string, then the open value array, then terminate the statement.
fn complete_truncated_tail(code: &str) -> Option<String> {
    let tail = last_line(code);
    let open_string = tail.matches('"').count() % 2 == 1;
    let open_assignment = (tail.contains(".values = [") || tail.contains(".formulas = ["))
        && !tail.trim_end().ends_with("]];")
        && !tail.trim_end().ends_with("]]");

    if !open_string && !open_assignment {
        return None;
    }

    let mut fixed = code.trim_end().to_string();
    if open_string {
        fixed.push('"');
    }
    if open_assignment {
        let missing = unbalanced(&fixed[fixed.rfind('\n').map(|p| p + 1).unwrap_or(0)..], '[', ']')
            .max(0) as usize;
        fixed.push_str(&"]".repeat(missing));
        fixed.push(';');
    }
    Some(fixed)
}

/// Last resort: drop the truncated final line so the rest stays executable.
fn drop_trailing_incomplete(code: &str) -> Option<String> {
    if !line_ends_incomplete(last_line(code)) {
        return None;
    }
    let mut lines: Vec<&str> = code.lines().collect();
    lines.pop()?;
    Some(lines.join("\n"))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Normalize raw generator output. Never fails; imperfect output is returned
/// anyway after a warning, and the execution/retry loop handles the rest.
pub fn sanitize_code(raw: &str) -> String {
    let mut code = strip_markdown_fences(raw);
    code = strip_surrounding_prose(&code);

    if is_code_complete(&code) && structural_issues(&code).is_empty() {
        return code;
    }

    // Two passes: a tail repair (closing an open string, dropping a cut-off
    // line) can expose balance/sync work for the earlier strategies.
    for _pass in 0..2 {
        for strategy in REPAIR_STRATEGIES {
            if let Some(repaired) = (strategy.apply)(&code) {
                code = repaired;
                if is_code_complete(&code) && structural_issues(&code).is_empty() {
                    return code;
                }
            }
        }
    }

    if !is_code_complete(&code) || !structural_issues(&code).is_empty() {
        warn!(
            issues = ?structural_issues(&code),
            "sanitizer could not fully repair chunk; handing to execution"
        );
    }
    code
}
