//! Content analysis of the target document: classify occupied regions per
//! sheet and produce placement guidance so generated chunks avoid
//! overwriting existing content. Pure functions of the snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Canonical guidance for a sheet with nothing on it.
pub const EMPTY_SHEET_GUIDANCE: &str = "use any range from A1";

/// Maximum occupied addresses listed explicitly before truncating.
const MAX_LISTED_CELLS: usize = 60;
/// An interior run of at least this many empty rows is a usable zone.
const MIN_GAP_ROWS: usize = 3;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Read-only document snapshot supplied by the caller. Opaque to the state
/// machine beyond the structural reads below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkbookSnapshot {
    #[serde(default)]
    pub sheets: Vec<SheetSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_ranges: Option<Value>,
}

/// One sheet: a 2-D grid of cell values plus flags. `data: None` means the
/// caller omitted the field entirely, which is treated like an empty grid
/// but logged distinctly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub data: Option<Vec<Vec<Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_range: Option<String>,
}

impl WorkbookSnapshot {
    /// The active sheet, or the first sheet when none is flagged.
    pub fn active_sheet(&self) -> Option<&SheetSnapshot> {
        self.sheets
            .iter()
            .find(|s| s.is_active)
            .or_else(|| self.sheets.first())
    }
}

// ---------------------------------------------------------------------------
// Content blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Headers,
    Assumptions,
    ProfitAndLoss,
    CashFlow,
    Valuation,
    YearHeaders,
    Formulas,
    DataValues,
    Labels,
}

impl BlockKind {
    fn label(&self) -> &'static str {
        match self {
            BlockKind::Headers => "headers",
            BlockKind::Assumptions => "assumptions",
            BlockKind::ProfitAndLoss => "P&L projections",
            BlockKind::CashFlow => "cash flow",
            BlockKind::Valuation => "valuation",
            BlockKind::YearHeaders => "year headers",
            BlockKind::Formulas => "formulas",
            BlockKind::DataValues => "data values",
            BlockKind::Labels => "labels/text",
        }
    }
}

/// Contiguous run of non-empty rows, classified by its first few cells.
#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    pub kind: BlockKind,
    /// 1-based inclusive row range.
    pub start_row: usize,
    pub end_row: usize,
    pub sample: String,
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn row_is_empty(row: &[Value]) -> bool {
    row.iter().all(|cell| cell_text(cell).is_empty())
}

fn looks_like_year(text: &str) -> bool {
    let t = text.trim_start_matches(|c: char| !c.is_ascii_digit());
    matches!(t.parse::<u32>(), Ok(y) if (1900..=2200).contains(&y))
}

/// Classify a block from its leading cells. Keyword groups are checked
/// before shape heuristics; the first matching rule wins.
fn classify_block(rows: &[&[Value]]) -> BlockKind {
    let lead_cells: Vec<String> = rows
        .iter()
        .take(2)
        .flat_map(|row| row.iter().take(6))
        .map(cell_text)
        .filter(|t| !t.is_empty())
        .collect();
    let joined = lead_cells.join(" ").to_lowercase();

    const VALUATION: &[&str] = &[
        "valuation", "npv", "wacc", "terminal value", "enterprise value", "irr", "discount",
    ];
    const CASH_FLOW: &[&str] = &["cash flow", "fcf", "free cash", "capex", "depreciation"];
    const PNL: &[&str] = &[
        "revenue", "cogs", "gross profit", "ebitda", "operating expense", "opex", "net income",
    ];
    const ASSUMPTIONS: &[&str] = &["assumption", "growth rate", "margin", "input", "driver"];

    if VALUATION.iter().any(|k| joined.contains(k)) {
        return BlockKind::Valuation;
    }
    if CASH_FLOW.iter().any(|k| joined.contains(k)) {
        return BlockKind::CashFlow;
    }
    if PNL.iter().any(|k| joined.contains(k)) {
        return BlockKind::ProfitAndLoss;
    }
    if ASSUMPTIONS.iter().any(|k| joined.contains(k)) {
        return BlockKind::Assumptions;
    }

    let year_count = lead_cells.iter().filter(|t| looks_like_year(t)).count();
    if year_count >= 2 {
        return BlockKind::YearHeaders;
    }
    if lead_cells.iter().any(|t| t.starts_with('=')) {
        return BlockKind::Formulas;
    }

    let numeric_count = lead_cells
        .iter()
        .filter(|t| t.parse::<f64>().is_ok())
        .count();
    if !lead_cells.is_empty() && numeric_count * 2 > lead_cells.len() {
        return BlockKind::DataValues;
    }

    // An all-text run at the very top of the sheet reads as headers.
    if rows.len() <= 2 && numeric_count == 0 && !lead_cells.is_empty() {
        return BlockKind::Headers;
    }

    BlockKind::Labels
}

/// Group contiguous non-empty rows into classified content blocks.
pub fn find_content_blocks(data: &[Vec<Value>]) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, row) in data.iter().enumerate() {
        if row_is_empty(row) {
            if let Some(start) = run_start.take() {
                blocks.push(make_block(data, start, i - 1));
            }
        } else if run_start.is_none() {
            run_start = Some(i);
        }
    }
    if let Some(start) = run_start {
        blocks.push(make_block(data, start, data.len() - 1));
    }

    blocks
}

fn make_block(data: &[Vec<Value>], start: usize, end: usize) -> ContentBlock {
    let rows: Vec<&[Value]> = data[start..=end].iter().map(|r| r.as_slice()).collect();
    let kind = classify_block(&rows);
    let sample = rows
        .first()
        .map(|row| {
            row.iter()
                .map(cell_text)
                .filter(|t| !t.is_empty())
                .take(4)
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .unwrap_or_default();

    ContentBlock {
        kind,
        start_row: start + 1,
        end_row: end + 1,
        sample,
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Textual structural summary of one sheet.
pub fn summarize_sheet(sheet: &SheetSnapshot) -> String {
    let data = match &sheet.data {
        Some(data) => data,
        None => {
            debug!(sheet = %sheet.name, "sheet snapshot has no data field");
            return format!("Sheet '{}': empty", sheet.name);
        }
    };

    let blocks = find_content_blocks(data);
    if blocks.is_empty() {
        return format!("Sheet '{}': empty", sheet.name);
    }

    let mut lines = vec![format!(
        "Sheet '{}': {} content block(s)",
        sheet.name,
        blocks.len()
    )];
    for block in &blocks {
        lines.push(format!(
            "  rows {}-{}: {} ({})",
            block.start_row,
            block.end_row,
            block.kind.label(),
            block.sample
        ));
    }
    lines.join("\n")
}

/// Structural summary of the whole workbook, capped at the first three
/// sheets to keep generation context small.
pub fn summarize_workbook(snapshot: &WorkbookSnapshot) -> String {
    if snapshot.sheets.is_empty() {
        return "Empty workbook".to_string();
    }
    snapshot
        .sheets
        .iter()
        .take(3)
        .map(summarize_sheet)
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Placement guidance
// ---------------------------------------------------------------------------

/// Column index (0-based) to spreadsheet letter: 0 -> A, 25 -> Z, 26 -> AA.
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_else(|_| "A".to_string())
}

/// Placement guidance for one sheet: which cells are occupied, where it is
/// safe to start writing, and any interior empty zones. An empty sheet (or
/// one with no data field at all) yields the canonical "anywhere" message.
pub fn placement_guidance(sheet: &SheetSnapshot) -> String {
    let data = match &sheet.data {
        Some(data) => data,
        None => {
            debug!(sheet = %sheet.name, "no data field in snapshot; treating as empty sheet");
            return EMPTY_SHEET_GUIDANCE.to_string();
        }
    };

    let mut occupied = Vec::new();
    let mut populated_rows = Vec::new();
    for (r, row) in data.iter().enumerate() {
        let mut row_has_content = false;
        for (c, cell) in row.iter().enumerate() {
            if !cell_text(cell).is_empty() {
                row_has_content = true;
                occupied.push(format!("{}{}", column_letter(c), r + 1));
            }
        }
        if row_has_content {
            populated_rows.push(r + 1);
        }
    }

    if occupied.is_empty() {
        return EMPTY_SHEET_GUIDANCE.to_string();
    }

    let last_row = *populated_rows.last().unwrap_or(&0);
    let safe_row = last_row + 2;

    let mut listed = occupied.clone();
    let overflow = listed.len().saturating_sub(MAX_LISTED_CELLS);
    listed.truncate(MAX_LISTED_CELLS);
    let mut cells_line = listed.join(", ");
    if overflow > 0 {
        cells_line.push_str(&format!(" and {} more", overflow));
    }

    let mut lines = vec![
        format!("Occupied cells (do not overwrite): {}", cells_line),
        format!("Safe to start writing at row {}", safe_row),
    ];

    let gaps = interior_gaps(&populated_rows);
    if !gaps.is_empty() {
        let zones = gaps
            .iter()
            .map(|(start, end)| format!("rows {}-{}", start, end))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Alternative empty zones: {}", zones));
    }

    lines.join("\n")
}

/// Runs of >= MIN_GAP_ROWS empty rows strictly between populated rows.
fn interior_gaps(populated_rows: &[usize]) -> Vec<(usize, usize)> {
    let mut gaps = Vec::new();
    for pair in populated_rows.windows(2) {
        let gap_len = pair[1].saturating_sub(pair[0] + 1);
        if gap_len >= MIN_GAP_ROWS {
            gaps.push((pair[0] + 1, pair[1] - 1));
        }
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sheet(data: Vec<Vec<Value>>) -> SheetSnapshot {
        SheetSnapshot {
            name: "Sheet1".to_string(),
            is_active: true,
            data: Some(data),
            used_range: None,
        }
    }

    #[test]
    fn test_empty_sheet_guidance_literal() {
        let s = sheet(vec![]);
        assert_eq!(placement_guidance(&s), EMPTY_SHEET_GUIDANCE);
        assert_eq!(placement_guidance(&s), "use any range from A1");
    }

    #[test]
    fn test_missing_data_field_same_as_empty() {
        let s = SheetSnapshot {
            name: "Sheet1".to_string(),
            is_active: true,
            data: None,
            used_range: None,
        };
        assert_eq!(placement_guidance(&s), EMPTY_SHEET_GUIDANCE);
    }

    #[test]
    fn test_all_blank_rows_are_empty() {
        let s = sheet(vec![vec![json!(""), json!(null)], vec![json!("")]]);
        assert_eq!(placement_guidance(&s), EMPTY_SHEET_GUIDANCE);
    }

    #[test]
    fn test_occupied_cells_and_safe_row() {
        let s = sheet(vec![
            vec![json!("DCF Model"), json!("")],
            vec![json!("Revenue"), json!(100)],
        ]);
        let guidance = placement_guidance(&s);
        assert!(guidance.contains("A1"));
        assert!(guidance.contains("A2"));
        assert!(guidance.contains("B2"));
        assert!(!guidance.contains("B1,"));
        assert!(guidance.contains("Safe to start writing at row 4"));
    }

    #[test]
    fn test_interior_gap_detection() {
        let mut data = vec![vec![json!("Header")]];
        for _ in 0..4 {
            data.push(vec![json!("")]);
        }
        data.push(vec![json!("Totals")]);
        let guidance = placement_guidance(&sheet(data));
        assert!(guidance.contains("Alternative empty zones: rows 2-5"));
    }

    #[test]
    fn test_small_gap_not_flagged() {
        let data = vec![
            vec![json!("a")],
            vec![json!("")],
            vec![json!("")],
            vec![json!("b")],
        ];
        let guidance = placement_guidance(&sheet(data));
        assert!(!guidance.contains("Alternative empty zones"));
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
    }

    #[test]
    fn test_block_classification_assumptions() {
        let data = vec![
            vec![json!("Assumptions")],
            vec![json!("Growth rate"), json!(0.05)],
        ];
        let blocks = find_content_blocks(&data);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Assumptions);
        assert_eq!(blocks[0].start_row, 1);
        assert_eq!(blocks[0].end_row, 2);
    }

    #[test]
    fn test_block_classification_year_headers() {
        let data = vec![vec![json!("Year"), json!(2024), json!(2025), json!(2026)]];
        let blocks = find_content_blocks(&data);
        assert_eq!(blocks[0].kind, BlockKind::YearHeaders);
    }

    #[test]
    fn test_block_classification_valuation() {
        let data = vec![vec![json!("NPV"), json!("=NPV(B1,B2:F2)")]];
        let blocks = find_content_blocks(&data);
        assert_eq!(blocks[0].kind, BlockKind::Valuation);
    }

    #[test]
    fn test_blocks_split_on_empty_rows() {
        let data = vec![
            vec![json!("Revenue"), json!(100)],
            vec![json!("")],
            vec![json!("Free cash flow"), json!(40)],
        ];
        let blocks = find_content_blocks(&data);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::ProfitAndLoss);
        assert_eq!(blocks[1].kind, BlockKind::CashFlow);
    }

    #[test]
    fn test_summarize_empty_workbook() {
        let snapshot = WorkbookSnapshot::default();
        assert_eq!(summarize_workbook(&snapshot), "Empty workbook");
    }

    #[test]
    fn test_summarize_sheet_includes_blocks() {
        let s = sheet(vec![vec![json!("Revenue"), json!(100), json!(110)]]);
        let summary = summarize_sheet(&s);
        assert!(summary.contains("Sheet 'Sheet1'"));
        assert!(summary.contains("rows 1-1"));
        assert!(summary.contains("P&L projections"));
        assert!(summary.contains("Revenue"));
    }

    #[test]
    fn test_active_sheet_selection() {
        let snapshot = WorkbookSnapshot {
            sheets: vec![
                SheetSnapshot {
                    name: "A".into(),
                    is_active: false,
                    data: None,
                    used_range: None,
                },
                SheetSnapshot {
                    name: "B".into(),
                    is_active: true,
                    data: None,
                    used_range: None,
                },
            ],
            ..Default::default()
        };
        assert_eq!(snapshot.active_sheet().unwrap().name, "B");
    }
}
