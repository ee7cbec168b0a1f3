//! Stage planning: maps "chunks completed so far" plus a model kind onto a
//! discrete build stage, and describes what the next chunk should do.
//! Pure table lookups; completion criteria in the state machine depend on
//! this exact stage numbering.

/// Stage bands and completion targets for one model kind.
///
/// `thresholds[i]` is the exclusive upper bound of stage `i + 1`; a count at
/// or past the last threshold is the final stage (`thresholds.len() + 1`).
pub struct StageTable {
    pub kind: &'static str,
    pub thresholds: &'static [u32],
    pub descriptions: &'static [&'static str],
    /// Stage at which the build is considered structurally done.
    pub terminal_stage: u32,
    /// Minimum completed chunks required alongside the terminal stage.
    pub min_completed: u32,
}

const GENERIC: StageTable = StageTable {
    kind: "generic",
    thresholds: &[3, 8, 15, 22, 28],
    descriptions: &[
        "Create main model headers and initial setup",
        "Build detailed assumptions section with input cells",
        "Add revenue projections and growth calculations",
        "Implement operating expenses and cash flow calculations",
        "Create valuation formulas and summary outputs",
        "Apply professional formatting and final touches",
    ],
    terminal_stage: 6,
    min_completed: 15,
};

const DCF: StageTable = StageTable {
    kind: "dcf",
    thresholds: &[3, 6, 9, 12, 15, 18, 21, 24],
    descriptions: &[
        "Create the DCF sheet layout, title and year headers",
        "Build the assumptions section with growth, margin and discount rate inputs",
        "Add revenue projections driven by the growth assumptions",
        "Project operating expenses down to EBITDA",
        "Derive free cash flow from EBITDA, taxes and capex",
        "Add discount factors and present value of each year's cash flow",
        "Calculate terminal value and discount it to present",
        "Sum to enterprise value and derive the valuation outputs",
        "Apply professional formatting and validation checks",
    ],
    terminal_stage: 8,
    min_completed: 20,
};

const THREE_STATEMENT: StageTable = StageTable {
    kind: "three_statement",
    thresholds: &[3, 7, 11, 15, 19, 23, 26, 29],
    descriptions: &[
        "Create the sheet layout with income statement, balance sheet and cash flow sections",
        "Build the shared assumptions block with input cells",
        "Project revenue and cost of goods sold",
        "Complete the income statement down to net income",
        "Build the balance sheet asset side",
        "Build balance sheet liabilities and equity",
        "Derive the cash flow statement from the other two statements",
        "Link the statements and add balance checks",
        "Apply professional formatting and final touches",
    ],
    terminal_stage: 8,
    min_completed: 25,
};

/// Resolve the stage table for a model kind. Accepts "dcf",
/// "three_statement" (dash or underscore); anything else is generic.
pub fn table_for(model_kind: &str) -> &'static StageTable {
    match model_kind.to_lowercase().replace('-', "_").as_str() {
        "dcf" => &DCF,
        "three_statement" => &THREE_STATEMENT,
        _ => &GENERIC,
    }
}

/// Determine the current build stage (1-based) from completed chunk count.
pub fn determine_build_stage(completed_chunks: u32, model_kind: &str) -> u32 {
    let table = table_for(model_kind);
    for (i, threshold) in table.thresholds.iter().enumerate() {
        if completed_chunks < *threshold {
            return (i + 1) as u32;
        }
    }
    (table.thresholds.len() + 1) as u32
}

/// Human-readable target for the given stage.
pub fn next_stage_description(stage: u32, model_kind: &str) -> &'static str {
    let table = table_for(model_kind);
    let idx = stage.saturating_sub(1) as usize;
    table
        .descriptions
        .get(idx)
        .copied()
        .unwrap_or("Complete the model")
}

/// Total number of stages for the model kind.
pub fn stage_count(model_kind: &str) -> u32 {
    (table_for(model_kind).thresholds.len() + 1) as u32
}
