use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ai::provider::TokenUsage;

/// Default retry ceiling per chunk. A chunk that fails this many recorded
/// attempts is permanently failed and gets skipped by the caller.
pub const MAX_CHUNK_RETRIES: u32 = 3;

/// What a chunk of generated code does within the model build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Setup,
    Headers,
    Data,
    Formulas,
    Formatting,
    Validation,
    Finalization,
}

impl ChunkType {
    pub fn label(&self) -> &'static str {
        match self {
            ChunkType::Setup => "setup",
            ChunkType::Headers => "headers",
            ChunkType::Data => "data",
            ChunkType::Formulas => "formulas",
            ChunkType::Formatting => "formatting",
            ChunkType::Validation => "validation",
            ChunkType::Finalization => "finalization",
        }
    }
}

/// Risk-ordered complexity classification: Simple < Medium < Complex < Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkComplexity {
    Simple,
    Medium,
    Complex,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Retrying,
}

/// One discrete unit of generated, executable spreadsheet code.
///
/// Created by the build state machine with status `Pending`; the caller
/// executes it out-of-process and reports the outcome back. `Completed` is
/// terminal. `Failed` may transition through `Retrying` back into execution
/// until `max_retries` attempts have been recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub chunk_type: ChunkType,
    pub complexity: ChunkComplexity,
    pub code: String,
    pub description: String,
    pub stage: u32,
    pub estimated_operations: u32,
    pub status: ExecutionStatus,
    pub execution_attempts: u32,
    pub max_retries: u32,
    pub error_history: Vec<String>,
    pub execution_time: Option<f64>,
    pub token_usage: Option<TokenUsage>,
    pub created_at: DateTime<Utc>,
}

impl CodeChunk {
    pub fn is_terminal_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// A failed chunk is retryable until its attempt budget is spent.
    pub fn is_retryable(&self) -> bool {
        self.status == ExecutionStatus::Failed && self.execution_attempts < self.max_retries
    }
}
