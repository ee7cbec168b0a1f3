//! Incremental model-building engine: chunk lifecycle, session state,
//! document analysis, code sanitation, and the build state machine.

pub mod analyze;
pub mod chunk;
pub mod classify;
pub mod generator;
pub mod machine;
pub mod prompts;
pub mod sanitize;
pub mod session;
pub mod stages;

pub use chunk::{ChunkComplexity, ChunkType, CodeChunk, ExecutionStatus, MAX_CHUNK_RETRIES};
pub use generator::{ChunkGenerator, GenerateRequest, GeneratedChunk, ProviderGenerator};
pub use machine::{IncrementalBuilder, ProgressReport};
pub use session::{ModelBuildState, SessionStore, SessionSummary};
