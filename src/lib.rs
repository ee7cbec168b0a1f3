//! Incremental spreadsheet model builder.
//!
//! Orchestrates LLM-driven generation of small executable spreadsheet code
//! chunks. Callers run each chunk against a live workbook and report the
//! outcome; the build machine tracks progress through model-kind-specific
//! stages and decides what to generate, retry, or skip next.

pub mod ai;
pub mod api;
pub mod builder;
pub mod config;
pub mod error;
pub mod state;

pub use builder::{IncrementalBuilder, ProgressReport};
pub use config::AppConfig;
pub use error::AppError;
pub use state::AppState;
