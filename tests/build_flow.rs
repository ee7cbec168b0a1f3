//! End-to-end build loop scenarios driven through the library API with a
//! scripted generator standing in for the AI provider.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use sheetsmith::builder::analyze::WorkbookSnapshot;
use sheetsmith::builder::{
    ChunkGenerator, ExecutionStatus, GenerateRequest, GeneratedChunk, IncrementalBuilder,
    MAX_CHUNK_RETRIES,
};
use sheetsmith::error::AppError;

const SETUP_CODE: &str = "await Excel.run(async (context) => {\n    const sheet = context.workbook.worksheets.getActiveWorksheet();\n    sheet.getRange(\"A1\").values = [[\"NPV Model\"]];\n    await context.sync();\n});";

const FORMULA_CODE: &str = "await Excel.run(async (context) => {\n    const sheet = context.workbook.worksheets.getActiveWorksheet();\n    sheet.getRange(\"B5\").formulas = [[\"=NPV(B2,C3:G3)\"]];\n    await context.sync();\n});";

struct CountingGenerator {
    calls: AtomicUsize,
}

impl CountingGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChunkGenerator for CountingGenerator {
    async fn generate(&self, _req: &GenerateRequest) -> Result<GeneratedChunk, AppError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let code = if n == 0 { SETUP_CODE } else { FORMULA_CODE };
        Ok(GeneratedChunk {
            code: code.to_string(),
            token_usage: None,
        })
    }
}

/// One success and two chunks failed to exhaustion: success rate lands at
/// one third and the failed chunks stop being retryable.
#[tokio::test]
async fn mixed_outcome_session_reports_one_third_success() {
    let builder = IncrementalBuilder::new();
    let generator = CountingGenerator::new();
    builder
        .start_build("s1", "npv", "npv of a cash flow series", WorkbookSnapshot::default())
        .await;

    let first = builder
        .generate_next_chunk("s1", &generator, None)
        .await
        .unwrap();
    assert_eq!(first.id, "chunk_1");
    assert_eq!(first.status, ExecutionStatus::Pending);
    builder
        .record_chunk_execution("s1", "chunk_1", true, None, Some(0.3), None)
        .await;

    for chunk_n in 2..=3 {
        let chunk = builder
            .generate_next_chunk("s1", &generator, None)
            .await
            .unwrap();
        assert_eq!(chunk.id, format!("chunk_{}", chunk_n));

        builder
            .record_chunk_execution("s1", &chunk.id, false, Some("array shape mismatch"), None, None)
            .await;
        assert!(builder.should_retry_chunk("s1", &chunk.id).await);

        // Burn the remaining retry budget.
        for _ in 1..MAX_CHUNK_RETRIES {
            let retry = builder.take_retry_chunk("s1", &chunk.id).await.unwrap();
            assert_eq!(retry.status, ExecutionStatus::InProgress);
            builder
                .record_chunk_execution("s1", &chunk.id, false, Some("array shape mismatch"), None, None)
                .await;
        }
        assert!(!builder.should_retry_chunk("s1", &chunk.id).await);
        assert!(builder.take_retry_chunk("s1", &chunk.id).await.is_none());
    }

    let report = builder.get_build_progress("s1").await.unwrap();
    assert_eq!(report.total_chunks, 3);
    assert_eq!(report.completed_chunks, 1);
    assert_eq!(report.failed_chunks, 2);
    assert!((report.success_rate - 33.33).abs() < 0.01);
    // Same error string across attempts collapses to one pattern.
    assert_eq!(report.error_patterns, vec!["array shape mismatch".to_string()]);
    assert!(!report.complete);
}

/// An unknown model kind uses the generic six-stage table and finishes once
/// the terminal stage and completion floor are both met.
#[tokio::test]
async fn generic_build_runs_to_terminal_stage() {
    let builder = IncrementalBuilder::new();
    let generator = CountingGenerator::new();
    builder
        .start_build("s1", "mystery_model", "whatever", WorkbookSnapshot::default())
        .await;

    let mut completed = 0;
    while !builder.is_build_complete("s1").await {
        let chunk = builder
            .generate_next_chunk("s1", &generator, None)
            .await
            .unwrap();
        builder
            .record_chunk_execution("s1", &chunk.id, true, None, None, None)
            .await;
        completed += 1;
        assert!(completed <= 60, "build never completed");
    }

    // Generic table: terminal stage 6 needs 28 completions, but the overall
    // completion ceiling of 25 fires first.
    assert_eq!(completed, 25);
    let report = builder.get_build_progress("s1").await.unwrap();
    assert!(report.complete);
    assert_eq!(report.progress_percentage, 100.0);
}

/// Every chunk failing permanently trips the failure ceiling rather than
/// looping forever.
#[tokio::test]
async fn failure_ceiling_stops_a_doomed_build() {
    let builder = IncrementalBuilder::new();
    let generator = CountingGenerator::new();
    builder
        .start_build("s1", "dcf", "doomed", WorkbookSnapshot::default())
        .await;

    let mut generated = 0;
    while !builder.is_build_complete("s1").await {
        let chunk = builder
            .generate_next_chunk("s1", &generator, None)
            .await
            .unwrap();
        builder
            .record_chunk_execution("s1", &chunk.id, false, Some("sheet locked"), None, None)
            .await;
        generated += 1;
        assert!(generated <= 60, "build never completed");
    }

    assert_eq!(generated, 16);
    let report = builder.get_build_progress("s1").await.unwrap();
    assert_eq!(report.completed_chunks, 0);
    assert_eq!(report.success_rate, 0.0);
}

/// A caller that keeps requesting chunks without ever reporting outcomes
/// still terminates once total generation crosses the ceiling.
#[tokio::test]
async fn unreported_generation_trips_total_ceiling() {
    let builder = IncrementalBuilder::new();
    let generator = CountingGenerator::new();
    builder
        .start_build("s1", "dcf", "runaway", WorkbookSnapshot::default())
        .await;

    for _ in 0..50 {
        builder
            .generate_next_chunk("s1", &generator, None)
            .await
            .unwrap();
    }
    assert!(!builder.is_build_complete("s1").await);

    builder
        .generate_next_chunk("s1", &generator, None)
        .await
        .unwrap();
    assert!(builder.is_build_complete("s1").await);

    let report = builder.get_build_progress("s1").await.unwrap();
    assert_eq!(report.total_chunks, 51);
    assert_eq!(report.completed_chunks, 0);
    assert_eq!(report.failed_chunks, 0);
    assert!(report.complete);
}

/// Cleanup removes the session; later calls see an unknown session.
#[tokio::test]
async fn cleanup_detaches_the_session() {
    let builder = IncrementalBuilder::new();
    let generator = CountingGenerator::new();
    builder
        .start_build("s1", "npv", "short lived", WorkbookSnapshot::default())
        .await;
    builder
        .generate_next_chunk("s1", &generator, None)
        .await
        .unwrap();

    assert!(builder.cleanup_session("s1").await);
    assert!(!builder.cleanup_session("s1").await);
    assert!(builder.get_build_progress("s1").await.is_none());
    assert!(
        !builder
            .record_chunk_execution("s1", "chunk_1", true, None, None, None)
            .await
    );
    assert!(matches!(
        builder.generate_next_chunk("s1", &generator, None).await,
        Err(AppError::SessionNotFound(_))
    ));
}

/// Restarting a session id replaces the old state entirely.
#[tokio::test]
async fn restart_replaces_previous_session_state() {
    let builder = IncrementalBuilder::new();
    let generator = CountingGenerator::new();
    builder
        .start_build("s1", "npv", "first run", WorkbookSnapshot::default())
        .await;
    let chunk = builder
        .generate_next_chunk("s1", &generator, None)
        .await
        .unwrap();
    builder
        .record_chunk_execution("s1", &chunk.id, true, None, None, None)
        .await;

    let report = builder
        .start_build("s1", "dcf", "second run", WorkbookSnapshot::default())
        .await;
    assert_eq!(report.model_kind, "dcf");
    assert_eq!(report.total_chunks, 0);
    assert_eq!(report.completed_chunks, 0);

    let progress = builder.get_build_progress("s1").await.unwrap();
    assert_eq!(progress.total_chunks, 0);
}
