//! One ranking cycle: snapshot, rank, write, verify.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use paperrank_core::cancel::CancelFlag;
use paperrank_core::config::RankingConfig;
use paperrank_core::types::RejectedEmbedding;
use paperrank_storage::PaperRepository;

use crate::engine::{partition, RankingEngine, RankingOptions};
use crate::error::RankingError;
use crate::sink::ColumnSink;
use crate::writer::{RankedResultWriter, RowLayout};

/// What a ranking cycle did.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Rows returned by the snapshot query.
    pub snapshot_size: usize,
    pub rejected: Vec<RejectedEmbedding>,
    pub dimension: Option<usize>,
    pub sources_ranked: usize,
    pub rows_written: usize,
    pub rows_failed: usize,
    /// Sample read-back result; `None` when nothing was written.
    pub verified: Option<bool>,
    /// Too few valid records to rank.
    pub skipped: bool,
    pub elapsed: Duration,
}

/// Run one full cycle against `sink`.
///
/// The snapshot is read exactly once; papers embedded while the cycle runs
/// are picked up by the next one.
pub fn run_ranking_cycle(
    papers: &PaperRepository,
    sink: &dyn ColumnSink,
    config: &RankingConfig,
    cancel: &CancelFlag,
) -> Result<CycleReport, RankingError> {
    let started = Instant::now();
    let snapshot = papers.snapshot()?;
    let snapshot_size = snapshot.records.len() + snapshot.rejected.len();
    info!(
        records = snapshot.records.len(),
        unparseable = snapshot.rejected.len(),
        "Embedding snapshot loaded"
    );

    let engine = RankingEngine::new(RankingOptions::from(config))?;
    let split = partition(snapshot.records, config.expected_dim);
    let mut rejected = snapshot.rejected;
    rejected.extend(split.rejected);

    if split.accepted.len() < config.min_papers.max(2) {
        info!(
            valid = split.accepted.len(),
            min_papers = config.min_papers,
            "Too few embedded papers, skipping ranking"
        );
        return Ok(CycleReport {
            snapshot_size,
            rejected,
            dimension: split.dimension,
            skipped: true,
            elapsed: started.elapsed(),
            ..Default::default()
        });
    }

    let output = engine.rank(split.accepted, cancel)?;
    let writer = RankedResultWriter::new(sink, RowLayout::from(config));
    let summary = writer.write_all(&output, Utc::now(), cancel)?;

    let verified = match output.sources.first() {
        Some(first) if summary.written > 0 => Some(writer.verify(first.source_id)?),
        _ => None,
    };

    let report = CycleReport {
        snapshot_size,
        rejected,
        dimension: output.dimension,
        sources_ranked: output.sources.len(),
        rows_written: summary.written,
        rows_failed: summary.failed.len(),
        verified,
        skipped: false,
        elapsed: started.elapsed(),
    };

    info!(
        sources = report.sources_ranked,
        written = report.rows_written,
        failed = report.rows_failed,
        rejected = report.rejected.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Ranking cycle complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use paperrank_storage::{Database, NewPaper};

    use crate::sink::MemorySink;

    fn seeded(n: i64) -> PaperRepository {
        let repo = PaperRepository::new(Arc::new(Database::in_memory().unwrap()));
        for id in 1..=n {
            repo.insert(&NewPaper {
                id: Some(id),
                title: format!("Paper {}", id),
                ..Default::default()
            })
            .unwrap();
            let angle = id as f32 * 0.3;
            repo.set_embedding(id, &[angle.cos(), angle.sin()], "test-model", Utc::now())
                .unwrap();
        }
        repo
    }

    fn config(min_papers: usize) -> RankingConfig {
        RankingConfig {
            top_k: 3,
            min_papers,
            ..Default::default()
        }
    }

    #[test]
    fn test_cycle_writes_one_row_per_source() {
        let repo = seeded(5);
        let sink = MemorySink::new();
        let report = run_ranking_cycle(&repo, &sink, &config(2), &CancelFlag::new()).unwrap();

        assert!(!report.skipped);
        assert_eq!(report.snapshot_size, 5);
        assert_eq!(report.sources_ranked, 5);
        assert_eq!(report.rows_written, 5);
        assert_eq!(report.rows_failed, 0);
        assert_eq!(report.verified, Some(true));
        assert_eq!(report.dimension, Some(2));
        assert_eq!(sink.row_count("paper_similarities"), 5);
    }

    #[test]
    fn test_cycle_skips_small_corpus() {
        let repo = seeded(3);
        let sink = MemorySink::new();
        let report = run_ranking_cycle(&repo, &sink, &config(10), &CancelFlag::new()).unwrap();

        assert!(report.skipped);
        assert_eq!(report.rows_written, 0);
        assert_eq!(report.verified, None);
        assert_eq!(sink.tables_created(), 0);
    }

    #[test]
    fn test_cycle_reports_unparseable_rows() {
        let repo = seeded(4);
        repo.set_embedding_text(4, "[not,a,vector]", "test-model", Utc::now())
            .unwrap();
        let sink = MemorySink::new();
        let report = run_ranking_cycle(&repo, &sink, &config(2), &CancelFlag::new()).unwrap();

        assert_eq!(report.snapshot_size, 4);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].id, 4);
        assert_eq!(report.rows_written, 3);
    }

    #[test]
    fn test_cycle_cancelled() {
        let repo = seeded(4);
        let sink = MemorySink::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = run_ranking_cycle(&repo, &sink, &config(2), &cancel);
        assert!(matches!(result, Err(RankingError::Cancelled)));
    }
}
