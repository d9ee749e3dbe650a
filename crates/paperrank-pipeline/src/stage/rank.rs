//! In-process ranking stage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use paperrank_core::config::RankingConfig;
use paperrank_ranking::{run_ranking_cycle, ColumnSink, CycleReport, RankingError};
use paperrank_storage::{Database, PaperRepository};

use crate::error::StageError;
use crate::stage::{Stage, StageParams, StageReport};

pub struct RankStage {
    db: Arc<Database>,
    sink: Arc<dyn ColumnSink>,
    config: RankingConfig,
}

impl RankStage {
    pub fn new(db: Arc<Database>, sink: Arc<dyn ColumnSink>, config: RankingConfig) -> Self {
        Self { db, sink, config }
    }
}

fn describe(report: &CycleReport) -> String {
    if report.skipped {
        return format!(
            "skipped, too few usable embeddings ({} read, {} rejected)",
            report.snapshot_size,
            report.rejected.len()
        );
    }
    format!(
        "ranked {} sources, wrote {} rows, {} failed, {} rejected",
        report.sources_ranked,
        report.rows_written,
        report.rows_failed,
        report.rejected.len()
    )
}

#[async_trait]
impl Stage for RankStage {
    fn name(&self) -> &str {
        "rank"
    }

    async fn run(&self, params: &StageParams) -> Result<StageReport, StageError> {
        let db = self.db.clone();
        let sink = self.sink.clone();
        let config = self.config.clone();
        let cancel = params.cancel.clone();

        let result = tokio::task::spawn_blocking(move || {
            run_ranking_cycle(&PaperRepository::new(db), sink.as_ref(), &config, &cancel)
        })
        .await?;

        let report = match result {
            Ok(report) => report,
            Err(RankingError::Cancelled) => return Err(StageError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        if report.verified == Some(false) {
            warn!("Read-back of the first written row did not match");
        }
        // Rows were produced but none reached the sink.
        if report.sources_ranked > 0 && report.rows_written == 0 {
            return Err(StageError::Failed(format!(
                "no rows written, {} failed",
                report.rows_failed
            )));
        }
        Ok(StageReport::new(describe(&report)))
    }
}
