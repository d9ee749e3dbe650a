//! Stage capability and the built-in stage implementations.

pub mod command;
pub mod embed;
pub mod rank;

use std::sync::Arc;

use async_trait::async_trait;

use paperrank_core::cancel::CancelFlag;
use paperrank_core::config::{PaperrankConfig, StageBackend, StageConfig};
use paperrank_ranking::ColumnSink;
use paperrank_storage::Database;

use crate::error::StageError;
use crate::orchestrator::StageSlot;

pub use command::CommandStage;
pub use embed::{EmbedStage, Embedder, HashEmbedder};
pub use rank::RankStage;

/// Inputs handed to every stage invocation.
#[derive(Clone, Debug)]
pub struct StageParams {
    /// Zero-based iteration index.
    pub iteration: u64,
    /// Collection query selected for this iteration.
    pub query: String,
    pub target_count: u32,
    /// Raised when the stage's deadline expires.
    pub cancel: CancelFlag,
}

/// Successful stage result with a short human-readable detail.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageReport {
    pub detail: String,
}

impl StageReport {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// One step of a pipeline iteration.
///
/// Returning `Err` marks the invocation as a failure. Implementations may
/// block only inside `spawn_blocking`; long blocking work should poll
/// `params.cancel`.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, params: &StageParams) -> Result<StageReport, StageError>;
}

/// Assemble the enabled stages in collect, extract, rank order.
pub fn build_stages(
    config: &PaperrankConfig,
    db: Arc<Database>,
    sink: Arc<dyn ColumnSink>,
) -> Result<Vec<StageSlot>, StageError> {
    let pipeline = &config.pipeline;
    let mut slots = Vec::new();

    if pipeline.collect.enabled {
        slots.push(slot(command_stage("collect", &pipeline.collect)?, &pipeline.collect));
    }

    if pipeline.extract.enabled {
        let stage: Arc<dyn Stage> = match pipeline.extract.backend {
            StageBackend::Builtin => Arc::new(EmbedStage::new(
                db.clone(),
                Arc::new(HashEmbedder::default()),
                u64::from(pipeline.target_count),
            )),
            StageBackend::Command => command_stage("extract", &pipeline.extract)?,
        };
        slots.push(slot(stage, &pipeline.extract));
    }

    if pipeline.rank.enabled {
        let stage: Arc<dyn Stage> = match pipeline.rank.backend {
            StageBackend::Builtin => Arc::new(RankStage::new(db, sink, config.ranking.clone())),
            StageBackend::Command => command_stage("rank", &pipeline.rank)?,
        };
        slots.push(slot(stage, &pipeline.rank));
    }

    Ok(slots)
}

fn command_stage(name: &str, config: &StageConfig) -> Result<Arc<dyn Stage>, StageError> {
    if config.backend != StageBackend::Command {
        return Err(StageError::Config(format!(
            "stage '{}' has no built-in implementation",
            name
        )));
    }
    Ok(Arc::new(CommandStage::new(name, config.command.clone())?))
}

fn slot(stage: Arc<dyn Stage>, config: &StageConfig) -> StageSlot {
    StageSlot {
        stage,
        timeout: config.timeout(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperrank_ranking::MemorySink;

    fn deps() -> (Arc<Database>, Arc<dyn ColumnSink>) {
        (
            Arc::new(Database::in_memory().unwrap()),
            Arc::new(MemorySink::new()),
        )
    }

    #[test]
    fn test_default_stages() {
        let (db, sink) = deps();
        let slots = build_stages(&PaperrankConfig::default(), db, sink).unwrap();
        let names: Vec<&str> = slots.iter().map(|s| s.stage.name()).collect();
        assert_eq!(names, vec!["collect", "extract", "rank"]);
        assert_eq!(slots[0].timeout.as_secs(), 300);
        assert_eq!(slots[1].timeout.as_secs(), 600);
        assert_eq!(slots[2].timeout.as_secs(), 1800);
    }

    #[test]
    fn test_disabled_stage_is_left_out() {
        let (db, sink) = deps();
        let mut config = PaperrankConfig::default();
        config.pipeline.collect.enabled = false;
        let slots = build_stages(&config, db, sink).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].stage.name(), "extract");
    }

    #[test]
    fn test_builtin_collect_is_rejected() {
        let (db, sink) = deps();
        let mut config = PaperrankConfig::default();
        config.pipeline.collect.backend = StageBackend::Builtin;
        assert!(matches!(
            build_stages(&config, db, sink),
            Err(StageError::Config(_))
        ));
    }
}
