//! Per-stage performance log written by the orchestrator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use paperrank_core::error::PaperrankError;
use paperrank_core::types::StageOutcome;

use crate::db::{storage_err, Database};

/// One stage invocation as recorded in `stage_metrics`.
#[derive(Clone, Debug, PartialEq)]
pub struct StageMetric {
    pub run_id: Uuid,
    pub iteration: u64,
    pub stage: String,
    pub outcome: StageOutcome,
    pub duration_ms: u64,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregated outcomes for one stage across a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StageTally {
    pub stage: String,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub mean_duration_ms: f64,
}

pub struct StageMetricRepository {
    db: Arc<Database>,
}

impl StageMetricRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn record(&self, metric: &StageMetric) -> Result<(), PaperrankError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stage_metrics
                    (run_id, iteration, stage, outcome, duration_ms, detail, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    metric.run_id.to_string(),
                    metric.iteration as i64,
                    metric.stage,
                    metric.outcome.as_str(),
                    metric.duration_ms as i64,
                    metric.detail,
                    metric.recorded_at.timestamp_millis(),
                ],
            )
            .map_err(|e| PaperrankError::Storage(format!("Failed to record metric: {}", e)))?;
            Ok(())
        })
    }

    /// Metrics of one run in insertion order.
    pub fn for_run(&self, run_id: Uuid) -> Result<Vec<StageMetric>, PaperrankError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT iteration, stage, outcome, duration_ms, detail, recorded_at
                     FROM stage_metrics WHERE run_id = ?1 ORDER BY id",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([run_id.to_string()], |row| {
                    let outcome: String = row.get(2)?;
                    let recorded_ms: i64 = row.get(5)?;
                    Ok(StageMetric {
                        run_id,
                        iteration: row.get::<_, i64>(0)? as u64,
                        stage: row.get(1)?,
                        outcome: parse_outcome(&outcome),
                        duration_ms: row.get::<_, i64>(3)? as u64,
                        detail: row.get(4)?,
                        recorded_at: DateTime::<Utc>::from_timestamp_millis(recorded_ms)
                            .unwrap_or_default(),
                    })
                })
                .map_err(storage_err)?;

            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
    }

    /// Outcome counts per stage for one run, by stage name.
    pub fn tally(&self, run_id: Uuid) -> Result<Vec<StageTally>, PaperrankError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT stage,
                            SUM(outcome = 'success'),
                            SUM(outcome = 'failure'),
                            SUM(outcome = 'timeout'),
                            AVG(duration_ms)
                     FROM stage_metrics WHERE run_id = ?1
                     GROUP BY stage ORDER BY stage",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([run_id.to_string()], |row| {
                    Ok(StageTally {
                        stage: row.get(0)?,
                        successes: row.get::<_, i64>(1)? as u64,
                        failures: row.get::<_, i64>(2)? as u64,
                        timeouts: row.get::<_, i64>(3)? as u64,
                        mean_duration_ms: row.get(4)?,
                    })
                })
                .map_err(storage_err)?;

            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
    }
}

fn parse_outcome(s: &str) -> StageOutcome {
    match s {
        "success" => StageOutcome::Success,
        "timeout" => StageOutcome::Timeout,
        _ => StageOutcome::Failure,
    }
}
