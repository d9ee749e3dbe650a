//! Batch pipeline orchestrator.
//!
//! Runs the configured stages in order, one iteration at a time, with a
//! per-stage deadline. An iteration succeeds when all but at most one of its
//! stages succeeded. After `max_consecutive_failures` failed iterations in
//! a row the loop halts for good.
//!
//! Shutdown is honoured between iterations and during the backoff pause,
//! never in the middle of a stage.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use paperrank_core::cancel::{CancelFlag, ShutdownSignal};
use paperrank_core::config::PipelineConfig;
use paperrank_core::error::{ErrorClass, PaperrankError};
use paperrank_core::types::{CorpusStats, StageOutcome};
use paperrank_storage::{Database, PaperRepository, StageMetric, StageMetricRepository};

use crate::stage::{Stage, StageParams};
use crate::summary::{HaltReason, IterationRecord, RunSummary, RunTotals, StageRun};

/// Shared handles for one orchestrator run.
#[derive(Clone)]
pub struct PipelineContext {
    pub run_id: Uuid,
    pub db: Arc<Database>,
    pub shutdown: ShutdownSignal,
}

impl PipelineContext {
    pub fn new(db: Arc<Database>, shutdown: ShutdownSignal) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            db,
            shutdown,
        }
    }
}

/// A stage together with its deadline.
#[derive(Clone)]
pub struct StageSlot {
    pub stage: Arc<dyn Stage>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct OrchestratorOptions {
    pub max_consecutive_failures: u32,
    pub success_delay: Duration,
    pub failure_delay: Duration,
    /// Unbounded when `None`.
    pub max_iterations: Option<u64>,
    pub target_count: u32,
    pub queries: Vec<String>,
    /// Recent iterations kept in `RunSummary::history`.
    pub history_limit: usize,
}

impl OrchestratorOptions {
    /// Run exactly one iteration.
    pub fn single(mut self) -> Self {
        self.max_iterations = Some(1);
        self
    }
}

impl From<&PipelineConfig> for OrchestratorOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            success_delay: config.success_delay(),
            failure_delay: config.failure_delay(),
            max_iterations: config.max_iterations,
            target_count: config.target_count,
            queries: config.queries.clone(),
            history_limit: config.history_limit,
        }
    }
}

/// Successes an iteration needs out of `stage_count` stages.
///
/// All but one; a single-stage pipeline needs its only stage.
pub fn required_successes(stage_count: usize) -> usize {
    if stage_count <= 1 {
        stage_count
    } else {
        stage_count - 1
    }
}

pub struct Orchestrator {
    ctx: PipelineContext,
    stages: Vec<StageSlot>,
    options: OrchestratorOptions,
    metrics: StageMetricRepository,
    papers: PaperRepository,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext, stages: Vec<StageSlot>, options: OrchestratorOptions) -> Self {
        Self {
            metrics: StageMetricRepository::new(ctx.db.clone()),
            papers: PaperRepository::new(ctx.db.clone()),
            ctx,
            stages,
            options,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id
    }

    /// Query used by the given iteration, round-robin over the list.
    pub fn query_for(&self, iteration: u64) -> String {
        let queries = &self.options.queries;
        if queries.is_empty() {
            return String::new();
        }
        queries[(iteration % queries.len() as u64) as usize].clone()
    }

    /// Drive iterations until the limit, a shutdown request, or the
    /// circuit breaker stops the loop. The summary is logged on every path.
    pub async fn run(&self) -> RunSummary {
        let shutdown = &self.ctx.shutdown;
        let stats_before = self.corpus_stats();

        info!(
            run_id = %self.ctx.run_id,
            stages = self.stages.len(),
            max_iterations = ?self.options.max_iterations,
            max_consecutive_failures = self.options.max_consecutive_failures,
            "Pipeline starting"
        );

        let mut totals = RunTotals::new(
            self.stages.iter().map(|s| s.stage.name().to_string()).collect(),
            self.options.history_limit,
        );
        let mut consecutive_failures: u32 = 0;
        let mut peak_consecutive_failures: u32 = 0;

        let halt = loop {
            let iteration = totals.iterations();
            if shutdown.is_triggered() {
                info!(iteration, "Shutdown requested, not starting another iteration");
                break HaltReason::Interrupted;
            }
            if self.limit_reached(iteration) {
                break HaltReason::Completed;
            }

            let record = self.run_iteration(iteration).await;
            let success = record.success;
            totals.record(record);

            if success {
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
                peak_consecutive_failures = peak_consecutive_failures.max(consecutive_failures);
                warn!(
                    iteration,
                    consecutive_failures,
                    max = self.options.max_consecutive_failures,
                    "Iteration failed"
                );
            }

            if consecutive_failures >= self.options.max_consecutive_failures {
                let err = PaperrankError::CircuitOpen(consecutive_failures);
                error!(
                    iteration,
                    error = %err,
                    error_class = err.class().as_str(),
                    "Halting pipeline"
                );
                break HaltReason::CircuitOpen;
            }
            if self.limit_reached(iteration + 1) {
                break HaltReason::Completed;
            }

            let delay = if success {
                self.options.success_delay
            } else {
                self.options.failure_delay
            };
            info!(delay_secs = delay.as_secs(), "Waiting before next iteration");
            if !shutdown.sleep(delay).await {
                info!("Shutdown requested during backoff");
                break HaltReason::Interrupted;
            }
        };

        let summary = totals.finish(
            self.ctx.run_id,
            peak_consecutive_failures,
            halt,
            stats_before,
            self.corpus_stats(),
        );
        summary.log();
        summary
    }

    fn limit_reached(&self, completed: u64) -> bool {
        self.options
            .max_iterations
            .is_some_and(|max| completed >= max)
    }

    async fn run_iteration(&self, iteration: u64) -> IterationRecord {
        let query = self.query_for(iteration);
        info!(iteration, query = %query, "Iteration starting");

        let mut stages = Vec::with_capacity(self.stages.len());
        for slot in &self.stages {
            let params = StageParams {
                iteration,
                query: query.clone(),
                target_count: self.options.target_count,
                cancel: CancelFlag::new(),
            };
            let run = self.run_stage(slot, params).await;
            self.record_metric(iteration, &run);
            stages.push(run);
        }

        let successes = stages.iter().filter(|s| s.outcome.is_success()).count();
        let success = successes >= required_successes(stages.len());
        info!(
            iteration,
            successes,
            stages = stages.len(),
            success,
            "Iteration finished"
        );

        IterationRecord {
            index: iteration,
            query,
            stages,
            success,
        }
    }

    /// Run one stage on its own task under its deadline.
    async fn run_stage(&self, slot: &StageSlot, params: StageParams) -> StageRun {
        let name = slot.stage.name().to_string();
        let cancel = params.cancel.clone();
        let stage = slot.stage.clone();
        let started = Instant::now();

        info!(stage = %name, timeout_secs = slot.timeout.as_secs(), "Stage starting");
        let mut handle = tokio::spawn(async move { stage.run(&params).await });

        let (outcome, detail, class) = match tokio::time::timeout(slot.timeout, &mut handle).await {
            Ok(Ok(Ok(report))) => (StageOutcome::Success, report.detail, None),
            Ok(Ok(Err(e))) => (StageOutcome::Failure, e.to_string(), Some(e.class())),
            Ok(Err(join)) if join.is_panic() => (
                StageOutcome::Failure,
                "stage panicked".to_string(),
                Some(ErrorClass::ResourceExhaustion),
            ),
            Ok(Err(_)) => (
                StageOutcome::Failure,
                "stage task cancelled".to_string(),
                Some(ErrorClass::ResourceExhaustion),
            ),
            Err(_) => {
                cancel.cancel();
                handle.abort();
                let err = PaperrankError::Timeout(slot.timeout.as_secs());
                (StageOutcome::Timeout, err.to_string(), Some(err.class()))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match class {
            None => info!(stage = %name, duration_ms, detail = %detail, "Stage succeeded"),
            Some(class) => warn!(
                stage = %name,
                outcome = outcome.as_str(),
                error_class = class.as_str(),
                duration_ms,
                detail = %detail,
                "Stage did not succeed"
            ),
        }

        StageRun {
            stage: name,
            outcome,
            duration_ms,
            detail,
        }
    }

    fn record_metric(&self, iteration: u64, run: &StageRun) {
        let metric = StageMetric {
            run_id: self.ctx.run_id,
            iteration,
            stage: run.stage.clone(),
            outcome: run.outcome,
            duration_ms: run.duration_ms,
            detail: Some(run.detail.clone()).filter(|d| !d.is_empty()),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.metrics.record(&metric) {
            warn!(stage = %run.stage, error = %e, "Failed to record stage metric");
        }
    }

    fn corpus_stats(&self) -> Option<CorpusStats> {
        match self.papers.stats() {
            Ok(stats) => {
                info!(
                    papers = stats.total_papers,
                    embedded = stats.with_embeddings,
                    coverage = format!("{:.1}%", stats.coverage_pct()),
                    "Corpus status"
                );
                Some(stats)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read corpus statistics");
                None
            }
        }
    }
}
