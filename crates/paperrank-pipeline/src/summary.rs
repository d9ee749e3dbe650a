//! End-of-run accounting.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use paperrank_core::types::{CorpusStats, StageOutcome};
use paperrank_storage::StageTally;

/// Why the orchestrator loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// The iteration limit was reached.
    Completed,
    /// Shutdown was requested.
    Interrupted,
    /// The consecutive-failure limit was reached.
    CircuitOpen,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::Completed => "completed",
            HaltReason::Interrupted => "interrupted",
            HaltReason::CircuitOpen => "circuit_open",
        }
    }
}

/// Outcome of one stage within an iteration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageRun {
    pub stage: String,
    pub outcome: StageOutcome,
    pub duration_ms: u64,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IterationRecord {
    pub index: u64,
    pub query: String,
    pub stages: Vec<StageRun>,
    pub success: bool,
}

impl IterationRecord {
    pub fn successes(&self) -> usize {
        self.stages.iter().filter(|s| s.outcome.is_success()).count()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct StageTotals {
    successes: u64,
    failures: u64,
    timeouts: u64,
    total_ms: u64,
}

impl StageTotals {
    fn add(&mut self, run: &StageRun) {
        match run.outcome {
            StageOutcome::Success => self.successes += 1,
            StageOutcome::Failure => self.failures += 1,
            StageOutcome::Timeout => self.timeouts += 1,
        }
        self.total_ms += run.duration_ms;
    }

    fn tally(&self, stage: &str) -> StageTally {
        let runs = self.successes + self.failures + self.timeouts;
        StageTally {
            stage: stage.to_string(),
            successes: self.successes,
            failures: self.failures,
            timeouts: self.timeouts,
            mean_duration_ms: if runs == 0 {
                0.0
            } else {
                self.total_ms as f64 / runs as f64
            },
        }
    }
}

/// Running accounting for one orchestrator run.
///
/// Counters are folded in as iterations finish; only the last
/// `history_limit` records are kept in full.
#[derive(Debug)]
pub struct RunTotals {
    stages: Vec<(String, StageTotals)>,
    iterations: u64,
    succeeded: u64,
    last_success: Option<bool>,
    recent: VecDeque<IterationRecord>,
    history_limit: usize,
}

impl RunTotals {
    /// `stages` in pipeline order.
    pub fn new(stages: Vec<String>, history_limit: usize) -> Self {
        Self {
            stages: stages
                .into_iter()
                .map(|name| (name, StageTotals::default()))
                .collect(),
            iterations: 0,
            succeeded: 0,
            last_success: None,
            recent: VecDeque::with_capacity(history_limit.min(64)),
            history_limit,
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn record(&mut self, record: IterationRecord) {
        self.iterations += 1;
        if record.success {
            self.succeeded += 1;
        }
        self.last_success = Some(record.success);

        for run in &record.stages {
            if let Some((_, totals)) = self.stages.iter_mut().find(|(name, _)| *name == run.stage) {
                totals.add(run);
            }
        }

        if self.history_limit == 0 {
            return;
        }
        if self.recent.len() == self.history_limit {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    pub fn stage_tallies(&self) -> Vec<StageTally> {
        self.stages
            .iter()
            .map(|(name, totals)| totals.tally(name))
            .collect()
    }

    pub fn finish(
        self,
        run_id: Uuid,
        peak_consecutive_failures: u32,
        halt: HaltReason,
        stats_before: Option<CorpusStats>,
        stats_after: Option<CorpusStats>,
    ) -> RunSummary {
        RunSummary {
            run_id,
            iterations: self.iterations,
            succeeded: self.succeeded,
            failed: self.iterations - self.succeeded,
            peak_consecutive_failures,
            stage_tallies: self.stage_tallies(),
            halt,
            last_success: self.last_success,
            stats_before,
            stats_after,
            history: self.recent.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub iterations: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Longest streak of failed iterations seen during the run.
    pub peak_consecutive_failures: u32,
    pub stage_tallies: Vec<StageTally>,
    pub halt: HaltReason,
    /// Outcome of the final iteration, `None` when none ran.
    pub last_success: Option<bool>,
    pub stats_before: Option<CorpusStats>,
    pub stats_after: Option<CorpusStats>,
    /// The most recent iterations, oldest first.
    pub history: Vec<IterationRecord>,
}

impl RunSummary {
    pub fn last_iteration_succeeded(&self) -> Option<bool> {
        self.last_success
    }

    /// Process exit status for this run.
    ///
    /// An open circuit is always a failure. Otherwise the run succeeds if
    /// its final iteration did, or if it stopped before any iteration
    /// completed.
    pub fn exit_code(&self) -> i32 {
        match (self.halt, self.last_iteration_succeeded()) {
            (HaltReason::CircuitOpen, _) => 1,
            (_, Some(true)) => 0,
            (_, Some(false)) => 1,
            (_, None) => 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.iterations as f64 * 100.0
        }
    }

    /// Emit the summary through tracing.
    pub fn log(&self) {
        if self.halt == HaltReason::CircuitOpen {
            error!(
                run_id = %self.run_id,
                consecutive_failures = self.peak_consecutive_failures,
                "Pipeline halted by circuit breaker"
            );
        }

        info!(
            run_id = %self.run_id,
            halt = self.halt.as_str(),
            iterations = self.iterations,
            succeeded = self.succeeded,
            failed = self.failed,
            success_rate = format!("{:.1}%", self.success_rate()),
            "Pipeline run finished"
        );

        for tally in &self.stage_tallies {
            info!(
                stage = %tally.stage,
                successes = tally.successes,
                failures = tally.failures,
                timeouts = tally.timeouts,
                mean_ms = format!("{:.0}", tally.mean_duration_ms),
                "Stage totals"
            );
        }

        if let (Some(before), Some(after)) = (&self.stats_before, &self.stats_after) {
            info!(
                papers_added = after.total_papers.saturating_sub(before.total_papers),
                embeddings_added = after.with_embeddings.saturating_sub(before.with_embeddings),
                coverage = format!("{:.1}%", after.coverage_pct()),
                "Corpus growth"
            );
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({})", self.run_id, self.halt.as_str())?;
        writeln!(
            f,
            "  iterations: {} ({} ok, {} failed, {:.1}% success)",
            self.iterations,
            self.succeeded,
            self.failed,
            self.success_rate()
        )?;
        for tally in &self.stage_tallies {
            writeln!(
                f,
                "  {:<8} ok={} failed={} timeout={} mean={:.0}ms",
                tally.stage, tally.successes, tally.failures, tally.timeouts, tally.mean_duration_ms
            )?;
        }
        if let Some(after) = &self.stats_after {
            write!(
                f,
                "  corpus: {} papers, {} embedded ({:.1}%)",
                after.total_papers,
                after.with_embeddings,
                after.coverage_pct()
            )?;
        }
        Ok(())
    }
}
