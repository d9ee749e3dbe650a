//! paperrank Pipeline crate - the batch orchestrator and its stages.
//!
//! Each iteration runs collect, extract/embed, and rank in order, each
//! under its own deadline. A circuit breaker halts the loop after too many
//! consecutive failed iterations.

pub mod error;
pub mod orchestrator;
pub mod stage;
pub mod summary;

pub use error::StageError;
pub use orchestrator::{
    required_successes, Orchestrator, OrchestratorOptions, PipelineContext, StageSlot,
};
pub use stage::{build_stages, Stage, StageParams, StageReport};
pub use summary::{HaltReason, IterationRecord, RunSummary, RunTotals, StageRun};
