//! paperrank Storage crate - SQLite persistence for papers, embeddings,
//! authors, stage metrics, and the local column store.
//!
//! Provides a WAL-mode SQLite database with migrations and repository
//! implementations operating on the shared `Database` handle.

pub mod authors;
pub mod db;
pub mod metrics;
pub mod migrations;
pub mod papers;

pub use authors::AuthorRepository;
pub use db::Database;
pub use metrics::{StageMetric, StageMetricRepository, StageTally};
pub use papers::{
    format_vector_text, parse_vector_text, EmbeddingSnapshot, NewPaper, PaperRepository,
    PendingPaper,
};
