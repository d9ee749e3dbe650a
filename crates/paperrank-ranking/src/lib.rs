//! paperrank Ranking crate - cosine Top-K ranking and result persistence.
//!
//! The engine scores every unordered pair of embeddings once, keeps a
//! bounded Top-K per source, and the writer stores each list as one row in
//! a column sink (in memory, local SQLite, or an HBase REST gateway).

pub mod cycle;
pub mod engine;
pub mod error;
pub mod similarity;
pub mod sink;
pub mod topk;
pub mod writer;

pub use cycle::{run_ranking_cycle, CycleReport};
pub use engine::{RankingEngine, RankingOptions, RankingOutput, SourceRanking};
pub use error::{RankingError, SinkError};
pub use sink::{ColumnRow, ColumnSink, HBaseRestSink, MemorySink, SqliteColumnStore};
pub use writer::{RankedResultWriter, RowLayout, WriteSummary};
