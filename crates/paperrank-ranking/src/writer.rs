//! Persists Top-K lists as one column row per source.
//!
//! Row layout:
//!
//! | column                       | value                                  |
//! |------------------------------|----------------------------------------|
//! | `meta:source_title`          | source title                           |
//! | `meta:total_similarities`    | neighbor count                         |
//! | `meta:calculated_at`         | RFC 3339 timestamp of the batch        |
//! | `meta:model`                 | model tag of the source embedding      |
//! | `similar:rank_XX_paper_id`   | target id                              |
//! | `similar:rank_XX_title`      | target title                           |
//! | `similar:rank_XX_score`      | score with fixed decimal places        |
//! | `similar:full_data`          | JSON of the whole list                 |

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use paperrank_core::cancel::CancelFlag;
use paperrank_core::config::RankingConfig;

use crate::engine::{RankingOutput, SourceRanking};
use crate::error::{RankingError, SinkError};
use crate::sink::{ColumnRow, ColumnSink};

pub const META_FAMILY: &str = "meta";
pub const SIMILAR_FAMILY: &str = "similar";
/// Column that changes between otherwise identical writes.
pub const TIMESTAMP_COLUMN: &str = "meta:calculated_at";

/// Table name and key/score formatting.
#[derive(Clone, Debug, PartialEq)]
pub struct RowLayout {
    pub table: String,
    pub row_prefix: String,
    pub key_width: usize,
    pub score_precision: usize,
}

impl Default for RowLayout {
    fn default() -> Self {
        Self::from(&RankingConfig::default())
    }
}

impl From<&RankingConfig> for RowLayout {
    fn from(config: &RankingConfig) -> Self {
        Self {
            table: config.table.clone(),
            row_prefix: config.row_prefix.clone(),
            key_width: config.key_width,
            score_precision: config.score_precision,
        }
    }
}

impl RowLayout {
    /// Zero-padded row key, e.g. `paper_00001234`.
    pub fn row_key(&self, source_id: i64) -> String {
        format!(
            "{}{:0width$}",
            self.row_prefix,
            source_id,
            width = self.key_width
        )
    }

    pub fn format_score(&self, score: f64) -> String {
        format!("{:.prec$}", score, prec = self.score_precision)
    }
}

#[derive(Serialize)]
struct FullData<'a> {
    source_paper_id: i64,
    similarities: Vec<FullDataEntry<'a>>,
}

#[derive(Serialize)]
struct FullDataEntry<'a> {
    target_paper_id: i64,
    target_title: &'a str,
    similarity: f64,
    rank: usize,
}

/// Build the row for one source.
///
/// Apart from `meta:calculated_at` the row depends only on `source`.
pub fn encode_row(
    layout: &RowLayout,
    source: &SourceRanking,
    calculated_at: DateTime<Utc>,
) -> Result<ColumnRow, SinkError> {
    let mut row = ColumnRow::new(layout.row_key(source.source_id));

    row.put(META_FAMILY, "source_title", source.source_title.as_str());
    row.put(
        META_FAMILY,
        "total_similarities",
        source.neighbors.len().to_string(),
    );
    row.put(
        META_FAMILY,
        "calculated_at",
        calculated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    );
    row.put(META_FAMILY, "model", source.model_tag.as_str());

    for n in &source.neighbors {
        let prefix = format!("rank_{:02}", n.rank);
        row.put(
            SIMILAR_FAMILY,
            &format!("{}_paper_id", prefix),
            n.target_id.to_string(),
        );
        row.put(
            SIMILAR_FAMILY,
            &format!("{}_title", prefix),
            n.target_title.as_str(),
        );
        row.put(
            SIMILAR_FAMILY,
            &format!("{}_score", prefix),
            layout.format_score(n.score),
        );
    }

    let full = FullData {
        source_paper_id: source.source_id,
        similarities: source
            .neighbors
            .iter()
            .map(|n| FullDataEntry {
                target_paper_id: n.target_id,
                target_title: &n.target_title,
                similarity: n.score,
                rank: n.rank,
            })
            .collect(),
    };
    row.put(SIMILAR_FAMILY, "full_data", serde_json::to_string(&full)?);

    Ok(row)
}

/// A row that could not be written.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedRow {
    pub source_id: i64,
    pub error: String,
}

/// Outcome of writing one ranking output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteSummary {
    pub table_created: bool,
    pub written: usize,
    pub failed: Vec<FailedRow>,
}

pub struct RankedResultWriter<'a> {
    sink: &'a dyn ColumnSink,
    layout: RowLayout,
}

impl<'a> RankedResultWriter<'a> {
    pub fn new(sink: &'a dyn ColumnSink, layout: RowLayout) -> Self {
        Self { sink, layout }
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// Create the table and both families if they do not exist yet.
    pub fn prepare(&self) -> Result<bool, SinkError> {
        self.sink
            .ensure_table(&self.layout.table, &[META_FAMILY, SIMILAR_FAMILY])
    }

    /// Write every source's row.
    ///
    /// A failed row is recorded and the batch continues. `cancel` is
    /// checked before each row; rows already written stay in place.
    pub fn write_all(
        &self,
        output: &RankingOutput,
        calculated_at: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<WriteSummary, RankingError> {
        let mut summary = WriteSummary {
            table_created: self.prepare()?,
            ..Default::default()
        };

        for source in &output.sources {
            if cancel.is_cancelled() {
                warn!(
                    written = summary.written,
                    remaining = output.sources.len() - summary.written - summary.failed.len(),
                    "Result write cancelled"
                );
                return Err(RankingError::Cancelled);
            }

            let result = encode_row(&self.layout, source, calculated_at)
                .and_then(|row| self.sink.put_row(&self.layout.table, &row));

            match result {
                Ok(()) => {
                    summary.written += 1;
                    debug!(source_id = source.source_id, "Row written");
                }
                Err(e) => {
                    warn!(source_id = source.source_id, error = %e, "Row write failed");
                    summary.failed.push(FailedRow {
                        source_id: source.source_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            sink = self.sink.name(),
            table = %self.layout.table,
            written = summary.written,
            failed = summary.failed.len(),
            "Ranked results written"
        );
        Ok(summary)
    }

    /// Read back one source's row and check it carries a neighbor count.
    pub fn verify(&self, source_id: i64) -> Result<bool, SinkError> {
        let key = self.layout.row_key(source_id);
        let found = self
            .sink
            .get_row(&self.layout.table, &key)?
            .map(|row| row.get("meta:total_similarities").is_some())
            .unwrap_or(false);

        if found {
            debug!(row_key = %key, "Sample row verified");
        } else {
            warn!(row_key = %key, "Sample row missing from sink");
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use paperrank_core::types::RankedNeighbor;

    fn source(id: i64, neighbors: &[(i64, f64)]) -> SourceRanking {
        SourceRanking {
            source_id: id,
            source_title: format!("Paper {}", id),
            model_tag: "all-mpnet-base-v2".into(),
            neighbors: neighbors
                .iter()
                .enumerate()
                .map(|(i, (target, score))| RankedNeighbor {
                    source_id: id,
                    rank: i + 1,
                    target_id: *target,
                    target_title: format!("Paper {}", target),
                    score: *score,
                })
                .collect(),
        }
    }

    #[test]
    fn test_row_key_padding() {
        let layout = RowLayout::default();
        assert_eq!(layout.row_key(1234), "paper_00001234");
        assert_eq!(layout.row_key(123_456_789), "paper_123456789");
    }

    #[test]
    fn test_encode_row_columns() {
        let layout = RowLayout::default();
        let row = encode_row(
            &layout,
            &source(1, &[(3, std::f64::consts::FRAC_1_SQRT_2), (2, 0.0)]),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(row.key, "paper_00000001");
        assert_eq!(row.get("meta:source_title"), Some("Paper 1"));
        assert_eq!(row.get("meta:total_similarities"), Some("2"));
        assert_eq!(row.get("meta:model"), Some("all-mpnet-base-v2"));
        assert_eq!(row.get("similar:rank_01_paper_id"), Some("3"));
        assert_eq!(row.get("similar:rank_01_score"), Some("0.707107"));
        assert_eq!(row.get("similar:rank_02_title"), Some("Paper 2"));
        assert_eq!(row.get("similar:rank_02_score"), Some("0.000000"));
        assert!(row.get("similar:rank_03_paper_id").is_none());

        let full: serde_json::Value =
            serde_json::from_str(row.get("similar:full_data").unwrap()).unwrap();
        assert_eq!(full["source_paper_id"], 1);
        assert_eq!(full["similarities"][1]["target_paper_id"], 2);
        assert_eq!(full["similarities"][1]["rank"], 2);
    }

    #[test]
    fn test_write_all_continues_after_failed_row() {
        let sink = MemorySink::new();
        sink.fail_on("paper_00000002");
        let writer = RankedResultWriter::new(&sink, RowLayout::default());
        let output = RankingOutput {
            dimension: Some(2),
            sources: vec![source(1, &[(2, 0.5)]), source(2, &[(1, 0.5)]), source(3, &[(1, 0.1)])],
            rejected: vec![],
        };

        let summary = writer
            .write_all(&output, Utc::now(), &CancelFlag::new())
            .unwrap();
        assert!(summary.table_created);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].source_id, 2);
        assert!(writer.verify(1).unwrap());
        assert!(!writer.verify(2).unwrap());
    }

    #[test]
    fn test_write_all_cancelled() {
        let sink = MemorySink::new();
        let writer = RankedResultWriter::new(&sink, RowLayout::default());
        let output = RankingOutput {
            dimension: Some(2),
            sources: vec![source(1, &[(2, 0.5)])],
            rejected: vec![],
        };
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            writer.write_all(&output, Utc::now(), &cancel),
            Err(RankingError::Cancelled)
        ));
        assert_eq!(sink.row_count("paper_similarities"), 0);
    }
}
