//! Paper and embedding persistence.
//!
//! Embeddings are stored as text in the `[v1,v2,...]` form used by vector
//! extensions, so externally produced vectors can be loaded as-is. Parsing
//! happens when a snapshot is taken; unparseable rows are reported, never
//! silently skipped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::{debug, warn};

use paperrank_core::error::PaperrankError;
use paperrank_core::types::{CorpusStats, PaperEmbedding, RejectedEmbedding};

use crate::db::{storage_err, Database};

/// Model tag recorded when an embedding row carries none.
const UNKNOWN_MODEL: &str = "unknown";

/// Fields required to register a paper.
#[derive(Clone, Debug, Default)]
pub struct NewPaper {
    /// Explicit id, or `None` to let SQLite assign one.
    pub id: Option<i64>,
    pub title: String,
    pub abstract_text: Option<String>,
    /// Raw extraction JSON, validated later by the embed stage.
    pub extraction: Option<String>,
}

/// A paper waiting for an embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingPaper {
    pub id: i64,
    pub title: String,
    pub abstract_text: Option<String>,
    pub extraction: Option<String>,
}

/// Consistent read of every stored embedding.
#[derive(Clone, Debug)]
pub struct EmbeddingSnapshot {
    /// Parsed records in ascending id order.
    pub records: Vec<PaperEmbedding>,
    /// Rows whose stored vector could not be parsed.
    pub rejected: Vec<RejectedEmbedding>,
    pub taken_at: DateTime<Utc>,
}

/// Parse a stored vector. Accepts `[a,b,c]` or a bare `a,b,c` list.
pub fn parse_vector_text(text: &str) -> Result<Vec<f32>, String> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed)
        .trim();

    if inner.is_empty() {
        return Err("empty vector".to_string());
    }

    let mut values = Vec::new();
    for (i, part) in inner.split(',').enumerate() {
        let value: f32 = part
            .trim()
            .parse()
            .map_err(|_| format!("component {} is not a number: {:?}", i, part.trim()))?;
        if !value.is_finite() {
            return Err(format!("component {} is not finite", i));
        }
        values.push(value);
    }
    Ok(values)
}

/// Format a vector for storage.
pub fn format_vector_text(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Repository for papers and their embeddings.
pub struct PaperRepository {
    db: Arc<Database>,
}

impl PaperRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register a paper and return its id.
    pub fn insert(&self, paper: &NewPaper) -> Result<i64, PaperrankError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO papers (id, title, abstract_text, extraction, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    paper.id,
                    paper.title,
                    paper.abstract_text,
                    paper.extraction,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(|e| PaperrankError::Storage(format!("Failed to insert paper: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Store (or replace) a paper's embedding.
    pub fn set_embedding(
        &self,
        id: i64,
        vector: &[f32],
        model_tag: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<(), PaperrankError> {
        self.set_embedding_text(id, &format_vector_text(vector), model_tag, generated_at)
    }

    /// Store an embedding already in text form, unvalidated.
    ///
    /// Used when loading vectors produced by external tooling.
    pub fn set_embedding_text(
        &self,
        id: i64,
        text: &str,
        model_tag: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<(), PaperrankError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE papers
                 SET embedding = ?2, embedding_model = ?3, embedding_generated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, text, model_tag, generated_at.timestamp_millis()],
            )
            .map_err(|e| PaperrankError::Storage(format!("Failed to store embedding: {}", e)))
        })?;

        if changed == 0 {
            return Err(PaperrankError::Storage(format!("Paper {} not found", id)));
        }
        Ok(())
    }

    /// Title of a paper, if it exists.
    pub fn title(&self, id: i64) -> Result<Option<String>, PaperrankError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT title FROM papers WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(storage_err)
        })
    }

    /// Note an embedding attempt that produced no vector.
    pub fn record_embedding_failure(&self, id: i64) -> Result<(), PaperrankError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE papers SET embedding_attempts = embedding_attempts + 1 WHERE id = ?1",
                [id],
            )
            .map_err(storage_err)?;
            Ok(())
        })
    }

    /// Papers without an embedding, fewest failed attempts first, then
    /// lowest id.
    pub fn missing_embeddings(&self, limit: u64) -> Result<Vec<PendingPaper>, PaperrankError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, abstract_text, extraction FROM papers
                     WHERE embedding IS NULL
                     ORDER BY embedding_attempts, id LIMIT ?1",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([limit as i64], |row| {
                    Ok(PendingPaper {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        abstract_text: row.get(2)?,
                        extraction: row.get(3)?,
                    })
                })
                .map_err(storage_err)?;

            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
    }

    /// Read every embedded paper in one statement.
    ///
    /// Rows are parsed independently; a bad row lands in `rejected` and the
    /// rest of the snapshot is unaffected.
    pub fn snapshot(&self) -> Result<EmbeddingSnapshot, PaperrankError> {
        type Row = (i64, String, String, Option<String>, Option<i64>);

        let rows: Vec<Row> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, embedding, embedding_model, embedding_generated_at
                     FROM papers WHERE embedding IS NOT NULL ORDER BY id",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })
                .map_err(storage_err)?;

            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })?;

        let taken_at = Utc::now();
        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();

        for (id, title, text, model, generated_ms) in rows {
            match parse_vector_text(&text) {
                Ok(vector) => records.push(PaperEmbedding {
                    id,
                    title,
                    vector,
                    model_tag: model.unwrap_or_else(|| UNKNOWN_MODEL.to_string()),
                    generated_at: generated_ms
                        .and_then(DateTime::<Utc>::from_timestamp_millis)
                        .unwrap_or(taken_at),
                }),
                Err(reason) => {
                    warn!(paper_id = id, %reason, "Skipping unparseable embedding");
                    rejected.push(RejectedEmbedding { id, reason });
                }
            }
        }

        debug!(
            records = records.len(),
            rejected = rejected.len(),
            "Embedding snapshot taken"
        );

        Ok(EmbeddingSnapshot {
            records,
            rejected,
            taken_at,
        })
    }

    /// Total papers and how many carry an embedding.
    pub fn stats(&self) -> Result<CorpusStats, PaperrankError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COUNT(embedding) FROM papers",
                [],
                |row| {
                    let total: i64 = row.get(0)?;
                    let with: i64 = row.get(1)?;
                    Ok(CorpusStats {
                        total_papers: total as u64,
                        with_embeddings: with as u64,
                    })
                },
            )
            .map_err(storage_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo() -> PaperRepository {
        PaperRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn paper(id: i64, title: &str) -> NewPaper {
        NewPaper {
            id: Some(id),
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_vector_text_forms() {
        assert_eq!(parse_vector_text("[1,0.5,-2]").unwrap(), vec![1.0, 0.5, -2.0]);
        assert_eq!(parse_vector_text(" 1 , 2 ").unwrap(), vec![1.0, 2.0]);
        assert!(parse_vector_text("[]").is_err());
        assert!(parse_vector_text("[1,abc]").is_err());
        assert!(parse_vector_text("[1,NaN]").is_err());
        assert!(parse_vector_text("[inf,1]").is_err());
    }

    #[test]
    fn test_format_then_parse_preserves_values() {
        let v = vec![0.25_f32, -1.0, 3.5];
        assert_eq!(parse_vector_text(&format_vector_text(&v)).unwrap(), v);
    }

    #[test]
    fn test_insert_and_title() {
        let repo = make_repo();
        let id = repo.insert(&paper(7, "Deep Learning")).unwrap();
        assert_eq!(id, 7);
        assert_eq!(repo.title(7).unwrap().as_deref(), Some("Deep Learning"));
        assert_eq!(repo.title(8).unwrap(), None);
    }

    #[test]
    fn test_set_embedding_unknown_paper() {
        let repo = make_repo();
        let err = repo.set_embedding(99, &[1.0], "m", Utc::now()).unwrap_err();
        assert!(matches!(err, PaperrankError::Storage(_)));
    }

    #[test]
    fn test_snapshot_reports_bad_rows() {
        let repo = make_repo();
        for id in 1..=3 {
            repo.insert(&paper(id, &format!("p{}", id))).unwrap();
        }
        repo.set_embedding(1, &[1.0, 0.0], "mpnet", Utc::now()).unwrap();
        repo.set_embedding_text(2, "[1.0,oops]", "mpnet", Utc::now())
            .unwrap();

        let snap = repo.snapshot().unwrap();
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.records[0].id, 1);
        assert_eq!(snap.records[0].model_tag, "mpnet");
        assert_eq!(snap.rejected.len(), 1);
        assert_eq!(snap.rejected[0].id, 2);
    }

    #[test]
    fn test_missing_embeddings_and_stats() {
        let repo = make_repo();
        for id in 1..=4 {
            repo.insert(&paper(id, "t")).unwrap();
        }
        repo.set_embedding(2, &[0.1], "m", Utc::now()).unwrap();

        let pending: Vec<i64> = repo
            .missing_embeddings(10)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(pending, vec![1, 3, 4]);
        assert_eq!(repo.missing_embeddings(1).unwrap().len(), 1);

        repo.record_embedding_failure(1).unwrap();
        let pending: Vec<i64> = repo
            .missing_embeddings(10)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(pending, vec![3, 4, 1]);

        let stats = repo.stats().unwrap();
        assert_eq!(stats.total_papers, 4);
        assert_eq!(stats.with_embeddings, 1);
    }
}
