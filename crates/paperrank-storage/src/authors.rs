//! Author and paper-author association persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Row;

use paperrank_core::error::PaperrankError;
use paperrank_core::types::{Association, AssociationFlags, NamedEntity};

use crate::db::{storage_err, Database};

/// Repository for authors and their links to papers.
pub struct AuthorRepository {
    db: Arc<Database>,
}

impl AuthorRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert an author record and return its id.
    ///
    /// No uniqueness is enforced on `name`; repeated ingestion is what
    /// produces the duplicates the merge engine cleans up.
    pub fn insert(
        &self,
        name: &str,
        external_id: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<i64, PaperrankError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO authors (name, external_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, external_id, created_at.timestamp_millis()],
            )
            .map_err(|e| PaperrankError::Storage(format!("Failed to insert author: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Link an author to a paper.
    pub fn link(&self, association: &Association) -> Result<(), PaperrankError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO paper_authors (paper_id, author_id, author_order, is_corresponding)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    association.paper_id,
                    association.entity_id,
                    association.order,
                    association.flags.corresponding,
                ],
            )
            .map_err(|e| PaperrankError::Storage(format!("Failed to link author: {}", e)))?;
            Ok(())
        })
    }

    /// All authors with exactly this name, oldest first.
    pub fn find_by_name(&self, name: &str) -> Result<Vec<NamedEntity>, PaperrankError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, external_id, created_at FROM authors
                     WHERE name = ?1 ORDER BY created_at, id",
                )
                .map_err(storage_err)?;
            let rows = stmt.query_map([name], row_to_entity).map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
    }

    /// Associations of one paper, in author order.
    pub fn associations_for_paper(
        &self,
        paper_id: i64,
    ) -> Result<Vec<Association>, PaperrankError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT paper_id, author_id, author_order, is_corresponding
                     FROM paper_authors WHERE paper_id = ?1
                     ORDER BY author_order, author_id",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([paper_id], row_to_association)
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
    }

    pub fn count(&self) -> Result<u64, PaperrankError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM authors", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(n as u64)
        })
    }

    pub fn association_count(&self) -> Result<u64, PaperrankError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM paper_authors", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(n as u64)
        })
    }
}

/// Map an `id, name, external_id, created_at` row.
pub fn row_to_entity(row: &Row<'_>) -> Result<NamedEntity, rusqlite::Error> {
    let created_ms: i64 = row.get(3)?;
    Ok(NamedEntity {
        id: row.get(0)?,
        name: row.get(1)?,
        external_id: row.get(2)?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_ms).unwrap_or_default(),
    })
}

/// Map a `paper_id, author_id, author_order, is_corresponding` row.
pub fn row_to_association(row: &Row<'_>) -> Result<Association, rusqlite::Error> {
    Ok(Association {
        paper_id: row.get(0)?,
        entity_id: row.get(1)?,
        order: row.get(2)?,
        flags: AssociationFlags {
            corresponding: row.get(3)?,
        },
    })
}
