//! Entity store operations used by the merge engine.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use paperrank_core::error::PaperrankError;
use paperrank_storage::Database;

use crate::error::MergeError;

/// Entities sharing one name, oldest first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub name: String,
    /// Ordered by creation time, then id. The first id is canonical.
    pub ids: Vec<i64>,
    /// External ids aligned with `ids`.
    pub external_ids: Vec<Option<String>>,
}

impl DuplicateGroup {
    pub fn canonical(&self) -> Option<i64> {
        self.ids.first().copied()
    }

    pub fn losers(&self) -> &[i64] {
        self.ids.get(1..).unwrap_or(&[])
    }
}

/// Row counts touched while merging one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupMerge {
    /// Associations re-pointed to the canonical entity.
    pub moved: u64,
    /// Associations dropped because the canonical already had that paper.
    pub discarded: u64,
    pub deleted: u64,
}

/// Aggregate entity statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub total: u64,
    pub distinct_names: u64,
    pub distinct_external_ids: u64,
    pub without_external_id: u64,
}

/// Storage operations the merge engine needs.
pub trait EntityStore {
    /// Every name held by more than one entity.
    fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>, MergeError>;

    /// Re-point or discard the losers' associations and delete the losers,
    /// as a single unit of work.
    fn merge_group(&self, canonical: i64, losers: &[i64]) -> Result<GroupMerge, MergeError>;

    fn counts(&self) -> Result<EntityCounts, MergeError>;
}

/// `EntityStore` over the `authors` and `paper_authors` tables.
pub struct SqliteEntityStore {
    db: Arc<Database>,
}

impl SqliteEntityStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn sql_err(e: rusqlite::Error) -> PaperrankError {
    PaperrankError::Storage(format!("entity store: {}", e))
}

fn count(conn: &Connection, sql: &str) -> Result<u64, PaperrankError> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|n| n as u64)
        .map_err(sql_err)
}

impl EntityStore for SqliteEntityStore {
    fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>, MergeError> {
        let rows: Vec<(i64, String, Option<String>)> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, external_id FROM authors
                     WHERE name IN (
                         SELECT name FROM authors GROUP BY name HAVING COUNT(*) > 1
                     )
                     ORDER BY name, created_at, id",
                )
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for (id, name, external_id) in rows {
            match groups.last_mut() {
                Some(group) if group.name == name => {
                    group.ids.push(id);
                    group.external_ids.push(external_id);
                }
                _ => groups.push(DuplicateGroup {
                    name,
                    ids: vec![id],
                    external_ids: vec![external_id],
                }),
            }
        }
        Ok(groups)
    }

    fn merge_group(&self, canonical: i64, losers: &[i64]) -> Result<GroupMerge, MergeError> {
        let merged = self.db.with_transaction(|tx| {
            let exists: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM authors WHERE id = ?1",
                    [canonical],
                    |row| row.get(0),
                )
                .map_err(sql_err)?;
            if exists == 0 {
                return Ok(None);
            }

            let mut totals = GroupMerge::default();
            for &loser in losers {
                let moved = tx
                    .execute(
                        "UPDATE paper_authors SET author_id = ?1
                         WHERE author_id = ?2
                           AND NOT EXISTS (
                               SELECT 1 FROM paper_authors pa2
                               WHERE pa2.paper_id = paper_authors.paper_id
                                 AND pa2.author_id = ?1
                           )",
                        [canonical, loser],
                    )
                    .map_err(sql_err)?;
                let discarded = tx
                    .execute("DELETE FROM paper_authors WHERE author_id = ?1", [loser])
                    .map_err(sql_err)?;
                let deleted = tx
                    .execute("DELETE FROM authors WHERE id = ?1", [loser])
                    .map_err(sql_err)?;

                debug!(canonical, loser, moved, discarded, "Merged entity");
                totals.moved += moved as u64;
                totals.discarded += discarded as u64;
                totals.deleted += deleted as u64;
            }
            Ok(Some(totals))
        })?;

        merged.ok_or(MergeError::MissingCanonical(canonical))
    }

    fn counts(&self) -> Result<EntityCounts, MergeError> {
        let counts = self.db.with_conn(|conn| {
            Ok(EntityCounts {
                total: count(conn, "SELECT COUNT(*) FROM authors")?,
                distinct_names: count(conn, "SELECT COUNT(DISTINCT name) FROM authors")?,
                distinct_external_ids: count(
                    conn,
                    "SELECT COUNT(DISTINCT external_id) FROM authors WHERE external_id IS NOT NULL",
                )?,
                without_external_id: count(
                    conn,
                    "SELECT COUNT(*) FROM authors WHERE external_id IS NULL",
                )?,
            })
        })?;
        Ok(counts)
    }
}
