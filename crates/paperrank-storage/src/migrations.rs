//! Database schema migrations.
//!
//! Version 1 holds the corpus (papers, authors, paper_authors) and the
//! stage_metrics log. Version 2 adds the physical tables backing the
//! local column store. Version 3 counts failed embedding attempts.

use rusqlite::Connection;
use tracing::info;

use paperrank_core::error::PaperrankError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), PaperrankError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| PaperrankError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version = current_version(conn)?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: corpus_schema");
    }
    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: column_store");
    }
    if current_version < 3 {
        apply_v3(conn)?;
        info!("Applied migration v3: embedding_attempts");
    }

    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64, PaperrankError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| PaperrankError::Storage(format!("Failed to query migration version: {}", e)))
}

/// Version 1: papers, authors, associations, stage metrics.
///
/// Timestamps are stored as Unix milliseconds so ordering by column
/// value matches chronological order.
fn apply_v1(conn: &Connection) -> Result<(), PaperrankError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS papers (
            id                      INTEGER PRIMARY KEY,
            title                   TEXT NOT NULL,
            abstract_text           TEXT,
            extraction              TEXT,
            embedding               TEXT,
            embedding_model         TEXT,
            embedding_generated_at  INTEGER,
            created_at              INTEGER NOT NULL
                                    DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
        );

        CREATE INDEX IF NOT EXISTS idx_papers_missing_embedding
            ON papers (id) WHERE embedding IS NULL;

        CREATE TABLE IF NOT EXISTS authors (
            id           INTEGER PRIMARY KEY,
            name         TEXT NOT NULL,
            external_id  TEXT,
            created_at   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_authors_name
            ON authors (name, created_at, id);

        CREATE TABLE IF NOT EXISTS paper_authors (
            paper_id          INTEGER NOT NULL REFERENCES papers(id) ON DELETE CASCADE,
            author_id         INTEGER NOT NULL REFERENCES authors(id),
            author_order      INTEGER NOT NULL DEFAULT 0,
            is_corresponding  INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (paper_id, author_id)
        );

        CREATE INDEX IF NOT EXISTS idx_paper_authors_author
            ON paper_authors (author_id);

        CREATE TABLE IF NOT EXISTS stage_metrics (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id       TEXT NOT NULL,
            iteration    INTEGER NOT NULL,
            stage        TEXT NOT NULL,
            outcome      TEXT NOT NULL
                         CHECK (outcome IN ('success', 'failure', 'timeout')),
            duration_ms  INTEGER NOT NULL,
            detail       TEXT,
            recorded_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_stage_metrics_run
            ON stage_metrics (run_id, iteration);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'corpus_schema');
        ",
    )
    .map_err(|e| PaperrankError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

/// Version 2: column store registry and cells.
fn apply_v2(conn: &Connection) -> Result<(), PaperrankError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS column_tables (
            name        TEXT PRIMARY KEY NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS column_families (
            table_name  TEXT NOT NULL REFERENCES column_tables(name) ON DELETE CASCADE,
            family      TEXT NOT NULL,
            PRIMARY KEY (table_name, family)
        );

        CREATE TABLE IF NOT EXISTS column_cells (
            table_name  TEXT NOT NULL REFERENCES column_tables(name) ON DELETE CASCADE,
            row_key     TEXT NOT NULL,
            column_name TEXT NOT NULL,
            value       TEXT NOT NULL,
            PRIMARY KEY (table_name, row_key, column_name)
        );

        INSERT INTO schema_migrations (version, name) VALUES (2, 'column_store');
        ",
    )
    .map_err(|e| PaperrankError::Storage(format!("Migration v2 failed: {}", e)))?;

    Ok(())
}

/// Version 3: per-paper count of embedding attempts that left no vector.
///
/// Pending papers are served least-attempted first, so papers that keep
/// failing cannot hold the head of the queue.
fn apply_v3(conn: &Connection) -> Result<(), PaperrankError> {
    conn.execute_batch(
        "
        ALTER TABLE papers ADD COLUMN embedding_attempts INTEGER NOT NULL DEFAULT 0;

        DROP INDEX IF EXISTS idx_papers_missing_embedding;
        CREATE INDEX IF NOT EXISTS idx_papers_missing_embedding
            ON papers (embedding_attempts, id) WHERE embedding IS NULL;

        INSERT INTO schema_migrations (version, name) VALUES (3, 'embedding_attempts');
        ",
    )
    .map_err(|e| PaperrankError::Storage(format!("Migration v3 failed: {}", e)))?;

    Ok(())
}
