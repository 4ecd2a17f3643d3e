//! Relational storage: connection handling, schema bootstrap, the xpatch
//! delta-chain layer and the scoped storage driver.
//!
//! Payloads live in two delta-compressed tables (`pgit_blobs`, grouped by
//! path, and `pgit_commits`, one constant group). Everything used for
//! navigation lives in plain heap tables so reads never decompress content
//! they do not need.

pub mod entities;
pub mod storage;
pub mod xpatch;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait};
use tracing::debug;

use crate::errors::PgitError;

/// Tables created by [`init_schema`], in creation order.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pgit_paths (
        path_id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS pgit_blobs (
        group_id BIGINT NOT NULL,
        key TEXT NOT NULL,
        seq BIGINT NOT NULL,
        kind SMALLINT NOT NULL,
        payload BLOB NOT NULL,
        raw_size BIGINT NOT NULL,
        stored_size BIGINT NOT NULL,
        PRIMARY KEY (group_id, key)
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_pgit_blobs_group_seq
        ON pgit_blobs (group_id, seq)",
    "CREATE TABLE IF NOT EXISTS pgit_commits (
        group_id BIGINT NOT NULL,
        key TEXT NOT NULL,
        seq BIGINT NOT NULL,
        kind SMALLINT NOT NULL,
        payload BLOB NOT NULL,
        raw_size BIGINT NOT NULL,
        stored_size BIGINT NOT NULL,
        PRIMARY KEY (group_id, key)
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_pgit_commits_group_seq
        ON pgit_commits (group_id, seq)",
    "CREATE TABLE IF NOT EXISTS pgit_file_refs (
        commit_id TEXT NOT NULL,
        path_id BIGINT NOT NULL,
        content_hash TEXT,
        change_kind SMALLINT NOT NULL,
        PRIMARY KEY (commit_id, path_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_pgit_file_refs_path
        ON pgit_file_refs (path_id, commit_id)",
    "CREATE TABLE IF NOT EXISTS pgit_commit_graph (
        id TEXT PRIMARY KEY,
        parent_id TEXT,
        merge_parent_id TEXT,
        anc TEXT NOT NULL,
        subject TEXT NOT NULL,
        committed_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pgit_refs (
        name TEXT PRIMARY KEY,
        commit_id TEXT
    )",
    "CREATE TABLE IF NOT EXISTS pgit_metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Name of the single mutable ref.
pub const HEAD_REF: &str = "HEAD";

/// Current schema version, recorded in `pgit_metadata`.
pub const SCHEMA_VERSION: &str = "1";

/// Open a database connection. The pool is sized to cover the fetch-engine
/// worker pool.
pub async fn connect(url: &str) -> Result<DatabaseConnection, PgitError> {
    let mut options = ConnectOptions::new(url.to_string());
    // A pooled in-memory sqlite would give every connection its own empty
    // database; pin it to one connection.
    let pool_size = if url.contains(":memory:") {
        1
    } else {
        crate::internal::fetch::DEFAULT_MAX_IN_FLIGHT as u32 + 1
    };
    options.max_connections(pool_size).sqlx_logging(false);
    debug!(url, "connecting to database");
    Database::connect(options)
        .await
        .map_err(|e| PgitError::DatabaseConnection(e.to_string()))
}

/// Create all pgit tables and the HEAD row. Idempotent.
pub async fn init_schema<C: ConnectionTrait>(db: &C) -> Result<(), PgitError> {
    for statement in SCHEMA {
        db.execute_unprepared(statement).await?;
    }
    db.execute_unprepared(
        "INSERT INTO pgit_refs (name, commit_id) SELECT 'HEAD', NULL
         WHERE NOT EXISTS (SELECT 1 FROM pgit_refs WHERE name = 'HEAD')",
    )
    .await?;
    let existing = entities::meta_row::Entity::find_by_id("schema_version".to_string())
        .one(db)
        .await?;
    if existing.is_none() {
        use sea_orm::{ActiveModelTrait, Set};
        entities::meta_row::ActiveModel {
            key: Set("schema_version".to_string()),
            value: Set(SCHEMA_VERSION.to_string()),
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

/// Schema version recorded at init time, if the metadata row exists.
pub async fn schema_version<C: ConnectionTrait>(db: &C) -> Result<Option<String>, PgitError> {
    let row = entities::meta_row::Entity::find_by_id("schema_version".to_string())
        .one(db)
        .await?;
    Ok(row.map(|r| r.value))
}

/// Verify the pgit tables exist, mapping their absence to `SchemaMissing`.
pub async fn ensure_schema<C: ConnectionTrait>(db: &C) -> Result<(), PgitError> {
    let probe = db
        .execute_unprepared("SELECT count(*) FROM pgit_refs WHERE name = 'HEAD'")
        .await;
    match probe {
        Ok(_) => Ok(()),
        Err(_) => Err(PgitError::SchemaMissing),
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> DatabaseConnection {
    let conn = connect("sqlite::memory:").await.unwrap();
    init_schema(&conn).await.unwrap();
    conn
}
