//! The xpatch layer: grouped delta chains over a relational table.
//!
//! Every group is an independent chain of versions ordered by a per-group
//! sequence number. A version is stored either as a zlib-compressed
//! snapshot or as a delta against the previous version in the group. The
//! first version of a group and every [`SNAPSHOT_INTERVAL`]-th after it is
//! forced to a snapshot, which bounds reconstruction to one bounded
//! backward scan. A delta that fails to undercut its input is stored as a
//! snapshot too, so chains never grow a version.
//!
//! Keys within a group are immutable: a `put` for an existing (group, key)
//! is a no-op, which makes bulk transfer retries harmless.

use sea_orm::{ConnectionTrait, DbBackend, Statement};
use tracing::trace;

use crate::errors::PgitError;
use crate::internal::delta;

/// Forced-snapshot cadence within a group.
pub const SNAPSHOT_INTERVAL: i64 = 64;
/// The `pgit_commits` table keeps every record in one constant group.
pub const COMMITS_GROUP: i64 = 0;

const KIND_SNAPSHOT: i16 = 0;
const KIND_DELTA: i16 = 1;

/// Handle for one delta-compressed table.
#[derive(Debug, Clone, Copy)]
pub struct XPatch {
    table: &'static str,
}

/// Blob content chains, grouped by path id.
pub const BLOBS: XPatch = XPatch { table: "pgit_blobs" };
/// Commit record chain, single constant group.
pub const COMMITS: XPatch = XPatch { table: "pgit_commits" };

/// Aggregate numbers reported by `stats(table)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableStats {
    pub table: String,
    pub groups: u64,
    pub versions: u64,
    pub snapshots: u64,
    pub deltas: u64,
    pub raw_bytes: u64,
    pub stored_bytes: u64,
}

struct ChainRow {
    seq: i64,
    kind: i16,
    payload: Vec<u8>,
}

impl XPatch {
    pub fn table(&self) -> &'static str {
        self.table
    }

    fn statement(&self, sql: String, values: Vec<sea_orm::Value>) -> Statement {
        Statement::from_sql_and_values(DbBackend::Sqlite, sql, values)
    }

    /// Append a version to a group. No-op when the key already exists.
    pub async fn put<C: ConnectionTrait>(
        &self,
        db: &C,
        group: i64,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), PgitError> {
        if self.seq_of(db, group, key).await?.is_some() {
            trace!(table = self.table, group, key, "key already stored, skipping");
            return Ok(());
        }

        let head = self.latest_seq(db, group).await?;
        let next_seq = head.unwrap_or(0) + 1;

        let mut kind = KIND_SNAPSHOT;
        let mut body = bytes.to_vec();
        if next_seq % SNAPSHOT_INTERVAL != 1 {
            if let Some(head_seq) = head {
                let base = self.reconstruct(db, group, head_seq).await?;
                let patch = delta::encode(&base, bytes);
                if patch.len() < bytes.len() {
                    kind = KIND_DELTA;
                    body = patch;
                }
            }
        }

        let payload = delta::compress(&body)?;
        let stored = payload.len() as i64;
        trace!(
            table = self.table,
            group,
            key,
            seq = next_seq,
            kind,
            raw = bytes.len(),
            stored,
            "appending chain row"
        );
        db.execute(self.statement(
            format!(
                "INSERT INTO {} (group_id, key, seq, kind, payload, raw_size, stored_size)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                self.table
            ),
            vec![
                group.into(),
                key.into(),
                next_seq.into(),
                kind.into(),
                payload.into(),
                (bytes.len() as i64).into(),
                stored.into(),
            ],
        ))
        .await?;
        Ok(())
    }

    /// Reconstruct the version stored under (group, key).
    pub async fn get<C: ConnectionTrait>(
        &self,
        db: &C,
        group: i64,
        key: &str,
    ) -> Result<Option<Vec<u8>>, PgitError> {
        match self.seq_of(db, group, key).await? {
            None => Ok(None),
            Some(seq) => Ok(Some(self.reconstruct(db, group, seq).await?)),
        }
    }

    /// Reconstruct the newest version in a group, returning its key too.
    pub async fn get_latest<C: ConnectionTrait>(
        &self,
        db: &C,
        group: i64,
    ) -> Result<Option<(String, Vec<u8>)>, PgitError> {
        let row = db
            .query_one(self.statement(
                format!(
                    "SELECT key, seq FROM {} WHERE group_id = ? ORDER BY seq DESC LIMIT 1",
                    self.table
                ),
                vec![group.into()],
            ))
            .await?;
        let Some(row) = row else { return Ok(None) };
        let key: String = row.try_get("", "key")?;
        let seq: i64 = row.try_get("", "seq")?;
        let bytes = self.reconstruct(db, group, seq).await?;
        Ok(Some((key, bytes)))
    }

    /// All keys of a group in chain order.
    pub async fn keys<C: ConnectionTrait>(
        &self,
        db: &C,
        group: i64,
    ) -> Result<Vec<String>, PgitError> {
        let rows = db
            .query_all(self.statement(
                format!(
                    "SELECT key FROM {} WHERE group_id = ? ORDER BY seq ASC",
                    self.table
                ),
                vec![group.into()],
            ))
            .await?;
        rows.into_iter()
            .map(|r| r.try_get::<String>("", "key").map_err(PgitError::from))
            .collect()
    }

    /// Aggregate table statistics without decompressing anything.
    pub async fn stats<C: ConnectionTrait>(&self, db: &C) -> Result<TableStats, PgitError> {
        let row = db
            .query_one(self.statement(
                format!(
                    "SELECT COUNT(*) AS version_count,
                            COUNT(DISTINCT group_id) AS group_count,
                            COALESCE(SUM(CASE WHEN kind = 0 THEN 1 ELSE 0 END), 0) AS snapshot_count,
                            COALESCE(SUM(raw_size), 0) AS raw_bytes,
                            COALESCE(SUM(stored_size), 0) AS stored_bytes
                     FROM {}",
                    self.table
                ),
                vec![],
            ))
            .await?
            .ok_or_else(|| PgitError::Storage("stats query returned no row".into()))?;

        let versions: i64 = row.try_get("", "version_count")?;
        let snapshots: i64 = row.try_get("", "snapshot_count")?;
        Ok(TableStats {
            table: self.table.to_string(),
            groups: row.try_get::<i64>("", "group_count")? as u64,
            versions: versions as u64,
            snapshots: snapshots as u64,
            deltas: (versions - snapshots) as u64,
            raw_bytes: row.try_get::<i64>("", "raw_bytes")? as u64,
            stored_bytes: row.try_get::<i64>("", "stored_bytes")? as u64,
        })
    }

    async fn seq_of<C: ConnectionTrait>(
        &self,
        db: &C,
        group: i64,
        key: &str,
    ) -> Result<Option<i64>, PgitError> {
        let row = db
            .query_one(self.statement(
                format!(
                    "SELECT seq FROM {} WHERE group_id = ? AND key = ?",
                    self.table
                ),
                vec![group.into(), key.into()],
            ))
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("", "seq")?)),
            None => Ok(None),
        }
    }

    async fn latest_seq<C: ConnectionTrait>(
        &self,
        db: &C,
        group: i64,
    ) -> Result<Option<i64>, PgitError> {
        let row = db
            .query_one(self.statement(
                format!(
                    "SELECT MAX(seq) AS head FROM {} WHERE group_id = ?",
                    self.table
                ),
                vec![group.into()],
            ))
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<Option<i64>>("", "head")?),
            None => Ok(None),
        }
    }

    /// Walk back to the nearest snapshot at or before `seq`, then replay
    /// deltas forward. The forced-snapshot cadence bounds the scan.
    async fn reconstruct<C: ConnectionTrait>(
        &self,
        db: &C,
        group: i64,
        seq: i64,
    ) -> Result<Vec<u8>, PgitError> {
        let rows = db
            .query_all(self.statement(
                format!(
                    "SELECT seq, kind, payload FROM {}
                     WHERE group_id = ? AND seq <= ?
                     ORDER BY seq DESC LIMIT ?",
                    self.table
                ),
                vec![group.into(), seq.into(), SNAPSHOT_INTERVAL.into()],
            ))
            .await?;

        let mut chain: Vec<ChainRow> = Vec::new();
        let mut found_snapshot = false;
        for row in rows {
            let chain_row = ChainRow {
                seq: row.try_get("", "seq")?,
                kind: row.try_get("", "kind")?,
                payload: row.try_get("", "payload")?,
            };
            let is_snapshot = chain_row.kind == KIND_SNAPSHOT;
            chain.push(chain_row);
            if is_snapshot {
                found_snapshot = true;
                break;
            }
        }
        if !found_snapshot {
            return Err(PgitError::DeltaCorrupt(format!(
                "no snapshot within {SNAPSHOT_INTERVAL} rows of {}:{group}@{seq}",
                self.table
            )));
        }

        // Replay from the snapshot up to the requested sequence number.
        chain.reverse();
        let mut expected = chain[0].seq;
        let mut current = delta::decompress(&chain[0].payload)?;
        for row in &chain[1..] {
            expected += 1;
            if row.seq != expected {
                return Err(PgitError::DeltaCorrupt(format!(
                    "gap in chain {}:{group}, expected seq {expected}, found {}",
                    self.table, row.seq
                )));
            }
            let patch = delta::decompress(&row.payload)?;
            current = delta::apply(&current, &patch)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::db::test_db;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let db = test_db().await;
        BLOBS.put(&db, 1, "K1", b"first version\n").await.unwrap();
        BLOBS.put(&db, 1, "K2", b"second version\n").await.unwrap();

        assert_eq!(
            BLOBS.get(&db, 1, "K1").await.unwrap().unwrap(),
            b"first version\n"
        );
        assert_eq!(
            BLOBS.get(&db, 1, "K2").await.unwrap().unwrap(),
            b"second version\n"
        );
        assert!(BLOBS.get(&db, 1, "missing").await.unwrap().is_none());
        assert!(BLOBS.get(&db, 2, "K1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_groups_are_independent_chains() {
        let db = test_db().await;
        BLOBS.put(&db, 1, "A", b"group one").await.unwrap();
        BLOBS.put(&db, 2, "A", b"group two").await.unwrap();
        assert_eq!(BLOBS.get(&db, 1, "A").await.unwrap().unwrap(), b"group one");
        assert_eq!(BLOBS.get(&db, 2, "A").await.unwrap().unwrap(), b"group two");
    }

    #[tokio::test]
    async fn test_duplicate_put_is_ignored() {
        let db = test_db().await;
        COMMITS
            .put(&db, COMMITS_GROUP, "C1", b"record")
            .await
            .unwrap();
        COMMITS
            .put(&db, COMMITS_GROUP, "C1", b"record")
            .await
            .unwrap();
        let stats = COMMITS.stats(&db).await.unwrap();
        assert_eq!(stats.versions, 1);
    }

    /// A chain longer than the snapshot interval must reconstruct every
    /// version, including ones that sit right on a snapshot boundary.
    #[tokio::test]
    async fn test_long_chain_reconstructs_across_snapshots() {
        let db = test_db().await;
        let mut contents = Vec::new();
        for i in 0..(SNAPSHOT_INTERVAL * 2 + 5) {
            let body = format!("shared prefix line\nversion {i}\nshared suffix\n");
            BLOBS
                .put(&db, 7, &format!("K{i:04}"), body.as_bytes())
                .await
                .unwrap();
            contents.push(body);
        }
        for (i, body) in contents.iter().enumerate() {
            let got = BLOBS.get(&db, 7, &format!("K{i:04}")).await.unwrap().unwrap();
            assert_eq!(got, body.as_bytes(), "version {i}");
        }
    }

    #[tokio::test]
    async fn test_get_latest_returns_newest_key() {
        let db = test_db().await;
        BLOBS.put(&db, 3, "K1", b"one").await.unwrap();
        BLOBS.put(&db, 3, "K2", b"two").await.unwrap();
        let (key, bytes) = BLOBS.get_latest(&db, 3).await.unwrap().unwrap();
        assert_eq!(key, "K2");
        assert_eq!(bytes, b"two");
        assert!(BLOBS.get_latest(&db, 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_snapshots_and_deltas() {
        let db = test_db().await;
        for i in 0..5 {
            let body = format!("line line line line {i}\n").repeat(10);
            BLOBS
                .put(&db, 1, &format!("K{i}"), body.as_bytes())
                .await
                .unwrap();
        }
        let stats = BLOBS.stats(&db).await.unwrap();
        assert_eq!(stats.versions, 5);
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.snapshots + stats.deltas, 5);
        assert!(stats.snapshots >= 1);
        assert!(stats.raw_bytes > 0);
        assert!(stats.stored_bytes > 0);
    }
}
