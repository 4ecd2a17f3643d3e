//! The scoped storage driver.
//!
//! Every read here is scoped: a blob row is fetched by its exact
//! (path group, commit) coordinates, tree listings come from FileRef rows
//! alone, and nothing ever materializes a whole tree to answer a question
//! about a handful of paths.

use std::collections::HashMap;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::{debug, instrument};

use crate::errors::PgitError;
use crate::hash::ContentHash;
use crate::id::CommitId;
use crate::internal::db::entities::{file_ref_row, path_row};
use crate::internal::db::xpatch;
use crate::internal::graph;
use crate::internal::object::blob::{Blob, BlobContent};
use crate::internal::object::commit::Commit;
use crate::internal::object::file_ref::{ChangeKind, FileRef, TreeEntry};

/// A connected pgit database.
#[derive(Debug, Clone)]
pub struct Storage {
    conn: DatabaseConnection,
}

impl Storage {
    /// Connect without touching the schema.
    pub async fn connect(url: &str) -> Result<Storage, PgitError> {
        let conn = super::connect(url).await?;
        Ok(Storage { conn })
    }

    /// Connect and verify the pgit tables exist.
    pub async fn open(url: &str) -> Result<Storage, PgitError> {
        let storage = Storage::connect(url).await?;
        super::ensure_schema(&storage.conn).await?;
        Ok(storage)
    }

    /// Connect and create the schema if needed.
    pub async fn open_or_init(url: &str) -> Result<Storage, PgitError> {
        let storage = Storage::connect(url).await?;
        super::init_schema(&storage.conn).await?;
        Ok(storage)
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub async fn begin(&self) -> Result<sea_orm::DatabaseTransaction, PgitError> {
        Ok(self.conn.begin().await?)
    }

    pub async fn head(&self) -> Result<Option<CommitId>, PgitError> {
        graph::head(&self.conn).await
    }

    pub async fn get_commit(&self, id: &CommitId) -> Result<Commit, PgitError> {
        get_commit(&self.conn, id).await
    }

    pub async fn get_blob(
        &self,
        path: &str,
        commit: &CommitId,
    ) -> Result<Option<Blob>, PgitError> {
        get_blob(&self.conn, path, commit).await
    }

    pub async fn tree_metadata(&self, commit: &CommitId) -> Result<Vec<TreeEntry>, PgitError> {
        tree_metadata(&self.conn, commit).await
    }

    pub async fn get_blobs_at_commit(&self, commit: &CommitId) -> Result<Vec<Blob>, PgitError> {
        get_blobs_at_commit(&self.conn, commit).await
    }

    pub async fn get_changed_paths(
        &self,
        from: Option<&CommitId>,
        to: &CommitId,
    ) -> Result<Vec<FileRef>, PgitError> {
        get_changed_paths(&self.conn, from, to).await
    }

    pub async fn file_refs_of_commit(&self, commit: &CommitId) -> Result<Vec<FileRef>, PgitError> {
        file_refs_of_commit(&self.conn, commit).await
    }

    pub async fn path_history(
        &self,
        path: &str,
        upto: &CommitId,
    ) -> Result<Vec<FileRef>, PgitError> {
        path_history(&self.conn, path, upto).await
    }
}

/// Look up a path's group id without creating it.
pub async fn path_id<C: ConnectionTrait>(db: &C, path: &str) -> Result<Option<i64>, PgitError> {
    let row = path_row::Entity::find()
        .filter(path_row::Column::Path.eq(path))
        .one(db)
        .await?;
    Ok(row.map(|r| r.path_id))
}

/// Get or create the group id for a path.
pub async fn intern_path<C: ConnectionTrait>(db: &C, path: &str) -> Result<i64, PgitError> {
    if let Some(id) = path_id(db, path).await? {
        return Ok(id);
    }
    let inserted = path_row::ActiveModel {
        path: Set(path.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await;
    match inserted {
        Ok(model) => Ok(model.path_id),
        // Lost a race on the unique constraint; the row exists now.
        Err(_) => path_id(db, path)
            .await?
            .ok_or_else(|| PgitError::Storage(format!("failed to intern path `{path}`"))),
    }
}

/// Fetch the exact blob row written at (path, commit).
///
/// Returns `None` when no such row exists or the row is a deletion
/// tombstone; callers that need to distinguish use the FileRef index.
pub async fn get_blob<C: ConnectionTrait>(
    db: &C,
    path: &str,
    commit: &CommitId,
) -> Result<Option<Blob>, PgitError> {
    let Some(group) = path_id(db, path).await? else {
        return Ok(None);
    };
    let Some(bytes) = xpatch::BLOBS.get(db, group, &commit.to_string()).await? else {
        return Ok(None);
    };
    let content = BlobContent::from_data(&bytes)?;
    if content.is_tombstone() {
        return Ok(None);
    }
    Ok(Some(Blob {
        commit_id: *commit,
        path: path.to_string(),
        content,
    }))
}

/// Append a blob version and its FileRef row for `commit`.
pub async fn put_blob<C: ConnectionTrait>(
    db: &C,
    commit: &CommitId,
    path: &str,
    content: &BlobContent,
    change_kind: ChangeKind,
) -> Result<(), PgitError> {
    let group = intern_path(db, path).await?;
    xpatch::BLOBS
        .put(db, group, &commit.to_string(), &content.to_data()?)
        .await?;
    let existing = file_ref_row::Entity::find_by_id((commit.to_string(), group))
        .one(db)
        .await?;
    if existing.is_none() {
        file_ref_row::ActiveModel {
            commit_id: Set(commit.to_string()),
            path_id: Set(group),
            content_hash: Set(content.content_hash().map(|h| h.to_hex())),
            change_kind: Set(change_kind.to_u8() as i16),
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

/// Write a commit record and its graph row.
pub async fn put_commit<C: ConnectionTrait>(
    db: &C,
    commit: &Commit,
    merge_parent_id: Option<CommitId>,
) -> Result<(), PgitError> {
    commit.validate()?;
    if let Some(parent) = &commit.parent_id {
        if !graph::exists(db, parent).await? {
            return Err(PgitError::CommitNotFound(parent.to_string()));
        }
    }
    xpatch::COMMITS
        .put(
            db,
            xpatch::COMMITS_GROUP,
            &commit.id.to_string(),
            &commit.to_data()?,
        )
        .await?;
    if !graph::exists(db, &commit.id).await? {
        graph::insert(db, commit, merge_parent_id).await?;
    }
    Ok(())
}

/// Read one commit record from the delta table.
pub async fn get_commit<C: ConnectionTrait>(db: &C, id: &CommitId) -> Result<Commit, PgitError> {
    let bytes = xpatch::COMMITS
        .get(db, xpatch::COMMITS_GROUP, &id.to_string())
        .await?
        .ok_or_else(|| PgitError::CommitNotFound(id.to_string()))?;
    Commit::from_data(&bytes)
}

fn parse_ref_model(
    model: file_ref_row::Model,
    path: String,
) -> Result<FileRef, PgitError> {
    Ok(FileRef {
        commit_id: model.commit_id.parse().map_err(PgitError::Storage)?,
        path_id: model.path_id,
        path,
        content_hash: model
            .content_hash
            .map(|h| h.parse::<ContentHash>().map_err(PgitError::Storage))
            .transpose()?,
        change_kind: ChangeKind::from_u8(model.change_kind as u8)?,
    })
}

async fn paths_by_id<C: ConnectionTrait>(
    db: &C,
    ids: &[i64],
) -> Result<HashMap<i64, String>, PgitError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = path_row::Entity::find()
        .filter(path_row::Column::PathId.is_in(ids.to_vec()))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|r| (r.path_id, r.path)).collect())
}

/// FileRef rows written by exactly this commit, path-sorted.
pub async fn file_refs_of_commit<C: ConnectionTrait>(
    db: &C,
    commit: &CommitId,
) -> Result<Vec<FileRef>, PgitError> {
    let rows = file_ref_row::Entity::find()
        .filter(file_ref_row::Column::CommitId.eq(commit.to_string()))
        .all(db)
        .await?;
    let ids: Vec<i64> = rows.iter().map(|r| r.path_id).collect();
    let paths = paths_by_id(db, &ids).await?;
    let mut refs = rows
        .into_iter()
        .map(|model| {
            let path = paths
                .get(&model.path_id)
                .cloned()
                .ok_or_else(|| PgitError::Storage(format!("unknown path id {}", model.path_id)))?;
            parse_ref_model(model, path)
        })
        .collect::<Result<Vec<_>, _>>()?;
    refs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(refs)
}

/// Small per-call memo for ancestry checks against one fixed tip.
struct AncestryMemo {
    tip: CommitId,
    known: HashMap<CommitId, bool>,
}

impl AncestryMemo {
    fn new(tip: CommitId) -> Self {
        AncestryMemo {
            tip,
            known: HashMap::new(),
        }
    }

    async fn check<C: ConnectionTrait>(
        &mut self,
        db: &C,
        id: &CommitId,
    ) -> Result<bool, PgitError> {
        if let Some(hit) = self.known.get(id) {
            return Ok(*hit);
        }
        let result = graph::is_ancestor(db, id, &self.tip).await?;
        self.known.insert(*id, result);
        Ok(result)
    }
}

/// The live tree at `commit`: for each path, its newest write on the
/// ancestor chain, skipping paths whose newest write is a deletion.
///
/// Reads FileRef rows only.
#[instrument(skip(db))]
pub async fn tree_metadata<C: ConnectionTrait>(
    db: &C,
    commit: &CommitId,
) -> Result<Vec<TreeEntry>, PgitError> {
    let rows = file_ref_row::Entity::find()
        .filter(file_ref_row::Column::CommitId.lte(commit.to_string()))
        .order_by_asc(file_ref_row::Column::PathId)
        .order_by_desc(file_ref_row::Column::CommitId)
        .all(db)
        .await?;

    let ids: Vec<i64> = rows.iter().map(|r| r.path_id).collect();
    let paths = paths_by_id(db, &ids).await?;

    let mut memo = AncestryMemo::new(*commit);
    let mut entries = Vec::new();
    let mut current_path: Option<i64> = None;
    let mut settled = false;
    for model in rows {
        if current_path != Some(model.path_id) {
            current_path = Some(model.path_id);
            settled = false;
        }
        if settled {
            continue;
        }
        let candidate: CommitId = model.commit_id.parse().map_err(PgitError::Storage)?;
        if !memo.check(db, &candidate).await? {
            continue;
        }
        // Newest ancestor-chain write for this path decides its state.
        settled = true;
        let kind = ChangeKind::from_u8(model.change_kind as u8)?;
        if kind == ChangeKind::Deleted {
            continue;
        }
        let hash = model
            .content_hash
            .as_deref()
            .ok_or_else(|| {
                PgitError::Storage(format!("non-deletion ref without hash at path id {}", model.path_id))
            })?
            .parse::<ContentHash>()
            .map_err(PgitError::Storage)?;
        let path = paths
            .get(&model.path_id)
            .cloned()
            .ok_or_else(|| PgitError::Storage(format!("unknown path id {}", model.path_id)))?;
        entries.push(TreeEntry {
            path,
            path_id: model.path_id,
            commit_id: candidate,
            content_hash: hash,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(commit = %commit, entries = entries.len(), "tree metadata resolved");
    Ok(entries)
}

/// Content for only the paths touched by `commit`, tombstones included.
pub async fn get_blobs_at_commit<C: ConnectionTrait>(
    db: &C,
    commit: &CommitId,
) -> Result<Vec<Blob>, PgitError> {
    let refs = file_refs_of_commit(db, commit).await?;
    let mut blobs = Vec::with_capacity(refs.len());
    for file_ref in refs {
        let bytes = xpatch::BLOBS
            .get(db, file_ref.path_id, &commit.to_string())
            .await?
            .ok_or_else(|| {
                PgitError::Storage(format!(
                    "missing blob row for {} at {commit}",
                    file_ref.path
                ))
            })?;
        blobs.push(Blob {
            commit_id: *commit,
            path: file_ref.path,
            content: BlobContent::from_data(&bytes)?,
        });
    }
    Ok(blobs)
}

/// FileRef rows for ancestor-chain commits in `(from, to]`.
pub async fn get_changed_paths<C: ConnectionTrait>(
    db: &C,
    from: Option<&CommitId>,
    to: &CommitId,
) -> Result<Vec<FileRef>, PgitError> {
    let mut query = file_ref_row::Entity::find()
        .filter(file_ref_row::Column::CommitId.lte(to.to_string()));
    if let Some(from) = from {
        query = query.filter(file_ref_row::Column::CommitId.gt(from.to_string()));
    }
    let rows = query
        .order_by_asc(file_ref_row::Column::CommitId)
        .all(db)
        .await?;

    let ids: Vec<i64> = rows.iter().map(|r| r.path_id).collect();
    let paths = paths_by_id(db, &ids).await?;
    let mut memo = AncestryMemo::new(*to);
    let mut refs = Vec::new();
    for model in rows {
        let candidate: CommitId = model.commit_id.parse().map_err(PgitError::Storage)?;
        if !memo.check(db, &candidate).await? {
            continue;
        }
        let path = paths
            .get(&model.path_id)
            .cloned()
            .ok_or_else(|| PgitError::Storage(format!("unknown path id {}", model.path_id)))?;
        refs.push(parse_ref_model(model, path)?);
    }
    refs.sort_by(|a, b| (&a.path, a.commit_id).cmp(&(&b.path, b.commit_id)));
    Ok(refs)
}

/// Change history of one path up to `upto`, oldest first.
pub async fn path_history<C: ConnectionTrait>(
    db: &C,
    path: &str,
    upto: &CommitId,
) -> Result<Vec<FileRef>, PgitError> {
    let Some(group) = path_id(db, path).await? else {
        return Ok(Vec::new());
    };
    let rows = file_ref_row::Entity::find()
        .filter(file_ref_row::Column::PathId.eq(group))
        .filter(file_ref_row::Column::CommitId.lte(upto.to_string()))
        .order_by_asc(file_ref_row::Column::CommitId)
        .all(db)
        .await?;
    let mut memo = AncestryMemo::new(*upto);
    let mut refs = Vec::new();
    for model in rows {
        let candidate: CommitId = model.commit_id.parse().map_err(PgitError::Storage)?;
        if !memo.check(db, &candidate).await? {
            continue;
        }
        refs.push(parse_ref_model(model, path.to_string())?);
    }
    Ok(refs)
}

/// Commit ids whose suffix matches `partial`. Legacy fallback for partial
/// refs recorded before the graph table existed.
pub async fn find_by_ref_suffix<C: ConnectionTrait>(
    db: &C,
    partial: &str,
) -> Result<Vec<CommitId>, PgitError> {
    let upper = partial.to_ascii_uppercase();
    if upper.is_empty() || !upper.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(Vec::new());
    }
    let rows = file_ref_row::Entity::find()
        .filter(file_ref_row::Column::CommitId.like(format!("%{upper}")))
        .order_by_asc(file_ref_row::Column::CommitId)
        .all(db)
        .await?;
    let mut ids: Vec<CommitId> = Vec::new();
    for model in rows {
        let id: CommitId = model.commit_id.parse().map_err(PgitError::Storage)?;
        if ids.last() != Some(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::db::test_db;
    use crate::internal::object::blob::MODE_REGULAR;
    use crate::internal::object::commit::Signature;

    fn sig() -> Signature {
        Signature::new("t", "t@example.com", chrono::Utc::now())
    }

    fn regular(content: &[u8]) -> BlobContent {
        BlobContent::Regular {
            mode: MODE_REGULAR,
            content: content.to_vec(),
        }
    }

    async fn write_commit(
        db: &DatabaseConnection,
        parent: Option<CommitId>,
        files: &[(&str, Option<&[u8]>, ChangeKind)],
        message: &str,
    ) -> Commit {
        let id = CommitId::next_after(parent.as_ref());
        let commit = Commit::new(id, parent, sig(), sig(), message);
        for (path, content, kind) in files {
            let blob = match content {
                Some(bytes) => regular(bytes),
                None => BlobContent::Tombstone,
            };
            put_blob(db, &id, path, &blob, *kind).await.unwrap();
        }
        put_commit(db, &commit, None).await.unwrap();
        graph::set_head(db, Some(id)).await.unwrap();
        commit
    }

    #[tokio::test]
    async fn test_blob_round_trip_and_hash_integrity() {
        let db = test_db().await;
        let c1 = write_commit(
            &db,
            None,
            &[("a.txt", Some(b"hi\n"), ChangeKind::Added)],
            "c1",
        )
        .await;

        let blob = get_blob(&db, "a.txt", &c1.id).await.unwrap().unwrap();
        assert_eq!(blob.content, regular(b"hi\n"));

        // FileRef hash must equal the blob content hash.
        let refs = file_refs_of_commit(&db, &c1.id).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].content_hash, blob.content_hash());
        assert_eq!(refs[0].change_kind, ChangeKind::Added);
    }

    #[tokio::test]
    async fn test_get_blob_none_for_missing_and_deleted() {
        let db = test_db().await;
        let c1 = write_commit(
            &db,
            None,
            &[("a.txt", Some(b"hi\n"), ChangeKind::Added)],
            "c1",
        )
        .await;
        let c2 = write_commit(
            &db,
            Some(c1.id),
            &[("a.txt", None, ChangeKind::Deleted)],
            "c2",
        )
        .await;

        assert!(get_blob(&db, "a.txt", &c2.id).await.unwrap().is_none());
        assert!(get_blob(&db, "nope", &c1.id).await.unwrap().is_none());
        assert!(get_blob(&db, "a.txt", &c1.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tree_metadata_follows_supersession() {
        let db = test_db().await;
        let c1 = write_commit(
            &db,
            None,
            &[
                ("a.txt", Some(b"one\n"), ChangeKind::Added),
                ("b.txt", Some(b"b\n"), ChangeKind::Added),
            ],
            "c1",
        )
        .await;
        let c2 = write_commit(
            &db,
            Some(c1.id),
            &[("a.txt", Some(b"two\n"), ChangeKind::Modified)],
            "c2",
        )
        .await;
        let c3 = write_commit(
            &db,
            Some(c2.id),
            &[("b.txt", None, ChangeKind::Deleted)],
            "c3",
        )
        .await;

        let tree1 = tree_metadata(&db, &c1.id).await.unwrap();
        assert_eq!(tree1.len(), 2);
        assert_eq!(tree1[0].content_hash, ContentHash::new(b"one\n"));

        let tree3 = tree_metadata(&db, &c3.id).await.unwrap();
        assert_eq!(tree3.len(), 1);
        assert_eq!(tree3[0].path, "a.txt");
        assert_eq!(tree3[0].commit_id, c2.id);
        assert_eq!(tree3[0].content_hash, ContentHash::new(b"two\n"));
    }

    #[tokio::test]
    async fn test_changed_paths_range() {
        let db = test_db().await;
        let c1 = write_commit(
            &db,
            None,
            &[("a.txt", Some(b"1"), ChangeKind::Added)],
            "c1",
        )
        .await;
        let c2 = write_commit(
            &db,
            Some(c1.id),
            &[("b.txt", Some(b"2"), ChangeKind::Added)],
            "c2",
        )
        .await;
        let c3 = write_commit(
            &db,
            Some(c2.id),
            &[("a.txt", Some(b"3"), ChangeKind::Modified)],
            "c3",
        )
        .await;

        let changed = get_changed_paths(&db, Some(&c1.id), &c3.id).await.unwrap();
        let mut names: Vec<&str> = changed.iter().map(|r| r.path.as_str()).collect();
        names.dedup();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert!(changed.iter().all(|r| r.commit_id > c1.id));
    }

    #[tokio::test]
    async fn test_path_history_is_oldest_first() {
        let db = test_db().await;
        let c1 = write_commit(
            &db,
            None,
            &[("a.txt", Some(b"one\n"), ChangeKind::Added)],
            "c1",
        )
        .await;
        let c2 = write_commit(
            &db,
            Some(c1.id),
            &[("a.txt", Some(b"two\n"), ChangeKind::Modified)],
            "c2",
        )
        .await;

        let history = path_history(&db, "a.txt", &c2.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].commit_id, c1.id);
        assert_eq!(history[1].commit_id, c2.id);
    }

    #[tokio::test]
    async fn test_commit_record_round_trip() {
        let db = test_db().await;
        let c1 = write_commit(&db, None, &[], "subject line\n\nbody\n").await;
        let loaded = get_commit(&db, &c1.id).await.unwrap();
        assert_eq!(loaded.message, "subject line\n\nbody\n");
        assert_eq!(loaded.subject(), "subject line");
        let missing = CommitId::generate();
        assert!(matches!(
            get_commit(&db, &missing).await.unwrap_err(),
            PgitError::CommitNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_suffix_fallback_finds_commit() {
        let db = test_db().await;
        let c1 = write_commit(
            &db,
            None,
            &[("a.txt", Some(b"x"), ChangeKind::Added)],
            "c1",
        )
        .await;
        let suffix = c1.id.short();
        let hits = find_by_ref_suffix(&db, &suffix).await.unwrap();
        assert_eq!(hits, vec![c1.id]);
    }

    #[tokio::test]
    async fn test_intern_path_is_stable() {
        let db = test_db().await;
        let a = intern_path(&db, "dir/file").await.unwrap();
        let b = intern_path(&db, "dir/file").await.unwrap();
        let c = intern_path(&db, "dir/other").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
