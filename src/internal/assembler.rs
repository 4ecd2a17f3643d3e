//! The commit assembler.
//!
//! Turns the staging index plus the current HEAD into a new commit inside
//! one database transaction: blob rows first, then FileRefs, the commit
//! record, the graph row, and finally a compare-and-swap on HEAD. Losing
//! the swap rolls everything back and leaves the staging index untouched,
//! so a concurrent committer fails cleanly instead of losing history.

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::PgitError;
use crate::id::CommitId;
use crate::internal::db::storage;
use crate::internal::graph;
use crate::internal::index::EntryOrigin;
use crate::internal::merge::MergeState;
use crate::internal::object::blob::BlobContent;
use crate::internal::object::commit::{Commit, Signature};
use crate::internal::object::file_ref::ChangeKind;
use crate::internal::repo::Repo;
use crate::internal::worktree;

/// Fallback identity when `[user]` is not configured.
const DEFAULT_NAME: &str = "pgit";
const DEFAULT_EMAIL: &str = "pgit@localhost";

fn signature(repo: &Repo) -> Signature {
    Signature::new(
        repo.config
            .user
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string()),
        repo.config
            .user
            .email
            .clone()
            .unwrap_or_else(|| DEFAULT_EMAIL.to_string()),
        Utc::now(),
    )
}

/// Build a commit from the staging index.
///
/// Fails with `NothingToCommit` on an empty index and `MergeInProgress`
/// while conflicts remain unresolved. On success the staging index is
/// cleared and a concluded merge records its merge parent in the graph.
pub async fn commit(repo: &Repo, message: &str) -> Result<Commit, PgitError> {
    let _lock = repo.lock_index()?;
    let index = repo.load_index()?;
    if index.is_empty() {
        return Err(PgitError::NothingToCommit);
    }

    let merge = MergeState::load(&repo.meta_dir)?;
    if merge.in_progress && !merge.conflicted_files.is_empty() {
        return Err(PgitError::MergeInProgress);
    }
    let merge_parent = if merge.in_progress {
        merge.source_commit
    } else {
        None
    };

    let observed_head = repo.head().await?;
    let id = CommitId::next_after(observed_head.as_ref());
    let author = signature(repo);
    let commit = Commit::new(id, observed_head, author.clone(), author, message);

    let txn = repo.storage.begin().await?;
    for entry in index.iter() {
        let (content, kind) = match entry.origin {
            EntryOrigin::TrackedDeleted => (BlobContent::Tombstone, ChangeKind::Deleted),
            origin => {
                let snapshot = worktree::snapshot_file(&repo.abs_path(&entry.path))?
                    .ok_or_else(|| PgitError::FileNotFound(entry.path.clone()))?;
                let kind = match origin {
                    EntryOrigin::UntrackedAdded => ChangeKind::Added,
                    _ => ChangeKind::Modified,
                };
                (snapshot, kind)
            }
        };
        storage::put_blob(&txn, &id, &entry.path, &content, kind).await?;
    }
    storage::put_commit(&txn, &commit, merge_parent).await?;

    if !graph::cas_head(&txn, observed_head, Some(id)).await? {
        // Someone else advanced HEAD since we read it. Abandon everything;
        // the staging index file was never touched.
        txn.rollback().await?;
        debug!(commit = %id, "HEAD moved during commit, rolled back");
        return Err(PgitError::NonFastForward);
    }
    txn.commit().await?;

    let mut cleared = repo.load_index()?;
    cleared.clear();
    repo.save_index(&cleared)?;
    if merge.in_progress {
        MergeState::clear(&repo.meta_dir)?;
    }
    repo.write_head_mirror(Some(id));

    info!(commit = %id, files = index.len(), "committed");
    Ok(commit)
}
