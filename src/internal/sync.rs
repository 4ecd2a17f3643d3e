//! Remote sync: push, pull and clone.
//!
//! A remote is nothing but a database URL; sync connects to it and runs the
//! same storage operations used locally. Transfers move commits in
//! parent-then-child order, each commit's blob rows first, then the record,
//! FileRefs and graph row, so the receiving side can always compute its
//! lifting pointers. HEAD on the receiving side only ever advances through
//! a compare-and-swap against the value observed when the sync began.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::errors::PgitError;
use crate::hash::ContentHash;
use crate::id::CommitId;
use crate::internal::db::storage::{self, Storage};
use crate::internal::fetch::{self, FetchOptions};
use crate::internal::graph;
use crate::internal::index::{EntryOrigin, IndexEntry};
use crate::internal::merge::{self, MergeState};
use crate::internal::object::blob::BlobContent;
use crate::internal::object::file_ref::{ChangeKind, FileRef};
use crate::internal::repo::Repo;
use crate::internal::worktree;

/// Counters reported back to the user after a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub commits: usize,
    pub blobs: usize,
}

#[derive(Debug)]
pub enum PushOutcome {
    UpToDate,
    Advanced {
        report: TransferReport,
        head: CommitId,
    },
}

#[derive(Debug)]
pub enum PullOutcome {
    UpToDate,
    FastForward {
        report: TransferReport,
        head: CommitId,
        files: usize,
    },
    Merged {
        report: TransferReport,
        source: CommitId,
        target: CommitId,
        taken: usize,
        conflicts: Vec<String>,
    },
}

/// Copy one commit from `src` to `dst`. The parent must already exist on
/// `dst`. Blob contents are read through the bounded fetch pool; writes are
/// grouped into one destination transaction.
async fn transfer_commit(
    src: &Storage,
    dst: &Storage,
    id: &CommitId,
) -> Result<usize, PgitError> {
    let commit = src.get_commit(id).await?;
    let row = graph::get(src.conn(), id)
        .await?
        .ok_or_else(|| PgitError::CommitNotFound(id.to_string()))?;
    let refs = src.file_refs_of_commit(id).await?;

    let pairs: Vec<(String, CommitId)> = refs
        .iter()
        .filter(|r| r.change_kind != ChangeKind::Deleted)
        .map(|r| (r.path.clone(), *id))
        .collect();
    let contents = fetch::fetch_set(src, pairs, FetchOptions::default()).await?;

    let txn = dst.begin().await?;
    let mut blobs = 0;
    for file_ref in &refs {
        let content = if file_ref.change_kind == ChangeKind::Deleted {
            BlobContent::Tombstone
        } else {
            contents
                .get(&(file_ref.path.clone(), *id))
                .and_then(|slot| slot.value().clone())
                .ok_or_else(|| {
                    PgitError::Storage(format!(
                        "missing blob content for {} at {id}",
                        file_ref.path
                    ))
                })?
        };
        storage::put_blob(&txn, id, &file_ref.path, &content, file_ref.change_kind).await?;
        blobs += 1;
    }
    storage::put_commit(&txn, &commit, row.merge_parent_id).await?;
    txn.commit().await?;
    debug!(commit = %id, blobs, "transferred commit");
    Ok(blobs)
}

/// Commits on the chain of `tip` (in `src`) that `dst` does not have yet,
/// parent-first.
async fn missing_chain(
    src: &Storage,
    dst: &Storage,
    tip: &CommitId,
) -> Result<Vec<CommitId>, PgitError> {
    let mut pending = Vec::new();
    let mut cursor = Some(*tip);
    while let Some(id) = cursor {
        if graph::exists(dst.conn(), &id).await? {
            break;
        }
        let row = graph::get(src.conn(), &id)
            .await?
            .ok_or_else(|| PgitError::CommitNotFound(id.to_string()))?;
        pending.push(id);
        cursor = row.parent_id;
    }
    pending.reverse();
    Ok(pending)
}

async fn transfer_chain(
    src: &Storage,
    dst: &Storage,
    chain: &[CommitId],
) -> Result<TransferReport, PgitError> {
    let mut report = TransferReport::default();
    for id in chain {
        report.blobs += transfer_commit(src, dst, id).await?;
        report.commits += 1;
    }
    Ok(report)
}

/// Push the local chain to a remote, fast-forward only unless forced.
pub async fn push(repo: &Repo, remote_name: &str, force: bool) -> Result<PushOutcome, PgitError> {
    let url = repo.remote_url(remote_name)?;
    let remote = Storage::open_or_init(&url).await?;
    let local_head = repo.head().await?.ok_or(PgitError::NoCommits)?;
    let observed = graph::head(remote.conn()).await?;

    if observed == Some(local_head) {
        return Ok(PushOutcome::UpToDate);
    }
    if let Some(remote_head) = observed {
        let known = graph::exists(repo.storage.conn(), &remote_head).await?
            && graph::is_ancestor(repo.storage.conn(), &remote_head, &local_head).await?;
        if !known && !force {
            return Err(PgitError::NonFastForward);
        }
    }

    let chain = missing_chain(&repo.storage, &remote, &local_head).await?;
    let report = transfer_chain(&repo.storage, &remote, &chain).await?;

    if !graph::cas_head(remote.conn(), observed, Some(local_head)).await? {
        // The remote advanced while we were transferring. Rows already
        // written are content-addressed and harmless.
        return Err(PgitError::NonFastForward);
    }
    info!(remote = remote_name, commits = report.commits, "pushed");
    Ok(PushOutcome::Advanced {
        report,
        head: local_head,
    })
}

/// Latest change per path among FileRef rows, path-sorted.
fn latest_per_path(refs: Vec<FileRef>) -> BTreeMap<String, FileRef> {
    let mut map: BTreeMap<String, FileRef> = BTreeMap::new();
    for file_ref in refs {
        match map.get(&file_ref.path) {
            Some(existing) if existing.commit_id >= file_ref.commit_id => {}
            _ => {
                map.insert(file_ref.path.clone(), file_ref);
            }
        }
    }
    map
}

/// Pull from a remote: fast-forward when possible, otherwise a three-way
/// merge per path that writes conflict markers and records merge state.
pub async fn pull(repo: &Repo, remote_name: &str) -> Result<PullOutcome, PgitError> {
    let url = repo.remote_url(remote_name)?;
    let remote = Storage::open(&url).await?;

    let Some(remote_head) = graph::head(remote.conn()).await? else {
        return Ok(PullOutcome::UpToDate);
    };
    let local_head = repo.head().await?;
    if local_head == Some(remote_head) {
        return Ok(PullOutcome::UpToDate);
    }

    let merge_state = MergeState::load(&repo.meta_dir)?;
    if merge_state.in_progress {
        return Err(PgitError::MergeInProgress);
    }
    let _lock = repo.lock_index()?;
    if !worktree::working_tree_changes(repo).await?.is_empty()
        || !repo.load_index()?.is_empty()
    {
        return Err(PgitError::UncommittedChanges);
    }

    let chain = missing_chain(&remote, &repo.storage, &remote_head).await?;
    let report = transfer_chain(&remote, &repo.storage, &chain).await?;

    // Fast-forward when the local head is on the remote chain.
    let fast_forward = match local_head {
        None => true,
        Some(local) => graph::is_ancestor(repo.storage.conn(), &local, &remote_head).await?,
    };
    if fast_forward {
        let files = worktree::apply_tree(repo, local_head, &remote_head).await?;
        repo.set_head(Some(remote_head)).await?;
        info!(remote = remote_name, head = %remote_head, "fast-forwarded");
        return Ok(PullOutcome::FastForward {
            report,
            head: remote_head,
            files,
        });
    }

    let local_head = local_head.expect("diverged pull implies a local head");
    if graph::is_ancestor(repo.storage.conn(), &remote_head, &local_head).await? {
        // Local history is strictly ahead; nothing to integrate.
        return Ok(PullOutcome::UpToDate);
    }
    let base = graph::merge_base(repo.storage.conn(), &local_head, &remote_head)
        .await?
        .ok_or_else(|| PgitError::Storage("histories share no common ancestor".into()))?;
    debug!(base = %base, local = %local_head, remote = %remote_head, "three-way merge");

    let base_tree: BTreeMap<String, ContentHash> = repo
        .storage
        .tree_metadata(&base)
        .await?
        .into_iter()
        .map(|e| (e.path, e.content_hash))
        .collect();
    let ours = latest_per_path(
        repo.storage
            .get_changed_paths(Some(&base), &local_head)
            .await?,
    );
    let theirs = latest_per_path(
        repo.storage
            .get_changed_paths(Some(&base), &remote_head)
            .await?,
    );

    let mut index = repo.load_index()?;
    let mut conflicts: Vec<String> = Vec::new();
    let mut taken = 0usize;

    let mut paths: Vec<&String> = theirs.keys().collect();
    paths.sort();
    for path in paths {
        let their_ref = &theirs[path];
        match ours.get(path) {
            None => {
                // Only the remote side touched this path: take it.
                take_remote_change(repo, &mut index, their_ref, &base_tree).await?;
                taken += 1;
            }
            Some(our_ref) => {
                if our_ref.content_hash == their_ref.content_hash {
                    continue;
                }
                let ours_bytes = read_side(repo, path, our_ref).await?;
                let theirs_bytes = read_side(repo, path, their_ref).await?;
                let merged = merge::render_conflict(
                    "HEAD",
                    &ours_bytes,
                    &their_ref.commit_id.short(),
                    &theirs_bytes,
                );
                worktree::write_file(
                    repo,
                    path,
                    &BlobContent::Regular {
                        mode: 0o644,
                        content: merged,
                    },
                )?;
                conflicts.push(path.clone());
            }
        }
    }

    repo.save_index(&index)?;
    MergeState::begin(remote_head, local_head, conflicts.clone()).save(&repo.meta_dir)?;
    info!(
        remote = remote_name,
        taken,
        conflicts = conflicts.len(),
        "merge prepared"
    );
    Ok(PullOutcome::Merged {
        report,
        source: remote_head,
        target: local_head,
        taken,
        conflicts,
    })
}

/// Content of one side of a conflict; a deleted side reads as empty.
async fn read_side(repo: &Repo, path: &str, file_ref: &FileRef) -> Result<Vec<u8>, PgitError> {
    if file_ref.change_kind == ChangeKind::Deleted {
        return Ok(Vec::new());
    }
    let blob = repo
        .storage
        .get_blob(path, &file_ref.commit_id)
        .await?
        .ok_or_else(|| {
            PgitError::Storage(format!("missing blob for {path} at {}", file_ref.commit_id))
        })?;
    Ok(match blob.content {
        BlobContent::Regular { content, .. } => content,
        BlobContent::Symlink { target, .. } => target.into_bytes(),
        BlobContent::Tombstone => Vec::new(),
    })
}

/// Apply a remote-only change to the working tree and stage it so the merge
/// commit captures it.
async fn take_remote_change(
    repo: &Repo,
    index: &mut crate::internal::index::StagingIndex,
    their_ref: &FileRef,
    base_tree: &BTreeMap<String, ContentHash>,
) -> Result<(), PgitError> {
    let path = &their_ref.path;
    if their_ref.change_kind == ChangeKind::Deleted {
        worktree::remove_file(repo, path)?;
        index.stage(IndexEntry {
            path: path.clone(),
            content_hash: None,
            mode: 0,
            is_symlink: false,
            symlink_target: None,
            origin: EntryOrigin::TrackedDeleted,
        });
        return Ok(());
    }
    let blob = repo
        .storage
        .get_blob(path, &their_ref.commit_id)
        .await?
        .ok_or_else(|| {
            PgitError::Storage(format!("missing blob for {path} at {}", their_ref.commit_id))
        })?;
    worktree::write_file(repo, path, &blob.content)?;
    index.stage(IndexEntry {
        path: path.clone(),
        content_hash: blob.content.content_hash(),
        mode: blob.content.mode().unwrap_or(0o644),
        is_symlink: blob.content.is_symlink(),
        symlink_target: match &blob.content {
            BlobContent::Symlink { target, .. } => Some(target.clone()),
            _ => None,
        },
        origin: if base_tree.contains_key(path) {
            EntryOrigin::TrackedModified
        } else {
            EntryOrigin::UntrackedAdded
        },
    });
    Ok(())
}

/// Clone a remote database into a fresh directory and check out its HEAD.
pub async fn clone_repo(
    url: &str,
    dest: &std::path::Path,
    remote_name: &str,
) -> Result<(Repo, TransferReport), PgitError> {
    std::fs::create_dir_all(dest)?;
    let mut repo = Repo::init(dest, None).await?;
    repo.config
        .set(&format!("remote.{remote_name}.url"), url)?;
    repo.save_config()?;

    let remote = Storage::open(url).await?;
    let rows = graph::all_in_order(remote.conn()).await?;
    let mut report = TransferReport::default();
    for row in &rows {
        report.blobs += transfer_commit(&remote, &repo.storage, &row.id).await?;
        report.commits += 1;
    }

    if let Some(head) = graph::head(remote.conn()).await? {
        worktree::apply_tree(&repo, None, &head).await?;
        repo.set_head(Some(head)).await?;
    }
    info!(url, commits = report.commits, "cloned");
    Ok((repo, report))
}
