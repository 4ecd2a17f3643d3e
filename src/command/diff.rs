//! Compare commits and the working tree.

use std::collections::BTreeMap;

use clap::Parser;

use crate::diff::unified;
use crate::errors::PgitError;
use crate::hash::ContentHash;
use crate::id::CommitId;
use crate::internal::fetch::{self, FetchOptions};
use crate::internal::object::blob::BlobContent;
use crate::internal::repo::Repo;
use crate::internal::revision;
use crate::internal::worktree;

#[derive(Parser, Debug, Default)]
pub struct DiffArgs {
    /// What to compare: nothing for HEAD vs working tree, `A..B` for two
    /// commits, or a single revision for that commit vs the working tree
    #[clap(value_name = "REVISION")]
    pub range: Option<String>,
}

fn blob_bytes(content: &BlobContent) -> Vec<u8> {
    match content {
        BlobContent::Regular { content, .. } => content.clone(),
        BlobContent::Symlink { target, .. } => target.clone().into_bytes(),
        BlobContent::Tombstone => Vec::new(),
    }
}

pub async fn execute(args: DiffArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let output = match &args.range {
        Some(range) if range.contains("..") => {
            let (from, to) = range
                .split_once("..")
                .ok_or_else(|| PgitError::InvalidRef(range.clone()))?;
            let from = revision::resolve(repo.storage.conn(), from).await?;
            let to = revision::resolve(repo.storage.conn(), to).await?;
            diff_commits(&repo, &from, &to).await?
        }
        Some(rev) => {
            let from = revision::resolve(repo.storage.conn(), rev).await?;
            diff_against_worktree(&repo, Some(from)).await?
        }
        None => {
            let head = repo.head().await?;
            diff_against_worktree(&repo, head).await?
        }
    };
    print!("{output}");
    Ok(())
}

/// Diff two committed trees, fetching both sides of only the changed paths.
pub async fn diff_commits(
    repo: &Repo,
    from: &CommitId,
    to: &CommitId,
) -> Result<String, PgitError> {
    let from_tree: BTreeMap<String, CommitId> = repo
        .storage
        .tree_metadata(from)
        .await?
        .into_iter()
        .map(|e| (e.path, e.commit_id))
        .collect();
    let to_tree: BTreeMap<String, CommitId> = repo
        .storage
        .tree_metadata(to)
        .await?
        .into_iter()
        .map(|e| (e.path, e.commit_id))
        .collect();

    let changed = repo.storage.get_changed_paths(Some(from), to).await?;
    let mut paths: Vec<String> = changed.into_iter().map(|r| r.path).collect();
    paths.sort();
    paths.dedup();

    let mut pairs: Vec<(String, CommitId)> = Vec::new();
    for path in &paths {
        if let Some(source) = from_tree.get(path) {
            pairs.push((path.clone(), *source));
        }
        if let Some(source) = to_tree.get(path) {
            pairs.push((path.clone(), *source));
        }
    }
    let contents = fetch::fetch_set(&repo.storage, pairs, FetchOptions::default()).await?;
    let fetched = |path: &str, source: Option<&CommitId>| -> Option<Vec<u8>> {
        let source = source?;
        contents
            .get(&(path.to_string(), *source))
            .and_then(|slot| slot.value().as_ref().map(blob_bytes))
    };

    let mut out = String::new();
    for path in &paths {
        let old = fetched(path, from_tree.get(path));
        let new = fetched(path, to_tree.get(path));
        out.push_str(&unified(path, old.as_deref(), new.as_deref()).data);
    }
    Ok(out)
}

/// Diff a committed tree (or nothing) against the working tree, fetching
/// old content only for paths whose hash differs.
pub async fn diff_against_worktree(
    repo: &Repo,
    from: Option<CommitId>,
) -> Result<String, PgitError> {
    let tree = match &from {
        Some(from) => repo.storage.tree_metadata(from).await?,
        None => Vec::new(),
    };
    let tree_by_path: BTreeMap<String, (CommitId, ContentHash)> = tree
        .into_iter()
        .map(|e| (e.path, (e.commit_id, e.content_hash)))
        .collect();

    let mut changed: Vec<String> = Vec::new();
    for (path, (_, head_hash)) in &tree_by_path {
        match worktree::stat_file(&repo.abs_path(path))? {
            None => changed.push(path.clone()),
            Some(stat) if stat.content_hash != *head_hash => changed.push(path.clone()),
            Some(_) => {}
        }
    }

    let pairs: Vec<(String, CommitId)> = changed
        .iter()
        .filter_map(|path| tree_by_path.get(path).map(|(src, _)| (path.clone(), *src)))
        .collect();
    let contents = fetch::fetch_set(&repo.storage, pairs, FetchOptions::default()).await?;

    let mut out = String::new();
    for path in &changed {
        let (source, _) = &tree_by_path[path];
        let old = contents
            .get(&(path.clone(), *source))
            .and_then(|slot| slot.value().as_ref().map(blob_bytes));
        let new = match worktree::snapshot_file(&repo.abs_path(path))? {
            Some(content) => Some(blob_bytes(&content)),
            None => None,
        };
        out.push_str(&unified(path, old.as_deref(), new.as_deref()).data);
    }
    Ok(out)
}
