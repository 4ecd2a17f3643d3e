//! Move or rename a tracked file, staging both sides.

use std::path::PathBuf;

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::index::{EntryOrigin, IndexEntry};
use crate::internal::repo::Repo;
use crate::internal::worktree;

#[derive(Parser, Debug)]
pub struct MvArgs {
    pub source: PathBuf,
    pub destination: PathBuf,
}

pub async fn execute(args: MvArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let _lock = repo.lock_index()?;
    let mut index = repo.load_index()?;

    let source = repo.rel_path(&args.source)?;
    let destination = repo.rel_path(&args.destination)?;

    let source_abs = repo.abs_path(&source);
    if worktree::stat_file(&source_abs)?.is_none() {
        return Err(PgitError::FileNotFound(source));
    }
    let destination_abs = repo.abs_path(&destination);
    if let Some(parent) = destination_abs.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&source_abs, &destination_abs)?;

    let tracked = match repo.head().await? {
        Some(head) => repo
            .storage
            .tree_metadata(&head)
            .await?
            .into_iter()
            .any(|e| e.path == source),
        None => false,
    };
    if tracked {
        index.stage(IndexEntry {
            path: source.clone(),
            content_hash: None,
            mode: 0,
            is_symlink: false,
            symlink_target: None,
            origin: EntryOrigin::TrackedDeleted,
        });
    } else {
        index.unstage(&source);
    }

    let stat = worktree::stat_file(&destination_abs)?
        .ok_or_else(|| PgitError::FileNotFound(destination.clone()))?;
    index.stage(IndexEntry {
        path: destination.clone(),
        content_hash: Some(stat.content_hash),
        mode: stat.mode,
        is_symlink: stat.is_symlink,
        symlink_target: stat.symlink_target,
        origin: EntryOrigin::UntrackedAdded,
    });

    repo.save_index(&index)?;
    println!("renamed '{source}' -> '{destination}'");
    Ok(())
}
