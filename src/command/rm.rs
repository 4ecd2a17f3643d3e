//! Remove files and stage the deletion.

use std::path::PathBuf;

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::index::{EntryOrigin, IndexEntry};
use crate::internal::repo::Repo;
use crate::internal::worktree;

#[derive(Parser, Debug)]
pub struct RmArgs {
    /// Files to remove
    #[clap(value_name = "PATH", required = true)]
    pub pathspec: Vec<PathBuf>,

    /// Unstage and stop tracking, but keep the file on disk
    #[clap(long)]
    pub cached: bool,
}

pub async fn execute(args: RmArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let _lock = repo.lock_index()?;
    let mut index = repo.load_index()?;

    let tracked: std::collections::BTreeSet<String> = match repo.head().await? {
        Some(head) => repo
            .storage
            .tree_metadata(&head)
            .await?
            .into_iter()
            .map(|e| e.path)
            .collect(),
        None => Default::default(),
    };

    for spec in &args.pathspec {
        let path = repo.rel_path(spec)?;
        let is_tracked = tracked.contains(&path);
        let was_staged = index.get(&path).is_some();
        if !is_tracked && !was_staged {
            return Err(PgitError::FileNotFound(path));
        }
        if !args.cached {
            worktree::remove_file(&repo, &path)?;
        }
        if is_tracked {
            index.stage(IndexEntry {
                path: path.clone(),
                content_hash: None,
                mode: 0,
                is_symlink: false,
                symlink_target: None,
                origin: EntryOrigin::TrackedDeleted,
            });
        } else {
            // Only ever staged as new: forget it.
            index.unstage(&path);
        }
        println!("rm '{path}'");
    }

    repo.save_index(&index)?;
    Ok(())
}
