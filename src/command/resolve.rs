//! Mark merge conflicts as resolved.

use std::path::PathBuf;

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::index::{EntryOrigin, IndexEntry};
use crate::internal::merge::{self, MergeState};
use crate::internal::repo::Repo;
use crate::internal::worktree;

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Conflicted files that are now fixed
    #[clap(value_name = "PATH", required = true)]
    pub pathspec: Vec<PathBuf>,
}

pub async fn execute(args: ResolveArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let mut state = MergeState::load(&repo.meta_dir)?;
    if !state.in_progress {
        return Err(PgitError::Usage("no merge in progress".into()));
    }

    let _lock = repo.lock_index()?;
    let mut index = repo.load_index()?;
    let base_paths: std::collections::BTreeSet<String> = match state.target_commit {
        Some(target) => repo
            .storage
            .tree_metadata(&target)
            .await?
            .into_iter()
            .map(|e| e.path)
            .collect(),
        None => Default::default(),
    };

    for spec in &args.pathspec {
        let path = repo.rel_path(spec)?;
        if !state.conflicted_files.contains(&path) {
            return Err(PgitError::Usage(format!("`{path}` is not conflicted")));
        }
        let content = std::fs::read(repo.abs_path(&path))
            .map_err(|_| PgitError::FileNotFound(path.clone()))?;
        if merge::has_conflict_markers(&content) {
            return Err(PgitError::ConflictMarkersPresent(path));
        }

        let stat = worktree::stat_file(&repo.abs_path(&path))?
            .ok_or_else(|| PgitError::FileNotFound(path.clone()))?;
        index.stage(IndexEntry {
            path: path.clone(),
            content_hash: Some(stat.content_hash),
            mode: stat.mode,
            is_symlink: stat.is_symlink,
            symlink_target: stat.symlink_target,
            origin: if base_paths.contains(&path) {
                EntryOrigin::TrackedModified
            } else {
                EntryOrigin::UntrackedAdded
            },
        });
        state.resolve_path(&path);
        println!("resolved '{path}'");
    }

    repo.save_index(&index)?;
    state.save(&repo.meta_dir)?;
    if state.conflicted_files.is_empty() {
        println!("All conflicts resolved; run \"pgit commit\" to conclude the merge");
    }
    Ok(())
}
