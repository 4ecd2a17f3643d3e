//! Restore working-tree content from a commit.

use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;

use crate::errors::PgitError;
use crate::internal::repo::Repo;
use crate::internal::revision;
use crate::internal::worktree;

#[derive(Parser, Debug)]
pub struct CheckoutArgs {
    /// Revision to check out
    pub revision: String,

    /// Restore only this path, leaving HEAD where it is
    #[clap(value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Discard uncommitted changes
    #[clap(short = 'f', long)]
    pub force: bool,
}

pub async fn execute(args: CheckoutArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let target = revision::resolve(repo.storage.conn(), &args.revision).await?;

    if let Some(path) = &args.path {
        let rel = repo.rel_path(path)?;
        let tree = repo.storage.tree_metadata(&target).await?;
        let entry = tree
            .into_iter()
            .find(|e| e.path == rel)
            .ok_or_else(|| PgitError::FileNotFound(rel.clone()))?;
        let blob = repo
            .storage
            .get_blob(&rel, &entry.commit_id)
            .await?
            .ok_or_else(|| PgitError::FileNotFound(rel.clone()))?;
        worktree::write_file(&repo, &rel, &blob.content)?;
        println!("Restored {rel} from {}", target.short().yellow());
        return Ok(());
    }

    let _lock = repo.lock_index()?;
    if !args.force {
        let dirty = !worktree::working_tree_changes(&repo).await?.is_empty()
            || !repo.load_index()?.is_empty();
        if dirty {
            return Err(PgitError::UncommittedChanges);
        }
    }

    let old_head = repo.head().await?;
    let files = worktree::apply_tree(&repo, old_head, &target).await?;
    repo.set_head(Some(target)).await?;

    let mut index = repo.load_index()?;
    if !index.is_empty() {
        index.clear();
        repo.save_index(&index)?;
    }
    println!(
        "HEAD is now at {} ({files} file(s) updated)",
        target.short().yellow()
    );
    Ok(())
}
