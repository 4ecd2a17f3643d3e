//! Stage working-tree changes.

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::index::{EntryOrigin, IndexEntry};
use crate::internal::repo::Repo;
use crate::internal::worktree;

#[derive(Parser, Debug, Default)]
pub struct AddArgs {
    /// Files or directories to stage
    #[clap(value_name = "PATH", required_unless_present = "all")]
    pub pathspec: Vec<PathBuf>,

    /// Stage every change in the working tree, deletions included
    #[clap(short = 'A', long)]
    pub all: bool,
}

pub async fn execute(args: AddArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let _lock = repo.lock_index()?;
    let mut index = repo.load_index()?;

    let head_tree: std::collections::BTreeMap<String, crate::hash::ContentHash> =
        match repo.head().await? {
            Some(head) => repo
                .storage
                .tree_metadata(&head)
                .await?
                .into_iter()
                .map(|e| (e.path, e.content_hash))
                .collect(),
            None => Default::default(),
        };
    let tracked: BTreeSet<String> = head_tree.keys().cloned().collect();

    let targets: Vec<String> = if args.all {
        let mut all: BTreeSet<String> = worktree::walk_files(&repo)?.into_iter().collect();
        all.extend(tracked.iter().cloned());
        all.into_iter().collect()
    } else {
        super::expand_pathspecs(&repo, &args.pathspec, &tracked).await?
    };

    let mut staged = 0usize;
    for path in targets {
        let explicit = !args.all;
        match worktree::stat_file(&repo.abs_path(&path))? {
            None => {
                if tracked.contains(&path) {
                    index.stage(IndexEntry {
                        path: path.clone(),
                        content_hash: None,
                        mode: 0,
                        is_symlink: false,
                        symlink_target: None,
                        origin: EntryOrigin::TrackedDeleted,
                    });
                    staged += 1;
                } else if index.unstage(&path) {
                    staged += 1;
                } else if explicit {
                    return Err(PgitError::FileNotFound(path));
                }
            }
            Some(stat) => {
                let origin = match head_tree.get(&path) {
                    Some(head_hash) if *head_hash == stat.content_hash => {
                        // Back to the committed content: nothing to stage.
                        index.unstage(&path);
                        continue;
                    }
                    Some(_) => EntryOrigin::TrackedModified,
                    None => EntryOrigin::UntrackedAdded,
                };
                index.stage(IndexEntry {
                    path: path.clone(),
                    content_hash: Some(stat.content_hash),
                    mode: stat.mode,
                    is_symlink: stat.is_symlink,
                    symlink_target: stat.symlink_target,
                    origin,
                });
                staged += 1;
            }
        }
    }

    repo.save_index(&index)?;
    if staged == 0 {
        println!("nothing to stage");
    }
    Ok(())
}
