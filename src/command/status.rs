//! Report staged, unstaged and untracked changes.

use clap::Parser;
use colored::Colorize;

use crate::errors::PgitError;
use crate::internal::index::EntryOrigin;
use crate::internal::merge::MergeState;
use crate::internal::repo::Repo;
use crate::internal::worktree;

#[derive(Parser, Debug, Default)]
pub struct StatusArgs {
    /// One line per change: XY path
    #[clap(short = 's', long)]
    pub short: bool,
}

pub async fn execute(args: StatusArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let index = repo.load_index()?;
    let merge = MergeState::load(&repo.meta_dir)?;
    let changes = worktree::working_tree_changes(&repo).await?;

    // A working-tree difference already captured by the index is staged,
    // not pending; filter by the staged hash.
    let staged_matches_disk = |path: &str| -> Result<bool, PgitError> {
        match index.get(path) {
            None => Ok(false),
            Some(entry) => {
                let stat = worktree::stat_file(&repo.abs_path(path))?;
                Ok(match (&entry.content_hash, stat) {
                    (Some(staged), Some(stat)) => *staged == stat.content_hash,
                    (None, None) => true,
                    _ => false,
                })
            }
        }
    };

    let mut unstaged_modified = Vec::new();
    for path in &changes.modified {
        if !staged_matches_disk(path)? {
            unstaged_modified.push(path.clone());
        }
    }
    let mut unstaged_deleted = Vec::new();
    for path in &changes.deleted {
        if !staged_matches_disk(path)? {
            unstaged_deleted.push(path.clone());
        }
    }
    let untracked: Vec<String> = changes
        .untracked
        .iter()
        .filter(|path| index.get(path).is_none())
        .cloned()
        .collect();

    if args.short {
        for entry in index.iter() {
            let tag = match entry.origin {
                EntryOrigin::UntrackedAdded => "A ",
                EntryOrigin::TrackedModified => "M ",
                EntryOrigin::TrackedDeleted => "D ",
            };
            println!("{tag} {}", entry.path);
        }
        for path in &unstaged_modified {
            println!(" M {path}");
        }
        for path in &unstaged_deleted {
            println!(" D {path}");
        }
        for path in &untracked {
            println!("?? {path}");
        }
        return Ok(());
    }

    match repo.head().await? {
        Some(head) => println!("On commit {}", head.short().yellow()),
        None => println!("No commits yet"),
    }

    if merge.in_progress {
        println!();
        if merge.conflicted_files.is_empty() {
            println!("All conflicts resolved; run \"pgit commit\" to conclude the merge");
        } else {
            println!("You have unmerged paths:");
            println!("  fix them and run \"pgit resolve <path>\"");
            for path in &merge.conflicted_files {
                println!("{}", format!("\tboth modified: {path}").bright_red());
            }
        }
    }

    if !index.is_empty() {
        println!();
        println!("Changes to be committed:");
        println!("  use \"pgit reset <file>...\" to unstage");
        for entry in index.iter() {
            let line = match entry.origin {
                EntryOrigin::UntrackedAdded => format!("\tnew file: {}", entry.path),
                EntryOrigin::TrackedModified => format!("\tmodified: {}", entry.path),
                EntryOrigin::TrackedDeleted => format!("\tdeleted: {}", entry.path),
            };
            println!("{}", line.bright_green());
        }
    }

    if !unstaged_modified.is_empty() || !unstaged_deleted.is_empty() {
        println!();
        println!("Changes not staged for commit:");
        println!("  use \"pgit add <file>...\" to update what will be committed");
        for path in &unstaged_deleted {
            println!("{}", format!("\tdeleted: {path}").bright_red());
        }
        for path in &unstaged_modified {
            println!("{}", format!("\tmodified: {path}").bright_red());
        }
    }

    if !untracked.is_empty() {
        println!();
        println!("Untracked files:");
        println!("  use \"pgit add <file>...\" to include in what will be committed");
        for path in &untracked {
            println!("{}", format!("\t{path}").bright_red());
        }
    }

    if index.is_empty() && unstaged_modified.is_empty() && unstaged_deleted.is_empty()
        && untracked.is_empty()
        && !merge.in_progress
    {
        println!("nothing to commit, working tree clean");
    }
    Ok(())
}
