//! Delete untracked files from the working tree.

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::repo::Repo;
use crate::internal::worktree;

#[derive(Parser, Debug, Default)]
pub struct CleanArgs {
    /// Actually delete; without this only a preview is printed
    #[clap(short = 'f', long)]
    pub force: bool,

    /// Also remove empty directories left behind
    #[clap(short = 'd')]
    pub directories: bool,
}

pub async fn execute(args: CleanArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let index = repo.load_index()?;
    let changes = worktree::working_tree_changes(&repo).await?;

    let victims: Vec<String> = changes
        .untracked
        .into_iter()
        .filter(|path| index.get(path).is_none())
        .collect();

    if victims.is_empty() {
        println!("nothing to clean");
        return Ok(());
    }
    for path in &victims {
        if args.force {
            worktree::remove_file(&repo, path)?;
            println!("Removed {path}");
        } else {
            println!("Would remove {path}");
        }
    }
    if args.force && args.directories {
        prune_empty_dirs(&repo.workdir)?;
    }
    if !args.force {
        println!("(use --force to delete)");
    }
    Ok(())
}

fn prune_empty_dirs(root: &std::path::Path) -> Result<(), PgitError> {
    // Depth-first so children empty out before their parents are tried.
    let mut dirs = Vec::new();
    collect_dirs(root, &mut dirs)?;
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let _ = std::fs::remove_dir(dir);
    }
    Ok(())
}

fn collect_dirs(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>) -> Result<(), PgitError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let path = entry.path();
            if path.file_name().map(|n| n.to_string_lossy().into_owned())
                == Some(crate::internal::repo::META_DIR.to_string())
            {
                continue;
            }
            collect_dirs(&path, out)?;
            out.push(path);
        }
    }
    Ok(())
}
