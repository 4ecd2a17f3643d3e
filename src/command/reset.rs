//! Unstage changes.

use std::path::PathBuf;

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::repo::Repo;

#[derive(Parser, Debug, Default)]
pub struct ResetArgs {
    /// Paths to unstage; with none given, the whole index is cleared
    #[clap(value_name = "PATH")]
    pub pathspec: Vec<PathBuf>,
}

pub async fn execute(args: ResetArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let _lock = repo.lock_index()?;
    let mut index = repo.load_index()?;

    if args.pathspec.is_empty() {
        let count = index.len();
        index.clear();
        repo.save_index(&index)?;
        println!("unstaged {count} path(s)");
        return Ok(());
    }

    for spec in &args.pathspec {
        let path = repo.rel_path(spec)?;
        if index.unstage(&path) {
            println!("unstaged '{path}'");
        } else {
            println!("'{path}' was not staged");
        }
    }
    repo.save_index(&index)?;
    Ok(())
}
