//! Clone a remote database into a new working tree.

use std::path::PathBuf;

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::sync;

#[derive(Parser, Debug)]
pub struct CloneArgs {
    /// Remote database URL
    pub url: String,

    /// Target directory
    pub directory: PathBuf,
}

pub async fn execute(args: CloneArgs) -> Result<(), PgitError> {
    println!("Cloning into '{}'...", args.directory.display());
    let (repo, report) = sync::clone_repo(&args.url, &args.directory, "origin").await?;
    match repo.head().await? {
        Some(head) => println!(
            "Done: {} commit(s), {} blob(s), HEAD at {}",
            report.commits,
            report.blobs,
            head.short()
        ),
        None => println!("Cloned an empty repository"),
    }
    Ok(())
}
