//! Create a new repository.

use std::path::PathBuf;

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::repo::Repo;

#[derive(Parser, Debug, Default)]
pub struct InitArgs {
    /// Directory to initialize (created if missing)
    #[clap(default_value = ".")]
    pub directory: PathBuf,

    /// Database identifier: a connection URL, or a file name kept under
    /// the metadata directory
    #[clap(long, value_name = "URL")]
    pub database: Option<String>,
}

pub async fn execute(args: InitArgs) -> Result<(), PgitError> {
    std::fs::create_dir_all(&args.directory)?;
    let repo = Repo::init(&args.directory, args.database).await?;
    println!(
        "Initialized empty pgit repository in {}",
        repo.meta_dir.display()
    );
    Ok(())
}
