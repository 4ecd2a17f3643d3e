//! Record the staged changes as a new commit.

use clap::Parser;
use colored::Colorize;

use crate::errors::PgitError;
use crate::internal::assembler;
use crate::internal::repo::Repo;

#[derive(Parser, Debug)]
pub struct CommitArgs {
    /// Commit message
    #[clap(short = 'm', long = "message", required = true)]
    pub message: String,
}

pub async fn execute(args: CommitArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let commit = assembler::commit(&repo, &args.message).await?;
    println!(
        "[{}] {}",
        commit.id.short().yellow(),
        commit.subject()
    );
    Ok(())
}
