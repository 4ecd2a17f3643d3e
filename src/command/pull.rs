//! Pull remote history: fast-forward or three-way merge.

use clap::Parser;
use colored::Colorize;

use crate::errors::PgitError;
use crate::internal::repo::Repo;
use crate::internal::sync::{self, PullOutcome};

#[derive(Parser, Debug)]
pub struct PullArgs {
    /// Remote name
    #[clap(default_value = "origin")]
    pub remote: String,
}

pub async fn execute(args: PullArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    match sync::pull(&repo, &args.remote).await? {
        PullOutcome::UpToDate => println!("Already up to date"),
        PullOutcome::FastForward {
            report,
            head,
            files,
        } => {
            println!(
                "Fast-forward to {} ({} commit(s), {files} file(s) updated)",
                head.short().yellow(),
                report.commits
            );
        }
        PullOutcome::Merged {
            source,
            target,
            taken,
            conflicts,
            ..
        } => {
            println!(
                "Merging {} into {}",
                source.short().yellow(),
                target.short().yellow()
            );
            if taken > 0 {
                println!("{taken} file(s) taken from the remote side");
            }
            if conflicts.is_empty() {
                println!("No conflicts; run \"pgit commit\" to conclude the merge");
            } else {
                return Err(PgitError::MergeConflicts { paths: conflicts });
            }
        }
    }
    Ok(())
}
