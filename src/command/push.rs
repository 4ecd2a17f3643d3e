//! Push local history to a remote database.

use clap::Parser;
use colored::Colorize;

use crate::errors::PgitError;
use crate::internal::repo::Repo;
use crate::internal::sync::{self, PushOutcome};

#[derive(Parser, Debug)]
pub struct PushArgs {
    /// Remote name
    #[clap(default_value = "origin")]
    pub remote: String,

    /// Allow a non-fast-forward update of the remote HEAD
    #[clap(short = 'f', long)]
    pub force: bool,
}

pub async fn execute(args: PushArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    match sync::push(&repo, &args.remote, args.force).await? {
        PushOutcome::UpToDate => println!("Everything up to date"),
        PushOutcome::Advanced { report, head } => {
            println!(
                "To {}: {} commit(s), {} blob(s) -> {}",
                args.remote,
                report.commits,
                report.blobs,
                head.short().yellow()
            );
        }
    }
    Ok(())
}
