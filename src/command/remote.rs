//! Manage remote database URLs.

use clap::{Parser, Subcommand};

use crate::errors::PgitError;
use crate::internal::repo::Repo;

#[derive(Parser, Debug)]
pub struct RemoteArgs {
    #[clap(subcommand)]
    pub command: Option<RemoteCommand>,
}

#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// Register a remote database URL
    Add { name: String, url: String },
    /// Remove a configured remote
    Remove { name: String },
}

pub async fn execute(args: RemoteArgs) -> Result<(), PgitError> {
    let mut repo = Repo::open().await?;
    match args.command {
        None => {
            for (name, remote) in &repo.config.remote {
                println!("{name}\t{}", remote.url);
            }
        }
        Some(RemoteCommand::Add { name, url }) => {
            repo.config.set(&format!("remote.{name}.url"), &url)?;
            repo.save_config()?;
        }
        Some(RemoteCommand::Remove { name }) => {
            if repo.config.remote.remove(&name).is_none() {
                return Err(PgitError::RemoteNotFound(name));
            }
            repo.save_config()?;
        }
    }
    Ok(())
}
