//! Read and write repository configuration.

use clap::Parser;

use crate::errors::PgitError;
use crate::internal::repo::Repo;

#[derive(Parser, Debug, Default)]
pub struct ConfigArgs {
    /// Dotted key, e.g. `user.name`
    #[clap(required_unless_present = "list")]
    pub key: Option<String>,

    /// New value; omitted to read the key
    pub value: Option<String>,

    /// Print every configured key
    #[clap(short = 'l', long)]
    pub list: bool,
}

pub async fn execute(args: ConfigArgs) -> Result<(), PgitError> {
    let mut repo = Repo::open().await?;

    if args.list {
        for (key, value) in repo.config.list() {
            println!("{key}={value}");
        }
        return Ok(());
    }

    let key = args.key.expect("clap enforces key unless --list");
    match args.value {
        Some(value) => {
            repo.config.set(&key, &value)?;
            repo.save_config()?;
        }
        None => match repo.config.get(&key) {
            Some(value) => println!("{value}"),
            None => return Err(PgitError::Usage(format!("`{key}` is not set"))),
        },
    }
    Ok(())
}
