//! Search tree content at a revision.

use clap::Parser;
use colored::Colorize;
use regex::RegexBuilder;

use crate::errors::PgitError;
use crate::id::CommitId;
use crate::internal::fetch::{self, FetchOptions};
use crate::internal::object::blob::BlobContent;
use crate::internal::repo::Repo;
use crate::internal::revision;

#[derive(Parser, Debug)]
pub struct SearchArgs {
    /// Regular expression to search for
    pub pattern: String,

    /// Revision whose tree is searched
    #[clap(long, default_value = "HEAD")]
    pub rev: String,

    /// Case-insensitive matching
    #[clap(short = 'i', long)]
    pub ignore_case: bool,
}

pub async fn execute(args: SearchArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let at = revision::resolve(repo.storage.conn(), &args.rev).await?;
    let regex = RegexBuilder::new(&args.pattern)
        .case_insensitive(args.ignore_case)
        .build()
        .map_err(|e| PgitError::Usage(format!("invalid pattern: {e}")))?;

    let tree = repo.storage.tree_metadata(&at).await?;
    let pairs: Vec<(String, CommitId)> = tree
        .iter()
        .map(|entry| (entry.path.clone(), entry.commit_id))
        .collect();
    let contents = fetch::fetch_set(&repo.storage, pairs, FetchOptions::default()).await?;

    let mut hits = 0usize;
    for entry in &tree {
        let Some(content) = contents
            .get(&(entry.path.clone(), entry.commit_id))
            .and_then(|slot| slot.value().clone())
        else {
            continue;
        };
        let bytes = match &content {
            BlobContent::Regular { content, .. } => content.as_slice(),
            BlobContent::Symlink { .. } | BlobContent::Tombstone => continue,
        };
        if bytes.contains(&0) {
            continue;
        }
        let text = String::from_utf8_lossy(bytes);
        for (number, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                println!("{}:{}:{line}", entry.path.magenta(), number + 1);
                hits += 1;
            }
        }
    }
    if hits == 0 {
        println!("no matches");
    }
    Ok(())
}
