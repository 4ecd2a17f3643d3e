//! Walk and render commit history.

use clap::Parser;
use colored::Colorize;

use crate::errors::PgitError;
use crate::internal::db::storage;
use crate::internal::graph;
use crate::internal::repo::Repo;

/// Graph rows fetched per page while walking the chain.
const PAGE_SIZE: usize = 100;

#[derive(Parser, Debug, Default)]
pub struct LogArgs {
    /// Limit the number of commits shown
    #[clap(short = 'n', long = "max-count", value_name = "N")]
    pub max_count: Option<usize>,

    /// One line per commit: short id and subject
    #[clap(long)]
    pub oneline: bool,
}

pub async fn execute(args: LogArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let head = repo.head().await?.ok_or(PgitError::NoCommits)?;

    let mut remaining = args.max_count.unwrap_or(usize::MAX);
    let mut cursor = Some(head);
    let mut first = true;
    while let Some(from) = cursor {
        if remaining == 0 {
            break;
        }
        let page = graph::walk(repo.storage.conn(), &from, PAGE_SIZE.min(remaining)).await?;
        if page.is_empty() {
            break;
        }
        cursor = page.last().and_then(|row| row.parent_id);
        remaining = remaining.saturating_sub(page.len());

        for row in page {
            if args.oneline {
                println!("{} {}", row.id.short().yellow(), row.subject);
                continue;
            }
            // Full rendering needs the record; the page bound keeps the
            // decompression cost proportional to what is printed.
            let commit = storage::get_commit(repo.storage.conn(), &row.id).await?;
            if !first {
                println!();
            }
            first = false;
            println!("{}", format!("commit {}", commit.id).yellow());
            if let Some(merge_parent) = row.merge_parent_id {
                println!("Merge: {} {}", commit.id.short(), merge_parent.short());
            }
            println!("Author: {} <{}>", commit.author.name, commit.author.email);
            println!("Date:   {}", commit.author.when.to_rfc2822());
            println!();
            for line in commit.message.lines() {
                println!("    {line}");
            }
        }
    }
    Ok(())
}
