//! Show a commit: header plus its diff against the parent.

use std::collections::BTreeMap;

use clap::Parser;
use colored::Colorize;

use crate::diff::unified;
use crate::errors::PgitError;
use crate::id::CommitId;
use crate::internal::fetch::{self, FetchOptions};
use crate::internal::graph;
use crate::internal::object::blob::BlobContent;
use crate::internal::repo::Repo;
use crate::internal::revision;

#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Revision to show
    #[clap(default_value = "HEAD")]
    pub revision: String,

    /// List touched paths without rendering hunks
    #[clap(long)]
    pub name_only: bool,
}

fn blob_bytes(content: &BlobContent) -> Vec<u8> {
    match content {
        BlobContent::Regular { content, .. } => content.clone(),
        BlobContent::Symlink { target, .. } => target.clone().into_bytes(),
        BlobContent::Tombstone => Vec::new(),
    }
}

pub async fn execute(args: ShowArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let id = revision::resolve(repo.storage.conn(), &args.revision).await?;
    let commit = repo.storage.get_commit(&id).await?;
    let row = graph::get(repo.storage.conn(), &id)
        .await?
        .ok_or_else(|| PgitError::CommitNotFound(id.to_string()))?;

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
    println!();

    // New side: exactly the blobs this commit wrote. Old side: parent
    // content for only those paths, through the fetch pool.
    let new_blobs = repo.storage.get_blobs_at_commit(&id).await?;
    if args.name_only {
        for blob in &new_blobs {
            println!("{}", blob.path);
        }
        return Ok(());
    }

    let parent_tree: BTreeMap<String, CommitId> = match commit.parent_id {
        Some(parent) => repo
            .storage
            .tree_metadata(&parent)
            .await?
            .into_iter()
            .map(|e| (e.path, e.commit_id))
            .collect(),
        None => BTreeMap::new(),
    };
    let pairs: Vec<(String, CommitId)> = new_blobs
        .iter()
        .filter_map(|blob| {
            parent_tree
                .get(&blob.path)
                .map(|source| (blob.path.clone(), *source))
        })
        .collect();
    let old_contents = fetch::fetch_set(&repo.storage, pairs, FetchOptions::default()).await?;

    let mut sorted = new_blobs;
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    for blob in &sorted {
        let old = parent_tree.get(&blob.path).and_then(|source| {
            old_contents
                .get(&(blob.path.clone(), *source))
                .and_then(|slot| slot.value().as_ref().map(blob_bytes))
        });
        let new = match &blob.content {
            BlobContent::Tombstone => None,
            content => Some(blob_bytes(content)),
        };
        print!(
            "{}",
            unified(&blob.path, old.as_deref(), new.as_deref()).data
        );
    }
    Ok(())
}
