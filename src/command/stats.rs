//! Storage statistics from the delta tables and heap indexes.

use clap::Parser;
use colored::Colorize;
use sea_orm::{EntityTrait, PaginatorTrait};

use crate::errors::PgitError;
use crate::internal::db::entities::{graph_row, path_row};
use crate::internal::db::xpatch;
use crate::internal::repo::Repo;

#[derive(Parser, Debug, Default)]
pub struct StatsArgs {}

fn render(stats: &xpatch::TableStats) {
    println!("{}", stats.table.bold());
    println!("  groups:        {}", stats.groups);
    println!("  versions:      {}", stats.versions);
    println!("  snapshots:     {}", stats.snapshots);
    println!("  deltas:        {}", stats.deltas);
    println!("  logical bytes: {}", stats.raw_bytes);
    println!("  stored bytes:  {}", stats.stored_bytes);
    if stats.raw_bytes > 0 {
        let ratio = stats.stored_bytes as f64 / stats.raw_bytes as f64;
        println!("  ratio:         {ratio:.3}");
    }
}

pub async fn execute(_args: StatsArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let db = repo.storage.conn();

    let commits = graph_row::Entity::find().count(db).await?;
    let paths = path_row::Entity::find().count(db).await?;
    if let Some(version) = crate::internal::db::schema_version(db).await? {
        println!("schema:  v{version}");
    }
    println!("commits: {commits}");
    println!("paths:   {paths}");
    println!();

    render(&xpatch::BLOBS.stats(db).await?);
    println!();
    render(&xpatch::COMMITS.stats(db).await?);
    Ok(())
}
