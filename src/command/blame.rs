//! Attribute each line of a file to the commit that introduced it.
//!
//! Attribution is position-based: walking versions oldest to newest, a line
//! index is attributed to the first commit whose content at that index
//! equals the current line, and the attribution resets whenever the line at
//! that index changes. Rearranged lines therefore blame to their new
//! position's history; lines no surviving version accounts for render the
//! `0000000` sentinel.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;

use crate::errors::PgitError;
use crate::id::{CommitId, UNATTRIBUTED};
use crate::internal::fetch::{self, FetchOptions};
use crate::internal::object::blob::BlobContent;
use crate::internal::object::file_ref::ChangeKind;
use crate::internal::repo::Repo;
use crate::internal::revision;

#[derive(Parser, Debug)]
pub struct BlameArgs {
    /// File to annotate
    pub path: PathBuf,

    /// Revision whose version of the file is annotated
    #[clap(long, default_value = "HEAD")]
    pub rev: String,
}

fn lines_of(content: &BlobContent) -> Vec<String> {
    let bytes = match content {
        BlobContent::Regular { content, .. } => content.as_slice(),
        BlobContent::Symlink { target, .. } => target.as_bytes(),
        BlobContent::Tombstone => &[],
    };
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|l| l.to_string())
        .collect()
}

/// Per-line attribution for a sequence of file versions, oldest first.
/// Returns one entry per line of the newest version.
pub fn attribute(versions: &[(CommitId, Vec<String>)]) -> Vec<Option<CommitId>> {
    let Some((_, current)) = versions.last() else {
        return Vec::new();
    };
    let mut attribution: Vec<Option<CommitId>> = vec![None; current.len()];
    for (commit, lines) in versions {
        for (i, target) in current.iter().enumerate() {
            match lines.get(i) {
                Some(line) if line == target => {
                    if attribution[i].is_none() {
                        attribution[i] = Some(*commit);
                    }
                }
                _ => attribution[i] = None,
            }
        }
    }
    attribution
}

pub async fn execute(args: BlameArgs) -> Result<(), PgitError> {
    let repo = Repo::open().await?;
    let at = revision::resolve(repo.storage.conn(), &args.rev).await?;
    let path = repo.rel_path(&args.path)?;

    let history = repo.storage.path_history(&path, &at).await?;
    if history.is_empty() {
        return Err(PgitError::FileNotFound(path));
    }
    if history.last().map(|r| r.change_kind) == Some(ChangeKind::Deleted) {
        return Err(PgitError::FileNotFound(path));
    }

    let pairs: Vec<(String, CommitId)> = history
        .iter()
        .filter(|r| r.change_kind != ChangeKind::Deleted)
        .map(|r| (path.clone(), r.commit_id))
        .collect();
    let contents = fetch::fetch_set(&repo.storage, pairs, FetchOptions::default()).await?;

    let mut versions: Vec<(CommitId, Vec<String>)> = Vec::new();
    for file_ref in &history {
        if file_ref.change_kind == ChangeKind::Deleted {
            // A deletion wipes attribution for everything before it.
            versions.clear();
            continue;
        }
        let content = contents
            .get(&(path.clone(), file_ref.commit_id))
            .and_then(|slot| slot.value().clone())
            .ok_or_else(|| {
                PgitError::Storage(format!(
                    "missing content for {path} at {}",
                    file_ref.commit_id
                ))
            })?;
        versions.push((file_ref.commit_id, lines_of(&content)));
    }

    let attribution = attribute(&versions);
    let (_, current) = versions.last().expect("non-empty history");

    // Author names for the attributed commits, one record fetch each.
    let mut authors: HashMap<CommitId, String> = HashMap::new();
    for commit in attribution.iter().flatten() {
        if !authors.contains_key(commit) {
            let record = repo.storage.get_commit(commit).await?;
            authors.insert(*commit, record.author.name);
        }
    }

    for (i, line) in current.iter().enumerate() {
        match attribution[i] {
            Some(commit) => {
                let author = authors.get(&commit).map(String::as_str).unwrap_or("");
                println!(
                    "{} ({:<12} {:>4}) {line}",
                    commit.short().yellow(),
                    author,
                    i + 1
                );
            }
            None => println!("{UNATTRIBUTED} ({:<12} {:>4}) {line}", "", i + 1),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(commit: &CommitId, lines: &[&str]) -> (CommitId, Vec<String>) {
        (*commit, lines.iter().map(|l| l.to_string()).collect())
    }

    fn chain(n: usize) -> Vec<CommitId> {
        let mut out = Vec::new();
        let mut prev = None;
        for _ in 0..n {
            let id = CommitId::next_after(prev.as_ref());
            out.push(id);
            prev = Some(id);
        }
        out
    }

    /// The two-commit scenario: line 1 blames to the introducing commit,
    /// line 2 to the commit that rewrote it.
    #[test]
    fn test_attribution_tracks_rewrites() {
        let c = chain(2);
        let versions = vec![
            v(&c[0], &["one", "two"]),
            v(&c[1], &["one", "TWO"]),
        ];
        assert_eq!(attribute(&versions), vec![Some(c[0]), Some(c[1])]);
    }

    #[test]
    fn test_line_added_later_keeps_first_author() {
        let c = chain(3);
        let versions = vec![
            v(&c[0], &["a"]),
            v(&c[1], &["a", "b"]),
            v(&c[2], &["a", "b", "c"]),
        ];
        assert_eq!(
            attribute(&versions),
            vec![Some(c[0]), Some(c[1]), Some(c[2])]
        );
    }

    /// Changing a line and changing it back re-attributes to the restorer.
    #[test]
    fn test_attribution_resets_on_change() {
        let c = chain(3);
        let versions = vec![
            v(&c[0], &["x"]),
            v(&c[1], &["y"]),
            v(&c[2], &["x"]),
        ];
        assert_eq!(attribute(&versions), vec![Some(c[2])]);
    }

    #[test]
    fn test_rearranged_lines_confuse_position_matching() {
        let c = chain(2);
        // The two lines swap places; position matching blames both to the
        // newest commit. Accepted behavior.
        let versions = vec![
            v(&c[0], &["alpha", "beta"]),
            v(&c[1], &["beta", "alpha"]),
        ];
        assert_eq!(attribute(&versions), vec![Some(c[1]), Some(c[1])]);
    }

    #[test]
    fn test_empty_versions() {
        assert!(attribute(&[]).is_empty());
    }
}
