//! Working-tree reconciliation.
//!
//! Walks the on-disk tree (honoring `.pgitignore` and skipping `.pgit`),
//! hashes files for dirtiness checks, and applies blob content back to disk
//! on checkout. Dirtiness is always a content-hash comparison against the
//! FileRef metadata of HEAD; no content is fetched and no mtime is trusted.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::errors::PgitError;
use crate::hash::ContentHash;
use crate::internal::object::blob::{BlobContent, MODE_REGULAR};
use crate::internal::repo::{IGNORE_FILE, META_DIR, Repo};

/// What the working tree looks like relative to HEAD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingChanges {
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub untracked: Vec<String>,
}

impl WorkingChanges {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty() && self.untracked.is_empty()
    }
}

/// Hash-level view of one on-disk file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub content_hash: ContentHash,
    pub mode: u32,
    pub is_symlink: bool,
    pub symlink_target: Option<String>,
}

/// All files under the working tree, repository-relative and sorted.
pub fn walk_files(repo: &Repo) -> Result<Vec<String>, PgitError> {
    let mut out = Vec::new();
    let walker = WalkBuilder::new(&repo.workdir)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .add_custom_ignore_filename(IGNORE_FILE)
        .filter_entry(|entry| entry.file_name().to_string_lossy() != META_DIR)
        .build();
    for entry in walker {
        let entry = entry.map_err(|e| PgitError::Storage(format!("walk failed: {e}")))?;
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(&repo.workdir) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    out.sort();
    Ok(out)
}

/// Stat-and-hash one file, `None` when it does not exist.
pub fn stat_file(abs: &Path) -> Result<Option<FileStat>, PgitError> {
    let metadata = match fs::symlink_metadata(abs) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(abs)?.to_string_lossy().into_owned();
        return Ok(Some(FileStat {
            content_hash: ContentHash::new(target.as_bytes()),
            mode: 0o777,
            is_symlink: true,
            symlink_target: Some(target),
        }));
    }
    if !metadata.is_file() {
        return Ok(None);
    }
    Ok(Some(FileStat {
        content_hash: ContentHash::from_file(abs)?,
        mode: file_mode(&metadata),
        is_symlink: false,
        symlink_target: None,
    }))
}

/// Read a file into the blob variant it should be stored as.
pub fn snapshot_file(abs: &Path) -> Result<Option<BlobContent>, PgitError> {
    let metadata = match fs::symlink_metadata(abs) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(abs)?.to_string_lossy().into_owned();
        return Ok(Some(BlobContent::Symlink {
            mode: 0o777,
            target,
        }));
    }
    if !metadata.is_file() {
        return Ok(None);
    }
    Ok(Some(BlobContent::Regular {
        mode: file_mode(&metadata),
        content: fs::read(abs)?,
    }))
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        MODE_REGULAR
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    MODE_REGULAR
}

/// Compare the HEAD tree metadata against the working tree, by hash only.
pub async fn working_tree_changes(repo: &Repo) -> Result<WorkingChanges, PgitError> {
    let head_tree: BTreeMap<String, ContentHash> = match repo.head().await? {
        Some(head) => repo
            .storage
            .tree_metadata(&head)
            .await?
            .into_iter()
            .map(|entry| (entry.path, entry.content_hash))
            .collect(),
        None => BTreeMap::new(),
    };

    let mut changes = WorkingChanges::default();
    for (path, head_hash) in &head_tree {
        match stat_file(&repo.abs_path(path))? {
            None => changes.deleted.push(path.clone()),
            Some(stat) => {
                if stat.content_hash != *head_hash {
                    changes.modified.push(path.clone());
                }
            }
        }
    }
    for path in walk_files(repo)? {
        if !head_tree.contains_key(&path) {
            changes.untracked.push(path);
        }
    }
    debug!(
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        untracked = changes.untracked.len(),
        "working tree compared"
    );
    Ok(changes)
}

/// Reconcile the working tree from the `old` tree to the tree at `target`.
///
/// Fetches content for every target path through the scoped fetch engine,
/// writes files with their recorded modes, and removes files that exist in
/// the old tree but not the target. Returns the number of paths written.
pub async fn apply_tree(
    repo: &Repo,
    old: Option<crate::id::CommitId>,
    target: &crate::id::CommitId,
) -> Result<usize, PgitError> {
    use crate::internal::fetch::{self, FetchOptions};

    let new_tree = repo.storage.tree_metadata(target).await?;
    let old_tree = match old {
        Some(old) => repo.storage.tree_metadata(&old).await?,
        None => Vec::new(),
    };

    let pairs: Vec<(String, crate::id::CommitId)> = new_tree
        .iter()
        .map(|entry| (entry.path.clone(), entry.commit_id))
        .collect();
    let contents = fetch::fetch_set(&repo.storage, pairs, FetchOptions::default()).await?;

    let mut written = 0;
    for entry in &new_tree {
        let key = (entry.path.clone(), entry.commit_id);
        let content = contents
            .get(&key)
            .and_then(|slot| slot.value().clone())
            .ok_or_else(|| {
                PgitError::Storage(format!(
                    "missing content for {} at {}",
                    entry.path, entry.commit_id
                ))
            })?;
        write_file(repo, &entry.path, &content)?;
        written += 1;
    }

    let keep: std::collections::BTreeSet<&str> =
        new_tree.iter().map(|e| e.path.as_str()).collect();
    for entry in &old_tree {
        if !keep.contains(entry.path.as_str()) {
            remove_file(repo, &entry.path)?;
        }
    }
    Ok(written)
}

/// Write blob content to the working tree, creating directories as needed.
pub fn write_file(repo: &Repo, path: &str, content: &BlobContent) -> Result<(), PgitError> {
    let abs = repo.abs_path(path);
    if let Some(parent) = abs.parent() {
        create_dirs(parent)?;
    }
    match content {
        BlobContent::Regular { mode, content } => {
            // An existing symlink must not redirect the write.
            remove_existing_symlink(&abs);
            fs::write(&abs, content)?;
            set_mode(&abs, *mode);
        }
        BlobContent::Symlink { target, .. } => {
            write_symlink(&abs, target)?;
        }
        BlobContent::Tombstone => {
            remove_file(repo, path)?;
        }
    }
    Ok(())
}

/// Remove a file and prune any directories it leaves empty.
pub fn remove_file(repo: &Repo, path: &str) -> Result<(), PgitError> {
    let abs = repo.abs_path(path);
    match fs::remove_file(&abs) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    let mut dir = abs.parent();
    while let Some(parent) = dir {
        if parent == repo.workdir {
            break;
        }
        if fs::remove_dir(parent).is_err() {
            break;
        }
        dir = parent.parent();
    }
    Ok(())
}

fn remove_existing_symlink(abs: &Path) {
    if let Ok(metadata) = fs::symlink_metadata(abs) {
        if metadata.file_type().is_symlink() {
            if let Err(err) = fs::remove_file(abs) {
                warn!(path = %abs.display(), error = %err, "failed to unlink before rewrite");
            }
        }
    }
}

#[cfg(unix)]
fn create_dirs(dir: &Path) -> Result<(), PgitError> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.exists() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dirs(dir: &Path) -> Result<(), PgitError> {
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(abs: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(abs, fs::Permissions::from_mode(mode)) {
        warn!(path = %abs.display(), error = %err, "failed to set mode");
    }
}

#[cfg(not(unix))]
fn set_mode(_abs: &Path, _mode: u32) {}

#[cfg(unix)]
fn write_symlink(abs: &Path, target: &str) -> Result<(), PgitError> {
    // Unlink first so the symlink lands atomically over stale state.
    match fs::symlink_metadata(abs) {
        Ok(_) => fs::remove_file(abs)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::os::unix::fs::symlink(target, abs)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_symlink(abs: &Path, target: &str) -> Result<(), PgitError> {
    fs::write(abs, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::repo::Repo;

    async fn temp_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo::init(dir.path(), None).await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_walk_skips_metadata_and_ignored() {
        let (_dir, repo) = temp_repo().await;
        fs::write(repo.workdir.join("a.txt"), "a").unwrap();
        fs::create_dir_all(repo.workdir.join("sub")).unwrap();
        fs::write(repo.workdir.join("sub/b.txt"), "b").unwrap();
        fs::write(repo.workdir.join("skip.log"), "log").unwrap();
        fs::write(repo.workdir.join(IGNORE_FILE), "*.log\n").unwrap();

        let files = walk_files(&repo).unwrap();
        assert_eq!(files, vec![IGNORE_FILE.to_string(), "a.txt".into(), "sub/b.txt".into()]);
    }

    #[tokio::test]
    async fn test_working_tree_changes_against_empty_head() {
        let (_dir, repo) = temp_repo().await;
        fs::write(repo.workdir.join("new.txt"), "x").unwrap();
        let changes = working_tree_changes(&repo).await.unwrap();
        assert_eq!(changes.untracked, vec!["new.txt"]);
        assert!(changes.modified.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_write_and_stat_round_trip() {
        let (_dir, repo) = temp_repo().await;
        let content = BlobContent::Regular {
            mode: 0o755,
            content: b"#!/bin/sh\necho hi\n".to_vec(),
        };
        write_file(&repo, "bin/run.sh", &content).unwrap();

        let stat = stat_file(&repo.abs_path("bin/run.sh")).unwrap().unwrap();
        assert_eq!(stat.content_hash, content.content_hash().unwrap());
        #[cfg(unix)]
        assert_eq!(stat.mode, 0o755);

        let snapshot = snapshot_file(&repo.abs_path("bin/run.sh")).unwrap().unwrap();
        assert_eq!(snapshot, content);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_round_trip() {
        let (_dir, repo) = temp_repo().await;
        fs::write(repo.workdir.join("real.txt"), "real").unwrap();
        let link = BlobContent::Symlink {
            mode: 0o777,
            target: "real.txt".into(),
        };
        write_file(&repo, "link", &link).unwrap();
        // Rewriting over an existing symlink must retarget it.
        let retargeted = BlobContent::Symlink {
            mode: 0o777,
            target: "elsewhere.txt".into(),
        };
        write_file(&repo, "link", &retargeted).unwrap();

        let stat = stat_file(&repo.abs_path("link")).unwrap().unwrap();
        assert!(stat.is_symlink);
        assert_eq!(stat.symlink_target.as_deref(), Some("elsewhere.txt"));
    }

    #[tokio::test]
    async fn test_remove_file_prunes_empty_dirs() {
        let (_dir, repo) = temp_repo().await;
        let content = BlobContent::Regular {
            mode: MODE_REGULAR,
            content: b"x".to_vec(),
        };
        write_file(&repo, "deep/nested/file.txt", &content).unwrap();
        remove_file(&repo, "deep/nested/file.txt").unwrap();
        assert!(!repo.workdir.join("deep").exists());
        // Removing a missing file is not an error.
        remove_file(&repo, "deep/nested/file.txt").unwrap();
    }
}
