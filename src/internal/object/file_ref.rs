//! FileRef rows: the per-change index that lets history queries enumerate
//! which commit touched which path, with what digest and kind, without
//! decompressing any content.

use serde::{Deserialize, Serialize};

use crate::errors::PgitError;
use crate::hash::ContentHash;
use crate::id::CommitId;

/// How a commit touched a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added = 1,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(number: u8) -> Result<ChangeKind, PgitError> {
        match number {
            1 => Ok(ChangeKind::Added),
            2 => Ok(ChangeKind::Modified),
            3 => Ok(ChangeKind::Deleted),
            _ => Err(PgitError::Storage(format!(
                "invalid change kind number: {number}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the per-file change index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub commit_id: CommitId,
    pub path_id: i64,
    pub path: String,
    /// `None` marks a deletion.
    pub content_hash: Option<ContentHash>,
    pub change_kind: ChangeKind,
}

/// A live entry of a commit's tree listing: the path, the ancestor commit
/// that last wrote it, and that version's digest. Deleted paths never appear
/// in a tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub path_id: i64,
    /// The commit whose blob row holds this path's current content.
    pub commit_id: CommitId,
    pub content_hash: ContentHash,
}
