//! The blob record: one file version at one commit.
//!
//! A blob is a tagged variant rather than a class of flags. Regular files
//! carry mode bits and content, symlinks carry their target, and a tombstone
//! marks a deletion. Blobs are immutable; a later commit supersedes them by
//! writing a new blob for the same path.

use serde::{Deserialize, Serialize};

use crate::errors::PgitError;
use crate::hash::ContentHash;
use crate::id::CommitId;

/// Default mode for a regular file.
pub const MODE_REGULAR: u32 = 0o644;
/// Mode bit marking an executable file.
pub const MODE_EXEC_MASK: u32 = 0o111;

/// Stored payload of one (path, commit) version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobContent {
    /// A regular file with POSIX permission bits.
    Regular { mode: u32, content: Vec<u8> },
    /// A symbolic link. The target is stored verbatim; mode is recorded for
    /// round-tripping but the symlink flag takes precedence over it.
    Symlink { mode: u32, target: String },
    /// The path was deleted at this commit.
    Tombstone,
}

impl BlobContent {
    /// Content digest, or `None` for a tombstone.
    ///
    /// Symlinks hash their target string so retargeting shows up in
    /// hash-only dirtiness checks.
    pub fn content_hash(&self) -> Option<ContentHash> {
        match self {
            BlobContent::Regular { content, .. } => Some(ContentHash::new(content)),
            BlobContent::Symlink { target, .. } => Some(ContentHash::new(target.as_bytes())),
            BlobContent::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, BlobContent::Tombstone)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, BlobContent::Symlink { .. })
    }

    /// Permission bits, when the variant carries any.
    pub fn mode(&self) -> Option<u32> {
        match self {
            BlobContent::Regular { mode, .. } | BlobContent::Symlink { mode, .. } => Some(*mode),
            BlobContent::Tombstone => None,
        }
    }

    /// Serialize for the `pgit_blobs` delta group.
    pub fn to_data(&self) -> Result<Vec<u8>, PgitError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| PgitError::Serialization(e.to_string()))
    }

    /// Decode a payload previously produced by [`BlobContent::to_data`].
    pub fn from_data(data: &[u8]) -> Result<BlobContent, PgitError> {
        let (content, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| PgitError::Serialization(e.to_string()))?;
        Ok(content)
    }
}

/// A blob joined with its coordinates, as returned by the storage driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub commit_id: CommitId,
    pub path: String,
    pub content: BlobContent,
}

impl Blob {
    pub fn content_hash(&self) -> Option<ContentHash> {
        self.content.content_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_hash_matches_content() {
        let blob = BlobContent::Regular {
            mode: MODE_REGULAR,
            content: b"one\ntwo\n".to_vec(),
        };
        assert_eq!(blob.content_hash(), Some(ContentHash::new(b"one\ntwo\n")));
        assert_eq!(blob.mode(), Some(MODE_REGULAR));
    }

    #[test]
    fn test_symlink_hashes_target() {
        let blob = BlobContent::Symlink {
            mode: 0o777,
            target: "target/file".into(),
        };
        assert_eq!(blob.content_hash(), Some(ContentHash::new(b"target/file")));
        assert!(blob.is_symlink());
    }

    #[test]
    fn test_tombstone_has_no_hash() {
        assert_eq!(BlobContent::Tombstone.content_hash(), None);
        assert!(BlobContent::Tombstone.is_tombstone());
    }

    #[test]
    fn test_data_round_trip_all_variants() {
        let variants = [
            BlobContent::Regular {
                mode: 0o755,
                content: vec![0, 159, 146, 150],
            },
            BlobContent::Symlink {
                mode: 0o777,
                target: "../elsewhere".into(),
            },
            BlobContent::Tombstone,
        ];
        for v in variants {
            let decoded = BlobContent::from_data(&v.to_data().unwrap()).unwrap();
            assert_eq!(v, decoded);
        }
    }
}
