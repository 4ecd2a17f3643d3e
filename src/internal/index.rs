//! The staging index.
//!
//! A local binary file under `.pgit/` holding the prepared changes for the
//! next commit: exactly one entry per path, never referencing a commit.
//! Writes go to a temp file and rename into place so the index is never
//! seen half-written. Mutating commands hold an advisory lock for their
//! whole run.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fs2::FileExt;
use tracing::trace;

use crate::errors::PgitError;
use crate::hash::{ContentHash, HASH_SIZE};

/// File magic.
const INDEX_MAGIC: &[u8; 4] = b"PGIT";
/// Current format version.
const INDEX_VERSION: u32 = 1;

const FLAG_HAS_HASH: u8 = 1 << 0;
const FLAG_SYMLINK: u8 = 1 << 1;
const FLAG_HAS_TARGET: u8 = 1 << 2;

/// Why a path is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    TrackedModified = 1,
    TrackedDeleted,
    UntrackedAdded,
}

impl EntryOrigin {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(number: u8) -> Result<EntryOrigin, PgitError> {
        match number {
            1 => Ok(EntryOrigin::TrackedModified),
            2 => Ok(EntryOrigin::TrackedDeleted),
            3 => Ok(EntryOrigin::UntrackedAdded),
            _ => Err(PgitError::Serialization(format!(
                "invalid staging origin: {number}"
            ))),
        }
    }
}

/// One staged path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    /// Digest of the staged content; `None` for a deletion tombstone.
    pub content_hash: Option<ContentHash>,
    pub mode: u32,
    pub is_symlink: bool,
    pub symlink_target: Option<String>,
    pub origin: EntryOrigin,
}

/// In-memory staging index, ordered by path.
#[derive(Debug, Clone, Default)]
pub struct StagingIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl StagingIndex {
    /// Read the index file; a missing file is an empty index.
    pub fn load(path: &Path) -> Result<StagingIndex, PgitError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StagingIndex::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::decode(&bytes)
    }

    /// Atomically rewrite the index file.
    pub fn save(&self, path: &Path) -> Result<(), PgitError> {
        let dir = path
            .parent()
            .ok_or_else(|| PgitError::Serialization("index path has no parent".into()))?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&self.encode()?)?;
        temp.flush()?;
        temp.persist(path).map_err(|e| PgitError::IOError(e.error))?;
        trace!(entries = self.entries.len(), "staging index written");
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, PgitError> {
        let mut out = Vec::new();
        out.extend_from_slice(INDEX_MAGIC);
        out.write_u32::<LittleEndian>(INDEX_VERSION)?;
        out.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for entry in self.entries.values() {
            let mut flags = 0u8;
            if entry.content_hash.is_some() {
                flags |= FLAG_HAS_HASH;
            }
            if entry.is_symlink {
                flags |= FLAG_SYMLINK;
            }
            if entry.symlink_target.is_some() {
                flags |= FLAG_HAS_TARGET;
            }
            out.write_u32::<LittleEndian>(entry.path.len() as u32)?;
            out.extend_from_slice(entry.path.as_bytes());
            out.write_u8(flags)?;
            if let Some(hash) = &entry.content_hash {
                out.extend_from_slice(hash.as_bytes());
            }
            out.write_u32::<LittleEndian>(entry.mode)?;
            out.write_u8(entry.origin.to_u8())?;
            if let Some(target) = &entry.symlink_target {
                out.write_u32::<LittleEndian>(target.len() as u32)?;
                out.extend_from_slice(target.as_bytes());
            }
        }
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> Result<StagingIndex, PgitError> {
        let mut cursor = std::io::Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(PgitError::Serialization("bad index magic".into()));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(PgitError::Serialization(format!(
                "unsupported index version {version}"
            )));
        }
        let count = cursor.read_u32::<LittleEndian>()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let path_len = cursor.read_u32::<LittleEndian>()? as usize;
            let mut path = vec![0u8; path_len];
            cursor.read_exact(&mut path)?;
            let path = String::from_utf8(path)
                .map_err(|e| PgitError::Serialization(e.to_string()))?;
            let flags = cursor.read_u8()?;
            let content_hash = if flags & FLAG_HAS_HASH != 0 {
                let mut h = [0u8; HASH_SIZE];
                cursor.read_exact(&mut h)?;
                Some(ContentHash::from_bytes(&h).map_err(PgitError::Serialization)?)
            } else {
                None
            };
            let mode = cursor.read_u32::<LittleEndian>()?;
            let origin = EntryOrigin::from_u8(cursor.read_u8()?)?;
            let symlink_target = if flags & FLAG_HAS_TARGET != 0 {
                let len = cursor.read_u32::<LittleEndian>()? as usize;
                let mut target = vec![0u8; len];
                cursor.read_exact(&mut target)?;
                Some(String::from_utf8(target).map_err(|e| PgitError::Serialization(e.to_string()))?)
            } else {
                None
            };
            entries.insert(
                path.clone(),
                IndexEntry {
                    path,
                    content_hash,
                    mode,
                    is_symlink: flags & FLAG_SYMLINK != 0,
                    symlink_target,
                    origin,
                },
            );
        }
        Ok(StagingIndex { entries })
    }

    /// Insert or replace the entry for a path. Staging is idempotent.
    pub fn stage(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn unstage(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }
}

/// Advisory lock guarding index mutation, held for the life of the value.
pub struct IndexLock {
    file: fs::File,
    path: PathBuf,
}

impl IndexLock {
    /// Take the exclusive lock, blocking until the holder releases it.
    pub fn acquire(meta_dir: &Path) -> Result<IndexLock, PgitError> {
        let path = meta_dir.join("index.lock");
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(IndexLock { file, path })
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        // Unlock failure only matters if the process survives, and the lock
        // dies with the fd anyway.
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to unlock index");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, content: Option<&[u8]>) -> IndexEntry {
        IndexEntry {
            path: path.to_string(),
            content_hash: content.map(ContentHash::new),
            mode: 0o644,
            is_symlink: false,
            symlink_target: None,
            origin: match content {
                Some(_) => EntryOrigin::UntrackedAdded,
                None => EntryOrigin::TrackedDeleted,
            },
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index");

        let mut index = StagingIndex::default();
        index.stage(entry("b.txt", Some(b"bee")));
        index.stage(entry("a.txt", Some(b"aye")));
        index.stage(entry("gone.txt", None));
        index.stage(IndexEntry {
            path: "link".into(),
            content_hash: Some(ContentHash::new(b"a.txt")),
            mode: 0o777,
            is_symlink: true,
            symlink_target: Some("a.txt".into()),
            origin: EntryOrigin::UntrackedAdded,
        });
        index.save(&file).unwrap();

        let loaded = StagingIndex::load(&file).unwrap();
        assert_eq!(loaded.len(), 4);
        let paths: Vec<&str> = loaded.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "gone.txt", "link"]);
        assert_eq!(loaded.get("gone.txt").unwrap().content_hash, None);
        assert_eq!(
            loaded.get("link").unwrap().symlink_target.as_deref(),
            Some("a.txt")
        );
        assert!(loaded.get("link").unwrap().is_symlink);
    }

    #[test]
    fn test_missing_file_is_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = StagingIndex::load(&dir.path().join("index")).unwrap();
        assert!(loaded.is_empty());
    }

    /// Staging the same path twice keeps a single entry.
    #[test]
    fn test_stage_is_idempotent() {
        let mut index = StagingIndex::default();
        index.stage(entry("a.txt", Some(b"v1")));
        let once = index.clone();
        index.stage(entry("a.txt", Some(b"v1")));
        assert_eq!(index.len(), 1);
        assert_eq!(
            once.get("a.txt").unwrap(),
            index.get("a.txt").unwrap()
        );
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index");
        fs::write(&file, b"NOPE....garbage").unwrap();
        assert!(StagingIndex::load(&file).is_err());
    }

    #[test]
    fn test_unstage() {
        let mut index = StagingIndex::default();
        index.stage(entry("a.txt", Some(b"x")));
        assert!(index.unstage("a.txt"));
        assert!(!index.unstage("a.txt"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_lock_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let lock = IndexLock::acquire(dir.path()).unwrap();
        drop(lock);
        let again = IndexLock::acquire(dir.path()).unwrap();
        drop(again);
    }
}
