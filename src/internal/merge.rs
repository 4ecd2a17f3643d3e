//! Merge state and conflict markers.
//!
//! A pull that cannot fast-forward leaves conflict markers in the working
//! tree and records the affected paths here, as JSON under `.pgit/`. The
//! state survives until a commit concludes the merge.

use std::fs;
use std::path::Path;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::PgitError;
use crate::id::CommitId;

/// Line prefixes delimiting a three-way conflict region.
pub const MARKER_OURS: &[u8] = b"<<<<<<<";
pub const MARKER_BASE: &[u8] = b"=======";
pub const MARKER_THEIRS: &[u8] = b">>>>>>>";

const MERGE_STATE_FILE: &str = "MERGE_STATE";

/// Local record of an in-progress merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeState {
    pub in_progress: bool,
    /// The remote-side commit being merged in.
    pub source_commit: Option<CommitId>,
    /// The local commit the merge is applied onto.
    pub target_commit: Option<CommitId>,
    /// Paths still carrying conflict markers, in the order they conflicted.
    pub conflicted_files: Vec<String>,
}

impl MergeState {
    pub fn begin(source: CommitId, target: CommitId, conflicted: Vec<String>) -> MergeState {
        MergeState {
            in_progress: true,
            source_commit: Some(source),
            target_commit: Some(target),
            conflicted_files: conflicted,
        }
    }

    pub fn load(meta_dir: &Path) -> Result<MergeState, PgitError> {
        let path = meta_dir.join(MERGE_STATE_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| PgitError::Serialization(format!("bad merge state: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MergeState::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, meta_dir: &Path) -> Result<(), PgitError> {
        let path = meta_dir.join(MERGE_STATE_FILE);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| PgitError::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Delete the state file once the merge concludes.
    pub fn clear(meta_dir: &Path) -> Result<(), PgitError> {
        let path = meta_dir.join(MERGE_STATE_FILE);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop a path from the conflict list, reporting whether it was there.
    pub fn resolve_path(&mut self, path: &str) -> bool {
        let before = self.conflicted_files.len();
        self.conflicted_files.retain(|p| p != path);
        self.conflicted_files.len() != before
    }
}

/// Whether any line starts with one of the three conflict markers.
pub fn has_conflict_markers(content: &[u8]) -> bool {
    content.lines().any(|line| {
        line.starts_with(MARKER_OURS)
            || line.starts_with(MARKER_BASE)
            || line.starts_with(MARKER_THEIRS)
    })
}

/// Render a whole-file three-way conflict: ours above, theirs below.
pub fn render_conflict(
    ours_label: &str,
    ours: &[u8],
    theirs_label: &str,
    theirs: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(ours.len() + theirs.len() + 64);
    out.extend_from_slice(MARKER_OURS);
    out.push(b' ');
    out.extend_from_slice(ours_label.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(ours);
    if !ours.is_empty() && !ours.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(MARKER_BASE);
    out.push(b'\n');
    out.extend_from_slice(theirs);
    if !theirs.is_empty() && !theirs.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(MARKER_THEIRS);
    out.push(b' ');
    out.extend_from_slice(theirs_label.as_bytes());
    out.push(b'\n');
    out
}
