//! Error types for pgit.
//!
//! A single enumeration covers repository discovery, object lookup, staging,
//! merging, remote sync and storage failures. Each variant carries enough
//! context for the CLI to render a headline, a detail block and, where one
//! exists, a remediation hint. Exit codes follow the command surface
//! contract: 0 success, 1 generic error, 2 usage, 3 conflict.

use thiserror::Error;

/// A prefix-resolution candidate surfaced by ambiguity errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCandidate {
    pub id: String,
    pub short_id: String,
    pub subject: String,
}

#[derive(Error, Debug)]
/// Unified error enumeration for the pgit engine and CLI.
pub enum PgitError {
    /// No `.pgit` directory between the working directory and filesystem root.
    #[error("not a pgit repository (or any parent directory)")]
    RepoNotFound,

    /// The repository exists but has no commits yet.
    #[error("the repository has no commits yet")]
    NoCommits,

    /// A ref or commit id did not resolve to any commit.
    #[error("commit not found: `{0}`")]
    CommitNotFound(String),

    /// A partial commit id matched more than one commit.
    #[error("short id `{partial}` is ambiguous")]
    AmbiguousCommit {
        partial: String,
        candidates: Vec<CommitCandidate>,
    },

    /// Path absent from the working tree or the named commit's tree.
    #[error("file not found: `{0}`")]
    FileNotFound(String),

    /// Destructive operation refused because the working tree is dirty.
    #[error("working tree has uncommitted changes")]
    UncommittedChanges,

    /// No `[remote.<name>]` section in the repository config.
    #[error("remote `{0}` is not configured")]
    RemoteNotFound(String),

    /// The database could not be reached or the URL is invalid.
    #[error("cannot connect to database: {0}")]
    DatabaseConnection(String),

    /// Connected, but the pgit tables are not present.
    #[error("database schema is missing")]
    SchemaMissing,

    /// An operation that requires a clean merge state found one in progress.
    #[error("a merge is in progress")]
    MergeInProgress,

    /// `resolve` found conflict markers still present in the file.
    #[error("conflict markers still present in `{0}`")]
    ConflictMarkersPresent(String),

    /// Push or commit lost the HEAD compare-and-swap race, or the remote
    /// history is not a fast-forward of the local one.
    #[error("not a fast-forward")]
    NonFastForward,

    /// Pull produced conflicts that need manual resolution.
    #[error("merge produced {} conflicted file(s)", paths.len())]
    MergeConflicts { paths: Vec<String> },

    /// The staging index is empty.
    #[error("nothing staged to commit")]
    NothingToCommit,

    /// A revision expression could not be parsed.
    #[error("invalid revision: `{0}`")]
    InvalidRef(String),

    /// A path violated the object-model path rules.
    #[error("invalid repository path: `{0}`")]
    InvalidPath(String),

    /// Command-line usage error outside of what clap already rejects.
    #[error("{0}")]
    Usage(String),

    /// A delta chain failed to reconstruct.
    #[error("delta chain corrupt: {0}")]
    DeltaCorrupt(String),

    /// Storage layer failure that is not a connection problem.
    #[error("storage error: {0}")]
    Storage(String),

    /// Record encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A command exceeded its deadline.
    #[error("operation timed out after {0}s")]
    Timeout(u64),

    /// I/O error from the working tree or local metadata files.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

impl PgitError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            PgitError::Usage(_) | PgitError::InvalidRef(_) => 2,
            PgitError::NonFastForward
            | PgitError::MergeConflicts { .. }
            | PgitError::MergeInProgress
            | PgitError::ConflictMarkersPresent(_) => 3,
            _ => 1,
        }
    }

    /// A suggested follow-up command, when one applies.
    pub fn hint(&self) -> Option<String> {
        match self {
            PgitError::RepoNotFound => Some("run `pgit init` to create a repository".into()),
            PgitError::NothingToCommit => {
                Some("use `pgit add <path>` to stage changes first".into())
            }
            PgitError::UncommittedChanges => {
                Some("commit your changes or pass `--force` to discard them".into())
            }
            PgitError::NonFastForward => {
                Some("run `pgit pull` first, or pass `--force` to overwrite".into())
            }
            PgitError::MergeConflicts { .. } => {
                Some("edit the files, then `pgit resolve <path>` and `pgit commit`".into())
            }
            PgitError::MergeInProgress => {
                Some("finish the merge with `pgit resolve` and `pgit commit`".into())
            }
            PgitError::SchemaMissing => Some("run `pgit init` against this database".into()),
            PgitError::RemoteNotFound(name) => {
                Some(format!("add it with `pgit remote add {name} <url>`"))
            }
            _ => None,
        }
    }

    /// Extra detail lines rendered under the headline, if any.
    pub fn detail(&self) -> Option<String> {
        match self {
            PgitError::AmbiguousCommit { candidates, .. } => {
                let mut out = String::from("candidates:\n");
                for c in candidates {
                    out.push_str(&format!("  {}  {}\n", c.short_id, c.subject));
                }
                Some(out.trim_end().to_string())
            }
            PgitError::MergeConflicts { paths } => {
                let mut out = String::new();
                for p in paths {
                    out.push_str(&format!("  both modified: {p}\n"));
                }
                Some(out.trim_end().to_string())
            }
            _ => None,
        }
    }
}

impl From<sea_orm::DbErr> for PgitError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(e) => PgitError::DatabaseConnection(e.to_string()),
            sea_orm::DbErr::ConnectionAcquire(e) => PgitError::DatabaseConnection(e.to_string()),
            other => PgitError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_surface_contract() {
        assert_eq!(PgitError::Usage("bad".into()).exit_code(), 2);
        assert_eq!(PgitError::NonFastForward.exit_code(), 3);
        assert_eq!(
            PgitError::MergeConflicts { paths: vec![] }.exit_code(),
            3
        );
        assert_eq!(PgitError::RepoNotFound.exit_code(), 1);
        assert_eq!(PgitError::NoCommits.exit_code(), 1);
    }

    #[test]
    fn ambiguous_commit_lists_candidates_in_detail() {
        let err = PgitError::AmbiguousCommit {
            partial: "ABCDE".into(),
            candidates: vec![
                CommitCandidate {
                    id: "ABCDE11111111111111111111X".into(),
                    short_id: "1111111".into(),
                    subject: "first".into(),
                },
                CommitCandidate {
                    id: "ABCDE22222222222222222222Y".into(),
                    short_id: "2222222".into(),
                    subject: "second".into(),
                },
            ],
        };
        let detail = err.detail().unwrap();
        assert!(detail.contains("first"));
        assert!(detail.contains("second"));
    }
}
