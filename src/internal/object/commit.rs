//! The commit record.
//!
//! A commit names at most one parent; linear history is the norm, and a
//! merge is a regular commit whose "other" parent is recorded only in the
//! commit graph table. The record itself is immutable once written and is
//! stored delta-compressed in the `pgit_commits` group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PgitError;
use crate::id::CommitId;

/// Name, email and timestamp for an author or committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: DateTime<Utc>,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: DateTime<Utc>) -> Self {
        Signature {
            name: name.into(),
            email: email.into(),
            when,
        }
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.when.to_rfc3339())
    }
}

/// A single version of the repository.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub parent_id: Option<CommitId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "commit {}", self.id)?;
        if let Some(parent) = &self.parent_id {
            writeln!(f, "parent {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f)?;
        write!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        id: CommitId,
        parent_id: Option<CommitId>,
        author: Signature,
        committer: Signature,
        message: impl Into<String>,
    ) -> Commit {
        Commit {
            id,
            parent_id,
            author,
            committer,
            message: message.into(),
        }
    }

    /// First non-empty line of the message.
    pub fn subject(&self) -> &str {
        self.message
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
    }

    /// Check the record invariants: the committer timestamp may not precede
    /// the author timestamp, and the parent id must sort before this id.
    pub fn validate(&self) -> Result<(), PgitError> {
        if self.committer.when < self.author.when {
            return Err(PgitError::Serialization(format!(
                "commit {}: committed_at precedes authored_at",
                self.id
            )));
        }
        if let Some(parent) = &self.parent_id {
            if *parent >= self.id {
                return Err(PgitError::Serialization(format!(
                    "commit {}: parent id {} does not precede it",
                    self.id, parent
                )));
            }
        }
        Ok(())
    }

    /// Serialize for the `pgit_commits` delta group.
    pub fn to_data(&self) -> Result<Vec<u8>, PgitError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| PgitError::Serialization(e.to_string()))
    }

    /// Decode a record previously produced by [`Commit::to_data`].
    pub fn from_data(data: &[u8]) -> Result<Commit, PgitError> {
        let (commit, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| PgitError::Serialization(e.to_string()))?;
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(when_ms: i64) -> Signature {
        Signature::new(
            "benjamin.747",
            "benjamin.747@outlook.com",
            chrono::DateTime::from_timestamp_millis(when_ms).unwrap(),
        )
    }

    fn basic_commit() -> Commit {
        let parent = CommitId::generate();
        let id = CommitId::next_after(Some(&parent));
        Commit::new(id, Some(parent), sig(1_000), sig(2_000), "add storage layer\n\ndetails\n")
    }

    #[test]
    fn test_subject_is_first_non_empty_line() {
        let commit = basic_commit();
        assert_eq!(commit.subject(), "add storage layer");
    }

    #[test]
    fn test_data_round_trip() {
        let commit = basic_commit();
        let data = commit.to_data().unwrap();
        let decoded = Commit::from_data(&data).unwrap();
        assert_eq!(commit, decoded);
        assert_eq!(commit.message, decoded.message);
        assert_eq!(commit.parent_id, decoded.parent_id);
    }

    #[test]
    fn test_validate_rejects_time_travel() {
        let mut commit = basic_commit();
        commit.author.when = commit.committer.when + chrono::Duration::seconds(1);
        assert!(commit.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_parent() {
        let id = CommitId::generate();
        let later = CommitId::next_after(Some(&id));
        let commit = Commit::new(id, Some(later), sig(0), sig(0), "x");
        assert!(commit.validate().is_err());
    }

    #[test]
    fn test_equality_is_by_id() {
        let a = basic_commit();
        let mut b = a.clone();
        b.message = "different".into();
        assert_eq!(a, b);
    }
}
