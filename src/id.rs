//! Commit identifiers.
//!
//! Commit ids are ULIDs: 26 uppercase Crockford base32 characters whose
//! first 48 bits encode a millisecond timestamp, so lexicographic order
//! matches creation order. The short form shown to users is the last 7
//! characters.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Character length of a full commit id.
pub const COMMIT_ID_LEN: usize = 26;
/// Character length of the short form (trailing characters of the full id).
pub const SHORT_ID_LEN: usize = 7;
/// Rendered in blame output for lines no surviving commit accounts for.
pub const UNATTRIBUTED: &str = "0000000";

/// Time-sortable commit identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(Ulid);

impl CommitId {
    /// Allocate a fresh id from the current wall clock.
    pub fn generate() -> CommitId {
        CommitId(Ulid::new())
    }

    /// Allocate an id guaranteed to sort after `parent`.
    ///
    /// Under same-millisecond allocation the random tail of a fresh ULID can
    /// sort below the parent's; redraw until the ordering invariant holds.
    pub fn next_after(parent: Option<&CommitId>) -> CommitId {
        loop {
            let id = CommitId::generate();
            match parent {
                Some(p) if id <= *p => continue,
                _ => return id,
            }
        }
    }

    /// The trailing [`SHORT_ID_LEN`] characters of the full id.
    pub fn short(&self) -> String {
        let s = self.0.to_string();
        s[COMMIT_ID_LEN - SHORT_ID_LEN..].to_string()
    }

    /// Millisecond creation timestamp carried in the id.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let ms = self.0.timestamp_ms() as i64;
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }
}

impl Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a full 26-character id. Partial ids go through revision resolution,
/// not through this parser.
impl FromStr for CommitId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != COMMIT_ID_LEN {
            return Err(format!(
                "invalid commit id length: got {}, expected {COMMIT_ID_LEN}",
                s.len()
            ));
        }
        Ulid::from_string(s)
            .map(CommitId)
            .map_err(|e| e.to_string())
    }
}

impl Serialize for CommitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CommitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CommitId::from_str(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_26_uppercase() {
        let id = CommitId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), COMMIT_ID_LEN);
        assert!(s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_short_form_is_suffix() {
        let id = CommitId::generate();
        let s = id.to_string();
        assert_eq!(id.short(), s[COMMIT_ID_LEN - SHORT_ID_LEN..]);
        assert_eq!(id.short().len(), SHORT_ID_LEN);
    }

    /// Allocation after a parent must sort after it, even when both land in
    /// the same millisecond.
    #[test]
    fn test_next_after_is_strictly_increasing() {
        let mut prev = CommitId::generate();
        for _ in 0..200 {
            let next = CommitId::next_after(Some(&prev));
            assert!(next > prev);
            assert!(next.to_string() > prev.to_string());
            prev = next;
        }
    }

    #[test]
    fn test_round_trip_through_string() {
        let id = CommitId::generate();
        let parsed = CommitId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(CommitId::from_str("ABC").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = CommitId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: CommitId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
