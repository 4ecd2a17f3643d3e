//! Revision resolution.
//!
//! Grammar: a base (`HEAD`, a full commit id, or a partial id) followed by
//! any run of ancestor suffixes: `~N` (N defaults to 1) and `^` (one per
//! caret). Partial ids resolve by graph prefix first; the FileRef suffix
//! scan is kept as a legacy fallback for ids written by older schemas.
//! Ancestor steps clamp at the root commit.

use sea_orm::ConnectionTrait;

use crate::errors::PgitError;
use crate::id::{COMMIT_ID_LEN, CommitId};
use crate::internal::db::storage;
use crate::internal::graph::{self, PrefixMatch};

/// Resolve a revision expression to a commit id.
pub async fn resolve<C: ConnectionTrait>(db: &C, spec: &str) -> Result<CommitId, PgitError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(PgitError::InvalidRef(spec.to_string()));
    }
    let suffix_start = spec
        .find(['~', '^'])
        .unwrap_or(spec.len());
    let (base_str, suffixes) = spec.split_at(suffix_start);
    let base = resolve_base(db, base_str, spec).await?;
    let steps = parse_suffixes(suffixes, spec)?;
    if steps == 0 {
        return Ok(base);
    }
    ancestor_clamped(db, &base, steps).await
}

async fn resolve_base<C: ConnectionTrait>(
    db: &C,
    base: &str,
    spec: &str,
) -> Result<CommitId, PgitError> {
    if base.is_empty() {
        return Err(PgitError::InvalidRef(spec.to_string()));
    }
    if base == "HEAD" {
        return graph::head(db).await?.ok_or(PgitError::NoCommits);
    }
    if base.len() == COMMIT_ID_LEN {
        if let Ok(id) = base.to_ascii_uppercase().parse::<CommitId>() {
            if graph::exists(db, &id).await? {
                return Ok(id);
            }
            return Err(PgitError::CommitNotFound(base.to_string()));
        }
    }
    match graph::find_by_prefix(db, base).await? {
        PrefixMatch::Unique(id) => Ok(id),
        PrefixMatch::Ambiguous(candidates) => Err(PgitError::AmbiguousCommit {
            partial: base.to_string(),
            candidates,
        }),
        PrefixMatch::None => {
            // Legacy fallback: match the tail of ids recorded in FileRefs.
            let hits = storage::find_by_ref_suffix(db, base).await?;
            match hits.len() {
                0 => Err(PgitError::CommitNotFound(base.to_string())),
                1 => Ok(hits[0]),
                _ => {
                    let mut candidates = Vec::new();
                    for id in hits.iter().take(graph::MAX_CANDIDATES) {
                        let subject = graph::get(db, id)
                            .await?
                            .map(|row| row.subject)
                            .unwrap_or_default();
                        candidates.push(crate::errors::CommitCandidate {
                            id: id.to_string(),
                            short_id: id.short(),
                            subject,
                        });
                    }
                    Err(PgitError::AmbiguousCommit {
                        partial: base.to_string(),
                        candidates,
                    })
                }
            }
        }
    }
}

fn parse_suffixes(suffixes: &str, spec: &str) -> Result<u64, PgitError> {
    let mut steps: u64 = 0;
    let mut chars = suffixes.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '^' => steps += 1,
            '~' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                let n: u64 = if digits.is_empty() {
                    1
                } else {
                    digits
                        .parse()
                        .map_err(|_| PgitError::InvalidRef(spec.to_string()))?
                };
                steps += n;
            }
            _ => return Err(PgitError::InvalidRef(spec.to_string())),
        }
    }
    Ok(steps)
}

/// Walk `k` ancestors via the lifting pointers, stopping at the root when
/// the chain is shorter. A pointer at level `b` exists exactly when the
/// chain continues for 2^b more steps, so greedy high-to-low jumps land on
/// the root rather than running past it.
async fn ancestor_clamped<C: ConnectionTrait>(
    db: &C,
    id: &CommitId,
    k: u64,
) -> Result<CommitId, PgitError> {
    let mut current = *id;
    let mut remaining = k;
    let mut row = graph::get(db, &current)
        .await?
        .ok_or_else(|| PgitError::CommitNotFound(current.to_string()))?;
    let mut level = graph::MAX_LIFT;
    loop {
        if remaining == 0 {
            return Ok(current);
        }
        let can_jump = remaining >= (1u64 << level)
            && row.anc.get(level).copied().flatten().is_some();
        if can_jump {
            let next = row.anc[level].unwrap();
            remaining -= 1u64 << level;
            current = next;
            row = graph::get(db, &current)
                .await?
                .ok_or_else(|| PgitError::CommitNotFound(current.to_string()))?;
        } else if level == 0 {
            // Parent pointer is gone: this is the root.
            return Ok(current);
        } else {
            level -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::db::test_db;
    use crate::internal::db::storage::put_commit;
    use crate::internal::graph::set_head;
    use crate::internal::object::commit::{Commit, Signature};
    use crate::internal::object::file_ref::ChangeKind;

    fn sig() -> Signature {
        Signature::new("r", "r@example.com", chrono::Utc::now())
    }

    async fn build_chain(db: &sea_orm::DatabaseConnection, len: usize) -> Vec<CommitId> {
        let mut ids = Vec::new();
        let mut parent = None;
        for i in 0..len {
            let id = CommitId::next_after(parent.as_ref());
            let commit = Commit::new(id, parent, sig(), sig(), format!("commit {i}"));
            storage::put_blob(
                db,
                &id,
                "a.txt",
                &crate::internal::object::blob::BlobContent::Regular {
                    mode: 0o644,
                    content: format!("v{i}\n").into_bytes(),
                },
                if i == 0 {
                    ChangeKind::Added
                } else {
                    ChangeKind::Modified
                },
            )
            .await
            .unwrap();
            put_commit(db, &commit, None).await.unwrap();
            parent = Some(id);
            ids.push(id);
        }
        set_head(db, parent).await.unwrap();
        ids
    }

    #[tokio::test]
    async fn test_head_and_tilde() {
        let db = test_db().await;
        let ids = build_chain(&db, 5).await;
        assert_eq!(resolve(&db, "HEAD").await.unwrap(), ids[4]);
        assert_eq!(resolve(&db, "HEAD~0").await.unwrap(), ids[4]);
        assert_eq!(resolve(&db, "HEAD~").await.unwrap(), ids[3]);
        assert_eq!(resolve(&db, "HEAD~3").await.unwrap(), ids[1]);
        assert_eq!(resolve(&db, "HEAD^^").await.unwrap(), ids[2]);
        assert_eq!(resolve(&db, "HEAD~2^").await.unwrap(), ids[1]);
    }

    /// Ancestor steps past the root clamp at the root commit.
    #[tokio::test]
    async fn test_tilde_clamps_at_root() {
        let db = test_db().await;
        let ids = build_chain(&db, 5).await;
        assert_eq!(resolve(&db, "HEAD~4").await.unwrap(), ids[0]);
        assert_eq!(resolve(&db, "HEAD~5000").await.unwrap(), ids[0]);
    }

    #[tokio::test]
    async fn test_full_and_partial_ids() {
        let db = test_db().await;
        let ids = build_chain(&db, 2).await;
        let full = ids[1].to_string();
        assert_eq!(resolve(&db, &full).await.unwrap(), ids[1]);
        assert_eq!(
            resolve(&db, &full.to_lowercase()).await.unwrap(),
            ids[1],
            "ids are case-insensitive on input"
        );
        assert_eq!(resolve(&db, &full[..20]).await.unwrap(), ids[1]);
        // Suffix fallback: the short form is a trailing fragment, which the
        // prefix index will usually miss but the FileRef scan finds.
        let short = ids[0].short();
        let resolved = resolve(&db, &short).await;
        match resolved {
            Ok(id) => assert_eq!(id, ids[0]),
            Err(PgitError::AmbiguousCommit { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_and_invalid() {
        let db = test_db().await;
        build_chain(&db, 1).await;
        assert!(matches!(
            resolve(&db, "ZZZZZZZZ9").await.unwrap_err(),
            PgitError::CommitNotFound(_)
        ));
        assert!(matches!(
            resolve(&db, "HEAD~x").await.unwrap_err(),
            PgitError::InvalidRef(_)
        ));
        assert!(matches!(
            resolve(&db, "~1").await.unwrap_err(),
            PgitError::InvalidRef(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_repo_head_is_no_commits() {
        let db = test_db().await;
        assert!(matches!(
            resolve(&db, "HEAD").await.unwrap_err(),
            PgitError::NoCommits
        ));
    }
}
