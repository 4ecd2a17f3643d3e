//! Commit graph index.
//!
//! A heap mirror of the commit chain used for every navigation query so the
//! delta-compressed commit table is never touched just to walk history.
//! Each row carries binary-lifting pointers: `anc[k]` is the 2^k-th
//! ancestor, giving ancestor resolution in O(log N) row lookups. The graph
//! is monotone; inserting a commit never rewrites existing rows.

use std::collections::HashMap;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

use crate::errors::{CommitCandidate, PgitError};
use crate::id::CommitId;
use crate::internal::db::HEAD_REF;
use crate::internal::db::entities::{graph_row, ref_row};
use crate::internal::object::commit::Commit;

/// Highest lifting level; 2^20 jumps cover histories around a million
/// commits deep.
pub const MAX_LIFT: usize = 20;

/// Cap on candidates reported for an ambiguous partial id.
pub const MAX_CANDIDATES: usize = 10;

/// One graph row, with pointers decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRow {
    pub id: CommitId,
    pub parent_id: Option<CommitId>,
    pub merge_parent_id: Option<CommitId>,
    pub anc: Vec<Option<CommitId>>,
    pub subject: String,
    pub committed_at_ms: i64,
}

impl GraphRow {
    fn from_model(model: graph_row::Model) -> Result<GraphRow, PgitError> {
        let anc: Vec<Option<String>> = serde_json::from_str(&model.anc)
            .map_err(|e| PgitError::Storage(format!("bad ancestor array: {e}")))?;
        let anc = anc
            .into_iter()
            .map(|slot| {
                slot.map(|s| s.parse::<CommitId>().map_err(PgitError::Storage))
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GraphRow {
            id: model
                .id
                .parse()
                .map_err(PgitError::Storage)?,
            parent_id: model
                .parent_id
                .map(|s| s.parse().map_err(PgitError::Storage))
                .transpose()?,
            merge_parent_id: model
                .merge_parent_id
                .map(|s| s.parse().map_err(PgitError::Storage))
                .transpose()?,
            anc,
            subject: model.subject,
            committed_at_ms: model.committed_at,
        })
    }
}

/// Result of resolving a partial commit id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixMatch {
    Unique(CommitId),
    Ambiguous(Vec<CommitCandidate>),
    None,
}

/// Fetch one graph row.
pub async fn get<C: ConnectionTrait>(db: &C, id: &CommitId) -> Result<Option<GraphRow>, PgitError> {
    let model = graph_row::Entity::find_by_id(id.to_string()).one(db).await?;
    model.map(GraphRow::from_model).transpose()
}

/// Exact-existence check, a single primary-key lookup.
pub async fn exists<C: ConnectionTrait>(db: &C, id: &CommitId) -> Result<bool, PgitError> {
    Ok(graph_row::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .is_some())
}

/// Insert the graph row for a new commit, computing its lifting pointers
/// from the parent's row chain.
pub async fn insert<C: ConnectionTrait>(
    db: &C,
    commit: &Commit,
    merge_parent_id: Option<CommitId>,
) -> Result<(), PgitError> {
    let mut anc: Vec<Option<CommitId>> = vec![None; MAX_LIFT + 1];
    anc[0] = commit.parent_id;

    let mut cache: HashMap<CommitId, GraphRow> = HashMap::new();
    for k in 1..=MAX_LIFT {
        let Some(half) = anc[k - 1] else { break };
        let row = match cache.get(&half) {
            Some(row) => row.clone(),
            None => {
                let row = get(db, &half)
                    .await?
                    .ok_or_else(|| PgitError::CommitNotFound(half.to_string()))?;
                cache.insert(half, row.clone());
                row
            }
        };
        anc[k] = row.anc.get(k - 1).copied().flatten();
    }

    let anc_json = serde_json::to_string(
        &anc.iter()
            .map(|slot| slot.map(|id| id.to_string()))
            .collect::<Vec<_>>(),
    )
    .map_err(|e| PgitError::Storage(e.to_string()))?;

    graph_row::ActiveModel {
        id: Set(commit.id.to_string()),
        parent_id: Set(commit.parent_id.map(|p| p.to_string())),
        merge_parent_id: Set(merge_parent_id.map(|p| p.to_string())),
        anc: Set(anc_json),
        subject: Set(commit.subject().to_string()),
        committed_at: Set(commit.committer.when.timestamp_millis()),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Resolve a partial id against the graph by prefix.
pub async fn find_by_prefix<C: ConnectionTrait>(
    db: &C,
    partial: &str,
) -> Result<PrefixMatch, PgitError> {
    let upper = partial.to_ascii_uppercase();
    if upper.is_empty() || !upper.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(PrefixMatch::None);
    }
    let pattern = format!("{upper}%");
    let rows = graph_row::Entity::find()
        .filter(graph_row::Column::Id.like(pattern))
        .order_by_asc(graph_row::Column::Id)
        .limit((MAX_CANDIDATES + 1) as u64)
        .all(db)
        .await?;
    match rows.len() {
        0 => Ok(PrefixMatch::None),
        1 => Ok(PrefixMatch::Unique(
            rows[0].id.parse().map_err(PgitError::Storage)?,
        )),
        _ => {
            let candidates = rows
                .into_iter()
                .take(MAX_CANDIDATES)
                .map(|m| CommitCandidate {
                    short_id: m.id[m.id.len() - crate::id::SHORT_ID_LEN..].to_string(),
                    id: m.id,
                    subject: m.subject,
                })
                .collect();
            Ok(PrefixMatch::Ambiguous(candidates))
        }
    }
}

/// The k-th ancestor of `id`, or `None` when the chain ends first.
///
/// Jumps once per set bit of `k`, so resolving `~5000` costs at most
/// ceil(log2 5000) row lookups.
pub async fn ancestor<C: ConnectionTrait>(
    db: &C,
    id: &CommitId,
    k: u64,
) -> Result<Option<CommitId>, PgitError> {
    let mut current = *id;
    let mut remaining = k;
    while remaining != 0 {
        let bit = remaining.trailing_zeros() as usize;
        if bit > MAX_LIFT {
            return Ok(None);
        }
        let row = get(db, &current)
            .await?
            .ok_or_else(|| PgitError::CommitNotFound(current.to_string()))?;
        match row.anc.get(bit).copied().flatten() {
            Some(next) => current = next,
            None => return Ok(None),
        }
        remaining &= remaining - 1;
    }
    Ok(Some(current))
}

/// Whether `a` sits on the parent chain of `b` (or equals it).
///
/// Ids are time-monotonic, so jumps can greedily take the largest lifting
/// pointer that does not drop below `a`.
pub async fn chain_is_ancestor<C: ConnectionTrait>(
    db: &C,
    a: &CommitId,
    b: &CommitId,
) -> Result<bool, PgitError> {
    if a == b {
        return Ok(true);
    }
    if a > b {
        return Ok(false);
    }
    let mut current = *b;
    while current > *a {
        let row = get(db, &current)
            .await?
            .ok_or_else(|| PgitError::CommitNotFound(current.to_string()))?;
        let mut stepped = false;
        for k in (0..=MAX_LIFT).rev() {
            if let Some(next) = row.anc.get(k).copied().flatten() {
                if next >= *a {
                    current = next;
                    stepped = true;
                    break;
                }
            }
        }
        if !stepped {
            return Ok(false);
        }
    }
    Ok(current == *a)
}

/// Whether `a` is reachable from `b` through parent or merge-parent edges.
///
/// The parent chain is covered by lifting jumps; merge edges are rare, so
/// the merge rows in `(a, b]` are pulled once and explored as extra chain
/// heads until one of them leads down to `a`.
pub async fn is_ancestor<C: ConnectionTrait>(
    db: &C,
    a: &CommitId,
    b: &CommitId,
) -> Result<bool, PgitError> {
    if a == b {
        return Ok(true);
    }
    if a > b {
        return Ok(false);
    }
    if chain_is_ancestor(db, a, b).await? {
        return Ok(true);
    }

    let merge_rows = graph_row::Entity::find()
        .filter(graph_row::Column::MergeParentId.is_not_null())
        .filter(graph_row::Column::Id.gt(a.to_string()))
        .filter(graph_row::Column::Id.lte(b.to_string()))
        .all(db)
        .await?;
    if merge_rows.is_empty() {
        return Ok(false);
    }
    let mut merges: Vec<(CommitId, CommitId)> = Vec::with_capacity(merge_rows.len());
    for model in merge_rows {
        let id: CommitId = model.id.parse().map_err(PgitError::Storage)?;
        let parent: CommitId = model
            .merge_parent_id
            .expect("filtered to non-null")
            .parse()
            .map_err(PgitError::Storage)?;
        merges.push((id, parent));
    }

    let mut visited: std::collections::HashSet<CommitId> = std::collections::HashSet::new();
    visited.insert(*b);
    let mut frontier = vec![*b];
    while let Some(tip) = frontier.pop() {
        for (merge_id, merge_parent) in &merges {
            if *merge_id > tip || !chain_is_ancestor(db, merge_id, &tip).await? {
                continue;
            }
            if merge_parent == a || chain_is_ancestor(db, a, merge_parent).await? {
                return Ok(true);
            }
            if *merge_parent > *a && visited.insert(*merge_parent) {
                frontier.push(*merge_parent);
            }
        }
    }
    Ok(false)
}

/// Lowest common ancestor of two commits along their parent chains.
///
/// The two-pointer walk always steps the larger id down, which terminates
/// because ids strictly decrease along ancestry.
pub async fn merge_base<C: ConnectionTrait>(
    db: &C,
    a: &CommitId,
    b: &CommitId,
) -> Result<Option<CommitId>, PgitError> {
    let mut x = *a;
    let mut y = *b;
    loop {
        if x == y {
            return Ok(Some(x));
        }
        let (step, other) = if x > y { (&mut x, y) } else { (&mut y, x) };
        let row = get(db, step)
            .await?
            .ok_or_else(|| PgitError::CommitNotFound(step.to_string()))?;
        match row.parent_id {
            Some(parent) => *step = parent,
            None => {
                // Root reached on one side; the other may still descend to it.
                if is_ancestor(db, step, &other).await? {
                    return Ok(Some(*step));
                }
                return Ok(None);
            }
        }
    }
}

/// Walk the parent chain starting at `from` (inclusive), up to `limit` rows.
pub async fn walk<C: ConnectionTrait>(
    db: &C,
    from: &CommitId,
    limit: usize,
) -> Result<Vec<GraphRow>, PgitError> {
    let mut out = Vec::new();
    let mut cursor = Some(*from);
    while let Some(id) = cursor {
        if out.len() >= limit {
            break;
        }
        let row = get(db, &id)
            .await?
            .ok_or_else(|| PgitError::CommitNotFound(id.to_string()))?;
        cursor = row.parent_id;
        out.push(row);
    }
    Ok(out)
}

/// All graph rows in creation order. Used by clone.
pub async fn all_in_order<C: ConnectionTrait>(db: &C) -> Result<Vec<GraphRow>, PgitError> {
    let rows = graph_row::Entity::find()
        .order_by_asc(graph_row::Column::Id)
        .all(db)
        .await?;
    rows.into_iter().map(GraphRow::from_model).collect()
}

/// Current HEAD commit, if any commit exists.
pub async fn head<C: ConnectionTrait>(db: &C) -> Result<Option<CommitId>, PgitError> {
    let row = ref_row::Entity::find_by_id(HEAD_REF.to_string())
        .one(db)
        .await?
        .ok_or(PgitError::SchemaMissing)?;
    row.commit_id
        .map(|s| s.parse().map_err(PgitError::Storage))
        .transpose()
}

/// Unconditionally move HEAD.
pub async fn set_head<C: ConnectionTrait>(
    db: &C,
    target: Option<CommitId>,
) -> Result<(), PgitError> {
    ref_row::Entity::update_many()
        .col_expr(
            ref_row::Column::CommitId,
            Expr::value(target.map(|c| c.to_string())),
        )
        .filter(ref_row::Column::Name.eq(HEAD_REF))
        .exec(db)
        .await?;
    Ok(())
}

/// Compare-and-swap HEAD: advance to `target` only if it still equals
/// `observed`. Returns whether the swap happened.
pub async fn cas_head<C: ConnectionTrait>(
    db: &C,
    observed: Option<CommitId>,
    target: Option<CommitId>,
) -> Result<bool, PgitError> {
    let update = ref_row::Entity::update_many()
        .col_expr(
            ref_row::Column::CommitId,
            Expr::value(target.map(|c| c.to_string())),
        )
        .filter(ref_row::Column::Name.eq(HEAD_REF));
    let update = match observed {
        Some(o) => update.filter(ref_row::Column::CommitId.eq(o.to_string())),
        None => update.filter(ref_row::Column::CommitId.is_null()),
    };
    let result = update.exec(db).await?;
    Ok(result.rows_affected == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::db::test_db;
    use crate::internal::object::commit::Signature;

    fn sig() -> Signature {
        Signature::new("a", "a@example.com", chrono::Utc::now())
    }

    fn make_commit(parent: Option<CommitId>, subject: &str) -> Commit {
        let id = CommitId::next_after(parent.as_ref());
        Commit::new(id, parent, sig(), sig(), subject)
    }

    async fn build_chain(db: &sea_orm::DatabaseConnection, len: usize) -> Vec<CommitId> {
        let mut ids = Vec::with_capacity(len);
        let mut parent = None;
        for i in 0..len {
            let commit = make_commit(parent, &format!("commit {i}"));
            insert(db, &commit, None).await.unwrap();
            parent = Some(commit.id);
            ids.push(commit.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_insert_and_exists() {
        let db = test_db().await;
        let ids = build_chain(&db, 3).await;
        for id in &ids {
            assert!(exists(&db, id).await.unwrap());
        }
        assert!(!exists(&db, &CommitId::generate()).await.unwrap());
    }

    /// `anc[0]` must equal the parent and `anc[k]` the 2^k-th ancestor.
    #[tokio::test]
    async fn test_lifting_pointers_are_powers_of_two() {
        let db = test_db().await;
        let ids = build_chain(&db, 40).await;
        let last = ids.last().unwrap();
        let row = get(&db, last).await.unwrap().unwrap();
        assert_eq!(row.anc[0], row.parent_id);
        for k in 0..=MAX_LIFT {
            let jump = 1usize << k;
            let expected = if jump < ids.len() {
                Some(ids[ids.len() - 1 - jump])
            } else {
                None
            };
            assert_eq!(row.anc[k], expected, "level {k}");
        }
    }

    /// ancestor(c, i + j) == ancestor(ancestor(c, i), j).
    #[tokio::test]
    async fn test_ancestor_composition() {
        let db = test_db().await;
        let ids = build_chain(&db, 30).await;
        let tip = *ids.last().unwrap();
        for (i, j) in [(1u64, 2u64), (3, 5), (7, 11), (0, 4)] {
            let direct = ancestor(&db, &tip, i + j).await.unwrap();
            let via = match ancestor(&db, &tip, i).await.unwrap() {
                Some(mid) => ancestor(&db, &mid, j).await.unwrap(),
                None => None,
            };
            assert_eq!(direct, via, "i={i} j={j}");
        }
    }

    #[tokio::test]
    async fn test_ancestor_past_root_is_none() {
        let db = test_db().await;
        let ids = build_chain(&db, 5).await;
        let tip = *ids.last().unwrap();
        assert_eq!(ancestor(&db, &tip, 4).await.unwrap(), Some(ids[0]));
        assert_eq!(ancestor(&db, &tip, 5).await.unwrap(), None);
        assert_eq!(ancestor(&db, &tip, 5000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_is_ancestor() {
        let db = test_db().await;
        let ids = build_chain(&db, 20).await;
        assert!(is_ancestor(&db, &ids[0], &ids[19]).await.unwrap());
        assert!(is_ancestor(&db, &ids[7], &ids[19]).await.unwrap());
        assert!(is_ancestor(&db, &ids[19], &ids[19]).await.unwrap());
        assert!(!is_ancestor(&db, &ids[19], &ids[0]).await.unwrap());
    }

    /// A merge parent is reachable even though it is off the parent chain.
    #[tokio::test]
    async fn test_is_ancestor_through_merge_edge() {
        let db = test_db().await;
        let ids = build_chain(&db, 2).await;
        let base = ids[1];

        let right_id = CommitId::next_after(Some(&base));
        let right = Commit::new(right_id, Some(base), sig(), sig(), "right");
        insert(&db, &right, None).await.unwrap();

        let left_id = CommitId::next_after(Some(&right_id));
        let left = Commit::new(left_id, Some(base), sig(), sig(), "left");
        insert(&db, &left, None).await.unwrap();

        let merge_id = CommitId::next_after(Some(&left_id));
        let merge = Commit::new(merge_id, Some(left_id), sig(), sig(), "merge");
        insert(&db, &merge, Some(right_id)).await.unwrap();

        assert!(!chain_is_ancestor(&db, &right_id, &merge_id).await.unwrap());
        assert!(is_ancestor(&db, &right_id, &merge_id).await.unwrap());
        assert!(is_ancestor(&db, &left_id, &merge_id).await.unwrap());
        assert!(is_ancestor(&db, &base, &merge_id).await.unwrap());
        assert!(!is_ancestor(&db, &merge_id, &right_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_resolution() {
        let db = test_db().await;
        let ids = build_chain(&db, 2).await;
        let full = ids[0].to_string();
        match find_by_prefix(&db, &full[..16]).await.unwrap() {
            PrefixMatch::Unique(id) => assert_eq!(id, ids[0]),
            other => panic!("expected unique match, got {other:?}"),
        }
        assert_eq!(
            find_by_prefix(&db, "zzzznope").await.unwrap(),
            PrefixMatch::None
        );
        // ULIDs created in the same run share their timestamp prefix, so a
        // short prefix is ambiguous.
        match find_by_prefix(&db, &full[..1]).await.unwrap() {
            PrefixMatch::Ambiguous(candidates) => {
                assert!(candidates.len() >= 2);
                assert!(!candidates[0].subject.is_empty());
            }
            PrefixMatch::Unique(_) => {}
            PrefixMatch::None => panic!("prefix should match"),
        }
    }

    #[tokio::test]
    async fn test_head_cas() {
        let db = test_db().await;
        let ids = build_chain(&db, 2).await;
        assert_eq!(head(&db).await.unwrap(), None);
        assert!(cas_head(&db, None, Some(ids[0])).await.unwrap());
        assert_eq!(head(&db).await.unwrap(), Some(ids[0]));
        // Losing racer observes stale HEAD.
        assert!(!cas_head(&db, None, Some(ids[1])).await.unwrap());
        assert!(cas_head(&db, Some(ids[0]), Some(ids[1])).await.unwrap());
        assert_eq!(head(&db).await.unwrap(), Some(ids[1]));
    }

    #[tokio::test]
    async fn test_merge_base_on_linear_chain() {
        let db = test_db().await;
        let ids = build_chain(&db, 6).await;
        assert_eq!(
            merge_base(&db, &ids[2], &ids[5]).await.unwrap(),
            Some(ids[2])
        );
        assert_eq!(
            merge_base(&db, &ids[5], &ids[5]).await.unwrap(),
            Some(ids[5])
        );
    }

    #[tokio::test]
    async fn test_merge_base_on_diverged_chains() {
        let db = test_db().await;
        let ids = build_chain(&db, 3).await;
        let base = ids[2];
        let left = make_commit(Some(base), "left");
        insert(&db, &left, None).await.unwrap();
        let right = make_commit(Some(base), "right");
        insert(&db, &right, None).await.unwrap();
        assert_eq!(
            merge_base(&db, &left.id, &right.id).await.unwrap(),
            Some(base)
        );
    }

    #[tokio::test]
    async fn test_walk_respects_limit() {
        let db = test_db().await;
        let ids = build_chain(&db, 10).await;
        let page = walk(&db, ids.last().unwrap(), 4).await.unwrap();
        assert_eq!(page.len(), 4);
        assert_eq!(page[0].id, ids[9]);
        assert_eq!(page[3].id, ids[6]);
    }
}
