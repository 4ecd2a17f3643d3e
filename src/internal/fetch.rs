//! Scoped fetch engine.
//!
//! Takes a set of (path, commit) coordinates and returns their contents,
//! fetching across independent delta groups in parallel under a global
//! in-flight bound. Work for one path is issued sequentially so a group's
//! chain is read in order. The engine sits above the storage driver behind
//! the [`BlobSource`] seam so it can be exercised against a mock.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::errors::PgitError;
use crate::id::CommitId;
use crate::internal::db::storage::Storage;
use crate::internal::object::blob::BlobContent;

/// Global bound on in-flight fetches.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 15;

/// Default deadline for read-side commands, seconds.
pub const READ_DEADLINE_SECS: u64 = 30;
/// Default deadline for checkout and blame, seconds.
pub const HEAVY_DEADLINE_SECS: u64 = 60;

/// Anything that can produce the content stored at (path, commit).
/// Deletions and absent rows both come back as `None`.
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn fetch(
        &self,
        path: &str,
        commit: &CommitId,
    ) -> Result<Option<BlobContent>, PgitError>;
}

#[async_trait]
impl BlobSource for Storage {
    async fn fetch(
        &self,
        path: &str,
        commit: &CommitId,
    ) -> Result<Option<BlobContent>, PgitError> {
        Ok(self.get_blob(path, commit).await?.map(|b| b.content))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub max_in_flight: usize,
    /// Return what completed instead of failing on the first fetch error.
    pub allow_partial: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            allow_partial: false,
        }
    }
}

/// Fetch every requested (path, commit) pair.
///
/// Pairs are deduplicated; multiple commits of the same path are fetched
/// sequentially within one worker. Without `allow_partial`, the first error
/// aborts the remaining work and is returned.
pub async fn fetch_set<S: BlobSource>(
    source: &S,
    pairs: impl IntoIterator<Item = (String, CommitId)>,
    options: FetchOptions,
) -> Result<DashMap<(String, CommitId), Option<BlobContent>>, PgitError> {
    let mut by_path: BTreeMap<String, Vec<CommitId>> = BTreeMap::new();
    for (path, commit) in pairs {
        let commits = by_path.entry(path).or_default();
        if !commits.contains(&commit) {
            commits.push(commit);
        }
    }
    let total: usize = by_path.values().map(|v| v.len()).sum();
    debug!(paths = by_path.len(), pairs = total, "scoped fetch starting");

    let results: DashMap<(String, CommitId), Option<BlobContent>> = DashMap::new();
    {
        let tasks = by_path.into_iter().map(|(path, commits)| {
            let results = &results;
            async move {
                for commit in commits {
                    let content = source.fetch(&path, &commit).await?;
                    results.insert((path.clone(), commit), content);
                }
                Ok::<(), PgitError>(())
            }
        });

        let mut stream =
            futures::stream::iter(tasks).buffer_unordered(options.max_in_flight.max(1));
        while let Some(outcome) = stream.next().await {
            if let Err(err) = outcome {
                if options.allow_partial {
                    warn!(error = %err, "fetch failed, keeping partial result");
                } else {
                    // Dropping the stream cancels all in-flight fetches at
                    // their next await point.
                    return Err(err);
                }
            }
        }
    }
    Ok(results)
}

/// Run a future under a command deadline.
pub async fn with_deadline<T, F>(secs: u64, fut: F) -> Result<T, PgitError>
where
    F: Future<Output = Result<T, PgitError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(PgitError::Timeout(secs)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::internal::object::blob::MODE_REGULAR;

    struct MockSource {
        contents: HashMap<(String, String), Vec<u8>>,
        fail_on: Option<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<(String, CommitId)>>,
    }

    impl MockSource {
        fn new(entries: &[(&str, CommitId, &[u8])]) -> Self {
            MockSource {
                contents: entries
                    .iter()
                    .map(|(p, c, b)| ((p.to_string(), c.to_string()), b.to_vec()))
                    .collect(),
                fail_on: None,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BlobSource for MockSource {
        async fn fetch(
            &self,
            path: &str,
            commit: &CommitId,
        ) -> Result<Option<BlobContent>, PgitError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), *commit));

            if self.fail_on.as_deref() == Some(path) {
                return Err(PgitError::Storage("injected failure".into()));
            }
            Ok(self
                .contents
                .get(&(path.to_string(), commit.to_string()))
                .map(|bytes| BlobContent::Regular {
                    mode: MODE_REGULAR,
                    content: bytes.clone(),
                }))
        }
    }

    fn ids(n: usize) -> Vec<CommitId> {
        let mut out = Vec::new();
        let mut prev = None;
        for _ in 0..n {
            let id = CommitId::next_after(prev.as_ref());
            out.push(id);
            prev = Some(id);
        }
        out
    }

    #[tokio::test]
    async fn test_fetches_all_pairs() {
        let c = ids(2);
        let source = MockSource::new(&[
            ("a.txt", c[0], b"a0"),
            ("a.txt", c[1], b"a1"),
            ("b.txt", c[0], b"b0"),
        ]);
        let pairs = vec![
            ("a.txt".to_string(), c[0]),
            ("a.txt".to_string(), c[1]),
            ("b.txt".to_string(), c[0]),
            ("missing".to_string(), c[0]),
        ];
        let map = fetch_set(&source, pairs, FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(map.len(), 4);
        let got = map.get(&("a.txt".to_string(), c[1])).unwrap();
        assert!(matches!(
            got.value(),
            Some(BlobContent::Regular { content, .. }) if content == b"a1"
        ));
        assert!(map.get(&("missing".to_string(), c[0])).unwrap().is_none());
    }

    /// Duplicate pairs must collapse to one fetch.
    #[tokio::test]
    async fn test_dedups_pairs() {
        let c = ids(1);
        let source = MockSource::new(&[("a.txt", c[0], b"a")]);
        let pairs = vec![
            ("a.txt".to_string(), c[0]),
            ("a.txt".to_string(), c[0]),
            ("a.txt".to_string(), c[0]),
        ];
        fetch_set(&source, pairs, FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }

    /// The global bound caps concurrent fetches even with many paths.
    #[tokio::test]
    async fn test_respects_in_flight_bound() {
        let c = ids(1);
        let entries: Vec<(String, CommitId, Vec<u8>)> = (0..40)
            .map(|i| (format!("f{i}"), c[0], vec![b'x']))
            .collect();
        let borrowed: Vec<(&str, CommitId, &[u8])> = entries
            .iter()
            .map(|(p, c, b)| (p.as_str(), *c, b.as_slice()))
            .collect();
        let source = MockSource::new(&borrowed);
        let pairs: Vec<(String, CommitId)> =
            (0..40).map(|i| (format!("f{i}"), c[0])).collect();
        fetch_set(
            &source,
            pairs,
            FetchOptions {
                max_in_flight: 4,
                allow_partial: false,
            },
        )
        .await
        .unwrap();
        assert!(source.peak.load(Ordering::SeqCst) <= 4);
    }

    /// Commits of one path are fetched in order by a single worker.
    #[tokio::test]
    async fn test_same_path_is_sequential() {
        let c = ids(3);
        let source = MockSource::new(&[
            ("a.txt", c[0], b"0"),
            ("a.txt", c[1], b"1"),
            ("a.txt", c[2], b"2"),
        ]);
        let pairs: Vec<(String, CommitId)> =
            c.iter().map(|id| ("a.txt".to_string(), *id)).collect();
        fetch_set(&source, pairs, FetchOptions::default())
            .await
            .unwrap();
        let calls = source.calls.lock().unwrap();
        let order: Vec<CommitId> = calls.iter().map(|(_, id)| *id).collect();
        assert_eq!(order, c);
    }

    #[tokio::test]
    async fn test_first_error_wins_without_partial() {
        let c = ids(1);
        let mut source = MockSource::new(&[("ok.txt", c[0], b"x")]);
        source.fail_on = Some("bad.txt".to_string());
        let pairs = vec![
            ("ok.txt".to_string(), c[0]),
            ("bad.txt".to_string(), c[0]),
        ];
        let err = fetch_set(&source, pairs, FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PgitError::Storage(_)));
    }

    #[tokio::test]
    async fn test_allow_partial_keeps_successes() {
        let c = ids(1);
        let mut source = MockSource::new(&[("ok.txt", c[0], b"x")]);
        source.fail_on = Some("bad.txt".to_string());
        let pairs = vec![
            ("ok.txt".to_string(), c[0]),
            ("bad.txt".to_string(), c[0]),
        ];
        let map = fetch_set(
            &source,
            pairs,
            FetchOptions {
                allow_partial: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(map.contains_key(&("ok.txt".to_string(), c[0])));
        assert!(!map.contains_key(&("bad.txt".to_string(), c[0])));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let err = with_deadline(0, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PgitError::Timeout(0)));
    }
}
