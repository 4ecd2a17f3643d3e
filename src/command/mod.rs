//! CLI verb implementations.
//!
//! One module per verb; each exposes a clap `Args` struct and an `execute`
//! entry point returning the unified error type. Human-facing rendering
//! lives here, engine semantics live under [`crate::internal`].

pub mod add;
pub mod blame;
pub mod checkout;
pub mod clean;
pub mod clone;
pub mod commit;
pub mod config;
pub mod diff;
pub mod init;
pub mod log;
pub mod mv;
pub mod pull;
pub mod push;
pub mod remote;
pub mod reset;
pub mod resolve;
pub mod rm;
pub mod search;
pub mod show;
pub mod stats;
pub mod status;

use std::collections::BTreeSet;
use std::path::Path;

use crate::errors::PgitError;
use crate::internal::repo::Repo;
use crate::internal::worktree;

/// Expand user-supplied pathspecs to repository-relative paths.
///
/// A pathspec naming a directory expands to every working-tree file under
/// it plus every tracked path under it, so deletions inside the directory
/// are picked up too.
pub(crate) async fn expand_pathspecs(
    repo: &Repo,
    pathspecs: &[std::path::PathBuf],
    tracked: &BTreeSet<String>,
) -> Result<Vec<String>, PgitError> {
    let mut out: BTreeSet<String> = BTreeSet::new();
    for spec in pathspecs {
        let abs = if spec.is_absolute() {
            spec.clone()
        } else {
            std::env::current_dir()?.join(spec)
        };
        if abs.is_dir() {
            let prefix = if abs.canonicalize()? == repo.workdir {
                String::new()
            } else {
                format!("{}/", repo.rel_path(&abs)?)
            };
            for file in worktree::walk_files(repo)? {
                if file.starts_with(&prefix) {
                    out.insert(file);
                }
            }
            for path in tracked {
                if path.starts_with(&prefix) {
                    out.insert(path.clone());
                }
            }
        } else {
            out.insert(repo.rel_path(Path::new(spec))?);
        }
    }
    Ok(out.into_iter().collect())
}
