//! The repository handle.
//!
//! Finds the `.pgit` metadata directory, loads configuration, connects the
//! database and hands out paths for the local state files. Every handle
//! owns its own state; a process may open several repositories at once.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{CONFIG_FILE, Config};
use crate::errors::PgitError;
use crate::id::CommitId;
use crate::internal::db::storage::Storage;
use crate::internal::graph;
use crate::internal::index::{IndexLock, StagingIndex};
use crate::internal::object::normalize_path;

/// Metadata directory name, kept alongside the working tree.
pub const META_DIR: &str = ".pgit";
/// Ignore-list file name, one glob per line, git-style syntax.
pub const IGNORE_FILE: &str = ".pgitignore";

const INDEX_FILE: &str = "index";
const HEAD_MIRROR_FILE: &str = "HEAD";
const DEFAULT_DB_FILE: &str = "pgit.db";

/// An opened repository.
#[derive(Debug, Clone)]
pub struct Repo {
    pub workdir: PathBuf,
    pub meta_dir: PathBuf,
    pub config: Config,
    pub storage: Storage,
}

impl Repo {
    /// Create a fresh repository in `dir`.
    pub async fn init(dir: &Path, database: Option<String>) -> Result<Repo, PgitError> {
        let workdir = dir.canonicalize()?;
        let meta_dir = workdir.join(META_DIR);
        fs::create_dir_all(&meta_dir)?;

        let mut config = Config::load(&meta_dir.join(CONFIG_FILE))?;
        if config.core.database.is_none() {
            config.core.database = Some(database.unwrap_or_else(|| DEFAULT_DB_FILE.to_string()));
        }
        config.save(&meta_dir.join(CONFIG_FILE))?;

        let url = database_url(&meta_dir, &config);
        let storage = Storage::open_or_init(&url).await?;
        debug!(workdir = %workdir.display(), url, "initialized repository");
        Ok(Repo {
            workdir,
            meta_dir,
            config,
            storage,
        })
    }

    /// Discover the repository containing `start` by walking upward.
    pub async fn discover(start: &Path) -> Result<Repo, PgitError> {
        let start = start.canonicalize()?;
        let mut cursor: Option<&Path> = Some(&start);
        while let Some(dir) = cursor {
            let meta_dir = dir.join(META_DIR);
            if meta_dir.is_dir() {
                let config = Config::load(&meta_dir.join(CONFIG_FILE))?;
                let url = database_url(&meta_dir, &config);
                let storage = Storage::open(&url).await?;
                return Ok(Repo {
                    workdir: dir.to_path_buf(),
                    meta_dir,
                    config,
                    storage,
                });
            }
            cursor = dir.parent();
        }
        Err(PgitError::RepoNotFound)
    }

    /// Open the repository containing the current directory.
    pub async fn open() -> Result<Repo, PgitError> {
        Repo::discover(&std::env::current_dir()?).await
    }

    pub fn index_file(&self) -> PathBuf {
        self.meta_dir.join(INDEX_FILE)
    }

    pub fn load_index(&self) -> Result<StagingIndex, PgitError> {
        StagingIndex::load(&self.index_file())
    }

    pub fn save_index(&self, index: &StagingIndex) -> Result<(), PgitError> {
        index.save(&self.index_file())
    }

    /// Take the advisory lock guarding staging-index mutation.
    pub fn lock_index(&self) -> Result<IndexLock, PgitError> {
        IndexLock::acquire(&self.meta_dir)
    }

    pub async fn head(&self) -> Result<Option<CommitId>, PgitError> {
        self.storage.head().await
    }

    /// Move HEAD and refresh the local mirror file. The database row is
    /// authoritative; the mirror is best-effort convenience.
    pub async fn set_head(&self, target: Option<CommitId>) -> Result<(), PgitError> {
        graph::set_head(self.storage.conn(), target).await?;
        self.write_head_mirror(target);
        Ok(())
    }

    pub fn write_head_mirror(&self, target: Option<CommitId>) {
        let text = match target {
            Some(id) => format!("{id}\n"),
            None => String::new(),
        };
        if let Err(err) = fs::write(self.meta_dir.join(HEAD_MIRROR_FILE), text) {
            tracing::warn!(error = %err, "failed to write HEAD mirror");
        }
    }

    pub fn save_config(&self) -> Result<(), PgitError> {
        self.config.save(&self.meta_dir.join(CONFIG_FILE))
    }

    /// URL of a configured remote.
    pub fn remote_url(&self, name: &str) -> Result<String, PgitError> {
        self.config
            .remote
            .get(name)
            .map(|r| r.url.clone())
            .ok_or_else(|| PgitError::RemoteNotFound(name.to_string()))
    }

    /// Convert a user-supplied path (relative to the current directory) to
    /// a normalized repository-relative path.
    pub fn rel_path(&self, user_path: &Path) -> Result<String, PgitError> {
        let absolute = if user_path.is_absolute() {
            user_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(user_path)
        };
        // The file may not exist yet (deletions), so normalize lexically.
        let cleaned = lexical_clean(&absolute);
        let rel = cleaned
            .strip_prefix(&self.workdir)
            .map_err(|_| PgitError::InvalidPath(user_path.display().to_string()))?;
        normalize_path(&rel.to_string_lossy().replace('\\', "/"))
    }

    /// Absolute working-tree location of a repository path.
    pub fn abs_path(&self, repo_path: &str) -> PathBuf {
        self.workdir.join(repo_path)
    }
}

/// Resolve the configured database identifier to a connection URL.
pub fn database_url(meta_dir: &Path, config: &Config) -> String {
    let identifier = config
        .core
        .database
        .clone()
        .unwrap_or_else(|| DEFAULT_DB_FILE.to_string());
    if identifier.contains("://") {
        identifier
    } else {
        format!(
            "sqlite://{}?mode=rwc",
            meta_dir.join(identifier).to_string_lossy()
        )
    }
}

/// Remove `.` and `..` segments without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo::init(dir.path(), None).await.unwrap();
        assert!(repo.meta_dir.is_dir());
        assert!(repo.meta_dir.join(CONFIG_FILE).is_file());
        assert_eq!(repo.head().await.unwrap(), None);

        let nested = repo.workdir.join("a/b");
        fs::create_dir_all(&nested).unwrap();
        let found = Repo::discover(&nested).await.unwrap();
        assert_eq!(found.workdir, repo.workdir);
    }

    #[tokio::test]
    async fn test_discover_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Repo::discover(dir.path()).await.unwrap_err();
        assert!(matches!(err, PgitError::RepoNotFound));
    }

    #[tokio::test]
    async fn test_head_mirror_tracks_database() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo::init(dir.path(), None).await.unwrap();
        let id = CommitId::generate();
        // No graph row is needed just to exercise the ref update.
        repo.set_head(Some(id)).await.unwrap();
        assert_eq!(repo.head().await.unwrap(), Some(id));
        let mirror = fs::read_to_string(repo.meta_dir.join(HEAD_MIRROR_FILE)).unwrap();
        assert_eq!(mirror.trim(), id.to_string());
    }

    #[test]
    fn test_database_url_forms() {
        let meta = PathBuf::from("/repo/.pgit");
        let mut config = Config::default();
        assert!(database_url(&meta, &config).starts_with("sqlite:///repo/.pgit/pgit.db"));
        config.core.database = Some("postgres://host/db".into());
        assert_eq!(database_url(&meta, &config), "postgres://host/db");
    }

    #[tokio::test]
    async fn test_rel_path_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo::init(dir.path(), None).await.unwrap();
        let abs = repo.workdir.join("sub/./file.txt");
        assert_eq!(repo.rel_path(&abs).unwrap(), "sub/file.txt");
        let outside = PathBuf::from("/definitely/elsewhere.txt");
        assert!(repo.rel_path(&outside).is_err());
    }
}
