//! Repository configuration: `.pgit/config.toml`.
//!
//! Three sections: `[user]` identity, `[core]` the local database
//! identifier, and one `[remote.<name>]` table per configured remote.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::PgitError;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Database identifier: either a full connection URL or a file name
    /// relative to the metadata directory.
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub remote: BTreeMap<String, RemoteConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, PgitError> {
        match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| PgitError::Serialization(format!("bad config: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PgitError> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| PgitError::Serialization(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Read a dotted key such as `user.name` or `remote.origin.url`.
    pub fn get(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["user", "name"] => self.user.name.clone(),
            ["user", "email"] => self.user.email.clone(),
            ["core", "database"] => self.core.database.clone(),
            ["remote", name, "url"] => self.remote.get(*name).map(|r| r.url.clone()),
            _ => None,
        }
    }

    /// Write a dotted key. Unknown keys are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), PgitError> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["user", "name"] => self.user.name = Some(value.to_string()),
            ["user", "email"] => self.user.email = Some(value.to_string()),
            ["core", "database"] => self.core.database = Some(value.to_string()),
            ["remote", name, "url"] => {
                self.remote.insert(
                    name.to_string(),
                    RemoteConfig {
                        url: value.to_string(),
                    },
                );
            }
            _ => return Err(PgitError::Usage(format!("unknown config key `{key}`"))),
        }
        Ok(())
    }

    /// All set keys in a stable order.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(name) = &self.user.name {
            out.push(("user.name".to_string(), name.clone()));
        }
        if let Some(email) = &self.user.email {
            out.push(("user.email".to_string(), email.clone()));
        }
        if let Some(db) = &self.core.database {
            out.push(("core.database".to_string(), db.clone()));
        }
        for (name, remote) in &self.remote {
            out.push((format!("remote.{name}.url"), remote.url.clone()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = Config::default();
        config.set("user.name", "benjamin.747").unwrap();
        config.set("user.email", "benjamin.747@outlook.com").unwrap();
        config.set("core.database", "pgit.db").unwrap();
        config.set("remote.origin.url", "sqlite:///tmp/other.db").unwrap();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.get("user.name").unwrap(), "benjamin.747");
        assert_eq!(
            loaded.get("remote.origin.url").unwrap(),
            "sqlite:///tmp/other.db"
        );
        assert_eq!(loaded.get("remote.missing.url"), None);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_key_is_usage_error() {
        let mut config = Config::default();
        assert!(matches!(
            config.set("color.ui", "always").unwrap_err(),
            PgitError::Usage(_)
        ));
    }

    #[test]
    fn test_list_is_stable() {
        let mut config = Config::default();
        config.set("remote.b.url", "u2").unwrap();
        config.set("remote.a.url", "u1").unwrap();
        config.set("user.name", "n").unwrap();
        let keys: Vec<String> = config.list().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["user.name", "remote.a.url", "remote.b.url"]);
    }
}
