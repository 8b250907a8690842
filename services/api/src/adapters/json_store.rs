//! services/api/src/adapters/json_store.rs
//!
//! A `UserStore` backed by a single JSON file mapping account to record.

use async_trait::async_trait;
use chat_core::ports::{PortError, PortResult, StoredUsers, UserStore};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl UserStore for JsonFileStore {
    async fn load(&self) -> PortResult<StoredUsers> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "User file not found; starting empty.");
                return Ok(StoredUsers::new());
            }
            Err(e) => return Err(PortError::Unexpected(format!("read {}: {}", self.path.display(), e))),
        };
        if raw.trim().is_empty() {
            return Ok(StoredUsers::new());
        }
        // A corrupt file is an error rather than an empty store, so the next
        // save cannot wipe every account.
        serde_json::from_str(&raw)
            .map_err(|e| PortError::Unexpected(format!("parse {}: {}", self.path.display(), e)))
    }

    async fn save(&self, users: &StoredUsers) -> PortResult<()> {
        let body = serde_json::to_vec_pretty(users).map_err(|e| PortError::Unexpected(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, body)
            .await
            .map_err(|e| PortError::Unexpected(format!("write {}: {}", temp.display(), e)))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| PortError::Unexpected(format!("replace {}: {}", self.path.display(), e)))?;
        debug!(accounts = users.len(), "Saved user file.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("users.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_returns_same_mapping() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data").join("users.json"));
        let mut users = StoredUsers::new();
        users.insert("a@example.com".to_string(), json!({"theme": "light"}));
        store.save(&users).await.unwrap();

        assert_eq!(store.load().await.unwrap(), users);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load().await, Err(PortError::Unexpected(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
