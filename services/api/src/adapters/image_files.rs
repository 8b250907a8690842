//! services/api/src/adapters/image_files.rs
//!
//! Writes generated images into a local directory that the web layer serves
//! under `/images`.

use async_trait::async_trait;
use chat_core::ports::{ImageStorage, PortError, PortResult};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalImageStorage {
    dir: PathBuf,
}

impl LocalImageStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory at startup.
    pub async fn ensure_dir(&self) -> PortResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PortError::Unexpected(format!("create {}: {}", self.dir.display(), e)))
    }
}

#[async_trait]
impl ImageStorage for LocalImageStorage {
    async fn store_image(&self, filename: &str, bytes: &[u8]) -> PortResult<()> {
        // Plain file names only.
        let mut components = Path::new(filename).components();
        if !matches!((components.next(), components.next()), (Some(Component::Normal(_)), None)) {
            return Err(PortError::Unexpected(format!("invalid image file name '{}'", filename)));
        }
        self.ensure_dir().await?;
        let path = self.dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PortError::Unexpected(format!("write {}: {}", path.display(), e)))
    }
}
