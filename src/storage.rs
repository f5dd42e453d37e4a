//! Object storage for uploaded presentation files.
//!
//! Objects live under a root directory, addressed by slash-separated keys
//! such as `presentations/intro-1717171717171.pptx`.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

#[derive(Clone, Debug)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> io::Result<PathBuf> {
        let rel = Path::new(key);
        let well_formed = !key.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid object key `{key}`"),
            ));
        }
        Ok(self.root.join(rel))
    }

    /// Stores `bytes` under `key`. Fails if the key is already taken.
    #[tracing::instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, bytes).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;

        tracing::debug!("Stored object at {}", path.display());
        Ok(())
    }

    pub async fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        let path = self.path_of(key)?;
        tokio::fs::read(path).await
    }
}
