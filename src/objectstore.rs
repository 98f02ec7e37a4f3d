//! Object storage abstraction, standing in for the S3 bucket archived measurement blocks are
//! uploaded to. [`FilesystemObjectStore`] is the dev/test implementation, writing into a
//! directory on disk instead of talking to a real bucket.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::fs;
use tokio::io::AsyncReadExt;

/// A content-addressed write-once blob store keyed by archive path (`s3_key`).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `local_path` under `key`, returning its SHA1 hex digest.
    async fn upload(&self, key: &str, local_path: &Path) -> Result<String>;

    /// Recompute the stored object's SHA1 and compare against `expected_sha`.
    async fn verify_hash(&self, key: &str, expected_sha: &str) -> Result<bool>;
}

/// Stores objects as plain files under a base directory, named after their key with path
/// separators flattened. Suitable for local development and for the archival pipeline's own
/// tests.
pub struct FilesystemObjectStore {
    base_dir: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key.replace('/', "_"))
    }

    async fn sha1_of(path: &Path) -> Result<String> {
        let mut file = fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let mut hasher = Sha1::new();
        let mut buf = [0_u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn upload(&self, key: &str, local_path: &Path) -> Result<String> {
        fs::create_dir_all(&self.base_dir).await?;
        let dest = self.object_path(key);
        fs::copy(local_path, &dest)
            .await
            .with_context(|| format!("copying {} to {}", local_path.display(), dest.display()))?;
        Self::sha1_of(&dest).await
    }

    async fn verify_hash(&self, key: &str, expected_sha: &str) -> Result<bool> {
        let path = self.object_path(key);
        if !path.exists() {
            return Ok(false);
        }
        Ok(Self::sha1_of(&path).await? == expected_sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upload_then_verify_round_trips() {
        let store_dir = tempdir().unwrap();
        let store = FilesystemObjectStore::new(store_dir.path());

        let src_dir = tempdir().unwrap();
        let src_path = src_dir.path().join("block.zip");
        fs::write(&src_path, b"archive contents").await.unwrap();

        let sha = store.upload("CellMeasure/000001.zip", &src_path).await.unwrap();
        assert!(store.verify_hash("CellMeasure/000001.zip", &sha).await.unwrap());
        assert!(!store
            .verify_hash("CellMeasure/000001.zip", "deadbeef")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn verify_hash_is_false_for_missing_object() {
        let store_dir = tempdir().unwrap();
        let store = FilesystemObjectStore::new(store_dir.path());
        assert!(!store.verify_hash("WifiMeasure/1.zip", "deadbeef").await.unwrap());
    }
}
