//! A single scoped temporary directory for one archival block, replacing the distilled
//! source's two independent `mkdtemp()` calls (REDESIGN FLAGS §10): one `tempfile::TempDir`
//! is created per block and is released on every exit path via `Drop`.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

pub struct ArchiveTempDir {
    dir: TempDir,
}

impl ArchiveTempDir {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new().context("creating archival scratch directory")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        let mut file = std::fs::File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        file.write_all(contents)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_is_removed_once_dropped() {
        let path;
        {
            let scratch = ArchiveTempDir::new().unwrap();
            path = scratch.path().to_path_buf();
            scratch.write_file("alembic_revision.txt", b"0001_init").unwrap();
            assert!(path.join("alembic_revision.txt").exists());
        }
        assert!(!path.exists());
    }
}
