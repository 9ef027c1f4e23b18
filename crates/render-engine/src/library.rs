//! Hand-off of finished files to durable storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use duet_common::error::{DuetError, DuetResult};

/// Destination for merged recordings.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Store a copy of `path`; returns where it now lives. The source file
    /// is left in place for the caller to clean up.
    async fn import(&self, path: &Path) -> DuetResult<PathBuf>;

    /// Library name for logs.
    fn name(&self) -> &str;
}

/// A plain directory acting as the media library.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl MediaLibrary for DirectoryLibrary {
    async fn import(&self, path: &Path) -> DuetResult<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| DuetError::invalid_state(format!("{} has no file name", path.display())))?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DuetError::storage(e.to_string()))?;

        let mut target = self.root.join(name);
        let mut counter = 1u32;
        while tokio::fs::try_exists(&target).await.unwrap_or(false) {
            let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            target = self.root.join(format!("{stem}-{counter}{extension}"));
            counter += 1;
        }

        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| DuetError::storage(format!("cannot copy {}: {e}", path.display())))?;
        tracing::info!(source = %path.display(), target = %target.display(), "Imported into library");
        Ok(target)
    }

    fn name(&self) -> &str {
        "directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn import_copies_without_clobbering() {
        let dir = std::env::temp_dir().join(format!("duet_library_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let source = dir.join("clip.mov");
        std::fs::write(&source, b"data").unwrap();

        let library = DirectoryLibrary::new(dir.join("library"));
        let first = library.import(&source).await.unwrap();
        let second = library.import(&source).await.unwrap();
        assert_eq!(first, dir.join("library").join("clip.mov"));
        assert_eq!(second, dir.join("library").join("clip-1.mov"));
        assert!(source.exists());
        assert_eq!(std::fs::read(&second).unwrap(), b"data");

        std::fs::remove_dir_all(&dir).ok();
    }
}
