//! Displayed-size resolution for video files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use duet_common::error::{DuetError, DuetResult};
use duet_media_model::geometry::Size;

use crate::asset::VideoAsset;

/// Identity of a file's contents for caching: a rewritten file gets a new
/// length or modification time and misses the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AssetKey {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
}

impl AssetKey {
    fn for_path(path: &Path) -> DuetResult<Self> {
        let canonical = path
            .canonicalize()
            .map_err(|e| DuetError::source_unreadable(path, e.to_string()))?;
        let meta = std::fs::metadata(&canonical)
            .map_err(|e| DuetError::source_unreadable(path, e.to_string()))?;
        Ok(Self {
            path: canonical,
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Resolves the size a video is displayed at, caching per file.
///
/// The result is the first video track's natural size with its transform
/// applied to the bounding box; a file with no video track resolves to
/// [`Size::ZERO`].
#[derive(Debug, Default)]
pub struct VideoGeometryResolver {
    cache: Mutex<HashMap<AssetKey, Size>>,
}

impl VideoGeometryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Displayed size of the video at `path`.
    pub fn resolve(&self, path: &Path) -> DuetResult<Size> {
        let key = AssetKey::for_path(path)?;
        if let Some(size) = self.lookup(&key) {
            return Ok(size);
        }
        let asset = VideoAsset::open(path)?;
        let size = Self::resolve_asset(&asset);
        tracing::debug!(
            path = %path.display(),
            width = size.width,
            height = size.height,
            "Resolved displayed size"
        );
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, size);
        }
        Ok(size)
    }

    /// Displayed size of an already opened asset.
    pub fn resolve_asset(asset: &VideoAsset) -> Size {
        asset.displayed_size()
    }

    /// Number of cached files.
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn lookup(&self, key: &AssetKey) -> Option<Size> {
        self.cache.lock().ok()?.get(key).copied()
    }
}
