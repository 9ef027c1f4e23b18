//! Output path allocation.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::DuetResult;

/// Reserve a time-stamped path inside `dir`.
///
/// Names look like `capture-20261018-142501-123.mov`. When two allocations
/// land in the same millisecond a `-N` counter is appended. The name is
/// claimed by creating an empty file with `create_new`, so concurrent callers
/// never receive the same path; the caller owns that file and either writes
/// over it or removes it. The directory is created if missing.
pub fn timestamped_path(dir: &Path, prefix: &str, extension: &str) -> DuetResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S-%3f");
    let base = format!("{prefix}-{stamp}");

    let mut candidate = dir.join(format!("{base}.{extension}"));
    let mut counter = 1u32;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                candidate = dir.join(format!("{base}-{counter}.{extension}"));
                counter += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Remove a partially written file, ignoring "not found".
pub fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_never_collide() {
        let dir = std::env::temp_dir().join(format!("duet_paths_test_{}", std::process::id()));
        let first = timestamped_path(&dir, "capture", "mov").unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = timestamped_path(&dir, "capture", "mov").unwrap();
        assert_ne!(first, second);
        assert!(second.file_name().unwrap().to_string_lossy().starts_with("capture-"));
        assert_eq!(second.extension().unwrap(), "mov");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        let dir = std::env::temp_dir().join(format!("duet_paths_threads_{}", std::process::id()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.clone();
                std::thread::spawn(move || timestamped_path(&dir, "merged", "mov").unwrap())
            })
            .collect();
        let paths: std::collections::HashSet<PathBuf> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(paths.len(), 8);
        assert!(paths.iter().all(|p| p.exists()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn remove_partial_tolerates_missing_files() {
        remove_partial(Path::new("/nonexistent/duet/partial.mov"));
    }
}
