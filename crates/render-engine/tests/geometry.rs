//! Displayed-size resolution against files on disk.

mod common;

use common::{scratch_dir, Clip};
use duet_common::error::DuetError;
use duet_media_model::geometry::{AffineTransform, Size};
use duet_render_engine::{VideoAsset, VideoGeometryResolver};

#[test]
fn rotated_portrait_track_resolves_to_landscape() {
    let dir = scratch_dir("geometry_rotated");
    let path = dir.join("phone.mov");
    Clip::video(1080, 1920, 30, 1)
        .transform(AffineTransform::rotation(90.0).concat(&AffineTransform::translation(1920.0, 0.0)))
        .write(&path);

    let resolver = VideoGeometryResolver::new();
    assert_eq!(resolver.resolve(&path).unwrap(), Size::new(1920.0, 1080.0));

    let asset = VideoAsset::open(&path).unwrap();
    assert_eq!(asset.natural_size(), Size::new(1080.0, 1920.0));
    assert_eq!(VideoGeometryResolver::resolve_asset(&asset), Size::new(1920.0, 1080.0));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn repeated_resolution_is_cached_and_stable() {
    let dir = scratch_dir("geometry_cache");
    let path = dir.join("clip.mov");
    Clip::video(16, 8, 10, 3).write(&path);

    let resolver = VideoGeometryResolver::new();
    let first = resolver.resolve(&path).unwrap();
    let second = resolver.resolve(&path).unwrap();
    assert_eq!(first, Size::new(16.0, 8.0));
    assert_eq!(first, second);
    assert_eq!(resolver.cached(), 1);

    // Same file through a different spelling of the path.
    let dotted = dir.join(".").join("clip.mov");
    assert_eq!(resolver.resolve(&dotted).unwrap(), first);
    assert_eq!(resolver.cached(), 1);

    resolver.clear();
    assert_eq!(resolver.cached(), 0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn rewritten_file_misses_the_cache() {
    let dir = scratch_dir("geometry_rewrite");
    let path = dir.join("clip.mov");
    Clip::video(16, 8, 10, 1).write(&path);

    let resolver = VideoGeometryResolver::new();
    assert_eq!(resolver.resolve(&path).unwrap(), Size::new(16.0, 8.0));

    Clip::video(8, 16, 10, 2).write(&path);
    assert_eq!(resolver.resolve(&path).unwrap(), Size::new(8.0, 16.0));
    assert_eq!(resolver.cached(), 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn audio_only_file_resolves_to_zero() {
    let dir = scratch_dir("geometry_audio");
    let path = dir.join("voice.mov");
    Clip::audio_only(10, 5, 8_000).write(&path);

    let resolver = VideoGeometryResolver::new();
    assert_eq!(resolver.resolve(&path).unwrap(), Size::ZERO);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn unreadable_files_are_reported() {
    let dir = scratch_dir("geometry_unreadable");
    let resolver = VideoGeometryResolver::new();

    let missing = resolver.resolve(&dir.join("missing.mov"));
    assert!(matches!(missing, Err(DuetError::SourceUnreadable { .. })));

    let garbage = dir.join("garbage.mov");
    std::fs::write(&garbage, b"definitely not a movie").unwrap();
    assert!(matches!(
        resolver.resolve(&garbage),
        Err(DuetError::SourceUnreadable { .. })
    ));
    assert_eq!(resolver.cached(), 0);

    // movie box claiming far more bytes than the file holds
    let truncated = dir.join("truncated.mov");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&16u32.to_be_bytes());
    bytes.extend_from_slice(b"ftypqt  \0\0\0\0");
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.extend_from_slice(b"moov");
    bytes.extend_from_slice(&(1u64 << 62).to_be_bytes());
    std::fs::write(&truncated, &bytes).unwrap();
    assert!(matches!(
        resolver.resolve(&truncated),
        Err(DuetError::SourceUnreadable { .. })
    ));
    assert_eq!(resolver.cached(), 0);

    std::fs::remove_dir_all(&dir).ok();
}
