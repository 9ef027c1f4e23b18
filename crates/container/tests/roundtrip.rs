//! Writer output read back through the reader.

use std::fs::File;
use std::io::{BufWriter, Cursor};

use duet_container::{ContainerReader, ContainerWriter};
use duet_media_model::geometry::{displayed_size, AffineTransform, Size};
use duet_media_model::sample::{AudioFormat, TrackKind, VideoFormat};

const FRAME_NS: u64 = 33_333_333;

fn portrait_format() -> VideoFormat {
    VideoFormat {
        width: 8,
        height: 4,
        fps: 30,
        transform: AffineTransform::rotation(90.0).concat(&AffineTransform::translation(4.0, 0.0)),
    }
}

fn mono(rate: u32) -> AudioFormat {
    AudioFormat {
        sample_rate: rate,
        channels: 1,
    }
}

fn frame_bytes(value: u8) -> Vec<u8> {
    vec![value; 8 * 4 * 3]
}

#[test]
fn video_and_audio_tracks_survive_roundtrip() {
    let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_video_track(1, &portrait_format()).unwrap();
    writer.add_audio_track(2, &mono(8_000)).unwrap();

    for i in 0..10u64 {
        writer.write_sample(1, i * FRAME_NS, &frame_bytes(i as u8)).unwrap();
        // 1/30 s of audio = 266 frames at 8 kHz, rounded down
        let pcm: Vec<u8> = (0..266i16).flat_map(|s| s.to_le_bytes()).collect();
        writer.write_sample(2, i * FRAME_NS, &pcm).unwrap();
    }
    let (cursor, summary) = writer.finish().unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].sample_count, 10);

    let mut reader = ContainerReader::from_reader(Cursor::new(cursor.into_inner())).unwrap();
    assert_eq!(reader.tracks().len(), 2);

    let video = reader.first_track(TrackKind::Video).unwrap().clone();
    assert_eq!(video.track_id, 1);
    assert!(video.is_raw_video());
    assert_eq!((video.coded_width, video.coded_height), (8, 4));
    assert_eq!(video.natural_size, Size::new(8.0, 4.0));
    assert_eq!(video.samples.len(), 10);
    assert!((video.nominal_fps() - 30.0).abs() < 0.01);
    let shown = displayed_size(video.natural_size, &video.transform);
    assert_eq!(shown, Size::new(4.0, 8.0));

    let audio = reader.first_track(TrackKind::Audio).unwrap().clone();
    assert!(audio.is_pcm_audio());
    assert_eq!(audio.audio, Some(mono(8_000)));
    assert_eq!(audio.samples.len(), 10);

    assert_eq!(reader.read_sample(1, 3).unwrap(), frame_bytes(3));
    let pcm = reader.read_sample(2, 0).unwrap();
    assert_eq!(pcm.len(), 532);
    assert_eq!(&pcm[2..4], &1i16.to_le_bytes());

    assert!((reader.duration_secs() - 0.333).abs() < 0.01);
}

#[test]
fn late_first_sample_becomes_empty_edit() {
    let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_video_track(1, &portrait_format()).unwrap();
    writer.add_audio_track(2, &mono(8_000)).unwrap();

    writer.write_sample(1, 0, &frame_bytes(0)).unwrap();
    writer.write_sample(1, FRAME_NS, &frame_bytes(1)).unwrap();
    // Audio starts half a second late.
    writer.write_sample(2, 500_000_000, &[0u8; 800]).unwrap();
    let (cursor, _) = writer.finish().unwrap();

    let reader = ContainerReader::from_reader(Cursor::new(cursor.into_inner())).unwrap();
    let audio = reader.track(2).unwrap();
    assert_eq!(audio.start_ns, 500_000_000);
    assert_eq!(audio.sample_time_ns(0), Some(500_000_000));
    let video = reader.track(1).unwrap();
    assert_eq!(video.start_ns, 0);
    assert_eq!(video.sample_time_ns(1), Some(33_333_333));
}

#[test]
fn sample_lookup_by_time() {
    let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_video_track(1, &portrait_format()).unwrap();
    for i in 0..5u64 {
        writer.write_sample(1, i * 100_000_000, &frame_bytes(0)).unwrap();
    }
    let (cursor, _) = writer.finish().unwrap();
    let reader = ContainerReader::from_reader(Cursor::new(cursor.into_inner())).unwrap();
    let video = reader.track(1).unwrap();
    assert_eq!(video.sample_index_at(0), Some(0));
    assert_eq!(video.sample_index_at(150_000_000), Some(1));
    assert_eq!(video.sample_index_at(400_000_000), Some(4));
    assert_eq!(video.sample_index_at(9_000_000_000), Some(4));
}

#[test]
fn file_on_disk_roundtrip() {
    let dir = std::env::temp_dir().join(format!("duet_container_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("roundtrip.mov");

    let file = BufWriter::new(File::create(&path).unwrap());
    let mut writer = ContainerWriter::new(file).unwrap();
    writer.add_audio_track(2, &mono(12_000)).unwrap();
    writer.write_sample(2, 0, &[1u8; 2400]).unwrap();
    writer.write_sample(2, 100_000_000, &[2u8; 2400]).unwrap();
    writer.finish().unwrap();

    let mut reader = ContainerReader::open(&path).unwrap();
    assert!(reader.first_track(TrackKind::Video).is_none());
    assert_eq!(reader.read_sample(2, 1).unwrap(), vec![2u8; 2400]);
    assert!((reader.duration_secs() - 0.2).abs() < 0.002);

    let _ = std::fs::remove_dir_all(&dir);
}
