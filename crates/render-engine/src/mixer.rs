//! Output audio: combines the two inputs' mono timelines into one track.

use duet_common::config::AudioMixPolicy;
use duet_media_model::pcm::to_i16;

/// Combine two mono timelines (same rate, both starting at t=0) into
/// exactly `total_frames` samples.
///
/// `Mix` averages where both inputs have audio and passes a single input
/// through where only one does. Gaps are silence. Returns `None` when the
/// policy selects no input or the selected inputs have no audio.
pub fn mix_tracks(
    first: Option<&[f32]>,
    second: Option<&[f32]>,
    policy: AudioMixPolicy,
    total_frames: usize,
) -> Option<Vec<f32>> {
    let (first, second) = match policy {
        AudioMixPolicy::Mix => (first, second),
        AudioMixPolicy::First => (first, None),
        AudioMixPolicy::Second => (None, second),
        AudioMixPolicy::None => (None, None),
    };
    if first.is_none() && second.is_none() {
        return None;
    }

    let at = |track: Option<&[f32]>, i: usize| track.and_then(|t| t.get(i).copied());
    let mixed = (0..total_frames)
        .map(|i| match (at(first, i), at(second, i)) {
            (Some(a), Some(b)) => (a + b) / 2.0,
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => 0.0,
        })
        .collect();
    Some(mixed)
}

/// Split a mono timeline into 16-bit PCM chunks of `chunk_frames`, each
/// paired with its start frame. The last chunk may be shorter.
pub fn pcm_chunks(samples: &[f32], chunk_frames: usize) -> impl Iterator<Item = (usize, Vec<i16>)> + '_ {
    samples
        .chunks(chunk_frames.max(1))
        .enumerate()
        .map(move |(i, chunk)| (i * chunk_frames.max(1), chunk.iter().copied().map(to_i16).collect()))
}

/// Number of output frames covering `duration_ns` at `rate`.
pub fn audio_frame_count(duration_ns: u64, rate: u32) -> usize {
    (duration_ns as u128 * rate as u128 / 1_000_000_000) as usize
}
