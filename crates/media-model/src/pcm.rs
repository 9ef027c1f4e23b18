//! PCM helpers: downmixing and streaming linear resampling.

/// Average interleaved channels into one mono channel (normalised to ±1.0).
pub fn downmix_to_mono(interleaved: &[i16], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| s as f32).sum();
            sum / channels as f32 / 32_768.0
        })
        .collect()
}

/// Convert a normalised sample back to 16-bit PCM, clipping.
pub fn to_i16(sample: f32) -> i16 {
    (sample * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Streaming linear-interpolation resampler for one mono channel.
///
/// Output frame `k` sits at input position `k * in_rate / out_rate`. Input
/// may arrive in buffers of any length; the last input frame of each buffer
/// is kept so interpolation continues across buffer boundaries.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    in_rate: u32,
    out_rate: u32,
    /// Input frames consumed before the current buffer.
    consumed: u64,
    /// Output frames emitted so far.
    emitted: u64,
    previous: Option<f32>,
}

impl LinearResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        Self {
            in_rate: in_rate.max(1),
            out_rate: out_rate.max(1),
            consumed: 0,
            emitted: 0,
            previous: None,
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.out_rate
    }

    /// Output frames produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn position(&self, k: u64) -> f64 {
        k as f64 * self.in_rate as f64 / self.out_rate as f64
    }

    /// Feed one buffer, returning the output frames it completes.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }
        let start = self.consumed;
        let end = start + input.len() as u64;
        let sample_at = |index: u64, previous: Option<f32>| -> f32 {
            if index < start {
                previous.unwrap_or(input[0])
            } else {
                input[(index - start) as usize]
            }
        };

        let mut out = Vec::new();
        loop {
            let pos = self.position(self.emitted);
            let base = pos.floor() as u64;
            // Need the frame after `base` unless we land exactly on a frame.
            let frac = pos - base as f64;
            let needed = if frac > 0.0 { base + 1 } else { base };
            if needed >= end {
                break;
            }
            let a = sample_at(base, self.previous);
            let value = if frac > 0.0 {
                let b = sample_at(base + 1, self.previous);
                a + (b - a) * frac as f32
            } else {
                a
            };
            out.push(value);
            self.emitted += 1;
        }

        self.previous = input.last().copied();
        self.consumed = end;
        out
    }

    /// Resample a complete signal in one call.
    pub fn resample_all(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
        if in_rate == out_rate {
            return input.to_vec();
        }
        let mut resampler = Self::new(in_rate, out_rate);
        resampler.process(input)
    }
}
