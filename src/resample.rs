//! Frame-based resampling to the classifier's fixed target rate.
//!
//! Wraps `rubato`'s `FftFixedIn` the same way other capture pipelines in
//! the example pack do: accumulate input into fixed-size chunks, run the
//! resampler, then re-chunk the output into fixed-size output frames for
//! the caller. When the source rate is an exact multiple of the target
//! rate, plain decimation is used instead of the FFT resampler — cheaper,
//! and accurate enough for that case.

use rubato::{FftFixedIn, Resampler};

const RESAMPLER_CHUNK_IN: usize = 1024;

enum Strategy {
    Passthrough,
    Decimate(usize),
    Fft(FftFixedIn<f32>),
}

/// Resamples a push-style stream of `f32` samples from `source_rate` to
/// `target_rate`, emitting fixed-size frames via a callback.
pub struct FrameResampler {
    strategy: Strategy,
    in_buf: Vec<f32>,
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameResampler {
    /// `frame_len` is the output frame size in samples at `target_rate`.
    pub fn new(source_rate: usize, target_rate: usize, frame_len: usize) -> Self {
        let strategy = if source_rate == target_rate {
            Strategy::Passthrough
        } else if target_rate > 0 && source_rate % target_rate == 0 {
            Strategy::Decimate(source_rate / target_rate)
        } else {
            Strategy::Fft(
                FftFixedIn::<f32>::new(source_rate, target_rate, RESAMPLER_CHUNK_IN, 1, 1)
                    .expect("invalid resampler rate pair"),
            )
        };
        Self {
            strategy,
            in_buf: Vec::with_capacity(RESAMPLER_CHUNK_IN),
            frame_len,
            pending: Vec::with_capacity(frame_len),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.strategy, Strategy::Passthrough)
    }

    /// Pushes `src` samples, invoking `emit` once per completed output frame.
    pub fn push(&mut self, src: &[f32], mut emit: impl FnMut(&[f32])) {
        match &mut self.strategy {
            Strategy::Passthrough => {
                Self::emit_frames(&mut self.pending, self.frame_len, src, &mut emit);
            }
            Strategy::Decimate(factor) => {
                let decimated = decimate(src, *factor);
                Self::emit_frames(&mut self.pending, self.frame_len, &decimated, &mut emit);
            }
            Strategy::Fft(resampler) => {
                let mut remaining = src;
                while !remaining.is_empty() {
                    let space = RESAMPLER_CHUNK_IN - self.in_buf.len();
                    let take = space.min(remaining.len());
                    self.in_buf.extend_from_slice(&remaining[..take]);
                    remaining = &remaining[take..];

                    if self.in_buf.len() == RESAMPLER_CHUNK_IN {
                        if let Ok(out) = resampler.process(&[&self.in_buf[..]], None) {
                            Self::emit_frames(&mut self.pending, self.frame_len, &out[0], &mut emit);
                        }
                        self.in_buf.clear();
                    }
                }
            }
        }
    }

    fn emit_frames(
        pending: &mut Vec<f32>,
        frame_len: usize,
        mut data: &[f32],
        emit: &mut impl FnMut(&[f32]),
    ) {
        while !data.is_empty() {
            let space = frame_len - pending.len();
            let take = space.min(data.len());
            pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if pending.len() == frame_len {
                emit(pending);
                pending.clear();
            }
        }
    }
}

/// Integer decimation fallback for cases where the source rate is an
/// exact multiple of the target rate and lower latency matters more
/// than resampling fidelity.
pub fn decimate(samples: &[f32], factor: usize) -> Vec<f32> {
    if factor <= 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(factor).copied().collect()
}

/// Downmixes interleaved multi-channel samples to mono by averaging.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_rates_match() {
        let mut r = FrameResampler::new(16000, 16000, 4);
        assert!(r.is_passthrough());
        let mut frames = Vec::new();
        r.push(&[1.0, 2.0, 3.0, 4.0, 5.0], |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0]]);
    }

    #[test]
    fn decimate_by_three_keeps_every_third_sample() {
        let samples: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let out = decimate(&samples, 3);
        assert_eq!(out, vec![0.0, 3.0, 6.0]);
    }

    #[test]
    fn decimate_by_one_is_identity() {
        let samples = vec![1.0, 2.0, 3.0];
        assert_eq!(decimate(&samples, 1), samples);
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = vec![1.0, 3.0, 2.0, -2.0];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![2.0, 0.0]);
    }

    #[test]
    fn downmix_mono_is_identity() {
        let mono = vec![1.0, 2.0, 3.0];
        assert_eq!(downmix_to_mono(&mono, 1), mono);
    }

    #[test]
    fn multiple_of_target_rate_uses_decimation_fallback() {
        // 48000 is an exact multiple of 16000, so this should take the
        // cheap decimate-by-3 path rather than the FFT resampler.
        let mut r = FrameResampler::new(48000, 16000, 1600);
        assert!(matches!(r.strategy, Strategy::Decimate(3)));
        let input = vec![0.0f32; 48000];
        let mut frame_count = 0;
        r.push(&input, |f| {
            assert_eq!(f.len(), 1600);
            frame_count += 1;
        });
        assert_eq!(frame_count, 10);
    }

    #[test]
    fn non_multiple_rate_uses_fft_resampler_and_produces_fixed_frames() {
        let mut r = FrameResampler::new(44100, 16000, 1600);
        assert!(matches!(r.strategy, Strategy::Fft(_)));
        let input = vec![0.0f32; 44100];
        let mut frame_count = 0;
        r.push(&input, |f| {
            assert_eq!(f.len(), 1600);
            frame_count += 1;
        });
        assert!(frame_count > 0);
    }
}
