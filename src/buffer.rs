//! Fixed-capacity ring buffer for interleaved PCM samples.
//!
//! One lock guards the whole structure; critical sections are O(write
//! length) and do no I/O, matching the locking discipline the rest of
//! the ingest path uses.

use std::sync::Mutex;

/// Thread-safe circular buffer over `channels`-interleaved `f32` frames.
pub struct CircularAudioBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    channels: usize,
}

struct Inner {
    data: Vec<f32>,
    write_pos: usize,
    filled: usize,
}

impl CircularAudioBuffer {
    /// `capacity` is expressed in frames (samples per channel), not raw floats.
    pub fn new(capacity: usize, channels: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        assert!(channels > 0, "channels must be positive");
        Self {
            inner: Mutex::new(Inner {
                data: vec![0.0; capacity * channels],
                write_pos: 0,
                filled: 0,
            }),
            capacity,
            channels,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `batch` (frames, interleaved by `channels`). If longer than
    /// capacity, only the newest `capacity` frames are kept.
    pub fn write(&self, batch: &[f32]) -> Result<(), &'static str> {
        if batch.len() % self.channels != 0 {
            return Err("batch length is not a multiple of channel count");
        }
        let mut inner = self.inner.lock().unwrap();
        let n_frames = batch.len() / self.channels;

        if n_frames >= self.capacity {
            let tail = &batch[(batch.len() - self.capacity * self.channels)..];
            inner.data.copy_from_slice(tail);
            inner.write_pos = 0;
            inner.filled = self.capacity;
            return Ok(());
        }

        let cap_samples = self.capacity * self.channels;
        let start = inner.write_pos * self.channels;
        let first_len = (cap_samples - start).min(batch.len());
        inner.data[start..start + first_len].copy_from_slice(&batch[..first_len]);
        if first_len < batch.len() {
            let rest = batch.len() - first_len;
            inner.data[..rest].copy_from_slice(&batch[first_len..]);
        }
        inner.write_pos = (inner.write_pos + n_frames) % self.capacity;
        inner.filled = (inner.filled + n_frames).min(self.capacity);
        Ok(())
    }

    /// Returns the `k` most recently written frames, oldest first,
    /// interleaved. Zero-pads at the front if fewer than `k` were written.
    pub fn read_last(&self, k: usize) -> Vec<f32> {
        let inner = self.inner.lock().unwrap();
        let mut out = vec![0.0f32; k * self.channels];
        // At most `capacity` frames physically exist, and at most `filled`
        // of those are real (non-garbage) samples.
        let real_frames = inner.filled.min(k);
        if real_frames == 0 {
            return out;
        }

        let cap_samples = self.capacity * self.channels;
        let end = inner.write_pos * self.channels;
        let start = (end + cap_samples - real_frames * self.channels) % cap_samples;
        let dest_start = (k - real_frames) * self.channels;
        let real_samples = real_frames * self.channels;

        if start + real_samples <= cap_samples {
            out[dest_start..dest_start + real_samples]
                .copy_from_slice(&inner.data[start..start + real_samples]);
        } else {
            let first_len = cap_samples - start;
            out[dest_start..dest_start + first_len].copy_from_slice(&inner.data[start..]);
            out[dest_start + first_len..dest_start + real_samples]
                .copy_from_slice(&inner.data[..real_samples - first_len]);
        }
        out
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.data.iter_mut().for_each(|s| *s = 0.0);
        inner.write_pos = 0;
        inner.filled = 0;
    }

    /// Fraction of capacity currently holding real (non-padded) samples.
    pub fn level(&self) -> f32 {
        let inner = self.inner.lock().unwrap();
        inner.filled as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_buffer_is_empty() {
        let buf = CircularAudioBuffer::new(8, 1);
        assert_eq!(buf.level(), 0.0);
        assert_eq!(buf.read_last(4), vec![0.0; 4]);
    }

    #[test]
    fn write_smaller_than_capacity_is_retained_in_order() {
        let buf = CircularAudioBuffer::new(8, 1);
        buf.write(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(buf.read_last(3), vec![1.0, 2.0, 3.0]);
        assert_eq!(buf.read_last(5), vec![0.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn write_larger_than_capacity_keeps_only_newest() {
        let buf = CircularAudioBuffer::new(4, 1);
        let batch: Vec<f32> = (0..10).map(|i| i as f32).collect();
        buf.write(&batch).unwrap();
        assert_eq!(buf.read_last(4), vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(buf.level(), 1.0);
    }

    #[test]
    fn wraparound_write_preserves_order() {
        let buf = CircularAudioBuffer::new(4, 1);
        buf.write(&[1.0, 2.0, 3.0]).unwrap();
        buf.write(&[4.0, 5.0]).unwrap();
        assert_eq!(buf.read_last(4), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn clear_resets_state() {
        let buf = CircularAudioBuffer::new(4, 1);
        buf.write(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        buf.clear();
        assert_eq!(buf.level(), 0.0);
        assert_eq!(buf.read_last(4), vec![0.0; 4]);
    }

    #[test]
    fn channel_mismatch_is_rejected() {
        let buf = CircularAudioBuffer::new(4, 2);
        assert!(buf.write(&[1.0, 2.0, 3.0]).is_err());
    }

    proptest! {
        #[test]
        fn level_always_in_unit_range(writes in proptest::collection::vec(proptest::collection::vec(-1.0f32..1.0, 0..20), 0..10)) {
            let buf = CircularAudioBuffer::new(16, 1);
            for w in writes {
                let _ = buf.write(&w);
                let level = buf.level();
                prop_assert!((0.0..=1.0).contains(&level));
            }
        }

        #[test]
        fn read_last_matches_tail_of_all_writes(writes in proptest::collection::vec(proptest::collection::vec(-1.0f32..1.0, 1..9), 1..6)) {
            let cap = 16;
            let buf = CircularAudioBuffer::new(cap, 1);
            let mut all = Vec::new();
            for w in &writes {
                buf.write(w).unwrap();
                all.extend_from_slice(w);
            }
            for k in [1usize, cap, 2 * cap] {
                let got = buf.read_last(k);
                let want_real = all.len().min(k).min(cap);
                let expected_tail = &all[all.len() - want_real..];
                let pad = k - want_real;
                prop_assert_eq!(&got[pad..], expected_tail);
                prop_assert!(got[..pad].iter().all(|&s| s == 0.0));
            }
        }
    }
}
