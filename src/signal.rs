//! DSP utilities: filters, peak detection, temporal and spectral features.
//!
//! Coefficients are derived directly from the standard bilinear-transform
//! design equations; no third-party filter-design crate is pulled in for
//! this since none of the pack carries one. Spectral work goes through
//! `rustfft`.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;

const EPS: f32 = 1e-10;

/// Second-order IIR section in transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Biquad {
    fn low_pass(sample_rate: f32, cutoff: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let b0 = (1.0 - cos_w0) / 2.0;
        let b1 = 1.0 - cos_w0;
        let b2 = (1.0 - cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;
        Self::normalize(b0, b1, b2, a0, a1, a2)
    }

    fn high_pass(sample_rate: f32, cutoff: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let b0 = (1.0 + cos_w0) / 2.0;
        let b1 = -(1.0 + cos_w0);
        let b2 = (1.0 + cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;
        Self::normalize(b0, b1, b2, a0, a1, a2)
    }

    fn band_pass(sample_rate: f32, center: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * center / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let b0 = alpha;
        let b1 = 0.0;
        let b2 = -alpha;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;
        Self::normalize(b0, b1, b2, a0, a1, a2)
    }

    fn notch(sample_rate: f32, center: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * center / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let b0 = 1.0;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;
        Self::normalize(b0, b1, b2, a0, a1, a2)
    }

    fn normalize(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Single-pass filtering, direct form II transposed.
    fn apply(&self, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; input.len()];
        let (mut z1, mut z2) = (0.0f32, 0.0f32);
        for (i, &x) in input.iter().enumerate() {
            let y = self.b0 * x + z1;
            z1 = self.b1 * x - self.a1 * y + z2;
            z2 = self.b2 * x - self.a2 * y;
            out[i] = y;
        }
        out
    }
}

/// A cascade of `order / 2` biquad sections approximating a Butterworth
/// response, applied forward then backward for zero phase distortion.
pub struct ButterworthFilter {
    sections: Vec<Biquad>,
}

impl ButterworthFilter {
    /// `order` must be even; each pair of poles becomes one biquad section
    /// at the same corner frequency (an approximation good enough for the
    /// coarse pre-filtering this detector needs, not a maximally-flat design).
    pub fn low_pass(sample_rate: f32, cutoff: f32, order: usize) -> Self {
        Self::cascade(order, |q| Biquad::low_pass(sample_rate, cutoff, q))
    }

    pub fn high_pass(sample_rate: f32, cutoff: f32, order: usize) -> Self {
        Self::cascade(order, |q| Biquad::high_pass(sample_rate, cutoff, q))
    }

    pub fn band_pass(sample_rate: f32, center: f32, order: usize) -> Self {
        Self::cascade(order, |q| Biquad::band_pass(sample_rate, center, q))
    }

    fn cascade(order: usize, make: impl Fn(f32) -> Biquad) -> Self {
        let sections_n = (order / 2).max(1);
        // Standard Butterworth per-section Q values for a cascade of
        // second-order sections (pole pairs at angles spread over the
        // left half-plane).
        let sections = (0..sections_n)
            .map(|i| {
                let angle = PI * (2.0 * i as f32 + 1.0) / (2.0 * sections_n as f32);
                let q = 1.0 / (2.0 * angle.cos()).abs().max(0.5);
                make(q)
            })
            .collect();
        Self { sections }
    }

    /// Zero-phase filtering: forward pass then reverse pass, matching the
    /// behavior of a `filtfilt`-style call.
    pub fn filtfilt(&self, signal: &[f32]) -> Vec<f32> {
        let mut data = signal.to_vec();
        for section in &self.sections {
            data = section.apply(&data);
        }
        data.reverse();
        for section in &self.sections {
            data = section.apply(&data);
        }
        data.reverse();
        data
    }
}

/// A single notch filter tuned to reject a narrow band around `center`.
pub struct NotchFilter {
    section: Biquad,
}

impl NotchFilter {
    pub fn new(sample_rate: f32, center: f32, q: f32) -> Self {
        Self {
            section: Biquad::notch(sample_rate, center, q),
        }
    }

    pub fn filtfilt(&self, signal: &[f32]) -> Vec<f32> {
        let mut data = self.section.apply(signal);
        data.reverse();
        data = self.section.apply(&data);
        data.reverse();
        data
    }
}

/// A single detected peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub height: f32,
    pub prominence: f32,
}

/// Parameters for [`find_peaks`].
#[derive(Debug, Clone, Copy)]
pub struct PeakParams {
    pub min_height: f32,
    pub min_distance: usize,
    pub min_prominence: f32,
}

impl Default for PeakParams {
    fn default() -> Self {
        Self {
            min_height: 0.5,
            min_distance: 100,
            min_prominence: 0.3,
        }
    }
}

/// Finds local maxima in the absolute, peak-normalized signal subject to
/// minimum height, minimum inter-peak distance, and minimum prominence.
pub fn find_peaks(signal: &[f32], params: &PeakParams) -> Vec<Peak> {
    if signal.is_empty() {
        return Vec::new();
    }
    let peak_abs = signal.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    if peak_abs < EPS {
        return Vec::new();
    }
    let normalized: Vec<f32> = signal.iter().map(|&s| s.abs() / peak_abs).collect();

    let mut candidates = Vec::new();
    for i in 1..normalized.len().saturating_sub(1) {
        let (prev, cur, next) = (normalized[i - 1], normalized[i], normalized[i + 1]);
        if cur >= prev && cur >= next && cur >= params.min_height {
            let prominence = local_prominence(&normalized, i);
            if prominence >= params.min_prominence {
                candidates.push(Peak {
                    index: i,
                    height: cur,
                    prominence,
                });
            }
        }
    }

    // Enforce minimum distance: greedily keep the tallest peak within each
    // cluster, scanning by descending height.
    candidates.sort_by(|a, b| b.height.partial_cmp(&a.height).unwrap());
    let mut kept: Vec<Peak> = Vec::new();
    for cand in candidates {
        if kept
            .iter()
            .all(|k| cand.index.abs_diff(k.index) >= params.min_distance)
        {
            kept.push(cand);
        }
    }
    kept.sort_by_key(|p| p.index);
    kept
}

fn local_prominence(signal: &[f32], idx: usize) -> f32 {
    let height = signal[idx];
    let left_min = signal[..=idx]
        .iter()
        .rev()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    let right_min = signal[idx..]
        .iter()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    height - left_min.max(right_min)
}

/// Per-frame temporal-domain features.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalFeatures {
    pub rms: f32,
    pub zcr: f32,
    pub skewness: f32,
    pub kurtosis: f32,
    pub crest_factor: f32,
}

/// Per-frame spectral-domain features.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpectralFeatures {
    pub centroid: f32,
    pub bandwidth: f32,
    pub rolloff: f32,
    pub flatness: f32,
    pub contrast: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FrameAnalysis {
    pub temporal: Vec<TemporalFeatures>,
    pub spectral: Vec<SpectralFeatures>,
    pub peaks: Vec<Peak>,
}

/// Splits `signal` into non-overlapping frames of `frame_len` and computes
/// temporal + spectral features for each, plus peaks over the whole signal.
pub fn analyze(signal: &[f32], sample_rate: f32, frame_len: usize) -> FrameAnalysis {
    let peaks = find_peaks(signal, &PeakParams::default());
    let mut temporal = Vec::new();
    let mut spectral = Vec::new();
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(frame_len);

    for frame in signal.chunks(frame_len) {
        if frame.len() < frame_len {
            break;
        }
        temporal.push(temporal_features(frame));
        spectral.push(spectral_features(frame, sample_rate, fft.as_ref()));
    }

    FrameAnalysis {
        temporal,
        spectral,
        peaks,
    }
}

pub fn temporal_features(frame: &[f32]) -> TemporalFeatures {
    let n = frame.len() as f32;
    if n == 0.0 {
        return TemporalFeatures::default();
    }
    let mean = frame.iter().sum::<f32>() / n;
    let variance = frame.iter().map(|&s| (s - mean).powi(2)).sum::<f32>() / n;
    let std_dev = variance.sqrt();
    let rms = (frame.iter().map(|&s| s * s).sum::<f32>() / n).sqrt();

    let zcr = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count() as f32
        / n;

    let (skewness, kurtosis) = if std_dev > EPS {
        let m3 = frame.iter().map(|&s| (s - mean).powi(3)).sum::<f32>() / n;
        let m4 = frame.iter().map(|&s| (s - mean).powi(4)).sum::<f32>() / n;
        (m3 / std_dev.powi(3), m4 / std_dev.powi(4) - 3.0)
    } else {
        (0.0, 0.0)
    };

    let peak = frame.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    let crest_factor = if rms > EPS { peak / rms } else { 0.0 };

    TemporalFeatures {
        rms,
        zcr,
        skewness,
        kurtosis,
        crest_factor,
    }
}

pub fn spectral_features(
    frame: &[f32],
    sample_rate: f32,
    fft: &dyn rustfft::Fft<f32>,
) -> SpectralFeatures {
    let n = frame.len();
    let mut buf: Vec<Complex<f32>> = frame
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let w = 0.5 - 0.5 * (2.0 * PI * i as f32 / (n as f32 - 1.0)).cos();
            Complex::new(s * w, 0.0)
        })
        .collect();
    fft.process(&mut buf);

    let half = n / 2;
    let mags: Vec<f32> = buf[..half].iter().map(|c| c.norm()).collect();
    let freqs: Vec<f32> = (0..half)
        .map(|k| k as f32 * sample_rate / n as f32)
        .collect();

    let total_mag: f32 = mags.iter().sum();
    let centroid = if total_mag > EPS {
        freqs.iter().zip(&mags).map(|(f, m)| f * m).sum::<f32>() / total_mag
    } else {
        0.0
    };

    let bandwidth = if total_mag > EPS {
        (freqs
            .iter()
            .zip(&mags)
            .map(|(f, m)| (f - centroid).powi(2) * m)
            .sum::<f32>()
            / total_mag)
            .sqrt()
    } else {
        0.0
    };

    let rolloff = {
        let threshold = 0.85 * total_mag;
        let mut acc = 0.0;
        let mut result = freqs.last().copied().unwrap_or(0.0);
        for (f, m) in freqs.iter().zip(&mags) {
            acc += m;
            if acc >= threshold {
                result = *f;
                break;
            }
        }
        result
    };

    let flatness = {
        let n_bins = mags.len().max(1) as f32;
        let geo_mean = if mags.iter().all(|&m| m > EPS) {
            (mags.iter().map(|&m| m.ln()).sum::<f32>() / n_bins).exp()
        } else {
            0.0
        };
        let arith_mean = total_mag / n_bins;
        if arith_mean > EPS {
            geo_mean / arith_mean
        } else {
            0.0
        }
    };

    let max_mag = mags.iter().cloned().fold(f32::MIN, f32::max);
    let min_mag = mags.iter().cloned().fold(f32::MAX, f32::min);
    let contrast = if mags.is_empty() { 0.0 } else { max_mag - min_mag };

    SpectralFeatures {
        centroid,
        bandwidth,
        rolloff,
        flatness,
        contrast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_pass_attenuates_high_frequency_tone() {
        let sr = 16000.0;
        let n = 1024;
        let high_freq: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * 6000.0 * i as f32 / sr).sin())
            .collect();
        let filter = ButterworthFilter::low_pass(sr, 500.0, 4);
        let out = filter.filtfilt(&high_freq);
        let in_rms = (high_freq.iter().map(|s| s * s).sum::<f32>() / n as f32).sqrt();
        let out_rms = (out.iter().map(|s| s * s).sum::<f32>() / n as f32).sqrt();
        assert!(out_rms < in_rms * 0.5);
    }

    #[test]
    fn notch_attenuates_target_frequency() {
        let sr = 16000.0;
        let n = 2048;
        let tone: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / sr).sin())
            .collect();
        let notch = NotchFilter::new(sr, 1000.0, 30.0);
        let out = notch.filtfilt(&tone);
        let in_rms = (tone.iter().map(|s| s * s).sum::<f32>() / n as f32).sqrt();
        let out_rms = (out.iter().map(|s| s * s).sum::<f32>() / n as f32).sqrt();
        assert!(out_rms < in_rms * 0.3);
    }

    #[test]
    fn find_peaks_detects_isolated_spike() {
        let mut signal = vec![0.0f32; 1000];
        signal[500] = 1.0;
        let peaks = find_peaks(&signal, &PeakParams::default());
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 500);
    }

    #[test]
    fn find_peaks_silent_signal_has_none() {
        let signal = vec![0.0f32; 500];
        assert!(find_peaks(&signal, &PeakParams::default()).is_empty());
    }

    #[test]
    fn find_peaks_respects_min_distance() {
        let mut signal = vec![0.0f32; 1000];
        signal[100] = 1.0;
        signal[150] = 0.9;
        let params = PeakParams {
            min_distance: 100,
            ..Default::default()
        };
        let peaks = find_peaks(&signal, &params);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 100);
    }

    #[test]
    fn temporal_features_of_silence_are_zero() {
        let frame = vec![0.0f32; 1024];
        let feats = temporal_features(&frame);
        assert_eq!(feats.rms, 0.0);
        assert_eq!(feats.crest_factor, 0.0);
    }

    #[test]
    fn temporal_features_rms_of_constant_amplitude() {
        let frame = vec![0.5f32; 1024];
        let feats = temporal_features(&frame);
        assert!((feats.rms - 0.5).abs() < 1e-4);
        assert_eq!(feats.zcr, 0.0);
    }

    #[test]
    fn spectral_centroid_of_pure_tone_is_near_tone_frequency() {
        let sr = 16000.0;
        let n = 1024;
        let freq = 2000.0;
        let frame: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sr).sin())
            .collect();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let feats = spectral_features(&frame, sr, fft.as_ref());
        assert!((feats.centroid - freq).abs() < 200.0, "{}", feats.centroid);
    }

    #[test]
    fn analyze_yields_equal_length_temporal_and_spectral_vectors() {
        let signal = vec![0.1f32; 1024 * 3];
        let result = analyze(&signal, 16000.0, 1024);
        assert_eq!(result.temporal.len(), result.spectral.len());
        assert_eq!(result.temporal.len(), 3);
    }
}
