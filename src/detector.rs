//! The audio detector core: per-source buffering and resampling, a
//! shared classifier session, score fusion, and debounced emission.
//!
//! The classifier session is shared across sources and called
//! synchronously: `submit` and `poll_results` run back to back under
//! the same lock in `handle_block`, so results are attributed to the
//! source that just submitted without needing any separate routing
//! state.

use crate::buffer::CircularAudioBuffer;
use crate::classifier::{yamnet_score, ClassScore, StreamingClassifier};
use crate::error::DetectorError;
use crate::events::{DetectionStatus, Event, EventBus, LabelScore};
use crate::resample::FrameResampler;
use crate::signal::{spectral_features, temporal_features};
use crate::source::SourceId;
use crate::webhook::{WebhookDispatcher, WebhookPayload};
use rustfft::FftPlanner;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Block size at the target rate: 100ms at 16kHz.
pub const BLOCK_SIZE: usize = 1600;
pub const TARGET_SAMPLE_RATE: u32 = 16000;
/// Window used to derive feature-based scores, independent of the
/// classifier's own block size.
const FEATURE_WINDOW: usize = 1024;
const RING_CAPACITY_FRAMES: usize = TARGET_SAMPLE_RATE as usize * 2;
const LABEL_SCORE_THRESHOLD: f32 = 0.5;
const MAX_LABELS: usize = 3;

/// Weights applied to each DSP feature when computing the feature-based
/// half of the fused score. Defaults match the legacy scoring profile:
/// only temporal features contribute, spectral weights start at zero so
/// the system degrades gracefully to classifier-only scoring.
#[derive(Debug, Clone, Copy)]
pub struct FeatureWeights {
    pub rms: f32,
    pub zcr: f32,
    pub crest_factor: f32,
    pub centroid: f32,
    pub bandwidth: f32,
    pub rolloff: f32,
    pub flatness: f32,
    pub contrast: f32,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            rms: 0.4,
            zcr: 0.3,
            crest_factor: 0.3,
            centroid: 0.0,
            bandwidth: 0.0,
            rolloff: 0.0,
            flatness: 0.0,
            contrast: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub score_threshold: f32,
    pub delay: Duration,
    pub yamnet_weight: f32,
    pub feature_weight: f32,
    pub feature_weights: FeatureWeights,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.3,
            delay: Duration::from_secs(1),
            yamnet_weight: 0.4,
            feature_weight: 0.6,
            feature_weights: FeatureWeights::default(),
        }
    }
}

struct SourceState {
    ring: CircularAudioBuffer,
    resampler: FrameResampler,
    webhook_url: Option<String>,
    last_emit: Option<Instant>,
}

/// Manages a set of named ingest sources sharing one classifier session.
pub struct AudioDetector {
    config: DetectorConfig,
    sources: Mutex<HashMap<String, SourceState>>,
    classifier: Mutex<Box<dyn StreamingClassifier>>,
    shared_last_ts_ms: Mutex<i64>,
    running: AtomicBool,
    event_bus: EventBus,
    webhook: Arc<WebhookDispatcher>,
    runtime: tokio::runtime::Handle,
}

impl AudioDetector {
    pub fn new(
        config: DetectorConfig,
        classifier: Box<dyn StreamingClassifier>,
        event_bus: EventBus,
        webhook: Arc<WebhookDispatcher>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            config,
            sources: Mutex::new(HashMap::new()),
            classifier: Mutex::new(classifier),
            shared_last_ts_ms: Mutex::new(0),
            running: AtomicBool::new(false),
            event_bus,
            webhook,
            runtime,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Registers a source, allocating its rolling buffer and resampler.
    /// Duplicate ids are rejected (`Conflict`) rather than silently reused.
    pub fn add_source(
        &self,
        source_id: &SourceId,
        source_rate: u32,
        webhook_url: Option<String>,
    ) -> Result<(), DetectorError> {
        let mut sources = self.sources.lock().unwrap();
        let key = source_id.to_string();
        if sources.contains_key(&key) {
            return Err(DetectorError::Conflict(format!(
                "source {key} is already registered"
            )));
        }
        sources.insert(
            key,
            SourceState {
                ring: CircularAudioBuffer::new(RING_CAPACITY_FRAMES, 1),
                resampler: FrameResampler::new(source_rate as usize, TARGET_SAMPLE_RATE as usize, BLOCK_SIZE),
                webhook_url,
                last_emit: None,
            },
        );
        Ok(())
    }

    pub fn remove_source(&self, source_id: &SourceId) {
        self.sources.lock().unwrap().remove(&source_id.to_string());
    }

    /// Starts the shared classifier session, priming it with a
    /// zero-filled block so the session clock begins at `now`.
    pub fn start(&self) -> Result<(), DetectorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(()); // idempotent
        }
        let start_ts = now_ms() as i64;
        *self.shared_last_ts_ms.lock().unwrap() = start_ts;
        let silence = vec![0.0f32; BLOCK_SIZE];
        self.classifier
            .lock()
            .unwrap()
            .submit(&silence, start_ts)
            .map_err(DetectorError::ClassifierError)?;
        self.event_bus.publish(Event::DetectionStatus {
            status: DetectionStatus::Started,
        });
        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return; // idempotent
        }
        self.classifier.lock().unwrap().close();
        self.sources.lock().unwrap().clear();
        self.event_bus.publish(Event::DetectionStatus {
            status: DetectionStatus::Stopped,
        });
    }

    /// Ingests a chunk of mono samples at `source_rate` for `source_id`.
    /// Unknown sources are dropped silently (they were likely just
    /// removed); this never panics and never blocks on I/O.
    pub fn process_audio(&self, source_id: &SourceId, samples: &[f32], _source_rate: u32) {
        if !self.is_running() {
            return;
        }
        let key = source_id.to_string();
        let mut blocks = Vec::new();
        {
            let mut sources = self.sources.lock().unwrap();
            let Some(state) = sources.get_mut(&key) else {
                return;
            };
            state.resampler.push(samples, |frame| blocks.push(frame.to_vec()));
        }

        // Each block re-reads its source's ring/last_emit fresh rather than
        // sharing one snapshot across the batch: an earlier block's
        // emit_detection can update last_emit before a later block in the
        // same process_audio call is handled, and the debounce check must
        // see that update.
        for frame in blocks {
            let (window, last_emit, webhook_url) = {
                let mut sources = self.sources.lock().unwrap();
                let Some(state) = sources.get_mut(&key) else {
                    return;
                };
                let _ = state.ring.write(&frame);
                (
                    state.ring.read_last(FEATURE_WINDOW),
                    state.last_emit,
                    state.webhook_url.clone(),
                )
            };
            self.handle_block(source_id, &frame, &window, last_emit, webhook_url);
        }
    }

    fn handle_block(
        &self,
        source_id: &SourceId,
        frame: &[f32],
        feature_window: &[f32],
        last_emit: Option<Instant>,
        webhook_url: Option<String>,
    ) {
        let next_ts = {
            let mut last = self.shared_last_ts_ms.lock().unwrap();
            let block_duration_ms = (frame.len() as i64 * 1000) / TARGET_SAMPLE_RATE as i64;
            let now = now_ms() as i64;
            let next = (*last + block_duration_ms).max(now);
            *last = next;
            next
        };

        let results = {
            let mut classifier = self.classifier.lock().unwrap();
            match classifier.submit(frame, next_ts) {
                Ok(()) => classifier.poll_results(),
                Err(e) => {
                    tracing::warn!(%source_id, "classifier submit failed: {e}");
                    Vec::new()
                }
            }
        };

        for result in results {
            let yamnet = yamnet_score(&result);
            let feature_score = self.feature_score(feature_window);
            let combined =
                self.config.yamnet_weight * yamnet + self.config.feature_weight * feature_score;

            let top_labels: Vec<ClassScore> = {
                let mut labels: Vec<ClassScore> = result
                    .classifications
                    .iter()
                    .filter(|c| c.score > LABEL_SCORE_THRESHOLD)
                    .cloned()
                    .collect();
                labels.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
                labels.truncate(MAX_LABELS);
                labels
            };
            if !top_labels.is_empty() {
                self.event_bus.publish(Event::Labels {
                    source: source_id.to_string(),
                    detected: top_labels
                        .iter()
                        .map(|c| LabelScore {
                            name: c.name.clone(),
                            score: c.score,
                        })
                        .collect(),
                });
            }

            let debounce_elapsed = match last_emit {
                Some(t) => t.elapsed() >= self.config.delay,
                None => true,
            };
            if combined > self.config.score_threshold && debounce_elapsed {
                self.emit_detection(source_id, combined, webhook_url.clone());
            }
        }
    }

    fn feature_score(&self, window: &[f32]) -> f32 {
        if window.len() < FEATURE_WINDOW {
            return 0.0;
        }
        let w = &self.config.feature_weights;
        let temporal = temporal_features(window);
        let score = w.rms * temporal.rms + w.zcr * temporal.zcr + w.crest_factor * temporal.crest_factor;

        if w.centroid == 0.0 && w.bandwidth == 0.0 && w.rolloff == 0.0 && w.flatness == 0.0 && w.contrast == 0.0
        {
            return score;
        }
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window.len());
        let spectral = spectral_features(window, TARGET_SAMPLE_RATE as f32, fft.as_ref());
        score
            + w.centroid * spectral.centroid
            + w.bandwidth * spectral.bandwidth
            + w.rolloff * spectral.rolloff
            + w.flatness * spectral.flatness
            + w.contrast * spectral.contrast
    }

    fn emit_detection(&self, source_id: &SourceId, score: f32, webhook_url: Option<String>) {
        let mut sources = self.sources.lock().unwrap();
        if let Some(state) = sources.get_mut(&source_id.to_string()) {
            state.last_emit = Some(Instant::now());
        }
        drop(sources);

        let timestamp = now_ms() / 1000;
        self.event_bus.publish(Event::Clap {
            source_id: source_id.to_string(),
            timestamp,
            score,
        });

        if let Some(url) = webhook_url {
            let dispatcher = Arc::clone(&self.webhook);
            let source = source_id.to_string();
            let stream_name = match source_id {
                SourceId::Vban { stream_name, .. } => Some(stream_name.clone()),
                _ => None,
            };
            self.runtime.spawn(async move {
                let payload = WebhookPayload {
                    event: "clap_detected".to_string(),
                    source,
                    stream_name,
                    timestamp,
                    score,
                    test: None,
                };
                if let Err(e) = dispatcher.dispatch(&url, &payload).await {
                    tracing::error!("webhook dispatch failed: {e}");
                }
            });
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassificationResult, NullClassifier, ScriptedClassifier};

    fn test_detector(classifier: Box<dyn StreamingClassifier>) -> (AudioDetector, tokio::runtime::Runtime) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let detector = AudioDetector::new(
            DetectorConfig::default(),
            classifier,
            EventBus::new(),
            Arc::new(WebhookDispatcher::new()),
            rt.handle().clone(),
        );
        (detector, rt)
    }

    #[test]
    fn add_source_rejects_duplicate_ids() {
        let (detector, _rt) = test_detector(Box::new(NullClassifier::default()));
        let id = SourceId::Mic(0);
        detector.add_source(&id, 16000, None).unwrap();
        assert!(detector.add_source(&id, 16000, None).is_err());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (detector, _rt) = test_detector(Box::new(NullClassifier::default()));
        detector.start().unwrap();
        detector.start().unwrap();
        assert!(detector.is_running());
        detector.stop();
        detector.stop();
        assert!(!detector.is_running());
    }

    #[test]
    fn process_audio_before_start_is_a_no_op() {
        let (detector, _rt) = test_detector(Box::new(NullClassifier::default()));
        let id = SourceId::Mic(0);
        detector.add_source(&id, 16000, None).unwrap();
        detector.process_audio(&id, &vec![0.0; BLOCK_SIZE], 16000);
    }

    #[test]
    fn process_audio_for_unknown_source_is_dropped_without_panic() {
        let (detector, _rt) = test_detector(Box::new(NullClassifier::default()));
        detector.start().unwrap();
        let id = SourceId::Mic(99);
        detector.process_audio(&id, &vec![0.0; BLOCK_SIZE], 16000);
        detector.stop();
    }

    #[test]
    fn high_yamnet_score_emits_a_detection_event() {
        let script = vec![ClassificationResult {
            classifications: vec![ClassScore {
                name: "Clapping".into(),
                score: 0.95,
            }],
        }];
        let (detector, _rt) = test_detector(Box::new(ScriptedClassifier::new(script)));
        let mut rx = detector.event_bus.subscribe();
        let id = SourceId::Mic(0);
        detector.add_source(&id, 16000, None).unwrap();
        detector.start().unwrap();

        detector.process_audio(&id, &vec![0.1; BLOCK_SIZE], 16000);

        let mut saw_clap = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::Clap { .. }) {
                saw_clap = true;
            }
        }
        assert!(saw_clap);
    }

    #[test]
    fn debounce_suppresses_second_emit_within_delay() {
        let script = vec![
            ClassificationResult {
                classifications: vec![ClassScore {
                    name: "Clapping".into(),
                    score: 0.95,
                }],
            },
            ClassificationResult {
                classifications: vec![ClassScore {
                    name: "Clapping".into(),
                    score: 0.95,
                }],
            },
        ];
        let (detector, _rt) = test_detector(Box::new(ScriptedClassifier::new(script)));
        let mut rx = detector.event_bus.subscribe();
        let id = SourceId::Mic(0);
        detector.add_source(&id, 16000, None).unwrap();
        detector.start().unwrap();

        detector.process_audio(&id, &vec![0.1; BLOCK_SIZE], 16000);
        detector.process_audio(&id, &vec![0.1; BLOCK_SIZE], 16000);

        let clap_count = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, Event::Clap { .. }))
            .count();
        assert_eq!(clap_count, 1);
    }

    #[test]
    fn timestamps_stay_monotonic_across_two_sources() {
        let (detector, _rt) = test_detector(Box::new(NullClassifier::default()));
        let mic = SourceId::Mic(0);
        let rtsp = SourceId::Rtsp("rtsp://cam/1".into());
        detector.add_source(&mic, 16000, None).unwrap();
        detector.add_source(&rtsp, 16000, None).unwrap();
        detector.start().unwrap();

        detector.process_audio(&mic, &vec![0.0; BLOCK_SIZE], 16000);
        detector.process_audio(&rtsp, &vec![0.0; BLOCK_SIZE], 16000);
        detector.process_audio(&mic, &vec![0.0; BLOCK_SIZE], 16000);
        // NullClassifier itself asserts monotonicity internally; reaching
        // here without an error means the shared session stayed ordered.
    }
}
