//! Supervisor: owns the detector's start/stop lifecycle and decides
//! which ingest source is active, following source precedence (first
//! enabled RTSP wins, else first enabled saved VBAN source, else the
//! microphone).

use crate::config::{Settings, SettingsStore};
use crate::detector::{AudioDetector, DetectorConfig};
use crate::error::DetectorError;
use crate::events::{Event, EventBus};
use crate::mic::MicrophoneStream;
use crate::rtsp;
use crate::source::SourceId;
use crate::vban::{self, SourceRegistry};
use crate::webhook::WebhookDispatcher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Which kind of ingest the supervisor is currently driving, chosen by
/// the fixed precedence documented above. A future config knob could
/// make this an explicit priority list; for now it is this constant
/// order.
#[derive(Debug, Clone)]
enum ActiveIngest {
    Rtsp { id: String, url: String },
    Vban { ip: String, stream_name: String },
    Microphone { device_index: Option<usize> },
}

pub struct Supervisor {
    settings_store: Arc<SettingsStore>,
    vban_registry: Arc<SourceRegistry>,
    event_bus: EventBus,
    detector: Mutex<Option<Arc<AudioDetector>>>,
    ingest_running: Arc<AtomicBool>,
    runtime: tokio::runtime::Handle,
}

impl Supervisor {
    pub fn new(
        settings_store: Arc<SettingsStore>,
        vban_registry: Arc<SourceRegistry>,
        event_bus: EventBus,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            settings_store,
            vban_registry,
            event_bus,
            detector: Mutex::new(None),
            ingest_running: Arc::new(AtomicBool::new(false)),
            runtime,
        }
    }

    pub fn is_running(&self) -> bool {
        self.detector
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.is_running())
            .unwrap_or(false)
    }

    /// Loads and validates settings, selects the active source per
    /// precedence, and starts the detector. Idempotent: calling start
    /// while already running is a no-op.
    pub fn start(&self) -> Result<(), DetectorError> {
        if self.is_running() {
            return Ok(());
        }

        let settings = self.settings_store.load()?;
        crate::config::validate(&settings).map_err(|errors| DetectorError::ConfigInvalid {
            field: "settings".into(),
            reason: errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        })?;

        let active = select_active_ingest(&settings)
            .ok_or_else(|| DetectorError::ConfigInvalid {
                field: "sources".into(),
                reason: "no enabled RTSP, VBAN, or microphone source".into(),
            })?;

        let classifier = Box::new(crate::classifier::NullClassifier::default());
        let detector = Arc::new(AudioDetector::new(
            DetectorConfig::default(),
            classifier,
            self.event_bus.clone(),
            Arc::new(WebhookDispatcher::new()),
            self.runtime.clone(),
        ));
        detector.start()?;

        self.ingest_running.store(true, Ordering::SeqCst);
        self.spawn_ingest(&active, &settings, Arc::clone(&detector));

        *self.detector.lock().unwrap() = Some(detector);
        Ok(())
    }

    pub fn stop(&self) {
        self.ingest_running.store(false, Ordering::SeqCst);
        if let Some(detector) = self.detector.lock().unwrap().take() {
            detector.stop();
        }
    }

    fn spawn_ingest(&self, active: &ActiveIngest, settings: &Settings, detector: Arc<AudioDetector>) {
        match active.clone() {
            ActiveIngest::Microphone { device_index } => {
                let webhook_url = settings.microphone.webhook_url.clone();
                match MicrophoneStream::open(device_index) {
                    Ok((stream, rx)) => {
                        let id = SourceId::Mic(device_index.unwrap_or(0));
                        if let Err(e) = detector.add_source(&id, stream.sample_rate, webhook_url) {
                            tracing::error!("failed to register microphone source: {e}");
                            return;
                        }
                        let channels = stream.channels as usize;
                        let sample_rate = stream.sample_rate;
                        let running = Arc::clone(&self.ingest_running);
                        std::thread::spawn(move || {
                            let _stream = stream; // keep stream alive for the thread's lifetime
                            while running.load(Ordering::Relaxed) {
                                match rx.recv_timeout(Duration::from_millis(200)) {
                                    Ok(chunk) => {
                                        let mono = crate::resample::downmix_to_mono(&chunk, channels);
                                        detector.process_audio(&id, &mono, sample_rate);
                                    }
                                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                                }
                            }
                        });
                    }
                    Err(e) => tracing::error!("failed to open microphone: {e}"),
                }
            }
            ActiveIngest::Rtsp { id, url } => {
                let webhook_url = settings
                    .rtsp_sources
                    .iter()
                    .find(|s| s.id == id)
                    .and_then(|s| s.webhook_url.clone());
                let source_id = SourceId::Rtsp(url.clone());
                if let Err(e) = detector.add_source(&source_id, rtsp::RTSP_TARGET_RATE, webhook_url) {
                    tracing::error!("failed to register RTSP source: {e}");
                    return;
                }
                let running = Arc::clone(&self.ingest_running);
                std::thread::spawn(move || {
                    let decoder_command = "ffmpeg".to_string();
                    let _ = rtsp::run(id, url, decoder_command, running, |frame| {
                        detector.process_audio(&source_id, frame, rtsp::RTSP_TARGET_RATE);
                    });
                });
            }
            ActiveIngest::Vban { ip, stream_name } => {
                let webhook_url = settings
                    .saved_vban_sources
                    .iter()
                    .find(|s| s.ip == ip && s.stream_name == stream_name)
                    .and_then(|s| s.webhook_url.clone());
                let registry = Arc::clone(&self.vban_registry);
                let running = Arc::clone(&self.ingest_running);
                let settings_store = Arc::clone(&self.settings_store);
                std::thread::spawn(move || {
                    crate::realtime::apply_realtime_optimizations();
                    let mut registered = false;
                    let _ = vban::run_receiver(vban::VBAN_PORT, running, registry, |packet| {
                        if packet.ip != ip || packet.stream_name != stream_name {
                            return;
                        }
                        let cached = settings_store.cached().unwrap_or_default();
                        if !crate::config::is_vban_source_enabled(&cached, &packet.ip, &packet.stream_name)
                        {
                            return;
                        }
                        let source_id = SourceId::Vban {
                            ip: packet.ip.clone(),
                            port: packet.port,
                            stream_name: packet.stream_name.clone(),
                        };
                        if !registered {
                            let _ = detector.add_source(&source_id, packet.sample_rate, webhook_url.clone());
                            registered = true;
                        }
                        detector.process_audio(&source_id, &packet.samples, packet.sample_rate);
                    });
                });
            }
        }
    }
}

fn select_active_ingest(settings: &Settings) -> Option<ActiveIngest> {
    if let Some(rtsp) = settings.rtsp_sources.iter().find(|s| s.enabled) {
        return Some(ActiveIngest::Rtsp {
            id: rtsp.id.clone(),
            url: rtsp.url.clone(),
        });
    }
    if let Some(vban) = settings.saved_vban_sources.iter().find(|s| s.enabled) {
        return Some(ActiveIngest::Vban {
            ip: vban.ip.clone(),
            stream_name: vban.stream_name.clone(),
        });
    }
    if settings.microphone.enabled {
        return Some(ActiveIngest::Microphone {
            device_index: settings.microphone.device_index,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RtspSource, SavedVbanSource};

    #[test]
    fn precedence_prefers_rtsp_over_vban_and_microphone() {
        let mut settings = Settings::default();
        settings.microphone.enabled = true;
        settings.saved_vban_sources.push(SavedVbanSource {
            ip: "10.0.0.5".into(),
            port: 6980,
            stream_name: "Studio".into(),
            name: "Studio".into(),
            enabled: true,
            webhook_url: None,
        });
        settings.rtsp_sources.push(RtspSource {
            id: "cam1".into(),
            name: "Cam 1".into(),
            url: "rtsp://cam1/stream".into(),
            enabled: true,
            webhook_url: None,
        });

        let active = select_active_ingest(&settings).unwrap();
        assert!(matches!(active, ActiveIngest::Rtsp { .. }));
    }

    #[test]
    fn precedence_falls_back_to_vban_then_microphone() {
        let mut settings = Settings::default();
        settings.microphone.enabled = true;
        settings.saved_vban_sources.push(SavedVbanSource {
            ip: "10.0.0.5".into(),
            port: 6980,
            stream_name: "Studio".into(),
            name: "Studio".into(),
            enabled: true,
            webhook_url: None,
        });
        let active = select_active_ingest(&settings).unwrap();
        assert!(matches!(active, ActiveIngest::Vban { .. }));

        let mic_only = Settings {
            microphone: crate::config::MicrophoneSettings {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let active = select_active_ingest(&mic_only).unwrap();
        assert!(matches!(active, ActiveIngest::Microphone { .. }));
    }

    #[test]
    fn no_enabled_source_selects_nothing() {
        let settings = Settings::default();
        assert!(select_active_ingest(&settings).is_none());
    }
}
