//! Settings document: schema, validation, and atomic on-disk persistence.
//!
//! Persistence mirrors the original implementation's save routine
//! exactly: write to `settings.json.tmp`, rotate the existing file to
//! `settings.json.backup` if present, then rename the temp file into
//! place. A missing or corrupt file is never fatal — defaults are
//! merged in and a fresh file is written back.

use crate::error::DetectorError;
use crate::source::{RtspSource, SavedVbanSource};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn default_threshold() -> f32 {
    0.3
}

fn default_delay() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalSettings {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_delay")]
    pub delay: f32,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            delay: default_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MicrophoneSettings {
    #[serde(default)]
    pub device_index: Option<usize>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VbanSettings {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub stream_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// The full settings document, deep-mergeable against defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Settings {
    #[serde(default)]
    pub global: GlobalSettings,
    #[serde(default)]
    pub microphone: MicrophoneSettings,
    #[serde(default)]
    pub rtsp_sources: Vec<RtspSource>,
    #[serde(default)]
    pub saved_vban_sources: Vec<SavedVbanSource>,
    #[serde(default)]
    pub vban: VbanSettings,
}

/// Field-level validation. Errors accumulate so callers see every
/// problem at once, rather than stopping at the first.
pub fn validate(settings: &Settings) -> Result<(), Vec<DetectorError>> {
    let mut errors = Vec::new();

    if !(0.0..=1.0).contains(&settings.global.threshold) {
        errors.push(DetectorError::ConfigInvalid {
            field: "global.threshold".into(),
            reason: "must be within [0, 1]".into(),
        });
    }
    if settings.global.delay < 0.0 {
        errors.push(DetectorError::ConfigInvalid {
            field: "global.delay".into(),
            reason: "must be >= 0".into(),
        });
    }

    for (i, rtsp) in settings.rtsp_sources.iter().enumerate() {
        if let Some(reason) = invalid_url_reason(&rtsp.url) {
            errors.push(DetectorError::ConfigInvalid {
                field: format!("rtsp_sources[{i}].url"),
                reason,
            });
        }
        if let Some(url) = &rtsp.webhook_url {
            if let Some(reason) = invalid_url_reason(url) {
                errors.push(DetectorError::ConfigInvalid {
                    field: format!("rtsp_sources[{i}].webhook_url"),
                    reason,
                });
            }
        }
    }
    let mut rtsp_ids: Vec<&str> = settings.rtsp_sources.iter().map(|s| s.id.as_str()).collect();
    rtsp_ids.sort_unstable();
    if rtsp_ids.windows(2).any(|w| w[0] == w[1]) {
        errors.push(DetectorError::ConfigInvalid {
            field: "rtsp_sources[].id".into(),
            reason: "ids must be unique".into(),
        });
    }

    for (i, vban) in settings.saved_vban_sources.iter().enumerate() {
        if vban.port == 0 {
            errors.push(DetectorError::ConfigInvalid {
                field: format!("saved_vban_sources[{i}].port"),
                reason: "must be in (0, 65535]".into(),
            });
        }
        if let Some(url) = &vban.webhook_url {
            if let Some(reason) = invalid_url_reason(url) {
                errors.push(DetectorError::ConfigInvalid {
                    field: format!("saved_vban_sources[{i}].webhook_url"),
                    reason,
                });
            }
        }
    }

    if let Some(url) = &settings.microphone.webhook_url {
        if let Some(reason) = invalid_url_reason(url) {
            errors.push(DetectorError::ConfigInvalid {
                field: "microphone.webhook_url".into(),
                reason,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn invalid_url_reason(url: &str) -> Option<String> {
    if url.is_empty() {
        return Some("must not be empty".into());
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Some("must be an absolute http(s) URL".into());
    }
    None
}

/// Deep-merges `overlay` onto `base`: any vector or scalar the caller
/// explicitly supplied overrides the base, matching the original's
/// recursive dict-merge semantics for a (de)serialized document.
fn deep_merge(base: Settings, overlay: serde_json::Value) -> Result<Settings, DetectorError> {
    let mut base_value = serde_json::to_value(&base)?;
    merge_json(&mut base_value, overlay);
    Ok(serde_json::from_value(base_value)?)
}

fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    use serde_json::Value;
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                merge_json(base_map.entry(k).or_insert(Value::Null), v);
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

const SETTINGS_FILE: &str = "settings.json";
const SETTINGS_BACKUP: &str = "settings.json.backup";
const SETTINGS_TEMP: &str = "settings.json.tmp";
const SETTINGS_CACHE_TTL: Duration = Duration::from_secs(5);

/// Owns load/save of the settings document on disk, plus a short-lived
/// read cache so hot paths (the VBAN receiver's enabled-source filter)
/// don't hit the filesystem on every packet.
pub struct SettingsStore {
    dir: PathBuf,
    cache: std::sync::Mutex<Option<(Instant, Settings)>>,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: std::sync::Mutex::new(None),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Loads from disk, deep-merging onto defaults. A missing or corrupt
    /// file is treated as absent: defaults are returned and a fresh file
    /// is written back so the next load sees a clean document.
    pub fn load(&self) -> Result<Settings, DetectorError> {
        let path = self.path(SETTINGS_FILE);
        let settings = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<serde_json::Value>(&content) {
                Ok(overlay) => deep_merge(Settings::default(), overlay)?,
                Err(e) => {
                    tracing::error!("settings.json is corrupt ({e}), falling back to defaults");
                    let defaults = Settings::default();
                    self.save(&defaults)?;
                    defaults
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = Settings::default();
                self.save(&defaults)?;
                defaults
            }
            Err(e) => return Err(e.into()),
        };
        *self.cache.lock().unwrap() = Some((Instant::now(), settings.clone()));
        Ok(settings)
    }

    /// Returns the cached settings if younger than the TTL, else reloads.
    pub fn cached(&self) -> Result<Settings, DetectorError> {
        if let Some((loaded_at, settings)) = self.cache.lock().unwrap().clone() {
            if loaded_at.elapsed() < SETTINGS_CACHE_TTL {
                return Ok(settings);
            }
        }
        self.load()
    }

    /// Validates then atomically persists `settings`: write-temp,
    /// rotate-existing-to-backup, rename-temp-into-place.
    pub fn save(&self, settings: &Settings) -> Result<(), DetectorError> {
        validate(settings).map_err(|errors| {
            DetectorError::ConfigInvalid {
                field: "settings".into(),
                reason: errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            }
        })?;

        fs::create_dir_all(&self.dir)?;
        let temp_path = self.path(SETTINGS_TEMP);
        let final_path = self.path(SETTINGS_FILE);
        let backup_path = self.path(SETTINGS_BACKUP);

        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&temp_path, json)?;

        if final_path.exists() {
            fs::rename(&final_path, &backup_path)?;
        }
        fs::rename(&temp_path, &final_path)?;

        *self.cache.lock().unwrap() = Some((Instant::now(), settings.clone()));
        Ok(())
    }
}

/// Returns whether `ip`/`stream_name` has a matching enabled entry in
/// `saved_vban_sources`, per the VBAN receiver's forwarding gate.
pub fn is_vban_source_enabled(settings: &Settings, ip: &str, stream_name: &str) -> bool {
    settings
        .saved_vban_sources
        .iter()
        .any(|s| s.enabled && s.ip == ip && s.stream_name == stream_name)
}
