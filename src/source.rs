//! Source identity: stable string ids for microphone, RTSP, and VBAN
//! ingest endpoints, plus the descriptor types persisted in settings.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Mic,
    Rtsp,
    Vban,
}

/// Stable identity for an ingest endpoint, independent of settings reloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    Mic(usize),
    Rtsp(String),
    Vban { ip: String, port: u16, stream_name: String },
}

impl SourceId {
    pub fn kind(&self) -> TransportKind {
        match self {
            SourceId::Mic(_) => TransportKind::Mic,
            SourceId::Rtsp(_) => TransportKind::Rtsp,
            SourceId::Vban { .. } => TransportKind::Vban,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Mic(idx) => write!(f, "mic:{idx}"),
            SourceId::Rtsp(url) => write!(f, "rtsp:{url}"),
            SourceId::Vban {
                ip,
                port,
                stream_name,
            } => write!(f, "vban:{ip}:{port}:{stream_name}"),
        }
    }
}

/// A source discovered live on the network (VBAN) but not necessarily
/// persisted in settings. Kept distinct from [`SavedVbanSource`] per
/// the two-registry model described in the detector design notes.
#[derive(Debug, Clone)]
pub struct DiscoveredVbanSource {
    pub ip: String,
    pub port: u16,
    pub stream_name: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub last_seen_ms: u64,
}

impl DiscoveredVbanSource {
    pub fn id(&self) -> SourceId {
        SourceId::Vban {
            ip: self.ip.clone(),
            port: self.port,
            stream_name: self.stream_name.clone(),
        }
    }

    pub fn is_stale(&self, now_ms: u64, staleness_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > staleness_ms
    }
}

/// A VBAN source the user has explicitly enabled and persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedVbanSource {
    pub ip: String,
    pub port: u16,
    pub stream_name: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// An RTSP source persisted in settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RtspSource {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_display_matches_documented_forms() {
        assert_eq!(SourceId::Mic(0).to_string(), "mic:0");
        assert_eq!(
            SourceId::Rtsp("rtsp://cam/1".into()).to_string(),
            "rtsp:rtsp://cam/1"
        );
        assert_eq!(
            SourceId::Vban {
                ip: "10.0.0.5".into(),
                port: 6980,
                stream_name: "Studio".into()
            }
            .to_string(),
            "vban:10.0.0.5:6980:Studio"
        );
    }

    #[test]
    fn discovered_source_staleness() {
        let src = DiscoveredVbanSource {
            ip: "10.0.0.5".into(),
            port: 6980,
            stream_name: "Studio".into(),
            sample_rate: 48000,
            channels: 2,
            last_seen_ms: 1_000,
        };
        assert!(!src.is_stale(5_000, 5_000));
        assert!(src.is_stale(6_001, 5_000));
    }
}
