//! Semantic error kinds for the detection core.
//!
//! Library code returns [`DetectorError`] and propagates with `?`; the
//! binary wraps everything in `anyhow::Result` at the top level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid config at {field}: {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("settings file io error: {0}")]
    ConfigIoError(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    ConfigParseError(#[from] serde_json::Error),

    #[error("audio device error: {0}")]
    AudioDeviceError(String),

    #[error("stream error on source {source_id}: {reason}")]
    StreamError { source_id: String, reason: String },

    #[error("malformed VBAN packet: {0}")]
    PacketMalformed(String),

    #[error("classifier error: {0}")]
    ClassifierError(String),

    #[error("webhook delivery failed for {url}: {reason}")]
    WebhookError { url: String, reason: String },

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_message_includes_field() {
        let err = DetectorError::ConfigInvalid {
            field: "global.threshold".to_string(),
            reason: "must be in [0,1]".to_string(),
        };
        assert!(err.to_string().contains("global.threshold"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DetectorError = io_err.into();
        assert!(matches!(err, DetectorError::ConfigIoError(_)));
    }
}
