//! RTSP ingest: a thin external-process adapter.
//!
//! The concrete decoder is an external collaborator (out of scope); this
//! module only owns process lifecycle, framing the subprocess's raw
//! `f32le` stdout into sample frames, and restart/backoff on unexpected
//! exit. The synthesized command is the equivalent of:
//!   input(rtsp_url) -> output(format=f32le, acodec=pcm_f32le, ac=1, ar=16000)

use crate::error::DetectorError;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const RTSP_TARGET_RATE: u32 = 16000;
const RESTART_BACKOFF: Duration = Duration::from_secs(2);
const READ_CHUNK_FRAMES: usize = 1600;

/// Spawns the decoder subprocess for `rtsp_url`. Exposed separately from
/// [`run`] so tests can substitute a different command.
pub fn spawn_decoder(rtsp_url: &str, command: &str) -> std::io::Result<Child> {
    Command::new(command)
        .args([
            "-rtsp_transport",
            "tcp",
            "-i",
            rtsp_url,
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ac",
            "1",
            "-ar",
            &RTSP_TARGET_RATE.to_string(),
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
}

/// Runs the blocking read loop for one RTSP source until `running` is
/// cleared. Restarts the decoder with a fixed backoff if it exits
/// unexpectedly; per-source failures never propagate beyond this loop.
pub fn run(
    source_id: String,
    rtsp_url: String,
    decoder_command: String,
    running: Arc<AtomicBool>,
    mut on_frame: impl FnMut(&[f32]),
) -> Result<(), DetectorError> {
    while running.load(Ordering::Relaxed) {
        let mut child = match spawn_decoder(&rtsp_url, &decoder_command) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(source_id, "failed to spawn RTSP decoder: {e}");
                std::thread::sleep(RESTART_BACKOFF);
                continue;
            }
        };

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut byte_buf = vec![0u8; READ_CHUNK_FRAMES * 4];

        loop {
            if !running.load(Ordering::Relaxed) {
                let _ = child.kill();
                return Ok(());
            }
            match stdout.read(&mut byte_buf) {
                Ok(0) => break,
                Ok(n) => {
                    let frames = bytes_to_f32(&byte_buf[..n]);
                    on_frame(&frames);
                }
                Err(e) => {
                    tracing::warn!(source_id, "RTSP stream read error: {e}");
                    break;
                }
            }
        }

        let _ = child.wait();
        tracing::warn!(source_id, "RTSP decoder exited, restarting after backoff");
        std::thread::sleep(RESTART_BACKOFF);
    }
    Ok(())
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_f32_decodes_little_endian_samples() {
        let one = 1.0f32.to_le_bytes();
        let neg_one = (-1.0f32).to_le_bytes();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&one);
        bytes.extend_from_slice(&neg_one);
        let samples = bytes_to_f32(&bytes);
        assert_eq!(samples, vec![1.0, -1.0]);
    }

    #[test]
    fn bytes_to_f32_ignores_trailing_partial_sample() {
        let mut bytes = 1.0f32.to_le_bytes().to_vec();
        bytes.push(0xAB);
        let samples = bytes_to_f32(&bytes);
        assert_eq!(samples, vec![1.0]);
    }
}
