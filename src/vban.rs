//! VBAN protocol implementation: wire header plus the UDP receiver and
//! the discovered-source registry that sits on top of it.
//!
//! VBAN (VB-Audio Network) is a simple UDP-based audio streaming
//! protocol. Default port: 6980.

use crate::resample::FrameResampler;
use crate::source::DiscoveredVbanSource;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// VBAN magic header bytes
pub const VBAN_MAGIC: &[u8; 4] = b"VBAN";

/// Default VBAN UDP port
pub const VBAN_PORT: u16 = 6980;

/// VBAN header size in bytes
pub const VBAN_HEADER_SIZE: usize = 28;

/// Maximum stream name length (including null terminator)
pub const VBAN_STREAM_NAME_SIZE: usize = 16;

/// Staleness window after which a discovered source is evicted.
pub const SOURCE_STALENESS: Duration = Duration::from_secs(5);

/// Rate at which the receiver hands off accumulated frames to consumers.
/// Matches the classifier core's target rate (`detector::TARGET_SAMPLE_RATE`).
pub const VBAN_TARGET_RATE: u32 = 16000;

/// VBAN protocol types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(dead_code)]
pub enum VbanProtocol {
    Audio = 0x00,
    Serial = 0x20,
    Text = 0x40,
    Service = 0x60,
}

/// VBAN sample rates (index -> Hz)
pub const SAMPLE_RATES: &[u32] = &[
    6000, 12000, 24000, 48000, 96000, 192000, 384000, // 0-6
    8000, 16000, 32000, 64000, 128000, 256000, 512000, // 7-13
    11025, 22050, 44100, 88200, 176400, 352800, // 14-19
];

/// VBAN audio codec formats
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(dead_code)]
pub enum VbanCodec {
    Pcm8 = 0x00,
    Pcm16 = 0x01,
    Pcm24 = 0x02,
    Pcm32 = 0x03,
    Float32 = 0x04,
    Float64 = 0x05,
}

#[allow(dead_code)]
impl VbanCodec {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            VbanCodec::Pcm8 => 1,
            VbanCodec::Pcm16 => 2,
            VbanCodec::Pcm24 => 3,
            VbanCodec::Pcm32 => 4,
            VbanCodec::Float32 => 4,
            VbanCodec::Float64 => 8,
        }
    }
}

/// VBAN packet header
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct VbanHeader {
    pub sample_rate_index: u8,
    pub samples_per_frame: u8,
    pub channels: u8,
    pub codec: u8,
    pub stream_name: [u8; VBAN_STREAM_NAME_SIZE],
    pub frame_counter: u32,
}

#[allow(dead_code)]
impl VbanHeader {
    pub fn new(
        stream_name: &str,
        sample_rate: u32,
        channels: u8,
        codec: VbanCodec,
    ) -> Result<Self> {
        let sample_rate_index = sample_rate_to_index(sample_rate)
            .ok_or_else(|| anyhow!("Unsupported sample rate: {}", sample_rate))?;

        let mut name_bytes = [0u8; VBAN_STREAM_NAME_SIZE];
        let name_len = stream_name.len().min(VBAN_STREAM_NAME_SIZE - 1);
        name_bytes[..name_len].copy_from_slice(&stream_name.as_bytes()[..name_len]);

        Ok(Self {
            sample_rate_index,
            samples_per_frame: 0,
            channels: channels.saturating_sub(1),
            codec: codec as u8,
            stream_name: name_bytes,
            frame_counter: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        let idx = (self.sample_rate_index & 0x1F) as usize;
        SAMPLE_RATES.get(idx).copied().unwrap_or(48000)
    }

    pub fn num_channels(&self) -> u8 {
        self.channels.saturating_add(1)
    }

    pub fn num_samples(&self) -> usize {
        (self.samples_per_frame as usize).saturating_add(1)
    }

    pub fn encode(&self, samples_per_frame: usize) -> [u8; VBAN_HEADER_SIZE] {
        let mut buf = [0u8; VBAN_HEADER_SIZE];
        buf[0..4].copy_from_slice(VBAN_MAGIC);
        buf[4] = self.sample_rate_index & 0x1F;
        buf[5] = (samples_per_frame.saturating_sub(1) & 0xFF) as u8;
        buf[6] = self.channels;
        buf[7] = self.codec;
        buf[8..24].copy_from_slice(&self.stream_name);
        buf[24..28].copy_from_slice(&self.frame_counter.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < VBAN_HEADER_SIZE {
            return Err(anyhow!("VBAN packet too short: {} bytes", data.len()));
        }
        if &data[0..4] != VBAN_MAGIC {
            return Err(anyhow!("Invalid VBAN magic"));
        }
        let protocol = data[4] & 0xE0;
        if protocol != VbanProtocol::Audio as u8 {
            return Err(anyhow!("Not a VBAN audio packet"));
        }

        let mut stream_name = [0u8; VBAN_STREAM_NAME_SIZE];
        stream_name.copy_from_slice(&data[8..24]);

        Ok(Self {
            sample_rate_index: data[4] & 0x1F,
            samples_per_frame: data[5],
            channels: data[6],
            codec: data[7],
            stream_name,
            frame_counter: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
        })
    }

    /// Stream name trimmed at the first null/non-printable byte.
    pub fn stream_name_str(&self) -> &str {
        let end = self
            .stream_name
            .iter()
            .position(|&b| b == 0 || !b.is_ascii_graphic() && b != b' ')
            .unwrap_or(VBAN_STREAM_NAME_SIZE);
        std::str::from_utf8(&self.stream_name[..end])
            .unwrap_or("")
            .trim()
    }
}

#[allow(dead_code)]
pub fn sample_rate_to_index(rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|&r| r == rate).map(|i| i as u8)
}

/// Maximum VBAN packet size (header + 256 samples * 8 channels * 4 bytes)
pub const MAX_VBAN_PACKET_SIZE: usize = VBAN_HEADER_SIZE + 256 * 8 * 4;

/// Decoded audio payload of a VBAN packet: mono float32 at the header's
/// native sample rate (downmixed if the packet carried multiple channels).
pub struct DecodedPacket {
    pub ip: String,
    pub port: u16,
    pub stream_name: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub samples: Vec<f32>,
}

/// Parses a raw UDP datagram into header + mono float32 samples. Payload
/// bytes that don't form a whole sample frame are trimmed, never an error.
pub fn decode_packet(data: &[u8], peer_ip: String, peer_port: u16) -> Result<DecodedPacket> {
    let header = VbanHeader::decode(data)?;
    let payload = &data[VBAN_HEADER_SIZE..];
    let channels = header.num_channels() as usize;
    let frame_bytes = 2 * channels;
    let usable = payload.len() - (payload.len() % frame_bytes.max(1));
    let payload = &payload[..usable];

    let interleaved: Vec<f32> = payload
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect();
    let mono = crate::resample::downmix_to_mono(&interleaved, channels);

    Ok(DecodedPacket {
        ip: peer_ip,
        port: peer_port,
        stream_name: header.stream_name_str().to_string(),
        sample_rate: header.sample_rate(),
        channels: header.num_channels(),
        samples: mono,
    })
}

/// Registry of live VBAN sources observed on the wire, keyed by
/// `(ip, port, stream_name)`. One lock; readers get snapshot copies.
#[derive(Default)]
pub struct SourceRegistry {
    inner: Mutex<HashMap<(String, u16, String), DiscoveredVbanSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, packet: &DecodedPacket, now_ms: u64) {
        let key = (
            packet.ip.clone(),
            packet.port,
            packet.stream_name.clone(),
        );
        let mut inner = self.inner.lock().unwrap();
        inner
            .entry(key)
            .and_modify(|s| {
                s.last_seen_ms = now_ms;
                s.sample_rate = packet.sample_rate;
                s.channels = packet.channels;
            })
            .or_insert_with(|| DiscoveredVbanSource {
                ip: packet.ip.clone(),
                port: packet.port,
                stream_name: packet.stream_name.clone(),
                sample_rate: packet.sample_rate,
                channels: packet.channels,
                last_seen_ms: now_ms,
            });
    }

    /// Evicts entries whose last_seen is older than [`SOURCE_STALENESS`].
    pub fn evict_stale(&self, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.retain(|_, s| !s.is_stale(now_ms, SOURCE_STALENESS.as_millis() as u64));
    }

    /// Snapshot of sources seen within `window`.
    pub fn get_sources(&self, now_ms: u64, window: Duration) -> Vec<DiscoveredVbanSource> {
        let inner = self.inner.lock().unwrap();
        inner
            .values()
            .filter(|s| !s.is_stale(now_ms, window.as_millis() as u64))
            .cloned()
            .collect()
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Runs the blocking VBAN ingest loop on the calling thread until
/// `running` is cleared. Resamples each source to `VBAN_TARGET_RATE` and
/// accumulates per-source until at least a full second of audio is ready,
/// then hands off a frame of exactly `VBAN_TARGET_RATE` samples to
/// `on_packet` alongside the registry snapshot, clearing that source's
/// accumulation. Intended to be spawned on a dedicated OS thread (not a
/// tokio task): the socket read timeout bounds shutdown latency without
/// needing async cancellation.
pub fn run_receiver(
    port: u16,
    running: Arc<AtomicBool>,
    registry: Arc<SourceRegistry>,
    mut on_packet: impl FnMut(DecodedPacket),
) -> Result<()> {
    let socket = UdpSocket::bind(format!("0.0.0.0:{port}"))
        .map_err(|e| anyhow!("failed to bind VBAN receiver socket: {e}"))?;
    socket.set_read_timeout(Some(Duration::from_millis(500))).ok();

    tracing::info!(port, "VBAN receiver listening");
    let mut buf = [0u8; MAX_VBAN_PACKET_SIZE];
    let mut last_evict = std::time::Instant::now();
    let mut accumulators: HashMap<(String, u16, String), FrameResampler> = HashMap::new();

    while running.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, addr)) => {
                if len < VBAN_HEADER_SIZE {
                    continue;
                }
                match decode_packet(&buf[..len], addr.ip().to_string(), addr.port()) {
                    Ok(packet) => {
                        registry.observe(&packet, now_ms());
                        accumulate_and_emit(&mut accumulators, packet, &mut on_packet);
                    }
                    Err(e) => {
                        tracing::debug!("malformed VBAN packet from {addr}: {e}");
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::warn!("VBAN receive error: {e}"),
        }

        if last_evict.elapsed() >= SOURCE_STALENESS {
            registry.evict_stale(now_ms());
            let live = registry.get_sources(now_ms(), SOURCE_STALENESS);
            accumulators.retain(|(ip, port, stream_name), _| {
                live.iter()
                    .any(|s| &s.ip == ip && s.port == *port && &s.stream_name == stream_name)
            });
            last_evict = std::time::Instant::now();
        }
    }

    tracing::info!("VBAN receiver stopped");
    Ok(())
}

/// Resamples `packet` to `VBAN_TARGET_RATE` through the per-source
/// accumulator keyed by `(ip, port, stream_name)`, emitting a frame via
/// `on_packet` each time a full `VBAN_TARGET_RATE`-sample frame completes
/// and clearing that source's accumulation in the process.
fn accumulate_and_emit(
    accumulators: &mut HashMap<(String, u16, String), FrameResampler>,
    packet: DecodedPacket,
    on_packet: &mut impl FnMut(DecodedPacket),
) {
    let key = (packet.ip.clone(), packet.port, packet.stream_name.clone());
    let source_rate = packet.sample_rate;
    let accumulator = accumulators.entry(key).or_insert_with(|| {
        FrameResampler::new(
            source_rate as usize,
            VBAN_TARGET_RATE as usize,
            VBAN_TARGET_RATE as usize,
        )
    });

    let ip = packet.ip;
    let port = packet.port;
    let stream_name = packet.stream_name;
    accumulator.push(&packet.samples, |frame| {
        on_packet(DecodedPacket {
            ip: ip.clone(),
            port,
            stream_name: stream_name.clone(),
            sample_rate: VBAN_TARGET_RATE,
            channels: 1,
            samples: frame.to_vec(),
        });
    });
}
