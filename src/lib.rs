//! # LAN Audio Relay
//!
//! Streams live desktop audio to a receiver device discovered on the LAN.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── DESKTOP ─────────────────────────────┐
//! │                                                                   │
//! │  ┌──────────────┐  AURYNK_DISCOVER (UDP broadcast)                │
//! │  │  Discovery   │──────────────────────────────────────────┐     │
//! │  │ (discovery)  │<── AURYNK_RESPONSE;<port>;<name> ───────┐│     │
//! │  └──────┬───────┘                                         ││     │
//! │         │ PeerRecord                                      ││     │
//! │         ▼                                                 ││     │
//! │  ┌──────────────┐  AURYNK_CONNECT;<device>                ││     │
//! │  │  Handshake   │────────────────────────────────────────┐││     │
//! │  │ (handshake)  │<── AURYNK_ACCEPT / AURYNK_REJECT ─────┐│││     │
//! │  └──────┬───────┘                                       ││││     │
//! │         │ Accepted                                      ││││     │
//! │         ▼                                               ││││     │
//! │  ┌──────────────┐   ┌───────────────┐                   ││││     │
//! │  │ ffmpeg (PCM) │──>│ StreamSession │── TCP / TLS ──────┼┼┼┼──┐  │
//! │  │ (audio)      │   │ (sender)      │   s16le 44.1k 2ch ││││  │  │
//! │  └──────────────┘   └───────────────┘                   ││││  │  │
//! └─────────────────────────────────────────────────────────┼┼┼┼──┼──┘
//!                                                           ▼▼▼▼  ▼
//!                                                       RECEIVER DEVICE
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod protocol;
pub mod relay;
pub mod shutdown;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of the relayed PCM stream
    pub const SAMPLE_RATE: u32 = 44_100;

    /// Channel count (stereo)
    pub const CHANNELS: u16 = 2;

    /// Bytes per sample (signed 16-bit little-endian)
    pub const BYTES_PER_SAMPLE: u16 = 2;

    /// Default TCP port of the receiver's audio socket
    pub const DEFAULT_STREAM_PORT: u16 = 5000;

    /// Default UDP port for discovery and the connect handshake
    pub const DEFAULT_DISCOVERY_PORT: u16 = 5002;

    /// Default read/send chunk size in bytes
    pub const DEFAULT_BUFFER_SIZE: usize = 4096;

    /// Default discovery window in seconds
    pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 3;

    /// Default wait for an accept/reject reply in seconds
    pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

    /// Progress is logged every time this many bytes have been streamed
    pub const PROGRESS_INTERVAL_BYTES: u64 = 10 * 1024 * 1024;

    /// Silence sent on shutdown: 100 ms of audio (44100 * 2 * 2 * 0.1)
    pub const DRAIN_SILENCE_BYTES: usize =
        SAMPLE_RATE as usize * CHANNELS as usize * BYTES_PER_SAMPLE as usize / 10;

    /// Maximum datagram size read by discovery and handshake listeners
    pub const MAX_DATAGRAM_SIZE: usize = 1024;
}
