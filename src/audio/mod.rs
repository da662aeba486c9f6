//! Модуль аудио-подсистемы
//!
//! Источник PCM (внешний процесс ffmpeg) и вспомогательные функции формата.

pub mod source;

pub use source::{source_args, AudioSource};

use bytes::Bytes;
use std::time::Duration;

use crate::constants::{BYTES_PER_SAMPLE, CHANNELS, SAMPLE_RATE};

/// Bytes in one interleaved frame (all channels)
pub const FRAME_BYTES: usize = CHANNELS as usize * BYTES_PER_SAMPLE as usize;

/// Bytes of PCM per second of audio
pub const BYTES_PER_SECOND: usize = SAMPLE_RATE as usize * FRAME_BYTES;

/// `len` zero bytes, i.e. digital silence in s16le
pub fn silence(len: usize) -> Bytes {
    Bytes::from(vec![0u8; len])
}

/// Bytes of PCM covering `duration`
pub fn bytes_for(duration: Duration) -> usize {
    (BYTES_PER_SECOND as f64 * duration.as_secs_f64()) as usize
}

/// Playback duration of `bytes` of PCM
pub fn duration_of(bytes: u64) -> Duration {
    Duration::from_secs_f64(bytes as f64 / BYTES_PER_SECOND as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DRAIN_SILENCE_BYTES;

    #[test]
    fn test_drain_silence_is_100ms() {
        assert_eq!(DRAIN_SILENCE_BYTES, 17_640);
        assert_eq!(bytes_for(Duration::from_millis(100)), DRAIN_SILENCE_BYTES);
        assert_eq!(DRAIN_SILENCE_BYTES % FRAME_BYTES, 0);
    }

    #[test]
    fn test_silence_is_zeroed() {
        let chunk = silence(4096);
        assert_eq!(chunk.len(), 4096);
        assert!(chunk.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_duration_of_one_second() {
        assert_eq!(duration_of(BYTES_PER_SECOND as u64), Duration::from_secs(1));
    }
}
