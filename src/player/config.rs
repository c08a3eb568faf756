//! Player configuration

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tunable parameters of the playback pipeline.
///
/// All sizes are minimums; ring buffer capacities are rounded up to the
/// next power of two at allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Minimum capacity of the audio ring buffer, in frames.
    pub ring_buffer_capacity_frames: usize,
    /// Minimum number of frames the decoding thread writes per iteration.
    pub ring_buffer_chunk_frames: usize,
    /// Frames that must be buffered before a pending play request starts
    /// the sink.
    pub low_water_mark_frames: usize,
    /// Maximum number of concurrently active decoders.
    pub active_decoder_slots: usize,
    /// Capacity of each of the two event ring buffers, in bytes.
    pub event_ring_bytes: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            ring_buffer_capacity_frames: 16384,
            ring_buffer_chunk_frames: 2048,
            low_water_mark_frames: 4096,
            active_decoder_slots: 8,
            event_ring_bytes: 4096,
        }
    }
}

impl PlayerConfig {
    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.ring_buffer_capacity_frames == 0 {
            return Err(Error::Config("ring buffer capacity must be non-zero".into()));
        }
        if self.ring_buffer_chunk_frames == 0 {
            return Err(Error::Config("ring buffer chunk size must be non-zero".into()));
        }
        if self.ring_buffer_chunk_frames > self.ring_buffer_capacity_frames {
            return Err(Error::Config(
                "ring buffer chunk size cannot exceed the buffer capacity".into(),
            ));
        }
        if self.low_water_mark_frames > self.ring_buffer_capacity_frames {
            return Err(Error::Config(
                "low-water mark cannot exceed the ring buffer capacity".into(),
            ));
        }
        if self.active_decoder_slots == 0 || self.active_decoder_slots > 64 {
            return Err(Error::Config(
                "active decoder slots must be between 1 and 64".into(),
            ));
        }
        if self.event_ring_bytes < 64 {
            return Err(Error::Config(
                "event ring buffers need at least 64 bytes".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PlayerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_degenerate_sizes() {
        let mut config = PlayerConfig::default();
        config.ring_buffer_chunk_frames = 0;
        assert!(config.validate().is_err());

        let mut config = PlayerConfig::default();
        config.ring_buffer_chunk_frames = config.ring_buffer_capacity_frames * 2;
        assert!(config.validate().is_err());

        let mut config = PlayerConfig::default();
        config.active_decoder_slots = 0;
        assert!(config.validate().is_err());

        let mut config = PlayerConfig::default();
        config.low_water_mark_frames = config.ring_buffer_capacity_frames + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = PlayerConfig {
            ring_buffer_capacity_frames: 32768,
            ring_buffer_chunk_frames: 1024,
            low_water_mark_frames: 2048,
            active_decoder_slots: 4,
            event_ring_bytes: 8192,
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: PlayerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_serde_fills_defaults() {
        let restored: PlayerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(restored, PlayerConfig::default());
    }
}
