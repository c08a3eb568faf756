//! Audio stream format descriptions
//!
//! [`AudioFormat`] is an immutable value describing a PCM, DSD or DoP stream:
//! sample rate, channel count, sample width, interleaving and endianness,
//! plus exact frame/byte conversions. The engine's canonical interchange
//! format is non-interleaved native-endian 32-bit float PCM.

/// Identifies the encoding family of a stream.
///
/// Gapless transitions are only possible within a single family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatId {
    /// Linear PCM
    Pcm,
    /// Direct Stream Digital (1-bit)
    Dsd,
    /// DSD over PCM transport
    DoP,
}

/// Speaker layout of a stream's channels.
///
/// Layout equality is part of the gapless-compatibility decision; two
/// streams with the same channel count but different layouts force a
/// reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// Single channel
    Mono,
    /// Left/right stereo pair
    Stereo,
    /// A layout identified only by its channel count
    Channels(u32),
}

impl ChannelLayout {
    /// Number of channels in this layout.
    pub fn channel_count(&self) -> u32 {
        match *self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Channels(n) => n,
        }
    }

    /// Default layout for a channel count.
    pub fn default_for_channels(channels: u32) -> Self {
        match channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            n => ChannelLayout::Channels(n),
        }
    }
}

/// Description of an audio stream.
///
/// For non-interleaved formats `bytes_per_frame` counts the bytes one frame
/// occupies in a *single* channel buffer; for interleaved formats it counts
/// the bytes of a whole frame across all channels. Frame/byte conversions
/// round-trip exactly for every format the engine produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    /// Encoding family
    pub format_id: FormatId,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Number of channels, >= 1
    pub channels: u32,
    /// Significant bits per channel sample (1 for DSD)
    pub bits_per_channel: u32,
    /// Bytes per frame; see the type-level note on interleaving
    pub bytes_per_frame: u32,
    /// Samples are floating point
    pub is_float: bool,
    /// Channel samples are interleaved in a single buffer
    pub interleaved: bool,
    /// Samples are big-endian
    pub big_endian: bool,
}

impl AudioFormat {
    /// The engine's canonical interchange format: non-interleaved
    /// native-endian 32-bit float PCM.
    pub fn pcm_f32(sample_rate: f64, channels: u32) -> Self {
        AudioFormat {
            format_id: FormatId::Pcm,
            sample_rate,
            channels,
            bits_per_channel: 32,
            bytes_per_frame: 4,
            is_float: true,
            interleaved: false,
            big_endian: cfg!(target_endian = "big"),
        }
    }

    /// Packed signed-integer PCM, non-interleaved.
    pub fn pcm_int(sample_rate: f64, channels: u32, bits_per_channel: u32, big_endian: bool) -> Self {
        AudioFormat {
            format_id: FormatId::Pcm,
            sample_rate,
            channels,
            bits_per_channel,
            bytes_per_frame: bits_per_channel / 8,
            is_float: false,
            interleaved: false,
            big_endian,
        }
    }

    /// One-bit DSD, bit-packed eight samples per byte per channel.
    pub fn dsd(sample_rate: f64, channels: u32) -> Self {
        AudioFormat {
            format_id: FormatId::Dsd,
            sample_rate,
            channels,
            bits_per_channel: 1,
            bytes_per_frame: 1,
            is_float: false,
            interleaved: false,
            big_endian: true,
        }
    }

    /// DSD carried over PCM framing (24 bits per channel per frame).
    pub fn dop(sample_rate: f64, channels: u32) -> Self {
        AudioFormat {
            format_id: FormatId::DoP,
            sample_rate,
            channels,
            bits_per_channel: 24,
            bytes_per_frame: 3,
            is_float: false,
            interleaved: false,
            big_endian: true,
        }
    }

    /// Whether this format is linear PCM.
    pub fn is_pcm(&self) -> bool {
        self.format_id == FormatId::Pcm
    }

    /// Whether this format is Direct Stream Digital.
    pub fn is_dsd(&self) -> bool {
        self.format_id == FormatId::Dsd
    }

    /// Whether this format is DSD over PCM.
    pub fn is_dop(&self) -> bool {
        self.format_id == FormatId::DoP
    }

    /// Whether `other` belongs to the same encoding family.
    pub fn same_family(&self, other: &AudioFormat) -> bool {
        self.format_id == other.format_id
    }

    /// Convert a frame count to a byte count.
    ///
    /// For non-interleaved formats the result applies to each channel
    /// buffer individually.
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame as usize
    }

    /// Convert a byte count to a whole number of frames.
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        debug_assert!(self.bytes_per_frame > 0);
        bytes / self.bytes_per_frame as usize
    }

    /// Duration of `frames` at this format's sample rate, in seconds.
    pub fn frames_to_seconds(&self, frames: i64) -> f64 {
        frames as f64 / self.sample_rate
    }

    /// Number of frames covering `seconds` at this format's sample rate.
    pub fn seconds_to_frames(&self, seconds: f64) -> i64 {
        (seconds * self.sample_rate) as i64
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let family = match self.format_id {
            FormatId::Pcm => "PCM",
            FormatId::Dsd => "DSD",
            FormatId::DoP => "DoP",
        };
        write!(
            f,
            "{} {} Hz, {} ch, {} bit{}{}",
            family,
            self.sample_rate,
            self.channels,
            self.bits_per_channel,
            if self.is_float { " float" } else { "" },
            if self.interleaved { ", interleaved" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_format() {
        let fmt = AudioFormat::pcm_f32(44100.0, 2);
        assert!(fmt.is_pcm());
        assert!(!fmt.interleaved);
        assert!(fmt.is_float);
        assert_eq!(fmt.bytes_per_frame, 4);
    }

    #[test]
    fn test_frame_byte_round_trip() {
        let formats = [
            AudioFormat::pcm_f32(44100.0, 2),
            AudioFormat::pcm_int(96000.0, 6, 24, false),
            AudioFormat::dsd(2_822_400.0, 2),
            AudioFormat::dop(176_400.0, 2),
        ];

        for fmt in &formats {
            for frames in [0usize, 1, 3, 1024, 65535] {
                let bytes = fmt.frames_to_bytes(frames);
                assert_eq!(
                    fmt.bytes_to_frames(bytes),
                    frames,
                    "round trip failed for {fmt}"
                );
            }
        }
    }

    #[test]
    fn test_family_comparison() {
        let pcm = AudioFormat::pcm_f32(44100.0, 2);
        let pcm_hi = AudioFormat::pcm_int(192000.0, 2, 24, false);
        let dsd = AudioFormat::dsd(2_822_400.0, 2);
        let dop = AudioFormat::dop(176_400.0, 2);

        assert!(pcm.same_family(&pcm_hi));
        assert!(!pcm.same_family(&dsd));
        assert!(!dsd.same_family(&dop));
    }

    #[test]
    fn test_time_conversions() {
        let fmt = AudioFormat::pcm_f32(44100.0, 2);
        assert_eq!(fmt.seconds_to_frames(10.0), 441_000);
        assert!((fmt.frames_to_seconds(441_000) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_channel_layout() {
        assert_eq!(ChannelLayout::default_for_channels(1), ChannelLayout::Mono);
        assert_eq!(ChannelLayout::default_for_channels(2), ChannelLayout::Stereo);
        assert_eq!(
            ChannelLayout::default_for_channels(6),
            ChannelLayout::Channels(6)
        );
        assert_eq!(ChannelLayout::Channels(6).channel_count(), 6);
    }
}
