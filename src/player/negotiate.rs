//! Format negotiation for track transitions

use crate::format::{AudioFormat, ChannelLayout};

/// How the engine must handle a transition to a new stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The new stream can play through the current configuration without
    /// stopping the sink.
    Gapless,
    /// The sink must be stopped, reconfigured and restarted, and the ring
    /// buffer reallocated.
    Reconfigure,
}

/// Decide whether a stream of `next` format can continue gaplessly after
/// the current configuration.
///
/// Gapless requires an identical sample rate, channel count and channel
/// layout, and the same encoding family (PCM to PCM, DSD to DSD, DoP to
/// DoP). An absent layout is interpreted as the default layout for the
/// stream's channel count.
pub fn negotiate_transition(
    current: &AudioFormat,
    current_layout: Option<&ChannelLayout>,
    next: &AudioFormat,
    next_layout: Option<&ChannelLayout>,
) -> Transition {
    if !current.same_family(next) {
        return Transition::Reconfigure;
    }
    if current.sample_rate != next.sample_rate || current.channels != next.channels {
        return Transition::Reconfigure;
    }
    // The ring buffer stores frames in the current format's memory layout;
    // a width or interleaving change cannot share it.
    if current.bytes_per_frame != next.bytes_per_frame
        || current.bits_per_channel != next.bits_per_channel
        || current.is_float != next.is_float
        || current.interleaved != next.interleaved
    {
        return Transition::Reconfigure;
    }

    let current_layout = current_layout
        .copied()
        .unwrap_or_else(|| ChannelLayout::default_for_channels(current.channels));
    let next_layout = next_layout
        .copied()
        .unwrap_or_else(|| ChannelLayout::default_for_channels(next.channels));
    if current_layout != next_layout {
        return Transition::Reconfigure;
    }

    Transition::Gapless
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_formats_are_gapless() {
        let fmt = AudioFormat::pcm_f32(44100.0, 2);
        assert_eq!(
            negotiate_transition(&fmt, None, &fmt, None),
            Transition::Gapless
        );
    }

    #[test]
    fn test_sample_rate_change_reconfigures() {
        let current = AudioFormat::pcm_f32(44100.0, 2);
        let next = AudioFormat::pcm_f32(48000.0, 2);
        assert_eq!(
            negotiate_transition(&current, None, &next, None),
            Transition::Reconfigure
        );
    }

    #[test]
    fn test_channel_count_change_reconfigures() {
        let current = AudioFormat::pcm_f32(44100.0, 2);
        let next = AudioFormat::pcm_f32(44100.0, 6);
        assert_eq!(
            negotiate_transition(&current, None, &next, None),
            Transition::Reconfigure
        );
    }

    #[test]
    fn test_family_change_reconfigures() {
        let pcm = AudioFormat::pcm_f32(176400.0, 2);
        let dop = AudioFormat::dop(176400.0, 2);
        assert_eq!(
            negotiate_transition(&pcm, None, &dop, None),
            Transition::Reconfigure
        );
    }

    #[test]
    fn test_sample_layout_change_reconfigures() {
        // Same rate, channels and family, but a different memory layout
        // cannot share the ring buffer.
        let current = AudioFormat::pcm_f32(44100.0, 2);
        let next = AudioFormat::pcm_int(44100.0, 2, 24, false);
        assert_eq!(
            negotiate_transition(&current, None, &next, None),
            Transition::Reconfigure
        );
    }

    #[test]
    fn test_layout_mismatch_reconfigures() {
        let fmt = AudioFormat::pcm_f32(44100.0, 2);
        assert_eq!(
            negotiate_transition(
                &fmt,
                Some(&ChannelLayout::Stereo),
                &fmt,
                Some(&ChannelLayout::Channels(2)),
            ),
            Transition::Reconfigure
        );
        // Absent layouts fall back to the default for the channel count.
        assert_eq!(
            negotiate_transition(&fmt, Some(&ChannelLayout::Stereo), &fmt, None),
            Transition::Gapless
        );
    }
}
