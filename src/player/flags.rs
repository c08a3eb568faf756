//! Player flags word
//!
//! Every flag the render callback consults lives in a single atomic word so
//! one load captures a consistent snapshot.

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Bits of the player flags word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Flags: u32 {
        /// The sink is running and pulling audio.
        const ENGINE_RUNNING = 1 << 0;
        /// Playback has been requested; the render callback should output
        /// audio rather than silence.
        const PLAY_REQUESTED = 1 << 1;
        /// The render callback should output silence without touching the
        /// ring buffer.
        const MUTED = 1 << 2;
        /// The ring buffer is awaiting a reset; the render callback must
        /// not consume from it.
        const DRAIN_REQUIRED = 1 << 3;
        /// Set by the render callback once it has observed
        /// `DRAIN_REQUIRED`, guaranteeing it is no longer touching the
        /// ring buffer or the slot table.
        const DRAIN_ACKNOWLEDGED = 1 << 4;
    }
}

/// The flags word shared between the API, the decoding thread and the
/// render callback.
pub(crate) struct AtomicFlags(AtomicU32);

impl AtomicFlags {
    pub fn new() -> Self {
        AtomicFlags(AtomicU32::new(0))
    }

    /// Load the current flags.
    pub fn load(&self) -> Flags {
        Flags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    /// Set `flags`, returning the previous value.
    pub fn set(&self, flags: Flags) -> Flags {
        Flags::from_bits_truncate(self.0.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Clear `flags`, returning the previous value.
    pub fn clear(&self, flags: Flags) -> Flags {
        Flags::from_bits_truncate(self.0.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    /// Whether all of `flags` are currently set.
    pub fn contains(&self, flags: Flags) -> bool {
        self.load().contains(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_contains() {
        let flags = AtomicFlags::new();
        assert!(flags.load().is_empty());

        flags.set(Flags::PLAY_REQUESTED);
        assert!(flags.contains(Flags::PLAY_REQUESTED));
        assert!(!flags.contains(Flags::ENGINE_RUNNING));

        let previous = flags.set(Flags::ENGINE_RUNNING);
        assert_eq!(previous, Flags::PLAY_REQUESTED);
        assert!(flags.contains(Flags::ENGINE_RUNNING | Flags::PLAY_REQUESTED));

        flags.clear(Flags::PLAY_REQUESTED);
        assert!(!flags.contains(Flags::PLAY_REQUESTED));
        assert!(flags.contains(Flags::ENGINE_RUNNING));
    }
}
