//! Active decoder state
//!
//! Two views of every active decoder exist. The *slot* is a fixed record of
//! atomics in a table allocated once at construction; it carries everything
//! the real-time render callback needs, so that path never dereferences
//! shared pointers or takes locks. The [`DecoderState`] is the control-plane
//! record owning the decoder itself, kept in a mutex-guarded list used by
//! the decoding thread, the event thread and the API.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::decoder::Decoder;
use crate::format::{AudioFormat, ChannelLayout};

/// Sentinel for an unknown terminal frame.
pub(crate) const TERMINAL_UNKNOWN: i64 = i64::MAX;

/// Sentinel for "no seek requested".
pub(crate) const NO_SEEK: i64 = -1;

bitflags::bitflags! {
    /// Per-slot state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct SlotFlags: u32 {
        /// The decoder was canceled; the render callback treats the slot as
        /// already terminal.
        const CANCELED = 1 << 0;
        /// The render callback has rendered the slot's first frame.
        const RENDERING_STARTED = 1 << 1;
        /// The decoding thread reached end of stream; `frames_decoded` is
        /// final and the terminal frame is known.
        const DECODING_COMPLETE = 1 << 2;
    }
}

/// Fixed per-decoder record shared with the render callback.
///
/// `frames_decoded` and `frames_rendered` are positions within the
/// decoder's own stream; `starting_frame` and `terminal_frame` are indices
/// in the global rendered-frame timeline. A free slot has sequence 0.
pub(crate) struct ActiveSlot {
    sequence: AtomicU64,
    starting_frame: AtomicI64,
    frames_decoded: AtomicI64,
    frames_rendered: AtomicI64,
    total_frames: AtomicI64,
    terminal_frame: AtomicI64,
    flags: AtomicU32,
}

impl ActiveSlot {
    fn new() -> Self {
        ActiveSlot {
            sequence: AtomicU64::new(0),
            starting_frame: AtomicI64::new(0),
            frames_decoded: AtomicI64::new(0),
            frames_rendered: AtomicI64::new(0),
            total_frames: AtomicI64::new(-1),
            terminal_frame: AtomicI64::new(TERMINAL_UNKNOWN),
            flags: AtomicU32::new(0),
        }
    }

    /// The owning decoder's sequence number, or 0 if the slot is free.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Populate the slot for a new decoder. Only the decoding thread claims
    /// slots; the field stores happen while the slot is free and are
    /// published by the Release store of the sequence number.
    fn claim(&self, sequence: u64, starting_frame: i64, total_frames: i64) {
        self.starting_frame.store(starting_frame, Ordering::Relaxed);
        self.frames_decoded.store(0, Ordering::Relaxed);
        self.frames_rendered.store(0, Ordering::Relaxed);
        self.total_frames.store(total_frames, Ordering::Relaxed);
        self.terminal_frame.store(TERMINAL_UNKNOWN, Ordering::Relaxed);
        self.flags.store(0, Ordering::Relaxed);
        self.sequence.store(sequence, Ordering::Release);
    }

    /// Free the slot if it still belongs to `sequence`.
    pub fn release(&self, sequence: u64) -> bool {
        self.sequence
            .compare_exchange(sequence, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn starting_frame(&self) -> i64 {
        self.starting_frame.load(Ordering::Acquire)
    }

    /// Re-base the slot onto a new point in the global timeline. Only valid
    /// while the render callback is quiesced.
    pub fn set_starting_frame(&self, frame: i64) {
        self.starting_frame.store(frame, Ordering::Release);
    }

    pub fn frames_decoded(&self) -> i64 {
        self.frames_decoded.load(Ordering::Acquire)
    }

    pub fn frames_rendered(&self) -> i64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    pub fn total_frames(&self) -> i64 {
        self.total_frames.load(Ordering::Acquire)
    }

    pub fn terminal_frame(&self) -> i64 {
        self.terminal_frame.load(Ordering::Acquire)
    }

    pub fn add_frames_decoded(&self, frames: i64) {
        self.frames_decoded.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn add_frames_rendered(&self, frames: i64) {
        self.frames_rendered.fetch_add(frames, Ordering::AcqRel);
    }

    /// Reset both stream positions after a seek. Only valid while the sink
    /// is quiesced.
    pub fn set_positions(&self, frames: i64) {
        self.frames_decoded.store(frames, Ordering::Release);
        self.frames_rendered.store(frames, Ordering::Release);
    }

    /// Mark decoding finished and fix the terminal frame at
    /// `starting_frame + frames_decoded`.
    pub fn mark_decoding_complete(&self) {
        let terminal = self.starting_frame() + self.frames_decoded();
        self.terminal_frame.store(terminal, Ordering::Release);
        self.set_flags(SlotFlags::DECODING_COMPLETE);
    }

    /// Clear the end-of-stream marker so decoding can resume after a seek.
    pub fn reopen_for_decoding(&self) {
        self.terminal_frame.store(TERMINAL_UNKNOWN, Ordering::Release);
        self.clear_flags(SlotFlags::DECODING_COMPLETE);
    }

    pub fn flags(&self) -> SlotFlags {
        SlotFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: SlotFlags) -> SlotFlags {
        SlotFlags::from_bits_truncate(self.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    pub fn clear_flags(&self, flags: SlotFlags) -> SlotFlags {
        SlotFlags::from_bits_truncate(self.flags.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    pub fn is_canceled(&self) -> bool {
        self.flags().contains(SlotFlags::CANCELED)
    }
}

/// The fixed table of active slots.
pub(crate) struct SlotTable {
    slots: Box<[ActiveSlot]>,
}

impl SlotTable {
    pub fn new(count: usize) -> Self {
        SlotTable {
            slots: (0..count).map(|_| ActiveSlot::new()).collect(),
        }
    }

    pub fn get(&self, index: usize) -> &ActiveSlot {
        &self.slots[index]
    }

    /// Claim a free slot for a new decoder, returning its index.
    pub fn claim(&self, sequence: u64, starting_frame: i64, total_frames: i64) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.sequence() == 0 {
                slot.claim(sequence, starting_frame, total_frames);
                return Some(index);
            }
        }
        None
    }

    /// The occupied slot with the lowest starting frame.
    pub fn head(&self) -> Option<&ActiveSlot> {
        self.slots
            .iter()
            .filter(|slot| slot.sequence() != 0)
            .min_by_key(|slot| slot.starting_frame())
    }

    /// Find the slot owned by `sequence`.
    pub fn find(&self, sequence: u64) -> Option<&ActiveSlot> {
        if sequence == 0 {
            return None;
        }
        self.slots.iter().find(|slot| slot.sequence() == sequence)
    }

    /// Whether any slot is occupied.
    pub fn any_occupied(&self) -> bool {
        self.slots.iter().any(|slot| slot.sequence() != 0)
    }

    /// Free every slot. Only valid while the sink is quiesced.
    pub fn release_all(&self) {
        for slot in self.slots.iter() {
            let sequence = slot.sequence();
            if sequence != 0 {
                slot.release(sequence);
            }
        }
    }
}

/// Control-plane record for an active decoder, exclusively owned by the
/// player. The decoder itself is only ever touched by the decoding thread,
/// behind a non-sleeping mutex held for one chunk at a time.
pub(crate) struct DecoderState {
    /// Sequence number; doubles as the public track id.
    pub sequence: u64,
    /// Index of this decoder's slot in the [`SlotTable`].
    pub slot: usize,
    /// The decoder, locked per chunk.
    pub decoder: Mutex<Box<dyn Decoder>>,
    /// Output format cached at promotion time.
    pub format: AudioFormat,
    /// Channel layout cached at promotion time.
    pub layout: Option<ChannelLayout>,
    /// Stream-local frame a seek has been requested to, or [`NO_SEEK`].
    pub pending_seek: AtomicI64,
}

impl DecoderState {
    pub fn new(
        sequence: u64,
        slot: usize,
        decoder: Box<dyn Decoder>,
        format: AudioFormat,
        layout: Option<ChannelLayout>,
    ) -> Self {
        DecoderState {
            sequence,
            slot,
            decoder: Mutex::new(decoder),
            format,
            layout,
            pending_seek: AtomicI64::new(NO_SEEK),
        }
    }

    /// Request an asynchronous seek to a stream-local frame.
    pub fn request_seek(&self, frame: i64) {
        self.pending_seek.store(frame, Ordering::Release);
    }

    /// Take a pending seek request, if any.
    pub fn take_seek(&self) -> Option<i64> {
        let frame = self.pending_seek.swap(NO_SEEK, Ordering::AcqRel);
        (frame >= 0).then_some(frame)
    }

    /// Whether a seek is waiting to be executed.
    pub fn has_pending_seek(&self) -> bool {
        self.pending_seek.load(Ordering::Acquire) >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let table = SlotTable::new(2);
        assert!(!table.any_occupied());

        let a = table.claim(1, 0, 1000).unwrap();
        let b = table.claim(2, 1000, 500).unwrap();
        assert_ne!(a, b);
        assert!(table.claim(3, 1500, 0).is_none());

        assert!(table.get(a).release(1));
        assert!(!table.get(a).release(1));
        assert!(table.claim(3, 1500, 0).is_some());
    }

    #[test]
    fn test_head_orders_by_starting_frame() {
        let table = SlotTable::new(4);
        table.claim(7, 500, 100);
        table.claim(8, 100, 100);
        assert_eq!(table.head().unwrap().sequence(), 8);

        let slot = table.find(8).unwrap();
        slot.release(8);
        assert_eq!(table.head().unwrap().sequence(), 7);
    }

    #[test]
    fn test_terminal_frame() {
        let table = SlotTable::new(1);
        table.claim(1, 1000, 400);
        let slot = table.get(0);
        assert_eq!(slot.terminal_frame(), TERMINAL_UNKNOWN);

        slot.add_frames_decoded(400);
        slot.mark_decoding_complete();
        assert_eq!(slot.terminal_frame(), 1400);
        assert!(slot.flags().contains(SlotFlags::DECODING_COMPLETE));

        slot.reopen_for_decoding();
        assert_eq!(slot.terminal_frame(), TERMINAL_UNKNOWN);
    }

    #[test]
    fn test_position_counters() {
        let table = SlotTable::new(1);
        table.claim(1, 0, -1);
        let slot = table.get(0);

        slot.add_frames_decoded(2048);
        slot.add_frames_rendered(1024);
        assert_eq!(slot.frames_decoded(), 2048);
        assert_eq!(slot.frames_rendered(), 1024);

        slot.set_positions(500);
        assert_eq!(slot.frames_decoded(), 500);
        assert_eq!(slot.frames_rendered(), 500);
    }
}
