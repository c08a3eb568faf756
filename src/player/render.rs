//! The real-time render path
//!
//! Invoked by the sink's real-time thread. Reads frames from the ring
//! buffer, zero-pads on underrun, attributes the consumed frames to active
//! decoders by walking the slot table in timeline order, and reports
//! progress over the rendering event ring. No locks, allocation or logging
//! on this path; the only shared state touched is atomic.

use std::sync::atomic::Ordering;

use crate::buffer::BufferList;
use crate::player::flags::Flags;
use crate::player::state::SlotFlags;
use crate::sink::{RenderOutcome, Timestamp};

use super::core::PlayerCore;
use super::events::{encode_frames_rendered, encode_render_marker, RenderingEventCommand};

impl PlayerCore {
    /// The render callback. `frames` is the sink's requested frame count;
    /// the output's per-channel sizes are derived from it, never from the
    /// caller-supplied fill levels.
    pub(crate) fn render(
        &self,
        output: &mut BufferList,
        frames: usize,
        timestamp: Timestamp,
    ) -> RenderOutcome {
        let flags = self.flags.load();

        if !flags.contains(Flags::PLAY_REQUESTED)
            || flags.contains(Flags::MUTED)
            || flags.contains(Flags::DRAIN_REQUIRED)
        {
            output.empty();
            output.fill_silence(0, frames);
            if flags.contains(Flags::DRAIN_REQUIRED)
                && !flags.contains(Flags::DRAIN_ACKNOWLEDGED)
            {
                // From here on this callback no longer touches the ring
                // buffer or the slot table, so the producer may flush them.
                self.flags.set(Flags::DRAIN_ACKNOWLEDGED);
                self.decoding_sem.signal();
            }
            return RenderOutcome {
                frames,
                is_silence: true,
            };
        }

        let read = self.ring.read(output, frames);
        if read < frames {
            output.fill_silence(read, frames - read);
            if self.slots.any_occupied() {
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        if read > 0 {
            self.frames_rendered_total
                .fetch_add(read as i64, Ordering::AcqRel);
        }

        self.account_rendered_frames(read as i64, timestamp);

        self.emit_rendering_record(&encode_frames_rendered(read as u32));
        self.event_sem.signal();

        RenderOutcome {
            frames,
            is_silence: read == 0,
        }
    }

    /// Distribute `read` consumed frames over the active decoders, emitting
    /// lifecycle markers as streams begin and end.
    fn account_rendered_frames(&self, read: i64, timestamp: Timestamp) {
        let mut remaining = read;
        loop {
            let Some(slot) = self.slots.head() else {
                break;
            };
            let sequence = slot.sequence();
            if sequence == 0 {
                break;
            }

            // Canceled entries are already terminal; reclaim and move on.
            if slot.is_canceled() {
                slot.release(sequence);
                continue;
            }

            let complete = slot.flags().contains(SlotFlags::DECODING_COMPLETE);
            let position = slot.frames_rendered();
            let end = if complete {
                slot.frames_decoded()
            } else {
                i64::MAX
            };
            let take = remaining.min(end.saturating_sub(position)).max(0);

            if take > 0 {
                if !slot.flags().contains(SlotFlags::RENDERING_STARTED) {
                    slot.set_flags(SlotFlags::RENDERING_STARTED);
                    self.emit_rendering_record(&encode_render_marker(
                        RenderingEventCommand::WillStart,
                        sequence,
                        timestamp,
                    ));
                }
                slot.add_frames_rendered(take);
                remaining -= take;
            }

            if complete && position + take >= end {
                // Zero-length and fully-consumed streams still get their
                // start marker so lifecycles always pair up.
                if !slot.flags().contains(SlotFlags::RENDERING_STARTED) {
                    slot.set_flags(SlotFlags::RENDERING_STARTED);
                    self.emit_rendering_record(&encode_render_marker(
                        RenderingEventCommand::WillStart,
                        sequence,
                        timestamp,
                    ));
                }
                self.emit_rendering_record(&encode_render_marker(
                    RenderingEventCommand::WillComplete,
                    sequence,
                    timestamp,
                ));
                slot.release(sequence);
                // Leftover frames roll into the next stream.
                continue;
            }
            break;
        }
    }

    fn emit_rendering_record(&self, record: &[u8]) {
        if !self.rendering_events.write_all(record) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}
