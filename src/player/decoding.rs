//! The decoding thread
//!
//! One long-lived thread moves audio from decoders into the ring buffer. It
//! parks on the decoding semaphore and is woken by enqueues, by the event
//! thread when the render callback frees ring space, and by control
//! requests (seek, skip, stop, shutdown). This thread owns the producer
//! side of the ring buffer, so every operation that resets the buffer while
//! audio may be in flight (seeks, skips, drains, reconfiguration) executes
//! here.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::BufferList;
use crate::format::{AudioFormat, ChannelLayout};
use crate::player::events::DecodingEventCommand;
use crate::player::flags::Flags;
use crate::player::negotiate::{negotiate_transition, Transition};
use crate::player::state::{DecoderState, SlotFlags};
use crate::{Error, Result};

use super::core::{PlayerCore, QueuedDecoder};
use super::events::{encode_error_event, encode_sequence_event};

/// Entry point of the decoding thread.
pub(crate) fn run_decoding_loop(core: &PlayerCore) {
    log::debug!("decoding thread started");
    loop {
        core.decoding_sem.wait();
        if core.is_shutting_down() {
            break;
        }
        loop {
            if core.is_shutting_down() {
                log::debug!("decoding thread stopping");
                return;
            }
            core.execute_control_requests(None);
            let Some(state) = core.next_decoding_work() else {
                break;
            };
            core.decode_stream(&state);
        }
    }
    log::debug!("decoding thread stopping");
}

impl PlayerCore {
    // ========================================================================
    // Event emission

    pub(crate) fn emit_decoding_event(&self, command: DecodingEventCommand, sequence: u64) {
        if !self
            .decoding_events
            .write_all(&encode_sequence_event(command, sequence))
        {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        self.event_sem.signal();
    }

    pub(crate) fn emit_decoding_error(&self, sequence: u64, error: &Error) {
        if !self.decoding_events.write_all(&encode_error_event(sequence, error)) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        self.event_sem.signal();
    }

    // ========================================================================
    // Work selection

    /// Take the next unit of decoding work: a state whose decoding must be
    /// resumed after a flush or seek, or the next queued decoder.
    fn next_decoding_work(&self) -> Option<Arc<DecoderState>> {
        if let Some(state) = self.take_redecode() {
            return Some(state);
        }
        self.promote_next_decoder()
    }

    fn take_redecode(&self) -> Option<Arc<DecoderState>> {
        let mut redecode = self.redecode.lock();
        if redecode.is_empty() {
            return None;
        }
        let index = redecode
            .iter()
            .enumerate()
            .min_by_key(|(_, state)| self.slots.get(state.slot).starting_frame())
            .map(|(index, _)| index)?;
        Some(redecode.remove(index))
    }

    /// Pop the queue head, negotiate its format against the current
    /// configuration, and install it as an active decoder.
    fn promote_next_decoder(&self) -> Option<Arc<DecoderState>> {
        loop {
            // Raised before the pop so the exhaustion check never observes
            // an empty queue while a decoder is in hand.
            self.promotion_in_progress.store(true, Ordering::Release);
            let Some(QueuedDecoder { sequence, decoder }) = self.queued.lock().pop_front() else {
                self.promotion_in_progress.store(false, Ordering::Release);
                return None;
            };

            match self.try_promote(sequence, decoder) {
                Promotion::Ready(state) => {
                    self.promotion_in_progress.store(false, Ordering::Release);
                    return Some(state);
                }
                Promotion::Abandoned => {
                    self.promotion_in_progress.store(false, Ordering::Release);
                    continue;
                }
                Promotion::SlotsBusy => {
                    // Keep the flag raised: the decoder sits at the queue
                    // head and the pipeline is not exhausted.
                    self.promotion_in_progress.store(false, Ordering::Release);
                    return None;
                }
            }
        }
    }

    fn try_promote(&self, sequence: u64, decoder: Box<dyn crate::decoder::Decoder>) -> Promotion {
        let epoch = self.stop_epoch.load(Ordering::Acquire);
        let format = decoder.output_format();
        let layout = decoder.channel_layout();

        let (needs_configure, previous) = {
            let engine = self.engine.lock();
            match engine.ring_format {
                Some(current) if self.ring.is_allocated() => (
                    negotiate_transition(
                        &current,
                        engine.ring_layout.as_ref(),
                        &format,
                        layout.as_ref(),
                    ) == Transition::Reconfigure,
                    Some(current),
                ),
                other => (true, other),
            }
        };

        if needs_configure {
            self.await_drain_for_reconfigure();
            // Notified after the previous configuration's tail has drained
            // and immediately before the sink is reconfigured.
            if let Some(previous) = previous {
                if previous.sample_rate != format.sample_rate
                    || previous.channels != format.channels
                {
                    if let Some(observer) = self.observer() {
                        observer.format_mismatch(&previous, &format);
                    }
                }
            }
            if let Err(error) = self.configure_graph_and_ring(&format, layout) {
                log::warn!("cannot configure output for {format}: {error}");
                self.emit_decoding_error(sequence, &error);
                return Promotion::Abandoned;
            }
        }

        let mut active = self.active.lock();
        if self.stop_epoch.load(Ordering::Acquire) != epoch {
            // A stop tore the pipeline down while this decoder was in hand.
            return Promotion::Abandoned;
        }
        let starting = self.next_starting_frame(&active);
        let total = decoder.total_frames();
        match self.slots.claim(sequence, starting, total) {
            Some(slot) => {
                let state = Arc::new(DecoderState::new(sequence, slot, decoder, format, layout));
                active.push(Arc::clone(&state));
                drop(active);
                log::debug!("decoder {sequence} active at frame {starting} ({format})");
                self.emit_decoding_event(DecodingEventCommand::Started, sequence);
                Promotion::Ready(state)
            }
            None => {
                drop(active);
                self.queued
                    .lock()
                    .push_front(QueuedDecoder { sequence, decoder });
                Promotion::SlotsBusy
            }
        }
    }

    /// Starting frame for the next promoted decoder: the tail of the audio
    /// already committed to the timeline, or the global rendered count when
    /// nothing is active.
    fn next_starting_frame(&self, active: &[Arc<DecoderState>]) -> i64 {
        let mut live = active
            .iter()
            .filter(|state| self.slots.get(state.slot).sequence() == state.sequence)
            .peekable();
        match live.peek() {
            Some(front) => {
                let front_start = self.slots.get(front.slot).starting_frame();
                let decoded: i64 = live
                    .map(|state| self.slots.get(state.slot).frames_decoded())
                    .sum();
                front_start + decoded
            }
            None => self.frames_rendered_total.load(Ordering::Acquire),
        }
    }

    // ========================================================================
    // Chunked production

    /// Decode `state` into the ring buffer until end of stream, error or
    /// cancellation.
    fn decode_stream(&self, state: &Arc<DecoderState>) {
        let Some(format) = self.ring.format() else {
            return;
        };
        let chunk_frames = self.config.ring_buffer_chunk_frames;
        let Ok(mut chunk) = BufferList::new(format, chunk_frames) else {
            return;
        };

        loop {
            if self.is_shutting_down() {
                return;
            }
            self.execute_control_requests(Some(state.sequence));

            let slot = self.slots.get(state.slot);
            if slot.sequence() != state.sequence || slot.is_canceled() {
                return;
            }

            if self.ring.frames_available_to_write() < chunk_frames {
                self.resume_if_ready();
                self.decoding_sem.wait_timeout(Duration::from_millis(100));
                continue;
            }

            let decoded = {
                let _producing = self.producing.lock();
                let mut decoder = state.decoder.lock();
                decoder.read_audio(&mut chunk, chunk_frames as u32)
            };

            match decoded {
                Err(error) => {
                    // The stream ends here; buffered audio still plays out.
                    slot.mark_decoding_complete();
                    self.emit_decoding_error(state.sequence, &error);
                    self.resume_if_ready();
                    return;
                }
                Ok(0) => {
                    slot.mark_decoding_complete();
                    self.emit_decoding_event(DecodingEventCommand::Complete, state.sequence);
                    log::debug!(
                        "decoder {} complete after {} frames",
                        state.sequence,
                        slot.frames_decoded()
                    );
                    self.resume_if_ready();
                    return;
                }
                Ok(read) => {
                    if !self.write_chunk(state, &mut chunk, read as usize) {
                        // A control request interrupted the chunk. Wind the
                        // decoder back to the last committed frame so the
                        // discarded remainder is not lost from the stream.
                        let committed = slot.frames_decoded();
                        let mut decoder = state.decoder.lock();
                        if decoder.current_frame() != committed && decoder.supports_seeking() {
                            decoder.seek_to_frame(committed);
                        }
                        continue;
                    }
                }
            }
        }
    }

    /// Write a decoded chunk into the ring buffer, retrying short writes.
    /// Returns false if a control request interrupted the chunk.
    fn write_chunk(&self, state: &Arc<DecoderState>, chunk: &mut BufferList, frames: usize) -> bool {
        let slot = self.slots.get(state.slot);
        let mut remaining = frames;
        while remaining > 0 {
            if self.is_shutting_down()
                || slot.sequence() != state.sequence
                || slot.is_canceled()
            {
                return false;
            }
            if self.flags.contains(Flags::DRAIN_REQUIRED)
                || self.seek_requested.load(Ordering::Acquire)
                || self.skip_requested.load(Ordering::Acquire)
            {
                // A flush is coming; the rest of this chunk is void anyway.
                return false;
            }

            let written = {
                let _producing = self.producing.lock();
                self.ring.write(chunk, remaining)
            };
            if written > 0 {
                slot.add_frames_decoded(written as i64);
                self.frames_decoded_total
                    .fetch_add(written as i64, Ordering::AcqRel);
                chunk.drop_front(written);
                remaining -= written;
                self.resume_if_ready();
            } else {
                self.decoding_sem.wait_timeout(Duration::from_millis(100));
            }
        }
        true
    }

    /// Start the sink once a pending play request can be satisfied: the
    /// ring buffer has reached the low-water mark, or no more audio is
    /// coming and whatever exists is all there will be.
    pub(crate) fn resume_if_ready(&self) {
        let flags = self.flags.load();
        if !flags.contains(Flags::PLAY_REQUESTED)
            || flags.contains(Flags::ENGINE_RUNNING)
            || flags.contains(Flags::DRAIN_REQUIRED)
        {
            return;
        }

        let capacity = self.ring.capacity_frames();
        if capacity == 0 {
            return;
        }
        let threshold = self
            .config
            .low_water_mark_frames
            .min(capacity.saturating_sub(1))
            .max(1);
        // Primed at the low-water mark, when the producer cannot fit another
        // chunk anyway, or when everything there is has been decoded.
        let readable = self.ring.frames_available_to_read();
        let primed = readable >= threshold
            || (readable > 0
                && self.ring.frames_available_to_write() < self.config.ring_buffer_chunk_frames)
            || (!self.has_upcoming_audio() && self.all_active_decoded());
        if !primed {
            return;
        }

        if self.start_engine().is_ok() {
            log::debug!("ring buffer primed; sink started");
            self.notify_state_changed(super::PlaybackState::Playing);
        }
    }

    fn all_active_decoded(&self) -> bool {
        let active = self.active.lock();
        !active.is_empty()
            && active.iter().all(|state| {
                let slot = self.slots.get(state.slot);
                slot.sequence() != state.sequence
                    || slot.is_canceled()
                    || slot.flags().contains(SlotFlags::DECODING_COMPLETE)
            })
    }

    // ========================================================================
    // Control requests: skip, seek, drain

    /// Execute any pending skip, seek or drain. `current` is the sequence of
    /// the decoder currently being produced, if any.
    pub(crate) fn execute_control_requests(&self, current: Option<u64>) {
        if self.skip_requested.swap(false, Ordering::AcqRel) {
            self.execute_skip();
        }
        if self.seek_requested.swap(false, Ordering::AcqRel) {
            self.execute_pending_seeks();
        }
        if self.flags.contains(Flags::DRAIN_REQUIRED) {
            self.handle_drain(current);
        }
    }

    /// Skip: cancel the first live decoder and flush its buffered audio.
    fn execute_skip(&self) {
        if let Some(head) = self.first_active_state() {
            let slot = self.slots.get(head.slot);
            if slot.sequence() == head.sequence {
                slot.set_flags(SlotFlags::CANCELED);
                log::debug!("skipping decoder {}", head.sequence);
            }
            self.flags.set(Flags::DRAIN_REQUIRED);
        }
    }

    fn execute_pending_seeks(&self) {
        let pending: Vec<Arc<DecoderState>> = {
            let active = self.active.lock();
            active
                .iter()
                .filter(|state| state.has_pending_seek())
                .cloned()
                .collect()
        };
        for state in pending {
            if let Some(target) = state.take_seek() {
                self.execute_seek(&state, target);
            }
        }
    }

    /// Perform a seek on the producer side: quiesce the sink, flush the
    /// ring buffer, reposition the decoder and abandon tracks buffered
    /// ahead of the target.
    fn execute_seek(&self, state: &Arc<DecoderState>, target: i64) {
        let slot = self.slots.get(state.slot);
        if slot.sequence() != state.sequence || slot.is_canceled() {
            return;
        }

        let mut engine = self.engine.lock();
        let was_running = engine.sink.is_running();
        if was_running {
            let _ = engine.sink.stop();
            self.flags.clear(Flags::ENGINE_RUNNING);
        }

        // Consumer stopped, this thread is the producer: the flush is safe.
        self.ring.reset();

        let position = {
            let mut decoder = state.decoder.lock();
            let landed = if decoder.supports_seeking() {
                decoder.seek_to_frame(target)
            } else {
                -1
            };
            if landed >= 0 {
                landed
            } else {
                // Continue from wherever the decoder is.
                log::warn!(
                    "decoder {} failed to seek to frame {target}; continuing at {}",
                    state.sequence,
                    decoder.current_frame()
                );
                decoder.current_frame()
            }
        };
        slot.set_positions(position);

        let was_complete = slot.flags().contains(SlotFlags::DECODING_COMPLETE);
        let total = slot.total_frames();
        if was_complete && (total < 0 || position < total) {
            slot.reopen_for_decoding();
            self.redecode.lock().push(Arc::clone(state));
        }
        log::debug!("decoder {} repositioned to frame {position}", state.sequence);

        // Every other active state is abandoned: tracks buffered ahead of
        // the target, and, when the target is a later buffered track, the
        // unfinished remainder of the ones before it. Fully rendered states
        // whose slots the render callback already released only need their
        // bookkeeping removed.
        let abandoned: Vec<Arc<DecoderState>> = {
            let mut active = self.active.lock();
            let mut removed = Vec::new();
            active.retain(|other| {
                if other.sequence == state.sequence {
                    return true;
                }
                let other_slot = self.slots.get(other.slot);
                if other_slot.sequence() == other.sequence {
                    removed.push(Arc::clone(other));
                }
                false
            });
            removed
        };
        for other in &abandoned {
            let other_slot = self.slots.get(other.slot);
            other_slot.set_flags(SlotFlags::CANCELED);
            other_slot.release(other.sequence);
            self.emit_decoding_event(DecodingEventCommand::Canceled, other.sequence);
        }
        self.redecode
            .lock()
            .retain(|queued| queued.sequence == state.sequence);

        if was_running {
            if engine.sink.start().is_ok() {
                self.flags.set(Flags::ENGINE_RUNNING);
            }
        }
    }

    /// Flush the ring buffer after cancellations: quiesce the consumer,
    /// reset, tear down canceled decoders and set survivors up to be
    /// decoded again from their rendered positions.
    pub(crate) fn handle_drain(&self, current: Option<u64>) {
        if !self.flags.contains(Flags::DRAIN_REQUIRED) {
            return;
        }

        // The render callback acknowledges the drain flag before it stops
        // touching the ring buffer and slot table.
        while self.flags.contains(Flags::ENGINE_RUNNING)
            && !self.flags.contains(Flags::DRAIN_ACKNOWLEDGED)
            && !self.is_shutting_down()
        {
            self.brief_wait();
        }

        self.ring.reset();

        let mut canceled = Vec::new();
        let survivors: Vec<Arc<DecoderState>> = {
            let mut active = self.active.lock();
            active.retain(|state| {
                let slot = self.slots.get(state.slot);
                if slot.sequence() != state.sequence {
                    return false;
                }
                if slot.is_canceled() {
                    slot.release(state.sequence);
                    canceled.push(state.sequence);
                    return false;
                }
                true
            });
            let mut live = active.clone();
            live.sort_by_key(|state| self.slots.get(state.slot).starting_frame());
            live
        };

        // Survivors lost their buffered frames; wind their decoders back to
        // the rendered position and re-base their starting frames onto the
        // end of the rendered timeline.
        let mut base = self.frames_rendered_total.load(Ordering::Acquire);
        let mut placeable = true;
        for state in survivors {
            let slot = self.slots.get(state.slot);
            let rendered = slot.frames_rendered();
            let lost = slot.frames_decoded() > rendered;

            let mut keep = placeable;
            if keep && lost {
                let mut decoder = state.decoder.lock();
                keep = decoder.supports_seeking() && decoder.seek_to_frame(rendered) >= 0;
            }

            if !keep {
                let mut active = self.active.lock();
                active.retain(|other| other.sequence != state.sequence);
                drop(active);
                slot.set_flags(SlotFlags::CANCELED);
                slot.release(state.sequence);
                canceled.push(state.sequence);
                continue;
            }

            slot.set_starting_frame(base - rendered);
            if lost {
                slot.set_positions(rendered);
                slot.reopen_for_decoding();
                let needs_redecode = current != Some(state.sequence);
                if needs_redecode {
                    let mut redecode = self.redecode.lock();
                    if !redecode.iter().any(|queued| queued.sequence == state.sequence) {
                        redecode.push(Arc::clone(&state));
                    }
                }
            }

            let total = slot.total_frames();
            if total >= 0 {
                base = slot.starting_frame() + total;
            } else {
                // Without a length the next state cannot be placed.
                placeable = false;
            }
        }

        for sequence in canceled {
            self.emit_decoding_event(DecodingEventCommand::Canceled, sequence);
        }

        self.flags
            .clear(Flags::DRAIN_REQUIRED | Flags::DRAIN_ACKNOWLEDGED);
    }

    // ========================================================================
    // Processing-graph reconfiguration

    /// Let the previous configuration's buffered tail play out before a
    /// reconfiguration; drop whatever cannot drain.
    fn await_drain_for_reconfigure(&self) {
        loop {
            if self.is_shutting_down() {
                return;
            }
            if !self.flags.contains(Flags::ENGINE_RUNNING) {
                break;
            }
            let pending = {
                let active = self.active.lock();
                active.iter().any(|state| {
                    let slot = self.slots.get(state.slot);
                    slot.sequence() == state.sequence && !slot.is_canceled()
                })
            };
            if !pending {
                break;
            }
            self.brief_wait();
        }

        // Hard transition: whatever still occupies a slot cannot drain and
        // its final frames are dropped. Records whose slots were already
        // released by the render callback only need their bookkeeping
        // removed; their rendering-complete events are still in flight.
        let leftovers: Vec<Arc<DecoderState>> = {
            let mut active = self.active.lock();
            let mut removed = Vec::new();
            active.retain(|state| {
                let slot = self.slots.get(state.slot);
                if slot.sequence() != state.sequence {
                    return false;
                }
                removed.push(Arc::clone(state));
                false
            });
            removed
        };
        for state in leftovers {
            let slot = self.slots.get(state.slot);
            slot.set_flags(SlotFlags::CANCELED);
            slot.release(state.sequence);
            self.emit_decoding_event(DecodingEventCommand::Canceled, state.sequence);
        }
        self.redecode.lock().clear();
    }

    /// Reconfigure the sink and reallocate the ring buffer for `format`.
    fn configure_graph_and_ring(
        &self,
        format: &AudioFormat,
        layout: Option<ChannelLayout>,
    ) -> Result<()> {
        let mut engine = self.engine.lock();
        let was_running = engine.sink.is_running();
        if was_running {
            engine.sink.stop()?;
            self.flags.clear(Flags::ENGINE_RUNNING);
        }

        engine.sink.set_format(format)?;

        let preferred = engine.sink.preferred_buffer_size();
        let capacity = (preferred * 8)
            .max(self.config.ring_buffer_capacity_frames)
            .max(self.ring.capacity_frames());
        self.ring.allocate(*format, capacity)?;

        engine.ring_format = Some(*format);
        engine.ring_layout = layout;
        log::info!("output configured for {format} (ring capacity {capacity} frames)");

        if was_running {
            engine.sink.start()?;
            self.flags.set(Flags::ENGINE_RUNNING);
        }
        Ok(())
    }
}

enum Promotion {
    Ready(Arc<DecoderState>),
    Abandoned,
    SlotsBusy,
}
