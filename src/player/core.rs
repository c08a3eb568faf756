//! Shared player core
//!
//! [`PlayerCore`] owns everything the three threads and the render callback
//! share: the audio ring buffer, the fixed slot table, the flags word, the
//! decoder queue, the active decoder records, the sink, the semaphores and
//! the two event rings. The public [`Player`](super::Player) wraps it in an
//! `Arc`; the render callback reaches it through a `Weak` handle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::decoder::Decoder;
use crate::format::{AudioFormat, ChannelLayout};
use crate::player::config::PlayerConfig;
use crate::player::flags::{AtomicFlags, Flags};
use crate::player::negotiate::{negotiate_transition, Transition};
use crate::player::state::{DecoderState, SlotFlags, SlotTable};
use crate::ring::{AudioRingBuffer, ByteRingBuffer};
use crate::sink::AudioSink;
use crate::sync::Semaphore;
use crate::{Error, Result, TrackId};

use super::{PlaybackState, PlaybackPosition, PlaybackTime, PlayerObserver, PlayerStatistics};

/// A decoder accepted by `enqueue` but not yet promoted to active.
pub(crate) struct QueuedDecoder {
    pub sequence: u64,
    pub decoder: Box<dyn Decoder>,
}

/// The sink and the configuration the ring buffer currently matches.
pub(crate) struct Engine {
    pub sink: Box<dyn AudioSink>,
    pub ring_format: Option<AudioFormat>,
    pub ring_layout: Option<ChannelLayout>,
}

pub(crate) struct PlayerCore {
    pub(crate) config: PlayerConfig,
    pub(crate) flags: AtomicFlags,
    pub(crate) ring: AudioRingBuffer,
    pub(crate) slots: SlotTable,
    /// Active decoder records, ordered by starting frame.
    pub(crate) active: Mutex<Vec<Arc<DecoderState>>>,
    pub(crate) queued: Mutex<VecDeque<QueuedDecoder>>,
    pub(crate) engine: Mutex<Engine>,
    pub(crate) now_playing: Mutex<Option<TrackId>>,
    pub(crate) observer: Mutex<Option<Arc<dyn PlayerObserver>>>,
    /// States whose buffered audio was flushed and whose decoding must be
    /// resumed, lowest starting frame first.
    pub(crate) redecode: Mutex<Vec<Arc<DecoderState>>>,
    /// Serializes chunk production against control paths that reset the
    /// ring buffer from other threads.
    pub(crate) producing: Mutex<()>,
    pub(crate) decoding_sem: Semaphore,
    pub(crate) event_sem: Semaphore,
    pub(crate) decoding_events: ByteRingBuffer,
    pub(crate) rendering_events: ByteRingBuffer,
    pub(crate) next_sequence: AtomicU64,
    pub(crate) frames_decoded_total: AtomicI64,
    pub(crate) frames_rendered_total: AtomicI64,
    pub(crate) underruns: AtomicU64,
    pub(crate) dropped_events: AtomicU64,
    pub(crate) seek_requested: AtomicBool,
    pub(crate) skip_requested: AtomicBool,
    /// True while the decoding thread holds a decoder popped from the queue
    /// that is not yet visible in `active`; guards the exhaustion check.
    pub(crate) promotion_in_progress: AtomicBool,
    /// Bumped by `stop`; a promotion that straddles a stop is abandoned.
    pub(crate) stop_epoch: AtomicU64,
    pub(crate) shutdown: AtomicBool,
}

impl PlayerCore {
    pub(crate) fn new(config: PlayerConfig, sink: Box<dyn AudioSink>) -> Self {
        PlayerCore {
            flags: AtomicFlags::new(),
            ring: AudioRingBuffer::new(),
            slots: SlotTable::new(config.active_decoder_slots),
            active: Mutex::new(Vec::with_capacity(config.active_decoder_slots)),
            queued: Mutex::new(VecDeque::new()),
            engine: Mutex::new(Engine {
                sink,
                ring_format: None,
                ring_layout: None,
            }),
            now_playing: Mutex::new(None),
            observer: Mutex::new(None),
            redecode: Mutex::new(Vec::new()),
            producing: Mutex::new(()),
            decoding_sem: Semaphore::new(0),
            event_sem: Semaphore::new(0),
            decoding_events: ByteRingBuffer::new(config.event_ring_bytes),
            rendering_events: ByteRingBuffer::new(config.event_ring_bytes),
            next_sequence: AtomicU64::new(0),
            frames_decoded_total: AtomicI64::new(0),
            frames_rendered_total: AtomicI64::new(0),
            underruns: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            seek_requested: AtomicBool::new(false),
            skip_requested: AtomicBool::new(false),
            promotion_in_progress: AtomicBool::new(false),
            stop_epoch: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            config,
        }
    }

    pub(crate) fn observer(&self) -> Option<Arc<dyn PlayerObserver>> {
        self.observer.lock().clone()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queued.lock().is_empty()
    }

    /// Whether anything is still flowing toward the ring buffer: a queued
    /// decoder, one being promoted, or one awaiting redecoding.
    pub(crate) fn has_upcoming_audio(&self) -> bool {
        self.promotion_in_progress.load(Ordering::Acquire)
            || !self.queue_is_empty()
            || !self.redecode.lock().is_empty()
    }

    pub(crate) fn current_format(&self) -> Option<AudioFormat> {
        self.engine.lock().ring_format
    }

    // ========================================================================
    // Playlist management

    pub(crate) fn enqueue_decoder(
        &self,
        mut decoder: Box<dyn Decoder>,
        for_immediate_playback: bool,
    ) -> Result<TrackId> {
        if !decoder.is_open() {
            decoder.open()?;
        }
        if decoder.output_format().interleaved {
            return Err(Error::UnsupportedFormat(
                "decoders must deliver non-interleaved audio".into(),
            ));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;

        if for_immediate_playback {
            self.cancel_active_decoders();
            self.flags.set(Flags::DRAIN_REQUIRED);
            self.clear_queue();
        }

        self.queued.lock().push_back(QueuedDecoder { sequence, decoder });
        self.decoding_sem.signal();
        Ok(TrackId(sequence))
    }

    pub(crate) fn clear_queue(&self) {
        self.queued.lock().clear();
    }

    pub(crate) fn will_be_gapless(
        &self,
        format: &AudioFormat,
        layout: Option<&ChannelLayout>,
    ) -> bool {
        let engine = self.engine.lock();
        match engine.ring_format {
            Some(current) => {
                negotiate_transition(&current, engine.ring_layout.as_ref(), format, layout)
                    == Transition::Gapless
            }
            None => false,
        }
    }

    pub(crate) fn skip_to_next_track(&self) -> Result<()> {
        if self.first_active_state().is_none() {
            return Err(Error::Other("no track is active".into()));
        }
        self.skip_requested.store(true, Ordering::Release);
        self.decoding_sem.signal();
        Ok(())
    }

    /// Set the canceled bit on every active decoder's slot. The decoding
    /// thread observes the flag and stops producing; cleanup happens during
    /// the drain that callers schedule alongside.
    pub(crate) fn cancel_active_decoders(&self) {
        let active = self.active.lock();
        for state in active.iter() {
            let slot = self.slots.get(state.slot);
            if slot.sequence() == state.sequence {
                slot.set_flags(SlotFlags::CANCELED);
            }
        }
    }

    // ========================================================================
    // Playback control

    pub(crate) fn play(&self) -> Result<()> {
        let flags = self.flags.load();
        if flags.contains(Flags::ENGINE_RUNNING | Flags::PLAY_REQUESTED) {
            return Ok(());
        }
        self.flags.set(Flags::PLAY_REQUESTED);

        // Resuming after a pause starts immediately; a fresh start waits in
        // Pending until the decoding thread has primed the ring buffer.
        let resuming = self
            .slots
            .head()
            .map(|slot| slot.flags().contains(SlotFlags::RENDERING_STARTED))
            .unwrap_or(false);
        let primed =
            self.ring.frames_available_to_read() >= self.config.low_water_mark_frames;

        if resuming || primed {
            self.start_engine()?;
        }
        self.notify_state_changed(self.playback_state());
        self.decoding_sem.signal();
        Ok(())
    }

    pub(crate) fn pause(&self) -> Result<()> {
        match self.playback_state() {
            PlaybackState::Playing => {
                self.flags.clear(Flags::PLAY_REQUESTED);
                let mut engine = self.engine.lock();
                engine.sink.stop()?;
                self.flags.clear(Flags::ENGINE_RUNNING);
                drop(engine);
                self.notify_state_changed(PlaybackState::Paused);
                Ok(())
            }
            // Pausing while the ring buffer is still priming stops playback.
            PlaybackState::Pending => self.stop(),
            _ => Ok(()),
        }
    }

    pub(crate) fn resume(&self) -> Result<()> {
        if self.playback_state() != PlaybackState::Paused {
            return Err(Error::Other("player is not paused".into()));
        }
        self.play()
    }

    pub(crate) fn stop(&self) -> Result<()> {
        self.stop_epoch.fetch_add(1, Ordering::AcqRel);
        self.flags.clear(Flags::PLAY_REQUESTED);
        self.cancel_active_decoders();
        self.flags.set(Flags::DRAIN_REQUIRED);

        {
            let mut engine = self.engine.lock();
            let _ = engine.sink.stop();
            self.flags.clear(Flags::ENGINE_RUNNING);
        }
        self.decoding_sem.signal();

        // The sink is stopped and taking the producing lock waits out any
        // chunk the decoding thread is mid-way through, so the ring buffer
        // and slot table are safe to tear down here.
        {
            let _quiesced = self.producing.lock();
            self.ring.reset();
            let mut active = self.active.lock();
            active.clear();
            self.slots.release_all();
        }
        self.redecode.lock().clear();
        *self.now_playing.lock() = None;
        self.flags
            .clear(Flags::DRAIN_REQUIRED | Flags::DRAIN_ACKNOWLEDGED | Flags::MUTED);
        self.clear_queue();
        self.seek_requested.store(false, Ordering::Release);
        self.skip_requested.store(false, Ordering::Release);

        self.notify_state_changed(PlaybackState::Stopped);
        Ok(())
    }

    /// Start the sink and mark the engine running. The flags are
    /// re-validated under the engine lock: a pause or stop that races the
    /// priming path wins, and the sink stays stopped.
    pub(crate) fn start_engine(&self) -> Result<()> {
        let mut engine = self.engine.lock();
        let flags = self.flags.load();
        if flags.contains(Flags::ENGINE_RUNNING) {
            return Ok(());
        }
        if !flags.contains(Flags::PLAY_REQUESTED) || flags.contains(Flags::DRAIN_REQUIRED) {
            return Ok(());
        }
        engine.sink.start()?;
        self.flags.set(Flags::ENGINE_RUNNING);
        Ok(())
    }

    /// Stop the sink once the final track has finished rendering.
    pub(crate) fn stop_engine_for_exhaustion(&self) {
        self.flags.clear(Flags::PLAY_REQUESTED);
        {
            let mut engine = self.engine.lock();
            let _ = engine.sink.stop();
            self.flags.clear(Flags::ENGINE_RUNNING);
        }
        let _quiesced = self.producing.lock();
        self.ring.reset();
        self.slots.release_all();
        *self.now_playing.lock() = None;
    }

    // ========================================================================
    // Player state

    pub(crate) fn playback_state(&self) -> PlaybackState {
        let flags = self.flags.load();
        if flags.contains(Flags::ENGINE_RUNNING | Flags::PLAY_REQUESTED) {
            return PlaybackState::Playing;
        }
        match self.slots.head() {
            None => {
                // A play request with queued-but-unpromoted audio is priming.
                if flags.contains(Flags::PLAY_REQUESTED) && self.has_upcoming_audio() {
                    PlaybackState::Pending
                } else {
                    PlaybackState::Stopped
                }
            }
            Some(slot) => {
                if flags.contains(Flags::PLAY_REQUESTED)
                    && !slot.flags().contains(SlotFlags::RENDERING_STARTED)
                {
                    PlaybackState::Pending
                } else {
                    PlaybackState::Paused
                }
            }
        }
    }

    /// The first active, non-canceled decoder state in timeline order.
    pub(crate) fn first_active_state(&self) -> Option<Arc<DecoderState>> {
        let active = self.active.lock();
        active
            .iter()
            .filter(|state| {
                let slot = self.slots.get(state.slot);
                slot.sequence() == state.sequence && !slot.is_canceled()
            })
            .min_by_key(|state| self.slots.get(state.slot).starting_frame())
            .cloned()
    }

    /// The state whose rendering-started event fired most recently, falling
    /// back to the first active state.
    pub(crate) fn rendering_state(&self) -> Option<Arc<DecoderState>> {
        let playing = *self.now_playing.lock();
        if let Some(TrackId(sequence)) = playing {
            let active = self.active.lock();
            if let Some(state) = active.iter().find(|s| s.sequence == sequence) {
                return Some(Arc::clone(state));
            }
        }
        self.first_active_state()
    }

    pub(crate) fn playback_position(&self) -> Option<PlaybackPosition> {
        let state = self.rendering_state()?;
        let slot = self.slots.get(state.slot);
        if slot.sequence() != state.sequence {
            return None;
        }
        Some(PlaybackPosition {
            current_frame: slot.frames_rendered(),
            total_frames: slot.total_frames(),
        })
    }

    pub(crate) fn playback_time(&self) -> Option<PlaybackTime> {
        let state = self.rendering_state()?;
        let slot = self.slots.get(state.slot);
        if slot.sequence() != state.sequence {
            return None;
        }
        let rate = state.format.sample_rate;
        if rate <= 0.0 {
            return None;
        }
        let total = slot.total_frames();
        Some(PlaybackTime {
            current_seconds: slot.frames_rendered() as f64 / rate,
            total_seconds: if total < 0 { -1.0 } else { total as f64 / rate },
        })
    }

    pub(crate) fn statistics(&self) -> PlayerStatistics {
        PlayerStatistics {
            frames_decoded: self.frames_decoded_total.load(Ordering::Acquire),
            frames_rendered: self.frames_rendered_total.load(Ordering::Acquire),
            underruns: self.underruns.load(Ordering::Acquire),
            dropped_events: self.dropped_events.load(Ordering::Acquire),
        }
    }

    // ========================================================================
    // Seeking

    pub(crate) fn supports_seeking(&self) -> bool {
        match self.first_active_state() {
            Some(state) => state.decoder.lock().supports_seeking(),
            None => false,
        }
    }

    /// Request a seek to `frame`, expressed in the current track's own
    /// timeline. Validation is synchronous; the seek itself executes on the
    /// decoding thread, which owns the producer side of the ring buffer.
    pub(crate) fn seek_to_track_frame(&self, frame: i64) -> Result<()> {
        if frame < 0 {
            return Err(Error::Other(format!("cannot seek to frame {frame}")));
        }
        let current = self
            .first_active_state()
            .ok_or_else(|| Error::Other("no track is active".into()))?;
        let current_slot = self.slots.get(current.slot);
        if current_slot.sequence() != current.sequence {
            return Err(Error::Other("no track is active".into()));
        }
        let global = current_slot.starting_frame() + frame;

        // The target may land in a track buffered ahead of the current one.
        let target = {
            let active = self.active.lock();
            active
                .iter()
                .filter(|state| {
                    let slot = self.slots.get(state.slot);
                    if slot.sequence() != state.sequence || slot.is_canceled() {
                        return false;
                    }
                    let starting = slot.starting_frame();
                    if global < starting {
                        return false;
                    }
                    let total = slot.total_frames();
                    total < 0 || global < starting + total
                })
                .min_by_key(|state| self.slots.get(state.slot).starting_frame())
                .cloned()
        }
        .ok_or_else(|| Error::Other(format!("frame {frame} is outside the playable range")))?;

        if !target.decoder.lock().supports_seeking() {
            return Err(Error::Other("the target track does not support seeking".into()));
        }

        let target_slot = self.slots.get(target.slot);
        target.request_seek(global - target_slot.starting_frame());
        self.seek_requested.store(true, Ordering::Release);
        self.decoding_sem.signal();
        Ok(())
    }

    pub(crate) fn seek_to_time(&self, seconds: f64) -> Result<()> {
        let state = self
            .first_active_state()
            .ok_or_else(|| Error::Other("no track is active".into()))?;
        self.seek_to_track_frame(state.format.seconds_to_frames(seconds.max(0.0)))
    }

    pub(crate) fn seek_to_position(&self, position: f64) -> Result<()> {
        let state = self
            .first_active_state()
            .ok_or_else(|| Error::Other("no track is active".into()))?;
        let slot = self.slots.get(state.slot);
        let total = slot.total_frames();
        if total < 0 {
            return Err(Error::Other(
                "track length is unknown; cannot seek by position".into(),
            ));
        }
        let position = position.clamp(0.0, 1.0);
        self.seek_to_track_frame((total as f64 * position) as i64)
    }

    pub(crate) fn seek_by_seconds(&self, delta_seconds: f64) -> Result<()> {
        let state = self
            .first_active_state()
            .ok_or_else(|| Error::Other("no track is active".into()))?;
        let slot = self.slots.get(state.slot);
        let current = slot.frames_rendered();
        let delta = state.format.seconds_to_frames(delta_seconds);
        self.seek_to_track_frame((current + delta).max(0))
    }

    // ========================================================================
    // Helpers shared with the worker threads

    pub(crate) fn notify_state_changed(&self, state: PlaybackState) {
        if let Some(observer) = self.observer() {
            observer.state_changed(state);
        }
    }

    /// Wake-up used while waiting for a condition that the render callback
    /// or event thread will eventually signal.
    pub(crate) fn brief_wait(&self) {
        self.decoding_sem.wait_timeout(Duration::from_millis(10));
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.decoding_sem.signal();
        self.event_sem.signal();
    }
}
