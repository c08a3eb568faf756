//! The playback coordinator
//!
//! [`Player`] decodes enqueued tracks into a lock-free ring buffer on a
//! dedicated decoding thread and hands the audio to an [`AudioSink`] on
//! demand from the sink's real-time callback. Lifecycle progress flows as
//! binary events over two SPSC rings to an event thread, which invokes the
//! installed [`PlayerObserver`].
//!
//! Decoding happens ahead of rendering, so consecutive tracks whose formats
//! negotiate as compatible play gaplessly; incompatible transitions stop
//! the sink, reconfigure it and resume.

mod config;
mod core;
mod decoding;
mod events;
mod flags;
mod negotiate;
mod render;
mod state;

pub use config::PlayerConfig;
pub use negotiate::{negotiate_transition, Transition};

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crate::decoder::Decoder;
use crate::format::{AudioFormat, ChannelLayout};
use crate::sink::{AudioSink, RenderOutcome, Timestamp};
use crate::{Error, Result};

use self::core::PlayerCore;
use self::decoding::run_decoding_loop;
use self::events::run_event_loop;

/// Identifies an enqueued track for the lifetime of the player.
///
/// Returned by [`Player::enqueue`] and carried by every observer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub(crate) u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track #{}", self.0)
    }
}

/// Playback states of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No decoder is active.
    #[default]
    Stopped,
    /// Playback was requested and the ring buffer is being primed; the
    /// sink has not started yet.
    Pending,
    /// Audio is being sent to the sink.
    Playing,
    /// A track is active but audio is not being sent to the sink.
    Paused,
}

/// Frame-accurate position within the track currently rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackPosition {
    /// Frames of the current track rendered so far.
    pub current_frame: i64,
    /// Total frames in the current track, or -1 if unknown.
    pub total_frames: i64,
}

/// Time-based position within the track currently rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackTime {
    /// Seconds of the current track rendered so far.
    pub current_seconds: f64,
    /// Total seconds in the current track, or -1 if unknown.
    pub total_seconds: f64,
}

/// Counters describing the engine's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStatistics {
    /// Frames decoded into the ring buffer since construction.
    pub frames_decoded: i64,
    /// Frames delivered to the sink since construction.
    pub frames_rendered: i64,
    /// Render callbacks that found fewer frames than requested.
    pub underruns: u64,
    /// Lifecycle events dropped because an event ring was full.
    pub dropped_events: u64,
}

/// Receives lifecycle notifications from the player.
///
/// Lifecycle and error callbacks run on the event thread;
/// [`format_mismatch`](Self::format_mismatch) and some state changes run on
/// the decoding thread. None of them run on the real-time render path, but
/// lengthy work still risks starving the pipeline.
#[allow(unused_variables)]
pub trait PlayerObserver: Send + Sync {
    /// A track's first chunk is about to be decoded.
    fn decoding_started(&self, track: TrackId) {}

    /// A track was decoded to the end of its stream.
    fn decoding_complete(&self, track: TrackId) {}

    /// A track was canceled before it finished.
    fn decoder_canceled(&self, track: TrackId) {}

    /// Decoding a track failed; the track ends but playback continues.
    fn decoding_error(&self, track: TrackId, error: &Error) {}

    /// A track's first frame is about to reach the output.
    fn rendering_will_start(&self, track: TrackId, at: Timestamp) {}

    /// A track's final frame is about to reach the output.
    fn rendering_will_complete(&self, track: TrackId, at: Timestamp) {}

    /// The next track cannot play gaplessly; the sink is about to be
    /// reconfigured from `current` to `next`.
    fn format_mismatch(&self, current: &AudioFormat, next: &AudioFormat) {}

    /// The final queued track finished rendering.
    fn end_of_audio(&self) {}

    /// The playback state changed.
    fn state_changed(&self, state: PlaybackState) {}
}

/// Gapless audio player.
///
/// Owns the decoding and event threads, the ring buffer and the sink. All
/// methods are callable from any thread.
pub struct Player {
    core: Arc<PlayerCore>,
    decoding_thread: Option<JoinHandle<()>>,
    event_thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Create a player rendering through `sink` with default configuration.
    pub fn new(sink: Box<dyn AudioSink>) -> Result<Self> {
        Self::with_config(sink, PlayerConfig::default())
    }

    /// Create a player with an explicit configuration.
    pub fn with_config(mut sink: Box<dyn AudioSink>, config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        sink.open()?;

        let core = Arc::new_cyclic(|weak: &Weak<PlayerCore>| {
            let weak = weak.clone();
            sink.set_render_callback(Box::new(move |output, frames, timestamp| {
                match weak.upgrade() {
                    Some(core) => core.render(output, frames, timestamp),
                    None => {
                        output.empty();
                        output.fill_silence(0, frames);
                        RenderOutcome {
                            frames,
                            is_silence: true,
                        }
                    }
                }
            }));
            PlayerCore::new(config, sink)
        });

        let decoding_thread = {
            let core = Arc::clone(&core);
            std::thread::Builder::new()
                .name("gapless-decoding".into())
                .spawn(move || run_decoding_loop(&core))
                .map_err(|e| Error::Internal(format!("failed to spawn decoding thread: {e}")))?
        };
        let event_thread = {
            let core = Arc::clone(&core);
            std::thread::Builder::new()
                .name("gapless-events".into())
                .spawn(move || run_event_loop(&core))
                .map_err(|e| Error::Internal(format!("failed to spawn event thread: {e}")))?
        };

        Ok(Player {
            core,
            decoding_thread: Some(decoding_thread),
            event_thread: Some(event_thread),
        })
    }

    /// Install the observer receiving lifecycle notifications.
    pub fn set_observer(&self, observer: Arc<dyn PlayerObserver>) {
        *self.core.observer.lock() = Some(observer);
    }

    /// The configuration this player was built with.
    pub fn config(&self) -> &PlayerConfig {
        &self.core.config
    }

    // ========================================================================
    // Playlist management

    /// Append a decoder to the playback queue.
    ///
    /// The decoder is opened eagerly if necessary, so format problems
    /// surface here rather than asynchronously.
    pub fn enqueue(&self, decoder: Box<dyn Decoder>) -> Result<TrackId> {
        self.core.enqueue_decoder(decoder, false)
    }

    /// Cancel whatever is playing and queued, and play `decoder` next.
    pub fn play_now(&self, decoder: Box<dyn Decoder>) -> Result<TrackId> {
        self.core.enqueue_decoder(decoder, true)
    }

    /// Abandon the current track and continue with the next one.
    pub fn skip_to_next_track(&self) -> Result<()> {
        self.core.skip_to_next_track()
    }

    /// Remove all queued decoders that have not started decoding.
    pub fn clear_queue(&self) {
        self.core.clear_queue();
    }

    /// Whether the decoder queue is empty.
    pub fn queue_is_empty(&self) -> bool {
        self.core.queue_is_empty()
    }

    /// Whether a stream of `format` would continue gaplessly if enqueued
    /// now.
    pub fn will_be_gapless(&self, format: &AudioFormat, layout: Option<&ChannelLayout>) -> bool {
        self.core.will_be_gapless(format, layout)
    }

    // ========================================================================
    // Playback control

    /// Request playback. If the ring buffer is still priming the player
    /// reports [`PlaybackState::Pending`] until the decoding thread starts
    /// the sink.
    pub fn play(&self) -> Result<()> {
        self.core.play()
    }

    /// Stop sending audio to the sink, keeping all positions. Decoding
    /// continues until the ring buffer fills.
    pub fn pause(&self) -> Result<()> {
        self.core.pause()
    }

    /// Resume playback after [`pause`](Self::pause).
    pub fn resume(&self) -> Result<()> {
        self.core.resume()
    }

    /// Stop playback, cancel all active decoders, flush the ring buffer and
    /// clear the queue.
    pub fn stop(&self) -> Result<()> {
        self.core.stop()
    }

    /// [`play`](Self::play) when stopped or paused, [`pause`](Self::pause)
    /// when playing.
    pub fn toggle_play_pause(&self) -> Result<()> {
        if self.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    // ========================================================================
    // Player state

    /// The current playback state.
    pub fn playback_state(&self) -> PlaybackState {
        self.core.playback_state()
    }

    /// Whether audio is being sent to the sink.
    pub fn is_playing(&self) -> bool {
        self.playback_state() == PlaybackState::Playing
    }

    /// Whether a track is active with the sink stopped.
    pub fn is_paused(&self) -> bool {
        self.playback_state() == PlaybackState::Paused
    }

    /// Whether a play request is waiting for the ring buffer to prime.
    pub fn is_pending(&self) -> bool {
        self.playback_state() == PlaybackState::Pending
    }

    /// Whether no decoder is active.
    pub fn is_stopped(&self) -> bool {
        self.playback_state() == PlaybackState::Stopped
    }

    /// The track whose audio is currently reaching the output, if any.
    pub fn now_playing(&self) -> Option<TrackId> {
        *self.core.now_playing.lock()
    }

    /// The first active track in timeline order: the one playing, or the
    /// one that will play next.
    pub fn current_track(&self) -> Option<TrackId> {
        self.core.first_active_state().map(|state| TrackId(state.sequence))
    }

    /// Frame-accurate position within the current track.
    pub fn playback_position(&self) -> Option<PlaybackPosition> {
        self.core.playback_position()
    }

    /// Time-based position within the current track.
    pub fn playback_time(&self) -> Option<PlaybackTime> {
        self.core.playback_time()
    }

    /// Position and time in one consistent-enough snapshot.
    pub fn playback_position_and_time(&self) -> Option<(PlaybackPosition, PlaybackTime)> {
        Some((self.playback_position()?, self.playback_time()?))
    }

    /// Engine health counters.
    pub fn statistics(&self) -> PlayerStatistics {
        self.core.statistics()
    }

    // ========================================================================
    // Seeking

    /// Whether the current track supports seeking.
    pub fn supports_seeking(&self) -> bool {
        self.core.supports_seeking()
    }

    /// Seek to `frame` within the current track. Validation is synchronous;
    /// the seek itself executes on the decoding thread. A target beyond the
    /// current track lands in the matching buffered track, abandoning the
    /// ones in between.
    pub fn seek_to_frame(&self, frame: i64) -> Result<()> {
        self.core.seek_to_track_frame(frame)
    }

    /// Seek to a time within the current track.
    pub fn seek_to_time(&self, seconds: f64) -> Result<()> {
        self.core.seek_to_time(seconds)
    }

    /// Seek to a relative position (0.0 to 1.0) within the current track.
    pub fn seek_to_position(&self, position: f64) -> Result<()> {
        self.core.seek_to_position(position)
    }

    /// Seek forward by `seconds`.
    pub fn seek_forward(&self, seconds: f64) -> Result<()> {
        self.core.seek_by_seconds(seconds.abs())
    }

    /// Seek backward by `seconds`.
    pub fn seek_backward(&self, seconds: f64) -> Result<()> {
        self.core.seek_by_seconds(-seconds.abs())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.core.stop();
        self.core.request_shutdown();
        if let Some(thread) = self.decoding_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.event_thread.take() {
            let _ = thread.join();
        }
        let mut engine = self.core.engine.lock();
        let _ = engine.sink.close();
    }
}
