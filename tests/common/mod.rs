//! Shared fixtures for the integration tests: a deterministic synthetic
//! decoder, a manually driven sink and an event-recording observer.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use gapless::{
    AudioFormat, AudioSink, BufferList, ChannelLayout, Decoder, Error, PlaybackState,
    PlayerObserver, RenderCallback, RenderOutcome, Result, Timestamp, TrackId,
};

/// The sample a synthetic decoder produces for a given frame and channel.
/// Values stay well below 2^24, so they are exact in f32.
pub fn sample_value(frame: i64, channel: u32) -> f32 {
    (frame * 8 + channel as i64) as f32
}

/// A decoder producing deterministic samples, optionally failing or
/// refusing to seek.
pub struct SyntheticDecoder {
    format: AudioFormat,
    total: i64,
    position: i64,
    open: bool,
    seekable: bool,
    fail_at: Option<i64>,
}

impl SyntheticDecoder {
    pub fn new(sample_rate: f64, channels: u32, total_frames: i64) -> Self {
        SyntheticDecoder {
            format: AudioFormat::pcm_f32(sample_rate, channels),
            total: total_frames,
            position: 0,
            open: false,
            seekable: true,
            fail_at: None,
        }
    }

    pub fn unseekable(mut self) -> Self {
        self.seekable = false;
        self
    }

    /// Fail with an IO error once `frame` frames have been decoded.
    pub fn failing_at(mut self, frame: i64) -> Self {
        self.fail_at = Some(frame);
        self
    }
}

impl Decoder for SyntheticDecoder {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn source_format(&self) -> AudioFormat {
        self.format
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn channel_layout(&self) -> Option<ChannelLayout> {
        Some(ChannelLayout::default_for_channels(self.format.channels))
    }

    fn total_frames(&self) -> i64 {
        self.total
    }

    fn current_frame(&self) -> i64 {
        self.position
    }

    fn supports_seeking(&self) -> bool {
        self.seekable
    }

    fn seek_to_frame(&mut self, frame: i64) -> i64 {
        if !self.seekable || frame < 0 || frame > self.total {
            return -1;
        }
        self.position = frame;
        frame
    }

    fn read_audio(&mut self, buffer: &mut BufferList, frame_count: u32) -> Result<u32> {
        if !self.open {
            return Err(Error::DecoderInit("decoder is not open".into()));
        }
        if let Some(fail_at) = self.fail_at {
            if self.position >= fail_at {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("synthetic read failure at frame {fail_at}"),
                )));
            }
        }

        let mut count = (frame_count as i64)
            .min(self.total - self.position)
            .min(buffer.capacity_frames() as i64)
            .max(0);
        if let Some(fail_at) = self.fail_at {
            count = count.min(fail_at - self.position);
        }

        buffer.empty();
        for channel in 0..self.format.channels {
            let samples: Vec<f32> = (0..count)
                .map(|i| sample_value(self.position + i, channel))
                .collect();
            buffer.write_f32(channel as usize, 0, &samples);
        }
        buffer.set_frame_len(count as usize);
        self.position += count;
        Ok(count as u32)
    }
}

// ============================================================================
// Manually driven sink

#[derive(Default)]
struct SinkShared {
    callback: Mutex<Option<RenderCallback>>,
    running: AtomicBool,
    opened: AtomicBool,
    format: Mutex<Option<AudioFormat>>,
    formats_seen: Mutex<Vec<AudioFormat>>,
    starts: AtomicU64,
    stops: AtomicU64,
    clock_nanos: AtomicU64,
}

/// The [`AudioSink`] half handed to the player.
pub struct ManualSink {
    shared: Arc<SinkShared>,
}

/// The test's half: drives the render callback explicitly.
#[derive(Clone)]
pub struct SinkHandle {
    shared: Arc<SinkShared>,
}

/// Create a sink whose "real-time thread" is the test itself.
pub fn manual_sink() -> (Box<dyn AudioSink>, SinkHandle) {
    let shared = Arc::new(SinkShared::default());
    (
        Box::new(ManualSink {
            shared: Arc::clone(&shared),
        }),
        SinkHandle { shared },
    )
}

impl AudioSink for ManualSink {
    fn open(&mut self) -> Result<()> {
        self.shared.opened.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.opened.store(false, Ordering::Release);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.shared.format.lock().is_none() {
            return Err(Error::Sink("no format configured".into()));
        }
        self.shared.running.store(true, Ordering::Release);
        self.shared.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.stops.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn set_format(&mut self, format: &AudioFormat) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Err(Error::Sink("cannot change format while running".into()));
        }
        if format.interleaved {
            return Err(Error::UnsupportedFormat(
                "manual sink renders non-interleaved audio only".into(),
            ));
        }
        *self.shared.format.lock() = Some(*format);
        self.shared.formats_seen.lock().push(*format);
        Ok(())
    }

    fn set_render_callback(&mut self, callback: RenderCallback) {
        *self.shared.callback.lock() = Some(callback);
    }

    fn preferred_buffer_size(&self) -> usize {
        512
    }
}

impl SinkHandle {
    /// Invoke the render callback for `frames` frames, as the sink's
    /// real-time thread would. Returns `None` while the sink is stopped.
    pub fn render(&self, frames: usize) -> Option<(BufferList, RenderOutcome)> {
        if !self.shared.running.load(Ordering::Acquire) {
            return None;
        }
        let format = (*self.shared.format.lock())?;
        let mut output = BufferList::new(format, frames).ok()?;

        let step = (frames as f64 / format.sample_rate * 1e9) as u64;
        let nanos = self.shared.clock_nanos.fetch_add(step, Ordering::Relaxed);

        let mut callback = self.shared.callback.lock();
        let callback = callback.as_mut()?;
        let outcome = callback(&mut output, frames, Timestamp::from_nanos(nanos));
        Some((output, outcome))
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn start_count(&self) -> u64 {
        self.shared.starts.load(Ordering::Relaxed)
    }

    pub fn stop_count(&self) -> u64 {
        self.shared.stops.load(Ordering::Relaxed)
    }

    pub fn sample_rates_configured(&self) -> Vec<f64> {
        self.shared
            .formats_seen
            .lock()
            .iter()
            .map(|format| format.sample_rate)
            .collect()
    }
}

// ============================================================================
// Recording observer

/// Everything an observer can be told, with timestamps stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DecodingStarted(TrackId),
    DecodingComplete(TrackId),
    Canceled(TrackId),
    DecodingError(TrackId),
    RenderingStarted(TrackId),
    RenderingComplete(TrackId),
    FormatMismatch { current: f64, next: f64 },
    EndOfAudio,
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
    states: Mutex<Vec<PlaybackState>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn states(&self) -> Vec<PlaybackState> {
        self.states.lock().clone()
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.events.lock().contains(event)
    }

    /// Position of `event` in the recorded stream, if it occurred.
    pub fn index_of(&self, event: &Event) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}

impl PlayerObserver for RecordingObserver {
    fn decoding_started(&self, track: TrackId) {
        self.events.lock().push(Event::DecodingStarted(track));
    }

    fn decoding_complete(&self, track: TrackId) {
        self.events.lock().push(Event::DecodingComplete(track));
    }

    fn decoder_canceled(&self, track: TrackId) {
        self.events.lock().push(Event::Canceled(track));
    }

    fn decoding_error(&self, track: TrackId, _error: &Error) {
        self.events.lock().push(Event::DecodingError(track));
    }

    fn rendering_will_start(&self, track: TrackId, _at: Timestamp) {
        self.events.lock().push(Event::RenderingStarted(track));
    }

    fn rendering_will_complete(&self, track: TrackId, _at: Timestamp) {
        self.events.lock().push(Event::RenderingComplete(track));
    }

    fn format_mismatch(&self, current: &AudioFormat, next: &AudioFormat) {
        self.events.lock().push(Event::FormatMismatch {
            current: current.sample_rate,
            next: next.sample_rate,
        });
    }

    fn end_of_audio(&self) {
        self.events.lock().push(Event::EndOfAudio);
    }

    fn state_changed(&self, state: PlaybackState) {
        self.states.lock().push(state);
    }
}

// ============================================================================
// Pumping helpers

/// Drive the sink until `done` returns true or `timeout` elapses. While the
/// sink is stopped this just waits; the decoding and event threads keep
/// running either way.
pub fn pump_until(
    handle: &SinkHandle,
    frames: usize,
    timeout: Duration,
    mut done: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        if handle.render(frames).is_none() {
            std::thread::sleep(Duration::from_millis(2));
        } else {
            std::thread::sleep(Duration::from_micros(500));
        }
    }
    done()
}

/// Wait for a condition without driving the sink.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

/// Default pump timeout, generous enough for debug builds.
pub const PUMP_TIMEOUT: Duration = Duration::from_secs(20);
