//! Rodio-backed audio sink
//!
//! Rodio output streams are not `Send`, so the device is owned by a
//! dedicated control thread; [`RodioSink`] itself only carries the command
//! channel and shared state. Audio is pulled by a rodio `Source` that
//! refills an interleaved chunk through the registered render callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rodio::{OutputStream, Sink, Source};

use crate::buffer::BufferList;
use crate::format::{AudioFormat, FormatId};
use crate::sink::{AudioSink, RenderCallback, Timestamp};
use crate::{Error, Result};

/// Pull size per render callback invocation, in frames.
const PULL_CHUNK_FRAMES: usize = 1024;

enum Command {
    Start(AudioFormat),
    Stop,
    Shutdown,
}

/// An [`AudioSink`] that plays through the system's default output device
/// via rodio.
///
/// Only the engine's canonical format (non-interleaved 32-bit float PCM) is
/// accepted; other families report
/// [`Error::UnsupportedFormat`](crate::Error::UnsupportedFormat).
pub struct RodioSink {
    callback: Arc<Mutex<Option<RenderCallback>>>,
    running: Arc<AtomicBool>,
    format: Option<AudioFormat>,
    open: bool,
    command_tx: Option<mpsc::Sender<Command>>,
    reply_rx: Option<mpsc::Receiver<Result<()>>>,
    control: Option<JoinHandle<()>>,
}

impl RodioSink {
    /// Create a sink for the default output device.
    pub fn new() -> Self {
        RodioSink {
            callback: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            format: None,
            open: false,
            command_tx: None,
            reply_rx: None,
            control: None,
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        let tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| Error::Sink("sink is not open".into()))?;
        tx.send(command)
            .map_err(|_| Error::Sink("sink control thread is gone".into()))?;
        self.reply_rx
            .as_ref()
            .expect("reply channel exists whenever the command channel does")
            .recv()
            .map_err(|_| Error::Sink("sink control thread is gone".into()))?
    }

    fn control_loop(
        commands: mpsc::Receiver<Command>,
        replies: mpsc::Sender<Result<()>>,
        callback: Arc<Mutex<Option<RenderCallback>>>,
        running: Arc<AtomicBool>,
    ) {
        // Held alive between Start and Stop; dropped to stop playback.
        let mut device: Option<(OutputStream, Sink)> = None;

        while let Ok(command) = commands.recv() {
            let reply = match command {
                Command::Start(format) => match Self::start_device(&format, &callback, &running) {
                    Ok(started) => {
                        device = Some(started);
                        running.store(true, Ordering::Release);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Command::Stop => {
                    running.store(false, Ordering::Release);
                    drop(device.take());
                    Ok(())
                }
                Command::Shutdown => {
                    running.store(false, Ordering::Release);
                    drop(device.take());
                    let _ = replies.send(Ok(()));
                    break;
                }
            };
            if replies.send(reply).is_err() {
                break;
            }
        }
    }

    fn start_device(
        format: &AudioFormat,
        callback: &Arc<Mutex<Option<RenderCallback>>>,
        running: &Arc<AtomicBool>,
    ) -> Result<(OutputStream, Sink)> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| Error::Sink(format!("failed to open output stream: {e}")))?;
        let sink =
            Sink::try_new(&handle).map_err(|e| Error::Sink(format!("failed to create sink: {e}")))?;

        let source = PullSource::new(*format, Arc::clone(callback), Arc::clone(running))?;
        sink.append(source);
        sink.play();
        Ok((stream, sink))
    }
}

impl Default for RodioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for RodioSink {
    fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let callback = Arc::clone(&self.callback);
        let running = Arc::clone(&self.running);
        let control = std::thread::Builder::new()
            .name("gapless-rodio".into())
            .spawn(move || Self::control_loop(command_rx, reply_tx, callback, running))
            .map_err(|e| Error::Sink(format!("failed to spawn sink thread: {e}")))?;

        self.command_tx = Some(command_tx);
        self.reply_rx = Some(reply_rx);
        self.control = Some(control);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        let _ = self.send(Command::Shutdown);
        self.command_tx = None;
        self.reply_rx = None;
        if let Some(control) = self.control.take() {
            let _ = control.join();
        }
        self.open = false;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let format = self
            .format
            .ok_or_else(|| Error::Sink("no format configured".into()))?;
        self.send(Command::Start(format))
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.send(Command::Stop)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_format(&mut self, format: &AudioFormat) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(Error::Sink("cannot change format while running".into()));
        }
        if format.format_id != FormatId::Pcm
            || !format.is_float
            || format.bits_per_channel != 32
            || format.interleaved
        {
            return Err(Error::UnsupportedFormat(format!(
                "rodio sink renders non-interleaved float PCM only, got {format}"
            )));
        }
        self.format = Some(*format);
        Ok(())
    }

    fn set_render_callback(&mut self, callback: RenderCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn preferred_buffer_size(&self) -> usize {
        PULL_CHUNK_FRAMES
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Rodio source pulling interleaved f32 chunks through the render callback.
struct PullSource {
    format: AudioFormat,
    callback: Arc<Mutex<Option<RenderCallback>>>,
    running: Arc<AtomicBool>,
    scratch: BufferList,
    chunk: Vec<f32>,
    position: usize,
    epoch: Instant,
}

impl PullSource {
    fn new(
        format: AudioFormat,
        callback: Arc<Mutex<Option<RenderCallback>>>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let scratch = BufferList::new(format, PULL_CHUNK_FRAMES)?;
        Ok(PullSource {
            format,
            callback,
            running,
            scratch,
            chunk: vec![0.0; PULL_CHUNK_FRAMES * format.channels as usize],
            position: usize::MAX,
            epoch: Instant::now(),
        })
    }

    fn refill(&mut self) {
        let timestamp = Timestamp::from_nanos(self.epoch.elapsed().as_nanos() as u64);

        let mut callback = self.callback.lock();
        let outcome = callback
            .as_mut()
            .map(|cb| cb(&mut self.scratch, PULL_CHUNK_FRAMES, timestamp));
        drop(callback);

        match outcome {
            Some(outcome) if !outcome.is_silence => {
                let channels = self.format.channels as usize;
                for channel in 0..channels {
                    let samples = self.scratch.channel_f32(channel);
                    for (frame, &sample) in samples.iter().take(PULL_CHUNK_FRAMES).enumerate() {
                        self.chunk[frame * channels + channel] = sample;
                    }
                }
            }
            _ => self.chunk.fill(0.0),
        }
        self.position = 0;
    }
}

impl Iterator for PullSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        if self.position >= self.chunk.len() {
            self.refill();
        }
        let sample = self.chunk[self.position];
        self.position += 1;
        Some(sample)
    }
}

impl Source for PullSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.chunk.len())
    }

    fn channels(&self) -> u16 {
        self.format.channels as u16
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate as u32
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
