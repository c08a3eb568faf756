//! Lifecycle events and the event processing thread
//!
//! The decoding thread and the render callback report lifecycle progress as
//! small binary records over two SPSC byte rings. Each record is a
//! little-endian `u32` command followed by a command-specific payload, and
//! is written atomically (`write_all`), so the consumer never observes a
//! torn record. The event thread drains both rings and turns records into
//! observer callbacks, decoder-state cleanup and the Pending-to-Playing /
//! auto-stop transitions.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::sink::Timestamp;
use crate::{Error, TrackId};

use super::core::PlayerCore;
use super::PlaybackState;

/// Events produced by the decoding thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub(crate) enum DecodingEventCommand {
    /// Decoding started; payload: sequence.
    Started = 1,
    /// Decoding finished normally; payload: sequence.
    Complete = 2,
    /// Decoder canceled; payload: sequence.
    Canceled = 3,
    /// Decoding failed; payload: sequence, error code, message.
    Error = 4,
}

/// Events produced by the render callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub(crate) enum RenderingEventCommand {
    /// Frames were consumed from the ring buffer; payload: count.
    FramesRendered = 1,
    /// A decoder's first frame is about to render; payload: sequence, host
    /// time.
    WillStart = 2,
    /// A decoder's final frame is about to render; payload: sequence, host
    /// time.
    WillComplete = 3,
}

/// Encode a decoding event that carries only a sequence number.
pub(crate) fn encode_sequence_event(command: DecodingEventCommand, sequence: u64) -> [u8; 12] {
    let mut record = [0u8; 12];
    record[..4].copy_from_slice(&(command as u32).to_le_bytes());
    record[4..].copy_from_slice(&sequence.to_le_bytes());
    record
}

/// Encode a decoding error event. Runs on the decoding thread, so the
/// allocation for the message is acceptable.
pub(crate) fn encode_error_event(sequence: u64, error: &Error) -> Vec<u8> {
    let (code, message) = error_to_wire(error);
    let message = message.as_bytes();
    let mut record = Vec::with_capacity(20 + message.len());
    record.extend_from_slice(&(DecodingEventCommand::Error as u32).to_le_bytes());
    record.extend_from_slice(&sequence.to_le_bytes());
    record.extend_from_slice(&code.to_le_bytes());
    record.extend_from_slice(&(message.len() as u32).to_le_bytes());
    record.extend_from_slice(message);
    record
}

/// Encode a frames-rendered event. Stack-only; called from the render
/// callback.
pub(crate) fn encode_frames_rendered(count: u32) -> [u8; 8] {
    let mut record = [0u8; 8];
    record[..4].copy_from_slice(&(RenderingEventCommand::FramesRendered as u32).to_le_bytes());
    record[4..].copy_from_slice(&count.to_le_bytes());
    record
}

/// Encode a rendering lifecycle marker. Stack-only; called from the render
/// callback.
pub(crate) fn encode_render_marker(
    command: RenderingEventCommand,
    sequence: u64,
    timestamp: Timestamp,
) -> [u8; 20] {
    let mut record = [0u8; 20];
    record[..4].copy_from_slice(&(command as u32).to_le_bytes());
    record[4..12].copy_from_slice(&sequence.to_le_bytes());
    record[12..].copy_from_slice(&timestamp.host_time_nanos.to_le_bytes());
    record
}

fn error_to_wire(error: &Error) -> (u32, String) {
    let code = match error {
        Error::Io(_) => 1,
        Error::UnsupportedFormat(_) => 2,
        Error::DecoderInit(_) => 3,
        Error::Sink(_) => 4,
        Error::Config(_) => 5,
        Error::Internal(_) => 6,
        Error::Other(_) => 0,
    };
    (code, error.to_string())
}

fn error_from_wire(code: u32, message: String) -> Error {
    match code {
        1 => Error::Io(std::io::Error::new(std::io::ErrorKind::Other, message)),
        2 => Error::UnsupportedFormat(message),
        3 => Error::DecoderInit(message),
        4 => Error::Sink(message),
        5 => Error::Config(message),
        6 => Error::Internal(message),
        _ => Error::Other(message),
    }
}

/// Sequential reader over a drained event buffer.
struct RecordCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> RecordCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        RecordCursor { bytes, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn read_u32(&mut self) -> Option<u32> {
        let slice = self.bytes.get(self.position..self.position + 4)?;
        self.position += 4;
        Some(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Option<u64> {
        let slice = self.bytes.get(self.position..self.position + 8)?;
        self.position += 8;
        Some(u64::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_bytes(&mut self, length: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.position..self.position + length)?;
        self.position += length;
        Some(slice)
    }
}

/// Entry point of the event processing thread.
pub(crate) fn run_event_loop(core: &PlayerCore) {
    let mut scratch = Vec::with_capacity(core.config.event_ring_bytes);

    loop {
        core.event_sem.wait();
        if core.is_shutting_down() {
            // One final drain so late events are not silently lost.
            drain_decoding_events(core, &mut scratch);
            drain_rendering_events(core, &mut scratch);
            break;
        }

        // Decoding events are drained first: a decoder's DecodingStarted is
        // produced before any of its frames can reach the render callback,
        // so this order preserves per-decoder lifecycle ordering.
        drain_decoding_events(core, &mut scratch);
        drain_rendering_events(core, &mut scratch);
    }
}

fn drain_decoding_events(core: &PlayerCore, scratch: &mut Vec<u8>) {
    let available = core.decoding_events.bytes_available_to_read();
    if available == 0 {
        return;
    }
    scratch.resize(available, 0);
    let read = core.decoding_events.read(scratch);
    scratch.truncate(read);

    let mut cursor = RecordCursor::new(scratch);
    while cursor.remaining() >= 4 {
        let Some(raw) = cursor.read_u32() else { break };
        match DecodingEventCommand::from_u32(raw) {
            Some(DecodingEventCommand::Started) => {
                let Some(sequence) = cursor.read_u64() else { break };
                if let Some(observer) = core.observer() {
                    observer.decoding_started(TrackId(sequence));
                }
            }
            Some(DecodingEventCommand::Complete) => {
                let Some(sequence) = cursor.read_u64() else { break };
                if let Some(observer) = core.observer() {
                    observer.decoding_complete(TrackId(sequence));
                }
            }
            Some(DecodingEventCommand::Canceled) => {
                let Some(sequence) = cursor.read_u64() else { break };
                handle_decoder_canceled(core, sequence);
            }
            Some(DecodingEventCommand::Error) => {
                let Some(sequence) = cursor.read_u64() else { break };
                let Some(code) = cursor.read_u32() else { break };
                let Some(length) = cursor.read_u32() else { break };
                let Some(message) = cursor.read_bytes(length as usize) else { break };
                let error =
                    error_from_wire(code, String::from_utf8_lossy(message).into_owned());
                handle_decoding_error(core, sequence, error);
            }
            None => {
                log::warn!("unknown decoding event command {raw}; dropping remainder");
                break;
            }
        }
    }
}

fn drain_rendering_events(core: &PlayerCore, scratch: &mut Vec<u8>) {
    let available = core.rendering_events.bytes_available_to_read();
    if available == 0 {
        return;
    }
    scratch.resize(available, 0);
    let read = core.rendering_events.read(scratch);
    scratch.truncate(read);

    let mut cursor = RecordCursor::new(scratch);
    while cursor.remaining() >= 4 {
        let Some(raw) = cursor.read_u32() else { break };
        match RenderingEventCommand::from_u32(raw) {
            Some(RenderingEventCommand::FramesRendered) => {
                let Some(_count) = cursor.read_u32() else { break };
                handle_frames_rendered(core);
            }
            Some(RenderingEventCommand::WillStart) => {
                let Some(sequence) = cursor.read_u64() else { break };
                let Some(nanos) = cursor.read_u64() else { break };
                handle_rendering_will_start(core, sequence, Timestamp::from_nanos(nanos));
            }
            Some(RenderingEventCommand::WillComplete) => {
                let Some(sequence) = cursor.read_u64() else { break };
                let Some(nanos) = cursor.read_u64() else { break };
                handle_rendering_will_complete(core, sequence, Timestamp::from_nanos(nanos));
            }
            None => {
                log::warn!("unknown rendering event command {raw}; dropping remainder");
                break;
            }
        }
    }
}

fn handle_decoder_canceled(core: &PlayerCore, sequence: u64) {
    // The decoding thread has already stopped producing for this decoder;
    // drop the control record if rendering never began.
    let mut active = core.active.lock();
    if let Some(index) = active.iter().position(|state| state.sequence == sequence) {
        let slot = core.slots.get(active[index].slot);
        let rendering_started = slot.sequence() == sequence
            && slot
                .flags()
                .contains(super::state::SlotFlags::RENDERING_STARTED);
        if !rendering_started {
            active.remove(index);
        }
    }
    drop(active);

    let mut now_playing = core.now_playing.lock();
    if *now_playing == Some(TrackId(sequence)) {
        *now_playing = None;
    }
    drop(now_playing);

    if let Some(observer) = core.observer() {
        observer.decoder_canceled(TrackId(sequence));
    }
}

fn handle_decoding_error(core: &PlayerCore, sequence: u64, error: Error) {
    log::warn!("decoder {sequence} failed: {error}");
    if let Some(observer) = core.observer() {
        observer.decoding_error(TrackId(sequence), &error);
    }
}

fn handle_frames_rendered(core: &PlayerCore) {
    // Wake the producer whenever it can make progress, or the buffer is
    // running low.
    let writable = core.ring.frames_available_to_write();
    let readable = core.ring.frames_available_to_read();
    if writable >= core.config.ring_buffer_chunk_frames
        || readable < core.config.low_water_mark_frames
    {
        core.decoding_sem.signal();
    }
}

fn handle_rendering_will_start(core: &PlayerCore, sequence: u64, timestamp: Timestamp) {
    *core.now_playing.lock() = Some(TrackId(sequence));
    if let Some(observer) = core.observer() {
        observer.rendering_will_start(TrackId(sequence), timestamp);
    }
}

fn handle_rendering_will_complete(core: &PlayerCore, sequence: u64, timestamp: Timestamp) {
    {
        let mut active = core.active.lock();
        active.retain(|state| state.sequence != sequence);
    }
    {
        let mut now_playing = core.now_playing.lock();
        if *now_playing == Some(TrackId(sequence)) {
            *now_playing = None;
        }
    }

    if let Some(observer) = core.observer() {
        observer.rendering_will_complete(TrackId(sequence), timestamp);
    }

    // Out of audio once nothing is active and nothing is on the way.
    let exhausted = { core.active.lock().is_empty() } && !core.has_upcoming_audio();
    if exhausted {
        core.stop_engine_for_exhaustion();
        if let Some(observer) = core.observer() {
            observer.end_of_audio();
            observer.state_changed(PlaybackState::Stopped);
        }
    } else {
        // Keep the producer moving for the next track.
        core.decoding_sem.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_event_round_trip() {
        let record = encode_sequence_event(DecodingEventCommand::Started, 42);
        let mut cursor = RecordCursor::new(&record);
        assert_eq!(
            DecodingEventCommand::from_u32(cursor.read_u32().unwrap()),
            Some(DecodingEventCommand::Started)
        );
        assert_eq!(cursor.read_u64(), Some(42));
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_error_event_round_trip() {
        let error = Error::UnsupportedFormat("96 kHz DSD".into());
        let record = encode_error_event(7, &error);

        let mut cursor = RecordCursor::new(&record);
        assert_eq!(
            DecodingEventCommand::from_u32(cursor.read_u32().unwrap()),
            Some(DecodingEventCommand::Error)
        );
        assert_eq!(cursor.read_u64(), Some(7));
        let code = cursor.read_u32().unwrap();
        let length = cursor.read_u32().unwrap() as usize;
        let message = String::from_utf8(cursor.read_bytes(length).unwrap().to_vec()).unwrap();

        let restored = error_from_wire(code, message);
        assert!(matches!(restored, Error::UnsupportedFormat(_)));
        assert!(restored.to_string().contains("96 kHz DSD"));
    }

    #[test]
    fn test_render_marker_round_trip() {
        let record = encode_render_marker(
            RenderingEventCommand::WillStart,
            9,
            Timestamp::from_nanos(123_456_789),
        );
        let mut cursor = RecordCursor::new(&record);
        assert_eq!(
            RenderingEventCommand::from_u32(cursor.read_u32().unwrap()),
            Some(RenderingEventCommand::WillStart)
        );
        assert_eq!(cursor.read_u64(), Some(9));
        assert_eq!(cursor.read_u64(), Some(123_456_789));
    }

    #[test]
    fn test_frames_rendered_encoding() {
        let record = encode_frames_rendered(512);
        let mut cursor = RecordCursor::new(&record);
        assert_eq!(
            RenderingEventCommand::from_u32(cursor.read_u32().unwrap()),
            Some(RenderingEventCommand::FramesRendered)
        );
        assert_eq!(cursor.read_u32(), Some(512));
    }
}
