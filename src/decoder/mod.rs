//! Decoder interface
//!
//! A [`Decoder`] turns a byte source in some container format into frames of
//! audio in its declared output format. The engine consumes decoders only
//! through this trait; the `wav` feature ships a reference implementation.

use crate::buffer::BufferList;
use crate::format::{AudioFormat, ChannelLayout};
use crate::Result;

#[cfg(feature = "wav")]
mod wav;
#[cfg(feature = "wav")]
pub use wav::WavDecoder;

/// Frame count reported when a decoder cannot determine its length or
/// position.
pub const UNKNOWN_FRAME_COUNT: i64 = -1;

/// Decodes audio from a source into a stream of non-interleaved frames.
///
/// Frame counters are in the decoder's own timeline: frame 0 is the first
/// frame of the stream regardless of where it lands in the engine's global
/// rendered-frame timeline.
pub trait Decoder: Send {
    /// Open the decoder and its underlying source. Reading the stream
    /// parameters happens here; `source_format` and `output_format` are only
    /// meaningful afterwards.
    fn open(&mut self) -> Result<()>;

    /// Close the decoder and release the source.
    fn close(&mut self) -> Result<()>;

    /// Whether the decoder has been opened.
    fn is_open(&self) -> bool;

    /// The native format of the source stream.
    fn source_format(&self) -> AudioFormat;

    /// The format frames are delivered in. Must be non-interleaved.
    fn output_format(&self) -> AudioFormat;

    /// The stream's channel layout, if one is declared.
    fn channel_layout(&self) -> Option<ChannelLayout> {
        None
    }

    /// Total frames in the stream, or [`UNKNOWN_FRAME_COUNT`].
    fn total_frames(&self) -> i64;

    /// The next frame `read_audio` will produce.
    fn current_frame(&self) -> i64;

    /// Whether `seek_to_frame` is supported.
    fn supports_seeking(&self) -> bool {
        false
    }

    /// Seek so the next read produces `frame`. Returns the frame actually
    /// positioned to, or -1 on failure.
    fn seek_to_frame(&mut self, _frame: i64) -> i64 {
        -1
    }

    /// Decode up to `frame_count` frames into `buffer`.
    ///
    /// Returns the number of frames decoded; `Ok(0)` means end of stream.
    /// Short reads within the stream are permitted. The buffer's fill levels
    /// are set to the decoded length.
    fn read_audio(&mut self, buffer: &mut BufferList, frame_count: u32) -> Result<u32>;

    /// Frames between the current position and the end of the stream, or
    /// [`UNKNOWN_FRAME_COUNT`] when the length is unknown.
    fn frames_remaining(&self) -> i64 {
        let total = self.total_frames();
        if total < 0 {
            UNKNOWN_FRAME_COUNT
        } else {
            total - self.current_frame()
        }
    }
}

impl std::fmt::Debug for dyn Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("output_format", &self.output_format())
            .field("total_frames", &self.total_frames())
            .field("current_frame", &self.current_frame())
            .finish()
    }
}
