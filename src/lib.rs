//! Gapless audio playback engine
//!
//! A producer/consumer pipeline that moves decoded audio from arbitrary
//! [`Decoder`] implementations through a lock-free ring buffer to a
//! real-time [`AudioSink`], with a playback state machine coordinating
//! decoding, rendering, seeking and gapless track transitions.
//!
//! # Architecture
//! - A dedicated decoding thread reads audio from decoders in chunks and
//!   writes it, deinterleaved, into a single-producer/single-consumer ring
//!   buffer sized in whole frames.
//! - The sink's real-time thread pulls audio through a render callback that
//!   never blocks, locks, allocates or logs; missing audio is zero-padded.
//! - Lifecycle progress (decoding started/complete, rendering start/end,
//!   frames rendered) travels as binary records over two more SPSC rings to
//!   an event thread, which invokes the installed [`PlayerObserver`].
//! - Consecutive tracks with compatible formats play gaplessly; otherwise
//!   the sink is stopped, reconfigured and restarted.
//!
//! # Crate feature flags
//! - `streaming` (opt-in): rodio-backed [`RodioSink`](sink::RodioSink) for
//!   playing through the system output device (enables optional `rodio`
//!   dep)
//! - `wav` (opt-in): hound-backed reference [`WavDecoder`](decoder::WavDecoder)
//!   for RIFF/WAVE streams (enables optional `hound` dep)
//!
//! # Quick start
//! ```no_run
//! # #[cfg(all(feature = "streaming", feature = "wav"))]
//! # fn main() -> gapless::Result<()> {
//! use gapless::decoder::WavDecoder;
//! use gapless::sink::RodioSink;
//! use gapless::source::FileInputSource;
//! use gapless::Player;
//!
//! let player = Player::new(Box::new(RodioSink::new()))?;
//! let source = Box::new(FileInputSource::new("intro.wav"));
//! player.enqueue(Box::new(WavDecoder::new(source)))?;
//! player.play()?;
//! # Ok(())
//! # }
//! # #[cfg(not(all(feature = "streaming", feature = "wav")))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]

pub mod buffer;
pub mod decoder;
pub mod format;
pub mod player;
pub mod ring;
pub mod sink;
pub mod source;
pub mod sync;

/// Error types for playback engine operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO error from an input source or decoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink cannot be configured for a stream's format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A decoder failed to open
    #[error("Decoder error: {0}")]
    DecoderInit(String),

    /// Audio sink error
    #[error("Audio sink error: {0}")]
    Sink(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Internal engine error (diagnostics only)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Result type for playback engine operations
pub type Result<T> = std::result::Result<T, Error>;

// Public API exports
pub use buffer::BufferList;
pub use decoder::Decoder;
pub use format::{AudioFormat, ChannelLayout, FormatId};
pub use player::{
    negotiate_transition, PlaybackPosition, PlaybackState, PlaybackTime, Player, PlayerConfig,
    PlayerObserver, PlayerStatistics, TrackId, Transition,
};
pub use ring::{AudioRingBuffer, ByteRingBuffer};
pub use sink::{AudioSink, RenderCallback, RenderOutcome, Timestamp};
pub use source::InputSource;
