//! Non-interleaved audio buffers
//!
//! A [`BufferList`] owns one equally-sized byte buffer per channel together
//! with a byte fill level per buffer, mirroring the shape of audio handed to
//! and from decoders and the ring buffer.

use crate::format::AudioFormat;
use crate::{Error, Result};

/// A single channel's storage inside a [`BufferList`].
#[derive(Debug)]
pub struct ChannelBuffer {
    data: Vec<u8>,
    byte_len: usize,
}

impl ChannelBuffer {
    fn with_capacity(capacity_bytes: usize) -> Self {
        ChannelBuffer {
            data: vec![0; capacity_bytes],
            byte_len: 0,
        }
    }

    /// Valid bytes currently held.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// The valid prefix of this channel's data.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.byte_len]
    }

    /// The full backing storage, regardless of fill level.
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the full backing storage.
    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set the number of valid bytes.
    ///
    /// Clamped to the buffer capacity.
    pub fn set_byte_len(&mut self, byte_len: usize) {
        self.byte_len = byte_len.min(self.data.len());
    }
}

/// A set of per-channel byte buffers with individual fill levels.
///
/// Only non-interleaved formats are representable; after every complete
/// write all fill levels are equal.
#[derive(Debug)]
pub struct BufferList {
    format: AudioFormat,
    capacity_frames: usize,
    buffers: Vec<ChannelBuffer>,
}

impl BufferList {
    /// Allocate a buffer list holding `capacity_frames` frames of `format`.
    ///
    /// Fails for interleaved formats.
    pub fn new(format: AudioFormat, capacity_frames: usize) -> Result<Self> {
        if format.interleaved {
            return Err(Error::Config(
                "buffer lists hold non-interleaved audio only".into(),
            ));
        }
        if format.channels == 0 || capacity_frames == 0 {
            return Err(Error::Config(
                "buffer list requires at least one channel and one frame".into(),
            ));
        }

        let capacity_bytes = format.frames_to_bytes(capacity_frames);
        let buffers = (0..format.channels)
            .map(|_| ChannelBuffer::with_capacity(capacity_bytes))
            .collect();

        Ok(BufferList {
            format,
            capacity_frames,
            buffers,
        })
    }

    /// The format this buffer list was allocated for.
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Capacity in frames per channel.
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Number of channel buffers.
    pub fn channel_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of valid frames, derived from the first channel's fill level.
    pub fn frame_len(&self) -> usize {
        self.buffers
            .first()
            .map(|b| self.format.bytes_to_frames(b.byte_len()))
            .unwrap_or(0)
    }

    /// Mark every channel full, in preparation for reading into it.
    pub fn reset(&mut self) {
        let capacity_bytes = self.format.frames_to_bytes(self.capacity_frames);
        for buffer in &mut self.buffers {
            buffer.set_byte_len(capacity_bytes);
        }
    }

    /// Mark every channel empty.
    pub fn empty(&mut self) {
        for buffer in &mut self.buffers {
            buffer.set_byte_len(0);
        }
    }

    /// Set every channel's fill level to `frames` frames.
    pub fn set_frame_len(&mut self, frames: usize) {
        let byte_len = self.format.frames_to_bytes(frames.min(self.capacity_frames));
        for buffer in &mut self.buffers {
            buffer.set_byte_len(byte_len);
        }
    }

    /// Zero `frames` frames starting at `offset_frames` in every channel and
    /// extend the fill level to cover them.
    pub fn fill_silence(&mut self, offset_frames: usize, frames: usize) {
        let start = self
            .format
            .frames_to_bytes(offset_frames.min(self.capacity_frames));
        let end = self
            .format
            .frames_to_bytes((offset_frames + frames).min(self.capacity_frames));
        for buffer in &mut self.buffers {
            buffer.raw_mut()[start..end].fill(0);
            if buffer.byte_len() < end {
                buffer.set_byte_len(end);
            }
        }
    }

    /// Discard the first `frames` frames, shifting the remainder of every
    /// channel to the front and shrinking the fill levels accordingly.
    pub fn drop_front(&mut self, frames: usize) {
        let drop_bytes = self.format.frames_to_bytes(frames);
        for buffer in &mut self.buffers {
            let len = buffer.byte_len();
            if drop_bytes >= len {
                buffer.set_byte_len(0);
                continue;
            }
            buffer.raw_mut().copy_within(drop_bytes..len, 0);
            buffer.set_byte_len(len - drop_bytes);
        }
    }

    /// Borrow a channel.
    pub fn channel(&self, index: usize) -> &ChannelBuffer {
        &self.buffers[index]
    }

    /// Mutably borrow a channel.
    pub fn channel_mut(&mut self, index: usize) -> &mut ChannelBuffer {
        &mut self.buffers[index]
    }

    /// Iterate over the channels.
    pub fn channels(&self) -> impl Iterator<Item = &ChannelBuffer> {
        self.buffers.iter()
    }

    /// Mutably iterate over the channels.
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut ChannelBuffer> {
        self.buffers.iter_mut()
    }

    /// View a channel's valid samples as `f32`.
    ///
    /// Only meaningful for the canonical 32-bit float format; returns an
    /// empty slice when the sample width does not match.
    pub fn channel_f32(&self, index: usize) -> &[f32] {
        let buffer = &self.buffers[index];
        if self.format.bytes_per_frame != 4 {
            return &[];
        }
        let bytes = buffer.bytes();
        // Vec<u8> data is not guaranteed 4-byte aligned; fall back to an
        // empty slice rather than a misaligned reinterpretation.
        let (prefix, samples, _) = unsafe { bytes.align_to::<f32>() };
        if prefix.is_empty() {
            samples
        } else {
            &[]
        }
    }

    /// Copy `frames` frames of f32 samples into a channel and extend its
    /// fill level accordingly. Samples beyond the capacity are dropped.
    pub fn write_f32(&mut self, index: usize, offset_frames: usize, samples: &[f32]) {
        debug_assert_eq!(self.format.bytes_per_frame, 4);
        let capacity = self.capacity_frames;
        let buffer = &mut self.buffers[index];
        let mut offset = offset_frames * 4;
        let mut written_end = offset;
        for &sample in samples.iter().take(capacity.saturating_sub(offset_frames)) {
            buffer.raw_mut()[offset..offset + 4].copy_from_slice(&sample.to_ne_bytes());
            offset += 4;
            written_end = offset;
        }
        if buffer.byte_len() < written_end {
            buffer.set_byte_len(written_end);
        }
    }
}
