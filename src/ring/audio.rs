//! SPSC ring buffer for non-interleaved audio frames

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::BufferList;
use crate::format::AudioFormat;
use crate::{Error, Result};

use super::next_power_of_two;

/// Per-channel backing storage. `UnsafeCell<u8>` has the same layout as
/// `u8`, so each channel is a plain byte buffer with interior mutability.
struct Storage {
    format: AudioFormat,
    capacity_frames: usize,
    mask: usize,
    channels: Vec<Box<[UnsafeCell<u8>]>>,
}

impl Storage {
    /// Raw pointer to a byte inside a channel buffer.
    ///
    /// # Safety
    /// `channel` and `offset` must be in bounds. The caller must uphold the
    /// ring buffer's SPSC contract so the addressed region is not accessed
    /// concurrently from the other side.
    unsafe fn channel_ptr(&self, channel: usize, offset: usize) -> *mut u8 {
        UnsafeCell::raw_get(self.channels[channel].as_ptr().add(offset))
    }
}

/// A lock-free single-producer / single-consumer ring buffer holding
/// non-interleaved audio frames.
///
/// # Threading
///
/// Exactly one thread may call [`write`](Self::write) (the producer) and
/// exactly one thread may call [`read`](Self::read) (the consumer);
/// [`frames_available_to_read`](Self::frames_available_to_read) and
/// [`frames_available_to_write`](Self::frames_available_to_write) are safe
/// from either side and return consistent snapshots. Neither operation
/// blocks, allocates or spins.
///
/// [`allocate`](Self::allocate) and [`reset`](Self::reset) are *not* thread
/// safe and must only be called while no producer or consumer can touch the
/// buffer (in the engine this is guaranteed by stopping the sink and parking
/// the decoding thread first).
///
/// The capacity is rounded up to the next power of two and one slot is
/// reserved to distinguish full from empty, so `capacity - 1` frames are
/// usable; `frames_available_to_write` already accounts for the reserved
/// slot.
pub struct AudioRingBuffer {
    storage: UnsafeCell<Option<Storage>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// SAFETY: the SPSC contract documented on the type confines each mutable
// region to a single thread at a time; position hand-off uses
// Release/Acquire pairs on `write_pos`/`read_pos`.
unsafe impl Send for AudioRingBuffer {}
unsafe impl Sync for AudioRingBuffer {}

impl Default for AudioRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioRingBuffer {
    /// Create an unallocated ring buffer. [`allocate`](Self::allocate) must
    /// be called before any audio can pass through it.
    pub fn new() -> Self {
        AudioRingBuffer {
            storage: UnsafeCell::new(None),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Allocate storage for `capacity_frames` frames of `format`, replacing
    /// any previous allocation and zeroing the positions.
    ///
    /// Only non-interleaved formats are supported. Not thread safe; see the
    /// type-level threading contract.
    pub fn allocate(&self, format: AudioFormat, capacity_frames: usize) -> Result<()> {
        if format.interleaved {
            return Err(Error::Config(
                "audio ring buffer requires a non-interleaved format".into(),
            ));
        }
        if format.channels == 0 || capacity_frames == 0 {
            return Err(Error::Config(
                "audio ring buffer requires at least one channel and one frame".into(),
            ));
        }

        let capacity_frames = next_power_of_two(capacity_frames);
        let capacity_bytes = format.frames_to_bytes(capacity_frames);

        let channels = (0..format.channels)
            .map(|_| {
                let mut buffer = Vec::with_capacity(capacity_bytes);
                buffer.resize_with(capacity_bytes, || UnsafeCell::new(0));
                buffer.into_boxed_slice()
            })
            .collect();

        // SAFETY: per the allocate contract no other thread is accessing the
        // buffer, so replacing the storage and resetting positions races
        // with nothing.
        unsafe {
            *self.storage.get() = Some(Storage {
                format,
                capacity_frames,
                mask: capacity_frames - 1,
                channels,
            });
        }
        self.read_pos.store(0, Ordering::Release);
        self.write_pos.store(0, Ordering::Release);
        Ok(())
    }

    /// Whether [`allocate`](Self::allocate) has been called.
    pub fn is_allocated(&self) -> bool {
        // SAFETY: only inspects presence; allocate is externally serialized.
        unsafe { (*self.storage.get()).is_some() }
    }

    /// The format audio is stored in, if allocated.
    pub fn format(&self) -> Option<AudioFormat> {
        // SAFETY: format only changes inside allocate, which is externally
        // serialized with all other access.
        unsafe { (*self.storage.get()).as_ref().map(|s| s.format) }
    }

    /// Total capacity in frames (a power of two), or 0 if unallocated.
    pub fn capacity_frames(&self) -> usize {
        // SAFETY: see `format`.
        unsafe {
            (*self.storage.get())
                .as_ref()
                .map(|s| s.capacity_frames)
                .unwrap_or(0)
        }
    }

    /// Zero both positions, discarding all buffered audio.
    ///
    /// Not thread safe; see the type-level threading contract.
    pub fn reset(&self) {
        self.read_pos.store(0, Ordering::Release);
        self.write_pos.store(0, Ordering::Release);
    }

    /// Number of frames ready to be read.
    pub fn frames_available_to_read(&self) -> usize {
        let Some(storage) = (unsafe { (*self.storage.get()).as_ref() }) else {
            return 0;
        };
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        (w.wrapping_sub(r).wrapping_add(storage.capacity_frames)) & storage.mask
    }

    /// Free space in frames, excluding the reserved slot.
    pub fn frames_available_to_write(&self) -> usize {
        let Some(storage) = (unsafe { (*self.storage.get()).as_ref() }) else {
            return 0;
        };
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        let readable = (w.wrapping_sub(r).wrapping_add(storage.capacity_frames)) & storage.mask;
        storage.capacity_frames - readable - 1
    }

    /// Copy up to `frames` frames into `dest`, advancing the read position,
    /// and set each destination channel's fill level to the bytes read.
    ///
    /// Consumer thread only. Returns the number of frames actually read;
    /// never blocks.
    pub fn read(&self, dest: &mut BufferList, frames: usize) -> usize {
        // SAFETY: sole consumer per the SPSC contract.
        let Some(storage) = (unsafe { (*self.storage.get()).as_ref() }) else {
            dest.empty();
            return 0;
        };

        let channel_count = storage.format.channels as usize;
        debug_assert_eq!(dest.channel_count(), channel_count);

        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Relaxed);
        let available = (w.wrapping_sub(r).wrapping_add(storage.capacity_frames)) & storage.mask;

        let to_read = frames.min(available).min(dest.capacity_frames());
        if to_read == 0 {
            dest.empty();
            return 0;
        }

        // Split into the run up to the end of the buffer and the wrapped
        // remainder.
        let until_end = storage.capacity_frames - r;
        let n1 = to_read.min(until_end);
        let n2 = to_read - n1;

        let bytes_per_frame = storage.format.bytes_per_frame as usize;
        for (index, channel) in dest.channels_mut().enumerate() {
            let out = channel.raw_mut();
            // SAFETY: the region [r, r + n1) (and, when wrapping, [0, n2))
            // contains frames published by the producer's Release store of
            // `write_pos`, observed by the Acquire load above, and cannot be
            // overwritten until this side publishes the new read position.
            unsafe {
                let src = storage.channel_ptr(index, r * bytes_per_frame);
                std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), n1 * bytes_per_frame);
                if n2 > 0 {
                    let src = storage.channel_ptr(index, 0);
                    std::ptr::copy_nonoverlapping(
                        src,
                        out.as_mut_ptr().add(n1 * bytes_per_frame),
                        n2 * bytes_per_frame,
                    );
                }
            }
        }
        dest.set_frame_len(to_read);

        self.read_pos
            .store((r + to_read) & storage.mask, Ordering::Release);
        to_read
    }

    /// Copy up to `frames` frames from `src`, advancing the write position.
    ///
    /// Producer thread only. Returns the number of frames actually written;
    /// never blocks. A successful write of `n` frames is observed atomically
    /// by the consumer: either all `n` frames are readable or none are.
    pub fn write(&self, src: &BufferList, frames: usize) -> usize {
        // SAFETY: sole producer per the SPSC contract.
        let Some(storage) = (unsafe { (*self.storage.get()).as_ref() }) else {
            return 0;
        };

        let channel_count = storage.format.channels as usize;
        debug_assert_eq!(src.channel_count(), channel_count);

        let w = self.write_pos.load(Ordering::Relaxed);
        let r = self.read_pos.load(Ordering::Acquire);
        let readable = (w.wrapping_sub(r).wrapping_add(storage.capacity_frames)) & storage.mask;
        let writable = storage.capacity_frames - readable - 1;

        let to_write = frames.min(writable).min(src.frame_len());
        if to_write == 0 {
            return 0;
        }

        let until_end = storage.capacity_frames - w;
        let n1 = to_write.min(until_end);
        let n2 = to_write - n1;

        let bytes_per_frame = storage.format.bytes_per_frame as usize;
        for index in 0..channel_count {
            let input = src.channel(index).raw();
            // SAFETY: the region [w, w + n1) (and, when wrapping, [0, n2))
            // is free space the consumer cannot read until the Release store
            // of `write_pos` below publishes it.
            unsafe {
                let dst = storage.channel_ptr(index, w * bytes_per_frame);
                std::ptr::copy_nonoverlapping(input.as_ptr(), dst, n1 * bytes_per_frame);
                if n2 > 0 {
                    let dst = storage.channel_ptr(index, 0);
                    std::ptr::copy_nonoverlapping(
                        input.as_ptr().add(n1 * bytes_per_frame),
                        dst,
                        n2 * bytes_per_frame,
                    );
                }
            }
        }

        self.write_pos
            .store((w + to_write) & storage.mask, Ordering::Release);
        to_write
    }
}
