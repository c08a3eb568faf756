//! Lock-free single-producer / single-consumer ring buffers
//!
//! Two variants share the same protocol: [`AudioRingBuffer`] moves
//! non-interleaved audio frames from the decoding thread to the real-time
//! render callback, and [`ByteRingBuffer`] carries opaque event records from
//! the decoding thread and the render callback to the event thread.
//!
//! Capacities are rounded up to the next power of two and one slot is
//! reserved to distinguish a full buffer from an empty one, so the usable
//! capacity is `capacity - 1` elements. Producers publish with `Release`
//! stores of the write position and consumers observe them with `Acquire`
//! loads; the symmetric protocol applies to the read position. Neither side
//! ever blocks.

mod audio;
mod bytes;

pub use audio::AudioRingBuffer;
pub use bytes::ByteRingBuffer;

/// Round `n` up to the next power of two, with a floor of 2.
pub(crate) fn next_power_of_two(n: usize) -> usize {
    n.max(2).next_power_of_two()
}
