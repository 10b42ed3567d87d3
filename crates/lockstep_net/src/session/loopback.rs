//! # Loopback Ring
//!
//! Fixed-capacity FIFO of frames addressed to node 0. Buffers are swapped
//! in and out rather than copied, so after warm-up the ring never allocates.

use crate::error::{NetError, NetResult};

/// Ring buffer of local frames.
#[derive(Debug)]
pub struct LoopbackRing {
    slots: Box<[Vec<u8>]>,
    head: usize,
    len: usize,
}

impl LoopbackRing {
    /// Creates an empty ring holding up to `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Vec::new()).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Number of queued frames.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is queued.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the next push would fail.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Appends a copy of `frame`.
    ///
    /// # Errors
    ///
    /// Returns `LoopbackFull` if the ring is at capacity.
    pub fn push(&mut self, frame: &[u8]) -> NetResult<()> {
        if self.is_full() {
            return Err(NetError::LoopbackFull);
        }
        let tail = (self.head + self.len) % self.slots.len();
        let slot = &mut self.slots[tail];
        slot.clear();
        slot.extend_from_slice(frame);
        self.len += 1;
        Ok(())
    }

    /// Moves the oldest frame into `out`, replacing its contents.
    ///
    /// Returns false if the ring is empty.
    pub fn pop_into(&mut self, out: &mut Vec<u8>) -> bool {
        if self.is_empty() {
            return false;
        }
        std::mem::swap(out, &mut self.slots[self.head]);
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        true
    }

    /// Drops every queued frame.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
