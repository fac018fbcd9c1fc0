//! Wire message buffers with reserved head-room.
//!
//! A [`MsgBuf`] owns a contiguous byte region and a movable data window. The
//! window can grow toward the front ([`MsgBuf::push_head`]) so protocol layers
//! prepend headers without copying the payload, and shrink from the front
//! ([`MsgBuf::pull_head`]) when a receiver strips them.
//!
//! Buffers come from a [`BufPool`], which enforces the negotiated maximum
//! message length and counts live buffers. Freeing is dropping: a buffer is
//! released exactly once, whichever side owns it at the time.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{TransportError, TransportResult};

/// Bytes reserved in front of every outbound payload for protocol headers.
pub const HEAD_ROOM: usize = 64;

/// Allocation granularity applied to `len + HEAD_ROOM`.
pub const BUF_ALIGNMENT: usize = 4;

#[derive(Default)]
struct PoolCounters {
    allocated: AtomicU64,
    freed: AtomicU64,
    outstanding: AtomicUsize,
}

/// Snapshot of a pool's allocation bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: u64,
    pub freed: u64,
    pub outstanding: usize,
}

/// Owned wire buffer. Dropping it returns it to its pool's bookkeeping.
pub struct MsgBuf {
    bytes: Box<[u8]>,
    head: usize,
    len: usize,
    counters: Arc<PoolCounters>,
}

impl MsgBuf {
    /// Current data window.
    pub fn data(&self) -> &[u8] {
        &self.bytes[self.head..self.head + self.len]
    }

    /// Mutable view of the current data window.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let end = self.head + self.len;
        &mut self.bytes[self.head..end]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available in front of the data window.
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Total size of the backing region.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Extends the window `n` bytes toward the front and returns the new prefix.
    ///
    /// Returns `None` when there is not enough head-room.
    pub fn push_head(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.head {
            return None;
        }
        self.head -= n;
        self.len += n;
        let start = self.head;
        Some(&mut self.bytes[start..start + n])
    }

    /// Removes `n` bytes from the front of the window and returns them.
    ///
    /// Returns `None` when the window is shorter than `n`.
    pub fn pull_head(&mut self, n: usize) -> Option<&[u8]> {
        if n > self.len {
            return None;
        }
        let start = self.head;
        self.head += n;
        self.len -= n;
        Some(&self.bytes[start..start + n])
    }

    /// Sets the logical length of the window.
    pub fn set_len(&mut self, len: usize) -> TransportResult<()> {
        let capacity = self.bytes.len() - self.head;
        if len > capacity {
            return Err(TransportError::InvalidLength { len, capacity });
        }
        self.len = len;
        Ok(())
    }

    /// Zeroes the whole backing region, head-room included.
    pub fn wipe(&mut self) {
        self.bytes.fill(0);
    }
}

impl Drop for MsgBuf {
    fn drop(&mut self) {
        self.counters.freed.fetch_add(1, Ordering::Relaxed);
        self.counters.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for MsgBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgBuf")
            .field("head", &self.head)
            .field("len", &self.len)
            .field("capacity", &self.bytes.len())
            .finish()
    }
}

/// Allocator for wire buffers bounded by a negotiated maximum message length.
#[derive(Clone)]
pub struct BufPool {
    max_msg_len: usize,
    counters: Arc<PoolCounters>,
}

impl BufPool {
    pub fn new(max_msg_len: usize) -> Self {
        Self {
            max_msg_len,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Negotiated maximum size of a whole message, header included.
    pub fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    /// Largest payload `alloc` will accept. Allocations are rounded up to
    /// [`BUF_ALIGNMENT`], so an unaligned maximum loses its tail.
    pub fn max_payload_len(&self) -> usize {
        (self.max_msg_len & !(BUF_ALIGNMENT - 1)).saturating_sub(HEAD_ROOM)
    }

    /// Allocates an outbound buffer with `len` zeroed payload bytes behind
    /// [`HEAD_ROOM`] bytes of head-room.
    ///
    /// Fails with [`TransportError::NoResource`] when
    /// `round_up(len + HEAD_ROOM, BUF_ALIGNMENT)` exceeds the maximum message length.
    pub fn alloc(&self, len: usize) -> TransportResult<MsgBuf> {
        let size = len
            .checked_add(HEAD_ROOM)
            .map(|n| align_up(n, BUF_ALIGNMENT))
            .ok_or(TransportError::NoResource {
                requested: usize::MAX,
                max: self.max_msg_len,
            })?;
        if size > self.max_msg_len {
            return Err(TransportError::NoResource {
                requested: size,
                max: self.max_msg_len,
            });
        }
        Ok(self.track(vec![0u8; size].into_boxed_slice(), HEAD_ROOM, len))
    }

    /// Copies an inbound frame into a buffer with no head-room.
    pub fn alloc_frame(&self, frame: &[u8]) -> TransportResult<MsgBuf> {
        if frame.len() > self.max_msg_len {
            return Err(TransportError::NoResource {
                requested: frame.len(),
                max: self.max_msg_len,
            });
        }
        Ok(self.track(Box::from(frame), 0, frame.len()))
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            freed: self.counters.freed.load(Ordering::Relaxed),
            outstanding: self.counters.outstanding.load(Ordering::Acquire),
        }
    }

    /// Number of buffers from this pool that have not been dropped yet.
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    fn track(&self, bytes: Box<[u8]>, head: usize, len: usize) -> MsgBuf {
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        self.counters.outstanding.fetch_add(1, Ordering::AcqRel);
        MsgBuf {
            bytes,
            head,
            len,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl fmt::Debug for BufPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufPool")
            .field("max_msg_len", &self.max_msg_len)
            .field("stats", &self.stats())
            .finish()
    }
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
