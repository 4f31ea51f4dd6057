// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size buffer pool with heap fallback.
//!
//! Pre-allocates `count` buffers of `size` bytes in one arena and tracks free
//! slot indices in a lock-free freelist. The event loop allocates, any thread
//! may release.
//!
//! ```text
//!   malloc()                         drop(PoolBuffer)
//!      |                                    |
//!      v                                    v
//!  free.pop() -> slot                free.push(slot)
//!  (None: heap fallback)             (FIFO: slots come back in free order)
//! ```
//!
//! Exhaustion is not an error: [`BufferPool::malloc`] falls back to a heap
//! buffer of the same size and [`PoolBuffer::is_pooled`] reports the origin.

use crate::error::{Error, Result};
use crossbeam::queue::ArrayQueue;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct PoolInner {
    arena: Box<[UnsafeCell<u8>]>,
    /// Free slot indices, capacity `buffer_count`.
    free: ArrayQueue<usize>,
    buffer_size: usize,
    buffer_count: usize,
    exhausted: AtomicU64,
}

// SAFETY: the arena is only accessed through slots popped from `free`, and a
// slot is owned by exactly one `PoolBuffer` until it is pushed back.
unsafe impl Sync for PoolInner {}
unsafe impl Send for PoolInner {}

impl PoolInner {
    #[inline]
    fn slot_ptr(&self, slot: usize) -> NonNull<u8> {
        debug_assert!(slot < self.buffer_count);
        // SAFETY: slot < buffer_count so the offset stays inside the arena.
        // UnsafeCell<u8> is repr(transparent) over u8.
        let raw = unsafe { UnsafeCell::raw_get(self.arena.as_ptr().add(slot * self.buffer_size)) };
        // SAFETY: derived from a live boxed slice, never null.
        unsafe { NonNull::new_unchecked(raw) }
    }

    fn release(&self, slot: usize) {
        if self.free.push(slot).is_err() {
            log::error!("[POOL] freelist full, slot {} released twice", slot);
        }
    }
}

/// Fixed-capacity buffer pool.
///
/// Buffers are `Send` and release themselves on drop, from any thread.
///
/// # Examples
///
/// ```
/// use dispatch::BufferPool;
///
/// let pool = BufferPool::new(2, 64).expect("valid pool");
/// let a = pool.malloc();
/// let b = pool.malloc();
/// let c = pool.malloc(); // exhausted: heap fallback
/// assert!(a.is_pooled() && b.is_pooled());
/// assert!(!c.is_pooled());
/// drop(a);
/// assert_eq!(pool.remaining(), 1);
/// ```
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool whose releases may come from any thread.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] when `count` or `size` is zero.
    pub fn new(count: usize, size: usize) -> Result<Self> {
        Self::build(count, size, false)
    }

    /// Create a pool owned by one thread. The freelist takes no lock in
    /// either mode, so this only changes how the pool is reported.
    pub fn new_single_threaded(count: usize, size: usize) -> Result<Self> {
        Self::build(count, size, true)
    }

    fn build(count: usize, size: usize, single_threaded: bool) -> Result<Self> {
        if count == 0 || size == 0 {
            return Err(Error::InvalidConfig(format!(
                "buffer pool needs count > 0 and size > 0 (got {} x {})",
                count, size
            )));
        }
        let total = count.checked_mul(size).ok_or_else(|| {
            Error::InvalidConfig(format!("buffer pool {} x {} overflows", count, size))
        })?;

        let arena: Box<[UnsafeCell<u8>]> = (0..total).map(|_| UnsafeCell::new(0u8)).collect();
        let free = ArrayQueue::new(count);
        for slot in 0..count {
            free.push(slot).map_err(|_| {
                Error::InvalidConfig("freelist init failed: capacity mismatch".to_string())
            })?;
        }

        log::debug!(
            "[POOL] created {} x {} bytes (single_threaded={})",
            count,
            size,
            single_threaded
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                arena,
                free,
                buffer_size: size,
                buffer_count: count,
                exhausted: AtomicU64::new(0),
            }),
        })
    }

    /// Take a buffer. Contents of a recycled pool slot are unspecified.
    pub fn malloc(&self) -> PoolBuffer {
        let Some(slot) = self.inner.free.pop() else {
            let misses = self.inner.exhausted.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!(
                "[POOL] exhausted ({} x {} bytes), heap fallback #{}",
                self.inner.buffer_count,
                self.inner.buffer_size,
                misses
            );
            return PoolBuffer::heap(self.inner.buffer_size);
        };

        PoolBuffer {
            origin: Origin::Pool {
                ptr: self.inner.slot_ptr(slot),
                slot,
                inner: Arc::clone(&self.inner),
            },
            len: self.inner.buffer_size,
        }
    }

    /// Take a zero-filled buffer.
    pub fn calloc(&self) -> PoolBuffer {
        let mut buf = self.malloc();
        if buf.is_pooled() {
            buf.fill(0);
        }
        buf
    }

    /// Release a buffer now. Equivalent to dropping it.
    pub fn free(&self, buf: PoolBuffer) {
        drop(buf);
    }

    /// Size of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of pool slots.
    pub fn buffer_count(&self) -> usize {
        self.inner.buffer_count
    }

    /// Free slots currently in the freelist.
    pub fn remaining(&self) -> usize {
        self.inner.free.len()
    }

    /// No free slot left (next `malloc` goes to the heap).
    pub fn is_empty(&self) -> bool {
        self.inner.free.is_empty()
    }

    /// Every slot is free.
    pub fn is_full(&self) -> bool {
        self.inner.free.is_full()
    }

    /// Whether `ptr` points inside the pool arena.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.inner.arena.as_ptr() as usize;
        let end = start + self.inner.buffer_count * self.inner.buffer_size;
        let addr = ptr as usize;
        addr >= start && addr < end
    }

    /// Number of heap fallbacks since creation.
    pub fn exhausted_count(&self) -> u64 {
        self.inner.exhausted.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("buffer_count", &self.inner.buffer_count)
            .field("remaining", &self.remaining())
            .finish()
    }
}

enum Origin {
    Pool {
        inner: Arc<PoolInner>,
        slot: usize,
        ptr: NonNull<u8>,
    },
    Heap(Box<[u8]>),
}

/// Buffer handed out by a [`BufferPool`], returned to its origin on drop.
pub struct PoolBuffer {
    origin: Origin,
    len: usize,
}

// SAFETY: a pool slot is exclusively owned by this handle; releasing it only
// pushes onto the lock-free freelist.
unsafe impl Send for PoolBuffer {}

impl PoolBuffer {
    fn heap(size: usize) -> Self {
        Self {
            origin: Origin::Heap(vec![0u8; size].into_boxed_slice()),
            len: size,
        }
    }

    /// `true` if the buffer lives in the pool arena.
    pub fn is_pooled(&self) -> bool {
        matches!(self.origin, Origin::Pool { .. })
    }

    /// Pool slot index, `None` for heap fallbacks.
    pub fn slot(&self) -> Option<usize> {
        match &self.origin {
            Origin::Pool { slot, .. } => Some(*slot),
            Origin::Heap(_) => None,
        }
    }
}

impl Deref for PoolBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.origin {
            // SAFETY: the slot spans `len` bytes of the arena and is owned by self.
            Origin::Pool { ptr, .. } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), self.len)
            },
            Origin::Heap(buf) => &buf[..],
        }
    }
}

impl DerefMut for PoolBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.origin {
            // SAFETY: as in `deref`, plus &mut self guarantees exclusivity.
            Origin::Pool { ptr, .. } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), self.len)
            },
            Origin::Heap(buf) => &mut buf[..],
        }
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        if let Origin::Pool { inner, slot, .. } = &self.origin {
            inner.release(*slot);
        }
    }
}

impl fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("len", &self.len)
            .field("slot", &self.slot())
            .finish()
    }
}
