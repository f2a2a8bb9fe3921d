//! Readout buffer arena for zero-copy hit parsing.
//!
//! This crate provides the memory layer the hit sorter parses into:
//!
//! - [`Arena`]: FIFO pool of resizable [`Buffer`]s
//! - [`SharedBuffer`]: reference-counted handle that returns its buffer to the
//!   arena when the last handle is dropped
//! - [`ObjectPool`]: free-list of reusable parser objects
//!
//! # Allocation Strategy
//!
//! The arena is intentionally not a general-purpose allocator. `allocate()`
//! always takes the buffer at the front of the free queue and resizes it,
//! with no size-based selection. Readout buffers converge on the largest block
//! size seen, so after warm-up allocation is a queue pop. A pool holding
//! buffers of different sizes may reallocate one that a smaller request would
//! have fit; that is accepted.
//!
//! # Example
//!
//! ```
//! use daq_arena::Arena;
//!
//! let arena = Arena::new();
//! let mut buffer = arena.allocate(1024);
//! buffer.as_mut_slice()[0] = 0xAB;
//!
//! // Share it between parsed views
//! let shared = arena.share(buffer);
//! let view = shared.clone();
//! assert_eq!(shared.reference_count(), 2);
//!
//! // Back in the pool once every handle is gone
//! drop(shared);
//! drop(view);
//! assert_eq!(arena.free_count(), 1);
//! ```

pub mod buffer;
pub mod object_pool;
pub mod shared;

pub use buffer::Buffer;
pub use object_pool::{ObjectPool, Poolable};
pub use shared::SharedBuffer;

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Internal state for the arena.
///
/// Wrapped in Arc for shared ownership between the arena and outstanding
/// [`SharedBuffer`]s, so the pool outlives every buffer it handed out.
struct ArenaInner {
    /// Free buffers, popped from the front and pushed to the back
    free_buffers: SegQueue<Buffer>,
    /// Next buffer identity
    next_id: AtomicU64,
    /// Number of buffers currently in the free queue
    available: AtomicUsize,
    /// Metrics: buffers constructed on a pool miss
    buffers_created: AtomicU64,
    /// Metrics: total allocate() calls
    total_allocations: AtomicU64,
    /// Metrics: allocations that had to replace a pooled buffer's storage
    total_reallocations: AtomicU64,
    /// Metrics: total buffers returned
    total_returns: AtomicU64,
}

/// Pool of reusable readout buffers.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct Arena {
    inner: Arc<ArenaInner>,
}

impl Arena {
    /// Create an empty arena. Buffers are built on the first allocations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                free_buffers: SegQueue::new(),
                next_id: AtomicU64::new(0),
                available: AtomicUsize::new(0),
                buffers_created: AtomicU64::new(0),
                total_allocations: AtomicU64::new(0),
                total_reallocations: AtomicU64::new(0),
                total_returns: AtomicU64::new(0),
            }),
        }
    }

    /// Return an unreferenced buffer of at least `n_bytes`.
    ///
    /// Reuses the front of the free queue (resizing it, contents undefined) or
    /// constructs a new buffer when the queue is empty.
    #[must_use]
    pub fn allocate(&self, n_bytes: usize) -> Buffer {
        self.inner.total_allocations.fetch_add(1, Ordering::Relaxed);

        if let Some(mut buffer) = self.inner.free_buffers.pop() {
            self.inner.available.fetch_sub(1, Ordering::Relaxed);
            if buffer.resize(n_bytes) {
                self.inner
                    .total_reallocations
                    .fetch_add(1, Ordering::Relaxed);
            }
            return buffer;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.buffers_created.fetch_add(1, Ordering::Relaxed);
        debug!(buffer_id = id, n_bytes, "Arena miss, constructing buffer");
        Buffer::new(id, n_bytes)
    }

    /// Return a buffer to the back of the free queue.
    ///
    /// Taking the buffer by value guarantees it is unreferenced: shared
    /// buffers come back through [`SharedBuffer`]'s drop instead.
    pub fn free(&self, buffer: Buffer) {
        debug_assert!(buffer.id() != u64::MAX, "detached buffer returned to arena");
        self.inner.free_buffers.push(buffer);
        self.inner.available.fetch_add(1, Ordering::Relaxed);
        self.inner.total_returns.fetch_add(1, Ordering::Relaxed);
    }

    /// Move a filled buffer into a reference-counted handle bound to this
    /// arena. The returned handle has a reference count of 1.
    #[must_use]
    pub fn share(&self, buffer: Buffer) -> SharedBuffer {
        SharedBuffer::new(buffer, self.clone())
    }

    /// Buffers currently waiting in the free queue.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.inner.available.load(Ordering::Relaxed)
    }

    /// Buffers constructed since the arena was created.
    #[must_use]
    pub fn buffers_created(&self) -> u64 {
        self.inner.buffers_created.load(Ordering::Relaxed)
    }

    /// Total `allocate()` calls.
    #[must_use]
    pub fn total_allocations(&self) -> u64 {
        self.inner.total_allocations.load(Ordering::Relaxed)
    }

    /// Allocations that reused a pooled buffer but had to grow its storage.
    #[must_use]
    pub fn total_reallocations(&self) -> u64 {
        self.inner.total_reallocations.load(Ordering::Relaxed)
    }

    /// Total buffers returned to the pool.
    #[must_use]
    pub fn total_returns(&self) -> u64 {
        self.inner.total_returns.load(Ordering::Relaxed)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("free", &self.free_count())
            .field("created", &self.buffers_created())
            .finish()
    }
}
