//! Reference-counted view of an arena buffer.
//!
//! # Memory Flow
//!
//! ```text
//! 1. Arena::allocate() hands out an unreferenced Buffer
//! 2. Caller fills it (FIFO read, record copy)
//! 3. Arena::share() moves it into a SharedBuffer (count = 1)
//! 4. Every hit carved from it clones the handle (count += 1)
//! 5. Dropping a handle decrements the count
//! 6. When the count reaches 0 the Buffer goes back to the arena, once
//! ```

use std::ops::Deref;
use std::sync::Arc;

use crate::{Arena, Buffer};

/// Owner of a buffer while it is shared. Returns it to the arena on drop.
#[derive(Debug)]
struct SharedInner {
    buffer: Buffer,
    arena: Arena,
}

impl Drop for SharedInner {
    fn drop(&mut self) {
        let buffer = std::mem::replace(&mut self.buffer, Buffer::detached());
        self.arena.free(buffer);
    }
}

/// Shared, read-only handle to an arena buffer.
///
/// Cloning increments the reference count; the number of live handles is the
/// buffer's reference count. The buffer is returned to the arena it came from
/// exactly once, when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    inner: Arc<SharedInner>,
}

impl SharedBuffer {
    pub(crate) fn new(buffer: Buffer, arena: Arena) -> Self {
        Self {
            inner: Arc::new(SharedInner { buffer, arena }),
        }
    }

    /// Number of live handles to this buffer.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Always `true` for a live handle; mirrors the buffer-side query.
    #[must_use]
    pub fn is_referenced(&self) -> bool {
        self.reference_count() > 0
    }

    /// Identity of the underlying buffer.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.buffer.id()
    }

    /// The arena this buffer returns to.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.inner.arena
    }

    /// Valid bytes of the buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.inner.buffer.as_slice()
    }

    /// Number of whole little-endian 32-bit words in the buffer.
    #[must_use]
    pub fn word_len(&self) -> usize {
        self.as_slice().len() / 4
    }

    /// Read the little-endian 32-bit word at `index`.
    #[must_use]
    pub fn word(&self, index: usize) -> Option<u32> {
        let start = index.checked_mul(4)?;
        let bytes = self.as_slice().get(start..start + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// `true` when both handles refer to the same shared buffer.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl Deref for SharedBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
