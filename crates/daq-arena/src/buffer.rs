//! Resizable byte block handed out by an [`Arena`](crate::Arena).
//!
//! A `Buffer` held by value is, by construction, unreferenced: the only way to
//! share it is to move it into a [`SharedBuffer`](crate::SharedBuffer), and the
//! only way to get it back is for the last shared handle to drop, which returns
//! it to its arena. That makes "resize while referenced" unrepresentable.

/// Resizable byte storage with a stable identity.
///
/// The identity survives [`resize`](Buffer::resize) even when the underlying
/// storage is replaced, so callers (and tests) can tell "same buffer, new
/// storage" apart from "different buffer".
#[derive(Debug)]
pub struct Buffer {
    /// Identity assigned by the arena on creation
    id: u64,
    /// Backing storage; `data.len()` is the usable capacity
    data: Vec<u8>,
    /// Current logical size (<= capacity)
    size: usize,
    /// Number of times resize had to replace the storage
    reallocations: u64,
}

impl Buffer {
    pub(crate) fn new(id: u64, size: usize) -> Self {
        Self {
            id,
            data: vec![0u8; size],
            size,
            reallocations: 0,
        }
    }

    /// Placeholder used while moving a buffer out of a dropping handle.
    /// Does not allocate.
    pub(crate) fn detached() -> Self {
        Self {
            id: u64::MAX,
            data: Vec::new(),
            size: 0,
            reallocations: 0,
        }
    }

    /// Identity assigned by the arena.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Logical size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes available without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// How many times [`resize`](Buffer::resize) has replaced the storage.
    #[must_use]
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Address of the backing storage (for identity checks only).
    #[must_use]
    pub fn storage_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Resize to `size` bytes. Contents are NOT preserved.
    ///
    /// Keeps the current storage when it is already large enough, otherwise
    /// replaces it with fresh zeroed storage. Returns `true` when the storage
    /// was replaced.
    pub fn resize(&mut self, size: usize) -> bool {
        let grew = size > self.data.len();
        if grew {
            self.data = vec![0u8; size];
            self.reallocations += 1;
        }
        self.size = size;
        grew
    }

    /// Valid bytes (`..size`).
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Mutable valid bytes (`..size`), for filling from a FIFO or a record.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.size]
    }

    /// Copy `src` into the front of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `src` is longer than the current size.
    pub fn copy_from_slice(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.size,
            "copy_from_slice: len ({}) exceeds buffer size ({})",
            src.len(),
            self.size
        );
        self.data[..src.len()].copy_from_slice(src);
    }
}
