//! Hits that borrow their words from a shared arena buffer.
//!
//! A [`ZeroCopyHit`] holds one reference on the [`SharedBuffer`] it views.
//! Cloning adds a reference, rebinding or [`free_hit`](ZeroCopyHit::free_hit)
//! drops it, and the buffer goes back to its arena when the last hit viewing
//! it is released.

use std::ops::{Deref, DerefMut};

use daq_arena::{Poolable, SharedBuffer};

use crate::error::HitError;
use crate::hit::RawChannel;
use crate::merge::Timed;

/// A [`RawChannel`] in zero-copy mode.
///
/// Derefs to the underlying [`RawChannel`] for parsing and accessors.
#[derive(Debug, Clone, Default)]
pub struct ZeroCopyHit {
    inner: RawChannel,
}

impl ZeroCopyHit {
    /// An unbound hit, ready for [`set_hit`](Self::set_hit).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a hit viewing `n_words` of `buffer` from word `word_offset`.
    pub fn from_buffer(
        buffer: &SharedBuffer,
        word_offset: usize,
        n_words: usize,
    ) -> Result<Self, HitError> {
        let mut hit = Self::new();
        hit.set_hit(buffer, word_offset, n_words)?;
        Ok(hit)
    }

    /// Rebind to a new range, releasing the previous buffer reference first.
    ///
    /// On error the hit is left unbound.
    pub fn set_hit(
        &mut self,
        buffer: &SharedBuffer,
        word_offset: usize,
        n_words: usize,
    ) -> Result<(), HitError> {
        self.free_hit();
        self.inner.bind(buffer, word_offset, n_words)
    }

    /// Release the buffer reference and clear all parsed fields.
    pub fn free_hit(&mut self) {
        self.inner.unbind();
    }

    /// Consume the wrapper, keeping the parsed channel.
    #[must_use]
    pub fn into_inner(self) -> RawChannel {
        self.inner
    }
}

impl Deref for ZeroCopyHit {
    type Target = RawChannel;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for ZeroCopyHit {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Poolable for ZeroCopyHit {
    fn reset(&mut self) {
        self.free_hit();
    }
}

impl Timed for ZeroCopyHit {
    fn time(&self) -> f64 {
        self.inner.time()
    }
}
