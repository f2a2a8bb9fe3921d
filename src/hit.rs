//! Parsed view over one hit.
//!
//! [`RawChannel`] holds the fields the sorter needs (module type, calibrated
//! time, channel, declared length) plus the raw words, either as a private
//! copy or as a zero-copy view into a shared arena buffer.
//!
//! # Ordering
//!
//! `PartialEq`/`PartialOrd` compare the calibrated time only. `set_time` must
//! have been called on both sides first, otherwise the comparison uses a stale
//! or default time. This is a documented precondition, not a type-level one.

use std::cmp::Ordering;

use daq_arena::SharedBuffer;
use tracing::warn;

use crate::error::HitError;
use crate::layout::{
    self, CfdInfo, EnergyWord, HitHeader, ModuleType, EXTERNAL_TIMESTAMP_HEADER_WORDS,
    MIN_HEADER_WORDS,
};
use crate::merge::Timed;

/// Storage behind a hit.
#[derive(Debug, Clone, Default)]
enum HitData {
    #[default]
    Unbound,
    /// Private little-endian copy of the words
    Owned(Vec<u8>),
    /// Words `offset..offset + len` of a shared buffer
    View {
        buffer: SharedBuffer,
        offset: usize,
        len: usize,
    },
}

/// One channel event from a digitizer module.
#[derive(Debug, Clone, Default)]
pub struct RawChannel {
    module_type: u32,
    time: f64,
    raw_time: u64,
    channel: u32,
    channel_length: u32,
    data: HitData,
}

impl RawChannel {
    /// An empty, unbound hit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Owned mode: copy `words` into private storage.
    ///
    /// The declared length is taken from `words.len()`; call
    /// [`set_length`](Self::set_length) to re-derive it from the header.
    #[must_use]
    pub fn from_words(words: &[u32]) -> Self {
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        Self {
            channel_length: words.len() as u32,
            data: HitData::Owned(bytes),
            ..Self::default()
        }
    }

    /// Zero-copy mode: view `n_words` words of `buffer` starting at word
    /// `word_offset`. The caller asserts the range is already one hit.
    pub fn view(buffer: &SharedBuffer, word_offset: usize, n_words: usize) -> Result<Self, HitError> {
        let mut hit = Self::default();
        hit.bind(buffer, word_offset, n_words)?;
        Ok(hit)
    }

    /// Point this hit at a new range, resetting every parsed field.
    pub(crate) fn bind(
        &mut self,
        buffer: &SharedBuffer,
        word_offset: usize,
        n_words: usize,
    ) -> Result<(), HitError> {
        let end = word_offset
            .checked_add(n_words)
            .ok_or(HitError::OutOfBounds {
                offset: word_offset,
                end: usize::MAX,
                available: buffer.word_len(),
            })?;
        if end > buffer.word_len() {
            return Err(HitError::OutOfBounds {
                offset: word_offset,
                end,
                available: buffer.word_len(),
            });
        }
        *self = Self {
            channel_length: n_words as u32,
            data: HitData::View {
                buffer: buffer.clone(),
                offset: word_offset,
                len: n_words,
            },
            ..Self::default()
        };
        Ok(())
    }

    /// Drop the storage (releasing any buffer reference) and clear all fields.
    pub(crate) fn unbind(&mut self) {
        *self = Self::default();
    }

    /// The shared buffer this hit views, if it is in zero-copy mode.
    #[must_use]
    pub fn buffer(&self) -> Option<&SharedBuffer> {
        match &self.data {
            HitData::View { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    /// `true` when the hit owns a private copy of its words.
    #[must_use]
    pub fn owns_data(&self) -> bool {
        matches!(self.data, HitData::Owned(_))
    }

    /// `true` when the hit has any words at all.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !matches!(self.data, HitData::Unbound)
    }

    /// Raw little-endian bytes of the hit.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            HitData::Unbound => &[],
            HitData::Owned(bytes) => bytes,
            HitData::View {
                buffer,
                offset,
                len,
            } => &buffer.as_slice()[offset * 4..(offset + len) * 4],
        }
    }

    /// Number of 32-bit words available.
    #[must_use]
    pub fn n_words(&self) -> usize {
        self.as_bytes().len() / 4
    }

    /// Word `index` of the hit.
    #[must_use]
    pub fn word(&self, index: usize) -> Option<u32> {
        let start = index.checked_mul(4)?;
        let bytes = self.as_bytes().get(start..start + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Iterate over the hit's words.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.as_bytes()
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn require(&self, needed: usize) -> Result<(), HitError> {
        if !self.is_bound() {
            return Err(HitError::Unbound);
        }
        let available = self.n_words();
        if available < needed {
            return Err(HitError::HeaderTooShort { needed, available });
        }
        Ok(())
    }

    // =========================================================================
    // Field extraction
    // =========================================================================

    /// Store the raw 48-bit timestamp from words 1–2 without calibration.
    ///
    /// Fails when fewer than 4 words are present.
    pub fn set_raw_time(&mut self) -> Result<(), HitError> {
        self.require(MIN_HEADER_WORDS)?;
        let (w1, w2) = (self.word(1), self.word(2));
        if let (Some(w1), Some(w2)) = (w1, w2) {
            self.raw_time = layout::join_timestamp(w1, w2);
            self.time = self.raw_time as f64;
        }
        Ok(())
    }

    /// Set the calibrated time: `raw ticks * calibration` nanoseconds.
    ///
    /// With `use_external` the ticks come from the external timestamp in the
    /// last two header words, which needs a header of at least 6 words.
    pub fn set_time(&mut self, calibration: f64, use_external: bool) -> Result<(), HitError> {
        if use_external {
            self.require(1)?;
            let header_length = self
                .word(0)
                .map_or(0, |w| layout::header_length_of(w) as usize);
            if header_length < EXTERNAL_TIMESTAMP_HEADER_WORDS {
                return Err(HitError::ExternalTimestampMissing { header_length });
            }
            self.require(header_length)?;
            if let (Some(low), Some(high)) =
                (self.word(header_length - 2), self.word(header_length - 1))
            {
                self.raw_time = layout::join_external_timestamp(low, high);
            }
        } else {
            self.set_raw_time()?;
        }
        self.time = self.raw_time as f64 * calibration;
        Ok(())
    }

    /// Re-derive the declared length from word 0 bits 17–30.
    pub fn set_length(&mut self) -> Result<(), HitError> {
        self.require(1)?;
        if let Some(w0) = self.word(0) {
            self.channel_length = layout::channel_length_of(w0);
        }
        Ok(())
    }

    /// Extract the channel id from word 0 bits 0–3.
    ///
    /// Fails when fewer than 4 words are present.
    pub fn set_channel(&mut self) -> Result<(), HitError> {
        self.require(MIN_HEADER_WORDS)?;
        if let Some(w0) = self.word(0) {
            self.channel = layout::channel_of(w0);
        }
        Ok(())
    }

    /// Attach the module-type word of the module that produced this hit.
    pub fn set_module_type(&mut self, module_type: u32) {
        self.module_type = module_type;
    }

    /// Check the declared length against `expected`.
    ///
    /// Passes when the stored length, the length in the header bits and
    /// `expected` all agree. Logs a warning on mismatch; never fails hard.
    #[must_use]
    pub fn validate(&self, expected: usize) -> bool {
        let encoded = self.word(0).map(layout::channel_length_of);
        let ok = encoded == Some(self.channel_length) && self.channel_length as usize == expected;
        if !ok {
            warn!(
                expected,
                declared = self.channel_length,
                encoded = ?encoded,
                "Hit length mismatch"
            );
        }
        ok
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Calibrated time in nanoseconds.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Timestamp ticks the calibrated time was computed from.
    #[must_use]
    pub fn raw_time(&self) -> u64 {
        self.raw_time
    }

    /// Channel id.
    #[must_use]
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Declared hit length in 32-bit words.
    #[must_use]
    pub fn channel_length(&self) -> u32 {
        self.channel_length
    }

    /// Module-type word.
    #[must_use]
    pub fn module_type(&self) -> u32 {
        self.module_type
    }

    /// Decoded module-type word.
    #[must_use]
    pub fn module(&self) -> ModuleType {
        ModuleType::decode(self.module_type)
    }

    /// Decoded word 0.
    #[must_use]
    pub fn header(&self) -> Option<HitHeader> {
        self.word(0).map(HitHeader::decode)
    }

    /// Decoded energy word (word 3).
    #[must_use]
    pub fn energy(&self) -> Option<EnergyWord> {
        self.word(3).map(EnergyWord::decode)
    }

    /// CFD result, decoded for this module's sampling rate.
    #[must_use]
    pub fn cfd(&self) -> Option<CfdInfo> {
        CfdInfo::decode(self.word(2)?, self.module().msps)
    }

    /// CFD-corrected time in nanoseconds from the internal clock.
    ///
    /// Ordering always uses [`time`](Self::time); this is for consumers that
    /// want sub-tick resolution.
    #[must_use]
    pub fn cfd_corrected_time(&self) -> Option<f64> {
        let coarse = layout::join_timestamp(self.word(1)?, self.word(2)?);
        self.cfd()?.corrected_time_ns(coarse, self.module().msps)
    }
}

impl Timed for RawChannel {
    fn time(&self) -> f64 {
        self.time
    }
}

impl PartialEq for RawChannel {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
    }
}

impl PartialOrd for RawChannel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.time.partial_cmp(&other.time)
    }
}
