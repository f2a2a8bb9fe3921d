//! Error types for the hit sorter.
//!
//! Two levels of error are used:
//!
//! - **`HitError`**: a single hit could not be parsed (header too short,
//!   external timestamp missing). Callers discard the hit, log, and move on.
//! - **`SortError`**: a failure that ends processing of a record, a read, or
//!   the run. Data corruption (`HitOverrun`, `ZeroLengthHit`, `Framing`) is
//!   not retryable: the sorter returns the error instead of skipping and
//!   resynchronising, since a bad length word means every later word in the
//!   record is suspect.
//!
//! Arena misuse (resizing or freeing a referenced buffer) has no variant: the
//! ownership model in `daq-arena` makes it unrepresentable.

use thiserror::Error;

/// Convenience alias for results using the sorter error type.
pub type SortResult<T> = std::result::Result<T, SortError>;

/// A single hit could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HitError {
    /// Fewer words than the field being decoded requires
    #[error("hit has {available} words, {needed} required")]
    HeaderTooShort {
        /// Words the field needs
        needed: usize,
        /// Words the hit has
        available: usize,
    },

    /// External clock requested but the header does not carry it
    #[error("external timestamp requested but header length is {header_length} (needs 6)")]
    ExternalTimestampMissing {
        /// Header length from word 0
        header_length: usize,
    },

    /// The view does not fit inside its buffer
    #[error("hit words {offset}..{end} exceed buffer of {available} words")]
    OutOfBounds {
        /// First word of the view
        offset: usize,
        /// One past the last word of the view
        end: usize,
        /// Words in the buffer
        available: usize,
    },

    /// Operation on a hit that is not bound to any data
    #[error("hit is not bound to any data")]
    Unbound,
}

/// Primary error type for the sorter.
#[derive(Error, Debug)]
pub enum SortError {
    /// A protocol record is truncated or its size word is impossible.
    ///
    /// **Error Type**: Permanent - the chunk is corrupt.
    #[error("Malformed record at byte {offset}: {message}")]
    Framing {
        /// Byte offset of the record in its chunk or stream
        offset: usize,
        /// What is wrong with it
        message: String,
    },

    /// A hit-bearing record is too short for its preamble or not word aligned.
    #[error("Hit payload preamble invalid: {message}")]
    Preamble {
        /// What is wrong with it
        message: String,
    },

    /// A hit's declared length runs past the end of its record payload.
    ///
    /// **Error Type**: Permanent - data corruption or misconfigured readout.
    #[error("Hit at word {word_offset} declares {declared} words but only {available} remain")]
    HitOverrun {
        /// Word offset of the hit in the payload
        word_offset: usize,
        /// Length from the hit header
        declared: usize,
        /// Words left in the payload
        available: usize,
    },

    /// A hit declares zero length, so the payload cannot be walked.
    #[error("Hit at word {word_offset} declares zero length")]
    ZeroLengthHit {
        /// Word offset of the hit in the payload
        word_offset: usize,
    },

    /// A module produced a hit whose length disagrees with its configuration.
    ///
    /// **Error Type**: Permanent - configuration and firmware disagree.
    #[error("Module {module}: hit length {found} words, configured event length {expected}")]
    LengthMismatch {
        /// Module (slot) number
        module: u16,
        /// Configured event length in words
        expected: usize,
        /// Length from the hit header
        found: usize,
    },

    /// Hit-level parse failure that could not be handled locally.
    #[error("Hit parse error: {0}")]
    Hit(#[from] HitError),

    /// The record sink refused a record.
    ///
    /// **Recovery Strategy**: None inside the sorter; sinks are expected to
    /// block rather than drop, so a refusal ends the run.
    #[error("Record sink error: {0}")]
    Sink(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for SortError {
    fn from(err: figment::Error) -> Self {
        SortError::Config(Box::new(err))
    }
}

impl SortError {
    /// `true` for errors caused by corrupt or misconfigured data rather than
    /// I/O or configuration.
    #[must_use]
    pub fn is_data_corruption(&self) -> bool {
        matches!(
            self,
            Self::Framing { .. }
                | Self::Preamble { .. }
                | Self::HitOverrun { .. }
                | Self::ZeroLengthHit { .. }
                | Self::LengthMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SortError::HitOverrun {
            word_offset: 12,
            declared: 40,
            available: 8,
        };
        let text = err.to_string();
        assert!(text.contains("12"));
        assert!(text.contains("40"));
        assert!(err.is_data_corruption());
    }

    #[test]
    fn test_hit_error_converts() {
        let err: SortError = HitError::Unbound.into();
        assert!(matches!(err, SortError::Hit(HitError::Unbound)));
        assert!(!err.is_data_corruption());
    }
}
