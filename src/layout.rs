//! Bit layout of the digitizer wire format.
//!
//! Every producer and consumer of hit words goes through the decode/encode
//! pairs in this module, so the two directions cannot drift apart.
//!
//! ## Hit header, word 0
//!
//! ```text
//!  31 | 30 ........ 17 | 16 ... 12 | 11 .. 8 | 7 .. 4 | 3 .. 0
//!  fc | channel length | hdr len   | crate   | slot   | channel
//! ```
//!
//! Word 1 holds timestamp bits 0–31, word 2 bits 0–15 hold timestamp bits
//! 32–47 and bits 16–31 the CFD result. Word 3 is the energy word. When the
//! header length is at least 6, the last two header words carry a 48-bit
//! external timestamp (low 32 bits, then high 16 bits).
//!
//! ## Module-type word
//!
//! ```text
//!  31 ... 24 | 23 22 | 21       | 20 ... 16 | 15 ........ 0
//!  revision  |  --   | ext clk  | ADC bits  | MSPS
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::SortError;

const CHANNEL_MASK: u32 = 0x0000_000F;
const SLOT_MASK: u32 = 0x0000_00F0;
const SLOT_SHIFT: u32 = 4;
const CRATE_MASK: u32 = 0x0000_0F00;
const CRATE_SHIFT: u32 = 8;
const HEADER_LENGTH_MASK: u32 = 0x0001_F000;
const HEADER_LENGTH_SHIFT: u32 = 12;
const CHANNEL_LENGTH_MASK: u32 = 0x7FFE_0000;
const CHANNEL_LENGTH_SHIFT: u32 = 17;
const FINISH_CODE_BIT: u32 = 31;

const TIME_HIGH_MASK: u32 = 0x0000_FFFF;
const CFD_SHIFT: u32 = 16;

const MSPS_MASK: u32 = 0x0000_FFFF;
const ADC_BITS_MASK: u32 = 0x001F_0000;
const ADC_BITS_SHIFT: u32 = 16;
const EXTERNAL_CLOCK_BIT: u32 = 21;
const REVISION_SHIFT: u32 = 24;

const ENERGY_MASK: u32 = 0x0000_FFFF;
const TRACE_LENGTH_MASK: u32 = 0x7FFF_0000;
const TRACE_LENGTH_SHIFT: u32 = 16;
const OUT_OF_RANGE_BIT: u32 = 31;

/// Largest timestamp representable in the 48-bit hit clock.
pub const TIMESTAMP_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Minimum header words needed to decode time and channel.
pub const MIN_HEADER_WORDS: usize = 4;

/// Header length at which the external timestamp words are present.
pub const EXTERNAL_TIMESTAMP_HEADER_WORDS: usize = 6;

/// Words in a hit-bearing record preamble (size, module type, f64 calibration).
pub const PREAMBLE_WORDS: usize = 4;

/// Value of the preamble's size field: 16-bit units covering the size and
/// module-type words only.
pub const PREAMBLE_SIZE_FIELD: u32 = 4;

#[inline]
const fn bit(word: u32, n: u32) -> bool {
    (word >> n) & 1 == 1
}

// =============================================================================
// Hit header
// =============================================================================

/// Decoded word 0 of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HitHeader {
    /// Channel within the module (0–15)
    pub channel: u8,
    /// Slot of the module in its crate
    pub slot: u8,
    /// Crate id
    pub crate_id: u8,
    /// Header words, including the external timestamp if present
    pub header_length: u8,
    /// Whole hit length in 32-bit words, header and trace
    pub channel_length: u16,
    /// Pile-up / finish code flag
    pub finish_code: bool,
}

impl HitHeader {
    /// Decode word 0 of a hit.
    #[must_use]
    pub const fn decode(word: u32) -> Self {
        Self {
            channel: (word & CHANNEL_MASK) as u8,
            slot: ((word & SLOT_MASK) >> SLOT_SHIFT) as u8,
            crate_id: ((word & CRATE_MASK) >> CRATE_SHIFT) as u8,
            header_length: ((word & HEADER_LENGTH_MASK) >> HEADER_LENGTH_SHIFT) as u8,
            channel_length: ((word & CHANNEL_LENGTH_MASK) >> CHANNEL_LENGTH_SHIFT) as u16,
            finish_code: (word >> FINISH_CODE_BIT) & 1 == 1,
        }
    }

    /// Encode into word 0. Out-of-range fields are truncated to their width.
    #[must_use]
    pub const fn encode(&self) -> u32 {
        (self.channel as u32 & CHANNEL_MASK)
            | ((self.slot as u32) << SLOT_SHIFT & SLOT_MASK)
            | ((self.crate_id as u32) << CRATE_SHIFT & CRATE_MASK)
            | ((self.header_length as u32) << HEADER_LENGTH_SHIFT & HEADER_LENGTH_MASK)
            | ((self.channel_length as u32) << CHANNEL_LENGTH_SHIFT & CHANNEL_LENGTH_MASK)
            | ((self.finish_code as u32) << FINISH_CODE_BIT)
    }
}

/// Channel field (bits 0–3) of word 0.
#[inline]
#[must_use]
pub const fn channel_of(word0: u32) -> u32 {
    word0 & CHANNEL_MASK
}

/// Channel length field (bits 17–30) of word 0, in 32-bit words.
#[inline]
#[must_use]
pub const fn channel_length_of(word0: u32) -> u32 {
    (word0 & CHANNEL_LENGTH_MASK) >> CHANNEL_LENGTH_SHIFT
}

/// Header length field (bits 12–16) of word 0, in 32-bit words.
#[inline]
#[must_use]
pub const fn header_length_of(word0: u32) -> u32 {
    (word0 & HEADER_LENGTH_MASK) >> HEADER_LENGTH_SHIFT
}

// =============================================================================
// Timestamps
// =============================================================================

/// Join word 1 and the low half of word 2 into the 48-bit hit timestamp.
#[inline]
#[must_use]
pub const fn join_timestamp(word1: u32, word2: u32) -> u64 {
    ((word2 & TIME_HIGH_MASK) as u64) << 32 | word1 as u64
}

/// Split a 48-bit timestamp into word 1 and word 2, carrying `cfd` in the
/// upper half of word 2.
#[inline]
#[must_use]
pub const fn split_timestamp(raw: u64, cfd: u16) -> (u32, u32) {
    let raw = raw & TIMESTAMP_MASK;
    let low = raw as u32;
    let high = (raw >> 32) as u32 & TIME_HIGH_MASK;
    (low, high | (cfd as u32) << CFD_SHIFT)
}

/// Join the two trailing header words into the external 48-bit timestamp.
#[inline]
#[must_use]
pub const fn join_external_timestamp(low: u32, high: u32) -> u64 {
    ((high & TIME_HIGH_MASK) as u64) << 32 | low as u64
}

/// Split an external timestamp into its two trailing header words.
#[inline]
#[must_use]
pub const fn split_external_timestamp(raw: u64) -> (u32, u32) {
    let raw = raw & TIMESTAMP_MASK;
    (raw as u32, (raw >> 32) as u32 & TIME_HIGH_MASK)
}

// =============================================================================
// Module type
// =============================================================================

/// Decoded module-type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleType {
    /// ADC sampling rate in MSPS
    pub msps: u16,
    /// ADC resolution in bits
    pub adc_bits: u8,
    /// Timestamps come from the external clock
    pub external_clock: bool,
    /// Hardware revision
    pub revision: u8,
}

impl ModuleType {
    /// Decode a module-type word.
    #[must_use]
    pub const fn decode(word: u32) -> Self {
        Self {
            msps: (word & MSPS_MASK) as u16,
            adc_bits: ((word & ADC_BITS_MASK) >> ADC_BITS_SHIFT) as u8,
            external_clock: bit(word, EXTERNAL_CLOCK_BIT),
            revision: (word >> REVISION_SHIFT) as u8,
        }
    }

    /// Encode into a module-type word.
    #[must_use]
    pub const fn encode(&self) -> u32 {
        (self.msps as u32)
            | ((self.adc_bits as u32) << ADC_BITS_SHIFT & ADC_BITS_MASK)
            | ((self.external_clock as u32) << EXTERNAL_CLOCK_BIT)
            | ((self.revision as u32) << REVISION_SHIFT)
    }

    /// Nanoseconds per timestamp tick for the known digitizer rates.
    ///
    /// 250 MSPS modules count timestamps at 125 MHz.
    #[must_use]
    pub fn default_clock_calibration(&self) -> Option<f64> {
        match self.msps {
            100 => Some(10.0),
            250 => Some(8.0),
            500 => Some(10.0),
            _ => None,
        }
    }
}

// =============================================================================
// CFD
// =============================================================================

/// Constant-fraction discriminator result from word 2 bits 16–31.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfdInfo {
    /// Fractional-tick correction in `[0, 1)`
    pub fraction: f64,
    /// Which sub-sample produced the zero crossing (250/500 MSPS)
    pub trigger_source: u8,
    /// The CFD did not find a zero crossing
    pub failed: bool,
}

impl CfdInfo {
    /// Decode the CFD bits of word 2; the layout depends on the module rate.
    #[must_use]
    pub fn decode(word2: u32, msps: u16) -> Option<Self> {
        let cfd = word2 >> CFD_SHIFT;
        match msps {
            100 => Some(Self {
                fraction: f64::from(cfd & 0x7FFF) / 32768.0,
                trigger_source: 0,
                failed: bit(cfd, 15),
            }),
            250 => Some(Self {
                fraction: f64::from(cfd & 0x3FFF) / 16384.0,
                trigger_source: bit(cfd, 14) as u8,
                failed: bit(cfd, 15),
            }),
            500 => {
                let trigger_source = ((cfd >> 13) & 0x7) as u8;
                Some(Self {
                    fraction: f64::from(cfd & 0x1FFF) / 8192.0,
                    trigger_source,
                    failed: trigger_source == 7,
                })
            }
            _ => None,
        }
    }

    /// CFD-corrected time in nanoseconds for a coarse timestamp.
    ///
    /// A failed CFD contributes no correction.
    #[must_use]
    pub fn corrected_time_ns(&self, coarse: u64, msps: u16) -> Option<f64> {
        let coarse = coarse as f64;
        let (fraction, source) = if self.failed {
            (0.0, 0.0)
        } else {
            (self.fraction, f64::from(self.trigger_source))
        };
        match msps {
            100 => Some(coarse * 10.0 + fraction * 10.0),
            250 if self.failed => Some(coarse * 8.0),
            250 => Some((coarse * 2.0 - source + fraction) * 4.0),
            500 if self.failed => Some(coarse * 10.0),
            500 => Some(coarse * 10.0 + (fraction + source - 1.0) * 2.0),
            _ => None,
        }
    }
}

// =============================================================================
// Energy word
// =============================================================================

/// Decoded word 3 of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnergyWord {
    /// Trapezoidal filter energy
    pub energy: u16,
    /// Trace length in 16-bit samples
    pub trace_length: u16,
    /// ADC went out of range during the hit
    pub out_of_range: bool,
}

impl EnergyWord {
    /// Decode word 3.
    #[must_use]
    pub const fn decode(word: u32) -> Self {
        Self {
            energy: (word & ENERGY_MASK) as u16,
            trace_length: ((word & TRACE_LENGTH_MASK) >> TRACE_LENGTH_SHIFT) as u16,
            out_of_range: (word >> OUT_OF_RANGE_BIT) & 1 == 1,
        }
    }

    /// Encode into word 3.
    #[must_use]
    pub const fn encode(&self) -> u32 {
        (self.energy as u32)
            | ((self.trace_length as u32) << TRACE_LENGTH_SHIFT & TRACE_LENGTH_MASK)
            | ((self.out_of_range as u32) << OUT_OF_RANGE_BIT)
    }
}

// =============================================================================
// Hit-bearing payload preamble
// =============================================================================

/// Preamble of a hit-bearing record body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitPreamble {
    /// Module-type word applied to every hit in the payload
    pub module_type: u32,
    /// Nanoseconds per timestamp tick
    pub calibration: f64,
}

impl HitPreamble {
    /// Decode the preamble from the front of a hit-bearing body.
    pub fn decode(body: &[u8]) -> Result<Self, SortError> {
        if body.len() < PREAMBLE_WORDS * 4 {
            return Err(SortError::Preamble {
                message: format!(
                    "payload is {} bytes, preamble needs {}",
                    body.len(),
                    PREAMBLE_WORDS * 4
                ),
            });
        }
        let word = |i: usize| {
            u32::from_le_bytes([body[4 * i], body[4 * i + 1], body[4 * i + 2], body[4 * i + 3]])
        };
        let bits = u64::from(word(2)) | u64::from(word(3)) << 32;
        let calibration = f64::from_bits(bits);
        if !calibration.is_finite() || calibration <= 0.0 {
            return Err(SortError::Preamble {
                message: format!("calibration {calibration} ns/tick must be finite and positive"),
            });
        }
        Ok(Self {
            module_type: word(1),
            calibration,
        })
    }

    /// Append the preamble to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(PREAMBLE_SIZE_FIELD);
        out.put_u32_le(self.module_type);
        out.put_f64_le(self.calibration);
    }
}

/// Inclusive size field of a legacy single-hit body, in 16-bit units,
/// covering the size word, the module-type word and the hit words.
#[inline]
#[must_use]
pub const fn single_hit_size_field(hit_words: usize) -> u32 {
    ((2 + hit_words) * 2) as u32
}

/// Append a legacy single-hit body: inclusive size, module type, raw hit bytes.
pub fn encode_single_hit_body(out: &mut BytesMut, module_type: u32, hit_bytes: &[u8]) {
    out.put_u32_le(single_hit_size_field(hit_bytes.len() / 4));
    out.put_u32_le(module_type);
    out.put_slice(hit_bytes);
}

// =============================================================================
// Hit words builder
// =============================================================================

/// Builds raw hit words through the same layout the parsers decode.
///
/// Used by simulated readouts and test fixtures.
#[derive(Debug, Clone, PartialEq)]
pub struct HitWords {
    /// Word 0 fields; `channel_length` is recomputed by [`HitWords::build`]
    pub header: HitHeader,
    /// 48-bit internal timestamp
    pub timestamp: u64,
    /// CFD bits for word 2
    pub cfd: u16,
    /// Word 3 contents
    pub energy: EnergyWord,
    /// External timestamp; forces a 6-word header when set
    pub external_timestamp: Option<u64>,
    /// Trace samples, packed two per word
    pub trace: Vec<u16>,
}

impl HitWords {
    /// A minimal 4-word hit on `channel` at `timestamp`.
    #[must_use]
    pub fn new(crate_id: u8, slot: u8, channel: u8, timestamp: u64) -> Self {
        Self {
            header: HitHeader {
                channel,
                slot,
                crate_id,
                header_length: MIN_HEADER_WORDS as u8,
                channel_length: MIN_HEADER_WORDS as u16,
                finish_code: false,
            },
            timestamp,
            cfd: 0,
            energy: EnergyWord::default(),
            external_timestamp: None,
            trace: Vec::new(),
        }
    }

    /// Attach an external timestamp.
    #[must_use]
    pub fn with_external_timestamp(mut self, raw: u64) -> Self {
        self.external_timestamp = Some(raw);
        self
    }

    /// Set the energy.
    #[must_use]
    pub fn with_energy(mut self, energy: u16) -> Self {
        self.energy.energy = energy;
        self
    }

    /// Set the CFD bits.
    #[must_use]
    pub fn with_cfd(mut self, cfd: u16) -> Self {
        self.cfd = cfd;
        self
    }

    /// Attach trace samples.
    #[must_use]
    pub fn with_trace(mut self, trace: Vec<u16>) -> Self {
        self.trace = trace;
        self
    }

    /// Encode to words, fixing up header and channel lengths.
    #[must_use]
    pub fn build(&self) -> Vec<u32> {
        let header_length = if self.external_timestamp.is_some() {
            EXTERNAL_TIMESTAMP_HEADER_WORDS
        } else {
            MIN_HEADER_WORDS
        };
        let trace_words = self.trace.len().div_ceil(2);
        let mut header = self.header;
        header.header_length = header_length as u8;
        header.channel_length = (header_length + trace_words) as u16;
        let mut energy = self.energy;
        energy.trace_length = self.trace.len() as u16;

        let (w1, w2) = split_timestamp(self.timestamp, self.cfd);
        let mut words = Vec::with_capacity(header_length + trace_words);
        words.extend([header.encode(), w1, w2, energy.encode()]);
        if let Some(external) = self.external_timestamp {
            let (low, high) = split_external_timestamp(external);
            words.extend([low, high]);
        }
        for pair in self.trace.chunks(2) {
            let low = u32::from(pair[0]);
            let high = pair.get(1).copied().map_or(0, u32::from);
            words.push(low | high << 16);
        }
        words
    }
}
