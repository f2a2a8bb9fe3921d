//! Direct-hardware readout of one digitizer module.
//!
//! A [`ModuleReader`] pulls whole hits out of a module's FIFO into an arena
//! buffer and slices them into [`ZeroCopyHit`]s without copying. It shares
//! the arena, hit pool and merge types with the chunk path:
//! [`Orchestrator::read_module`](crate::orchestrator::Orchestrator::read_module)
//! draws hits from the orchestrator's pool and merges them through the same
//! `submit_hits` entry point chunks use.

use daq_arena::{Arena, ObjectPool, SharedBuffer};
use tracing::{debug, warn};

use crate::config::ReaderSettings;
use crate::error::{SortError, SortResult};
use crate::layout::{self, ModuleType};
use crate::zero_copy::ZeroCopyHit;

/// Channels per module.
const CHANNELS: usize = 16;

/// Hardware FIFO access for one crate.
pub trait FifoReader {
    /// Fill `dest` with the next `dest.len()` bytes from `module`'s FIFO.
    fn read_fifo(&mut self, module: u16, dest: &mut [u8]) -> std::io::Result<()>;
}

/// A parsed hit and the module it came from.
#[derive(Debug, Clone)]
pub struct HitInfo {
    /// Module (slot) number
    pub module: u16,
    /// The hit
    pub hit: ZeroCopyHit,
}

/// Reads and parses hits for one module.
#[derive(Debug)]
pub struct ModuleReader<F> {
    fifo: F,
    arena: Arena,
    module: u16,
    expected_event_length: usize,
    calibration: f64,
    module_type: u32,
    use_external_clock: bool,
    strict_length: bool,
    last_channel_time: [Option<f64>; CHANNELS],
    out_of_order: u64,
    discarded: u64,
}

impl<F: FifoReader> ModuleReader<F> {
    /// Create a reader from its settings.
    ///
    /// Without `calibration_ns` the calibration is derived from the module
    /// type's sampling rate; an unknown rate is a configuration error.
    pub fn new(fifo: F, arena: Arena, settings: &ReaderSettings) -> SortResult<Self> {
        if settings.expected_event_length == 0 {
            return Err(SortError::Configuration(format!(
                "module {}: expected_event_length must be non-zero",
                settings.module
            )));
        }
        let module_type = ModuleType::decode(settings.module_type);
        let calibration = match settings.calibration_ns {
            Some(calibration) => calibration,
            None => module_type.default_clock_calibration().ok_or_else(|| {
                SortError::Configuration(format!(
                    "module {}: no calibration_ns and no default for {} MSPS",
                    settings.module, module_type.msps
                ))
            })?,
        };
        Ok(Self {
            fifo,
            arena,
            module: settings.module,
            expected_event_length: settings.expected_event_length,
            calibration,
            module_type: settings.module_type,
            use_external_clock: settings.use_external_clock,
            strict_length: settings.strict_length,
            last_channel_time: [None; CHANNELS],
            out_of_order: 0,
            discarded: 0,
        })
    }

    /// Module (slot) number.
    #[must_use]
    pub fn module(&self) -> u16 {
        self.module
    }

    /// Nanoseconds per timestamp tick.
    #[must_use]
    pub fn calibration(&self) -> f64 {
        self.calibration
    }

    /// Hits whose time did not advance on their channel.
    #[must_use]
    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }

    /// Hits dropped during parsing.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Read up to `n_words` from the FIFO and append the parsed hits.
    ///
    /// `n_words` is rounded down to whole hits; nothing is read if that
    /// leaves zero. A FIFO failure is logged and reads nothing. Hits come
    /// from `pool`, and every hit that is not appended goes back to it.
    /// Returns the number of words read.
    pub fn read(
        &mut self,
        pool: &mut ObjectPool<ZeroCopyHit>,
        hits: &mut Vec<HitInfo>,
        n_words: usize,
    ) -> SortResult<usize> {
        let n_words = n_words - n_words % self.expected_event_length;
        if n_words == 0 {
            return Ok(0);
        }

        let mut buffer = self.arena.allocate(n_words * 4);
        if let Err(e) = self.fifo.read_fifo(self.module, buffer.as_mut_slice()) {
            warn!(module = self.module, n_words, error = %e, "FIFO read failed");
            self.arena.free(buffer);
            return Ok(0);
        }
        let shared = self.arena.share(buffer);
        self.parse_hits(pool, hits, &shared, n_words)?;
        Ok(n_words)
    }

    /// Slice the first `n_used_words` of `buffer` into hits.
    ///
    /// In strict mode a length mismatch fails the call and none of this
    /// buffer's hits are kept. Hits with a short header are always dropped.
    /// Dropped hits are released to `pool`.
    pub fn parse_hits(
        &mut self,
        pool: &mut ObjectPool<ZeroCopyHit>,
        hits: &mut Vec<HitInfo>,
        buffer: &SharedBuffer,
        n_used_words: usize,
    ) -> SortResult<()> {
        let start = hits.len();
        let n_used_words = n_used_words.min(buffer.word_len());
        let mut cursor = 0;

        while cursor < n_used_words {
            let remaining = n_used_words - cursor;
            let declared = buffer
                .word(cursor)
                .map_or(0, |w| layout::channel_length_of(w) as usize);
            let span = declared.min(remaining).max(1);

            let mut hit = pool.acquire();
            let bound = hit.set_hit(buffer, cursor, span).and_then(|()| {
                hit.set_module_type(self.module_type);
                hit.set_length()
            });
            if let Err(e) = bound {
                pool.release(hit);
                release_from(pool, hits, start);
                return Err(e.into());
            }

            if !hit.validate(self.expected_event_length) {
                pool.release(hit);
                if self.strict_length {
                    release_from(pool, hits, start);
                    return Err(SortError::LengthMismatch {
                        module: self.module,
                        expected: self.expected_event_length,
                        found: declared,
                    });
                }
                self.discarded += 1;
                cursor += self.expected_event_length;
                continue;
            }

            let parsed = hit
                .set_time(self.calibration, self.use_external_clock)
                .and_then(|()| hit.set_channel());
            if let Err(e) = parsed {
                self.discarded += 1;
                warn!(module = self.module, word_offset = cursor, error = %e, "Discarding hit");
                pool.release(hit);
                cursor += span;
                continue;
            }

            self.check_order(&hit);
            hits.push(HitInfo {
                module: self.module,
                hit,
            });
            cursor += span;
        }

        debug!(
            module = self.module,
            hits = hits.len() - start,
            words = n_used_words,
            "Parsed FIFO block"
        );
        Ok(())
    }

    /// Warn when a hit's time does not advance on its channel. Never rejects.
    pub fn check_order(&mut self, hit: &ZeroCopyHit) {
        let channel = hit.channel() as usize % CHANNELS;
        let time = hit.time();
        if let Some(last) = self.last_channel_time[channel] {
            if time <= last {
                self.out_of_order += 1;
                warn!(
                    module = self.module,
                    channel,
                    time,
                    last,
                    "Channel time did not increase"
                );
            }
        }
        self.last_channel_time[channel] = Some(time);
    }
}

/// Return every hit appended since `start` to the pool.
fn release_from(pool: &mut ObjectPool<ZeroCopyHit>, hits: &mut Vec<HitInfo>, start: usize) {
    for info in hits.drain(start..) {
        pool.release(info.hit);
    }
}

/// Build one reader per `[[readers]]` entry, all sharing `arena`.
///
/// `open` supplies the FIFO for each entry.
pub fn readers_from_settings<F, O>(
    settings: &[ReaderSettings],
    arena: &Arena,
    mut open: O,
) -> SortResult<Vec<ModuleReader<F>>>
where
    F: FifoReader,
    O: FnMut(&ReaderSettings) -> F,
{
    settings
        .iter()
        .map(|reader| ModuleReader::new(open(reader), arena.clone(), reader))
        .collect()
}
