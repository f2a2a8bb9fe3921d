//! Chunk-driven sorter.
//!
//! The [`Orchestrator`] walks each chunk record by record:
//!
//! - hit-bearing records are copied once into an arena buffer, sliced into
//!   [`ZeroCopyHit`]s, merged, and every finalized hit is written out as a
//!   single-hit record;
//! - end-of-run records flush the whole queue first, then pass through;
//! - everything else passes through untouched.
//!
//! Direct-hardware readers feed the same merge through
//! [`Orchestrator::read_module`].
//!
//! One orchestrator owns its arena, merge queue and hit pool. It is driven
//! from one task and never shares them.

use std::time::Duration;

use bytes::BytesMut;
use daq_arena::{Arena, ObjectPool, SharedBuffer};
use tracing::{debug, info, trace, warn};

use crate::config::SortSettings;
use crate::error::{SortError, SortResult};
use crate::io::{ChunkSource, RecordSink, SourceEvent};
use crate::layout::{self, HitPreamble, ModuleType, PREAMBLE_WORDS};
use crate::merge::HitManager;
use crate::reader::{FifoReader, ModuleReader};
use crate::record::{self, Record, RecordIter, RecordType};
use crate::zero_copy::ZeroCopyHit;

/// Hit objects kept ready in the pool at start-up.
const PREALLOCATED_HITS: usize = 256;

/// Counters for one orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Chunks processed
    pub chunks: u64,
    /// Records framed
    pub records: u64,
    /// Hit-bearing records
    pub hit_records: u64,
    /// Hits handed to the merge
    pub hits_parsed: u64,
    /// Hits written to the sink
    pub hits_emitted: u64,
    /// Records passed through unchanged, end-of-run excluded
    pub passthrough: u64,
    /// Hits earlier than the last emitted time
    pub late_hits: u64,
    /// Hits dropped because their header could not be parsed
    pub discarded_hits: u64,
    /// End-of-run records seen
    pub end_runs: u64,
}

/// Merges hit-bearing records from a chunk source into a time-ordered
/// stream of single-hit records.
#[derive(Debug)]
pub struct Orchestrator {
    manager: HitManager<ZeroCopyHit>,
    arena: Arena,
    hit_pool: ObjectPool<ZeroCopyHit>,
    chunk_timeout: Duration,
    last_emitted: Option<f64>,
    source_id: u32,
    stats: SortStats,
    out: BytesMut,
}

impl Orchestrator {
    /// Create an orchestrator from the `[sorter]` settings.
    #[must_use]
    pub fn new(settings: &SortSettings) -> Self {
        Self {
            manager: HitManager::new(settings.window_ns),
            arena: Arena::new(),
            hit_pool: ObjectPool::with_preallocated(PREALLOCATED_HITS, ZeroCopyHit::new),
            chunk_timeout: settings.chunk_timeout,
            last_emitted: None,
            source_id: settings.default_source_id,
            stats: SortStats::default(),
            out: BytesMut::with_capacity(256),
        }
    }

    /// Default settings with the given window in nanoseconds.
    #[must_use]
    pub fn with_window(window_ns: f64) -> Self {
        Self::new(&SortSettings {
            window_ns,
            ..SortSettings::default()
        })
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> SortStats {
        self.stats
    }

    /// Hits waiting in the merge queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.manager.len()
    }

    /// Merge window in nanoseconds.
    #[must_use]
    pub fn window(&self) -> f64 {
        self.manager.window()
    }

    /// Time of the last hit written, reset at end of run.
    #[must_use]
    pub fn last_emitted(&self) -> Option<f64> {
        self.last_emitted
    }

    /// Source id stamped on output records.
    #[must_use]
    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// The arena hit payloads are copied into.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Hits idle in the pool.
    #[must_use]
    pub fn idle_hits(&self) -> usize {
        self.hit_pool.idle()
    }

    /// Process every record of one chunk, in order.
    pub fn process_chunk<S>(&mut self, chunk: &[u8], sink: &mut S) -> SortResult<()>
    where
        S: RecordSink + ?Sized,
    {
        self.stats.chunks += 1;
        for record in RecordIter::new(chunk) {
            let record = record?;
            self.stats.records += 1;
            if let Some(header) = record.body_header {
                self.source_id = header.source_id;
            }

            match record.record_type {
                RecordType::PhysicsEvent => {
                    self.stats.hit_records += 1;
                    let hits = self.process_hits(&record)?;
                    self.submit_hits(hits, sink)?;
                }
                RecordType::EndRun => self.end_run(&record, sink)?,
                _ => {
                    sink.write_record(record.raw)?;
                    self.stats.passthrough += 1;
                }
            }
        }
        Ok(())
    }

    /// Read one FIFO block from `reader` and merge its hits.
    ///
    /// The reader draws its hits from this orchestrator's pool, so output
    /// and discards return them here. Returns the words read.
    pub fn read_module<F, S>(
        &mut self,
        reader: &mut ModuleReader<F>,
        n_words: usize,
        sink: &mut S,
    ) -> SortResult<usize>
    where
        F: FifoReader,
        S: RecordSink + ?Sized,
    {
        let mut infos = Vec::new();
        let read = reader.read(&mut self.hit_pool, &mut infos, n_words)?;
        if !infos.is_empty() {
            let hits = infos.into_iter().map(|info| info.hit).collect();
            self.submit_hits(hits, sink)?;
        }
        Ok(read)
    }

    /// Merge `hits` and write every hit that is now finalized.
    pub fn submit_hits<S>(&mut self, hits: Vec<ZeroCopyHit>, sink: &mut S) -> SortResult<()>
    where
        S: RecordSink + ?Sized,
    {
        if let Some(last) = self.last_emitted {
            for hit in hits.iter().filter(|hit| hit.time() < last) {
                self.stats.late_hits += 1;
                warn!(
                    time = hit.time(),
                    last_emitted = last,
                    channel = hit.channel(),
                    "Late hit: earlier than a hit already written, window may be too small"
                );
            }
        }
        self.stats.hits_parsed += hits.len() as u64;
        self.manager.add_hits(hits);

        while let Some(hit) = self.manager.next_finalized() {
            self.output_hit(hit, sink)?;
        }
        Ok(())
    }

    /// Write every queued hit regardless of the window. Returns the count.
    pub fn flush<S>(&mut self, sink: &mut S) -> SortResult<usize>
    where
        S: RecordSink + ?Sized,
    {
        let mut flushed = 0;
        while let Some(hit) = self.manager.next_hit() {
            self.output_hit(hit, sink)?;
            flushed += 1;
        }
        if flushed > 0 {
            debug!(flushed, "Flushed merge queue");
        }
        Ok(flushed)
    }

    /// Drive the sorter from `source` until it closes.
    ///
    /// `Idle` events only prove liveness. When the source closes any queued
    /// hits are flushed; no end-of-run record is synthesised.
    pub async fn run<C, S>(&mut self, source: &mut C, sink: &mut S) -> SortResult<SortStats>
    where
        C: ChunkSource + ?Sized,
        S: RecordSink + ?Sized,
    {
        info!(
            window_ns = self.window(),
            timeout = ?self.chunk_timeout,
            "Sorter running"
        );
        loop {
            match source.next_chunk(self.chunk_timeout).await? {
                SourceEvent::Chunk(chunk) => self.process_chunk(&chunk, sink)?,
                SourceEvent::Idle => trace!("No chunk within liveness timeout"),
                SourceEvent::Closed => break,
            }
        }
        self.flush(sink)?;
        sink.flush()?;
        self.log_stats("Source closed");
        Ok(self.stats)
    }

    fn end_run<S>(&mut self, record: &Record<'_>, sink: &mut S) -> SortResult<()>
    where
        S: RecordSink + ?Sized,
    {
        self.flush(sink)?;
        sink.write_record(record.raw)?;
        sink.flush()?;
        self.last_emitted = None;
        self.stats.end_runs += 1;
        self.log_stats("End of run");
        Ok(())
    }

    /// Copy a hit-bearing body into the arena and slice it into hits.
    ///
    /// A hit whose declared length runs past the body, or is zero, fails the
    /// whole record. Hits whose header is too short are dropped and counted.
    fn process_hits(&mut self, record: &Record<'_>) -> SortResult<Vec<ZeroCopyHit>> {
        let body = record.body;
        let preamble = HitPreamble::decode(body)?;
        if body.len() % 4 != 0 {
            return Err(SortError::Preamble {
                message: format!("payload of {} bytes is not word aligned", body.len()),
            });
        }
        let use_external = ModuleType::decode(preamble.module_type).external_clock;

        let mut buffer = self.arena.allocate(body.len());
        buffer.copy_from_slice(body);
        let shared = self.arena.share(buffer);

        let mut hits = Vec::new();
        if let Err(e) = self.slice_hits(&shared, &preamble, use_external, &mut hits) {
            for hit in hits {
                self.hit_pool.release(hit);
            }
            return Err(e);
        }
        Ok(hits)
    }

    fn slice_hits(
        &mut self,
        shared: &SharedBuffer,
        preamble: &HitPreamble,
        use_external: bool,
        hits: &mut Vec<ZeroCopyHit>,
    ) -> SortResult<()> {
        let n_words = shared.word_len();
        let mut cursor = PREAMBLE_WORDS;
        while let Some(word0) = shared.word(cursor) {
            let declared = layout::channel_length_of(word0) as usize;
            if declared == 0 {
                return Err(SortError::ZeroLengthHit {
                    word_offset: cursor,
                });
            }
            if cursor + declared > n_words {
                return Err(SortError::HitOverrun {
                    word_offset: cursor,
                    declared,
                    available: n_words - cursor,
                });
            }

            let mut hit = self.hit_pool.acquire();
            hit.set_hit(shared, cursor, declared)?;
            hit.set_module_type(preamble.module_type);
            hit.set_length()?;
            let parsed = hit
                .set_time(preamble.calibration, use_external)
                .and_then(|()| hit.set_channel());
            match parsed {
                Ok(()) => hits.push(hit),
                Err(e) => {
                    self.stats.discarded_hits += 1;
                    warn!(word_offset = cursor, declared, error = %e, "Discarding unparseable hit");
                    self.hit_pool.release(hit);
                }
            }
            cursor += declared;
        }
        Ok(())
    }

    fn output_hit<S>(&mut self, hit: ZeroCopyHit, sink: &mut S) -> SortResult<()>
    where
        S: RecordSink + ?Sized,
    {
        let time = hit.time();
        self.out.clear();
        record::encode_single_hit_record(
            &mut self.out,
            time.round() as u64,
            self.source_id,
            hit.module_type(),
            hit.as_bytes(),
        );
        sink.write_record(&self.out)?;
        self.last_emitted = Some(time);
        self.stats.hits_emitted += 1;
        self.hit_pool.release(hit);
        Ok(())
    }

    fn log_stats(&self, reason: &str) {
        let s = &self.stats;
        info!(
            reason,
            chunks = s.chunks,
            records = s.records,
            hit_records = s.hit_records,
            hits_parsed = s.hits_parsed,
            hits_emitted = s.hits_emitted,
            passthrough = s.passthrough,
            late_hits = s.late_hits,
            discarded_hits = s.discarded_hits,
            end_runs = s.end_runs,
            queued = self.manager.len(),
            arena_buffers = self.arena.buffers_created(),
            arena_reallocations = self.arena.total_reallocations(),
            "Sorter statistics"
        );
    }
}
