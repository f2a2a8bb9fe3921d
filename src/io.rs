//! Chunk sources and record sinks around the orchestrator.
//!
//! Sources deliver opaque chunks of whole protocol records; sinks accept one
//! encoded record at a time. A sink either takes the record (blocking if it
//! must) or fails, and a failure ends the run: there is no retry and no
//! silent drop inside the sorter.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::SortError;
use crate::record;

/// Outcome of waiting for the next chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A chunk of whole records
    Chunk(Bytes),
    /// Nothing arrived within the liveness timeout
    Idle,
    /// The source is exhausted
    Closed,
}

/// Upstream transport delivering chunks of protocol records.
#[async_trait]
pub trait ChunkSource: Send {
    /// Wait up to `timeout` for the next chunk.
    async fn next_chunk(&mut self, timeout: Duration) -> Result<SourceEvent, SortError>;
}

/// Downstream consumer of encoded records.
pub trait RecordSink {
    /// Accept one whole record.
    fn write_record(&mut self, record: &[u8]) -> Result<(), SortError>;

    /// Push buffered records downstream.
    fn flush(&mut self) -> Result<(), SortError> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn write_record(&mut self, record: &[u8]) -> Result<(), SortError> {
        (**self).write_record(record)
    }

    fn flush(&mut self) -> Result<(), SortError> {
        (**self).flush()
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Source fed through a bounded tokio channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelSource {
    /// Wrap an existing receiver.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Create a source and the sender that feeds it. The channel holds at
    /// most `capacity` chunks; producers wait when it is full.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl ChunkSource for ChannelSource {
    async fn next_chunk(&mut self, timeout: Duration) -> Result<SourceEvent, SortError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(chunk)) => Ok(SourceEvent::Chunk(chunk)),
            Ok(None) => Ok(SourceEvent::Closed),
            Err(_) => Ok(SourceEvent::Idle),
        }
    }
}

/// Source that frames a byte stream of records into chunks of at most
/// `max_chunk_bytes` (a single larger record is delivered whole).
#[derive(Debug)]
pub struct RecordFileSource<R> {
    reader: R,
    pending: BytesMut,
    max_chunk_bytes: usize,
    eof: bool,
    consumed: usize,
}

impl<R: AsyncRead + Unpin + Send> RecordFileSource<R> {
    /// Frame records read from `reader`.
    #[must_use]
    pub fn new(reader: R, max_chunk_bytes: usize) -> Self {
        let max_chunk_bytes = max_chunk_bytes.max(record::RECORD_HEADER_SIZE);
        Self {
            reader,
            pending: BytesMut::with_capacity(max_chunk_bytes),
            max_chunk_bytes,
            eof: false,
            consumed: 0,
        }
    }

    /// Bytes handed out as chunks so far.
    #[must_use]
    pub fn bytes_consumed(&self) -> usize {
        self.consumed
    }

    fn take_complete(&mut self) -> Result<Option<Bytes>, SortError> {
        let n = record::complete_prefix(&self.pending, self.max_chunk_bytes).map_err(|e| {
            match e {
                SortError::Framing { offset, message } => SortError::Framing {
                    offset: self.consumed + offset,
                    message,
                },
                other => other,
            }
        })?;
        if n == 0 {
            return Ok(None);
        }
        self.consumed += n;
        Ok(Some(self.pending.split_to(n).freeze()))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ChunkSource for RecordFileSource<R> {
    async fn next_chunk(&mut self, timeout: Duration) -> Result<SourceEvent, SortError> {
        loop {
            if self.eof {
                if self.pending.is_empty() {
                    return Ok(SourceEvent::Closed);
                }
                return match self.take_complete()? {
                    Some(chunk) => Ok(SourceEvent::Chunk(chunk)),
                    None => Err(SortError::Framing {
                        offset: self.consumed,
                        message: format!(
                            "stream ended inside a record ({} trailing bytes)",
                            self.pending.len()
                        ),
                    }),
                };
            }

            if self.pending.len() >= self.max_chunk_bytes {
                if let Some(chunk) = self.take_complete()? {
                    return Ok(SourceEvent::Chunk(chunk));
                }
            }

            self.pending.reserve(self.max_chunk_bytes);
            match tokio::time::timeout(timeout, self.reader.read_buf(&mut self.pending)).await {
                Ok(Ok(0)) => {
                    debug!(consumed = self.consumed, "Record stream reached EOF");
                    self.eof = true;
                }
                Ok(Ok(n)) => trace!(bytes = n, "Read from record stream"),
                Ok(Err(e)) => return Err(SortError::Io(e)),
                Err(_) => {
                    return Ok(match self.take_complete()? {
                        Some(chunk) => SourceEvent::Chunk(chunk),
                        None => SourceEvent::Idle,
                    })
                }
            }
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Sink writing records back to back into any `Write`.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
    records: u64,
}

impl<W: Write> WriterSink<W> {
    /// Write records to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    /// Records written so far.
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for WriterSink<W> {
    fn write_record(&mut self, record: &[u8]) -> Result<(), SortError> {
        self.writer.write_all(record).map_err(|e| {
            SortError::Sink(format!("write failed after {} records: {e}", self.records))
        })?;
        self.records += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SortError> {
        self.writer
            .flush()
            .map_err(|e| SortError::Sink(format!("flush failed: {e}")))
    }
}

/// In-memory sink keeping every record.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    records: Vec<Bytes>,
}

impl VecSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received, in order.
    #[must_use]
    pub fn records(&self) -> &[Bytes] {
        &self.records
    }

    /// Number of records received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the records.
    #[must_use]
    pub fn into_records(self) -> Vec<Bytes> {
        self.records
    }
}

impl RecordSink for VecSink {
    fn write_record(&mut self, record: &[u8]) -> Result<(), SortError> {
        self.records.push(Bytes::copy_from_slice(record));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ChunkBuilder, RecordType};

    fn three_records() -> Bytes {
        ChunkBuilder::new()
            .record(RecordType::Other(9), None, &[1; 8])
            .record(RecordType::Other(9), None, &[2; 8])
            .record(RecordType::Other(9), None, &[3; 8])
            .build()
    }

    #[tokio::test]
    async fn test_channel_source_events() {
        let (tx, mut source) = ChannelSource::channel(4);
        tx.send(Bytes::from_static(b"abc")).await.unwrap();

        let event = source.next_chunk(Duration::from_millis(50)).await.unwrap();
        assert_eq!(event, SourceEvent::Chunk(Bytes::from_static(b"abc")));

        let event = source.next_chunk(Duration::from_millis(10)).await.unwrap();
        assert_eq!(event, SourceEvent::Idle);

        drop(tx);
        let event = source.next_chunk(Duration::from_millis(50)).await.unwrap();
        assert_eq!(event, SourceEvent::Closed);
    }

    #[tokio::test]
    async fn test_file_source_batches_whole_records() {
        let data = three_records();
        let mut source = RecordFileSource::new(&data[..], 45);

        let mut chunks = Vec::new();
        loop {
            match source.next_chunk(Duration::from_secs(1)).await.unwrap() {
                SourceEvent::Chunk(chunk) => chunks.push(chunk),
                SourceEvent::Idle => continue,
                SourceEvent::Closed => break,
            }
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 40);
        assert_eq!(chunks[1].len(), 20);
        assert_eq!(source.bytes_consumed(), 60);
    }

    #[tokio::test]
    async fn test_file_source_partial_record_at_eof() {
        let data = three_records();
        let mut source = RecordFileSource::new(&data[..50], 1 << 20);

        let first = source.next_chunk(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(first, SourceEvent::Chunk(ref c) if c.len() == 40));

        let err = source.next_chunk(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SortError::Framing { offset: 40, .. }));
    }

    #[test]
    fn test_writer_sink_concatenates() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write_record(b"one").unwrap();
        sink.write_record(b"two").unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.records_written(), 2);
        assert_eq!(sink.into_inner(), b"onetwo");
    }

    #[test]
    fn test_writer_sink_error_is_fatal() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut sink = WriterSink::new(Full);
        let err = sink.write_record(b"x").unwrap_err();
        assert!(matches!(err, SortError::Sink(_)));
    }

    #[test]
    fn test_vec_sink() {
        fn write_one<S: RecordSink>(mut sink: S) {
            sink.write_record(b"a").unwrap();
        }
        let mut sink = VecSink::new();
        write_one(&mut sink);
        assert_eq!(sink.len(), 1);
        assert_eq!(&sink.records()[0][..], b"a");
    }
}
