//! Protocol record framing.
//!
//! A chunk is a run of little-endian, self-describing records:
//!
//! ```text
//! u32 size            bytes, including this word
//! u32 type
//! u32 body_header     0 or 4: absent; >= 20: present
//!   u64 timestamp
//!   u32 source_id
//!   u32 barrier_type
//!   ...               body_header - 20 extension bytes
//! body                remaining bytes
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::SortError;
use crate::layout::{self, HitPreamble};

/// Bytes of `size` + `type` + body-header size word.
pub const RECORD_HEADER_SIZE: usize = 12;

/// Size of a present body header without extension.
pub const BODY_HEADER_SIZE: usize = 20;

/// Body-header size word written when the header is absent.
const NO_BODY_HEADER: u32 = 4;

/// Record type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Start of a run
    BeginRun,
    /// End of a run; forces a full flush
    EndRun,
    /// Run paused
    PauseRun,
    /// Run resumed
    ResumeRun,
    /// Hit-bearing record
    PhysicsEvent,
    /// Any other tag, passed through untouched
    Other(u32),
}

impl RecordType {
    /// Wire value of `BeginRun`.
    pub const BEGIN_RUN: u32 = 1;
    /// Wire value of `EndRun`.
    pub const END_RUN: u32 = 2;
    /// Wire value of `PauseRun`.
    pub const PAUSE_RUN: u32 = 3;
    /// Wire value of `ResumeRun`.
    pub const RESUME_RUN: u32 = 4;
    /// Wire value of `PhysicsEvent`.
    pub const PHYSICS_EVENT: u32 = 30;

    /// Map a wire value to a record type.
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            Self::BEGIN_RUN => Self::BeginRun,
            Self::END_RUN => Self::EndRun,
            Self::PAUSE_RUN => Self::PauseRun,
            Self::RESUME_RUN => Self::ResumeRun,
            Self::PHYSICS_EVENT => Self::PhysicsEvent,
            other => Self::Other(other),
        }
    }

    /// Wire value.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::BeginRun => Self::BEGIN_RUN,
            Self::EndRun => Self::END_RUN,
            Self::PauseRun => Self::PAUSE_RUN,
            Self::ResumeRun => Self::RESUME_RUN,
            Self::PhysicsEvent => Self::PHYSICS_EVENT,
            Self::Other(value) => value,
        }
    }
}

/// Optional timestamp/source header of a record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodyHeader {
    /// Event timestamp
    pub timestamp: u64,
    /// Producer id
    pub source_id: u32,
    /// Barrier type, 0 for none
    pub barrier_type: u32,
}

/// One framed record borrowed from a chunk.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Byte offset of the record in its chunk
    pub offset: usize,
    /// Type tag
    pub record_type: RecordType,
    /// Body header, if present
    pub body_header: Option<BodyHeader>,
    /// Body bytes after the body header
    pub body: &'a [u8],
    /// Whole record, header included
    pub raw: &'a [u8],
}

#[inline]
fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[inline]
fn read_u64(data: &[u8], at: usize) -> u64 {
    u64::from(read_u32(data, at)) | u64::from(read_u32(data, at + 4)) << 32
}

/// Size of the record starting at `data[0]`, or `None` if fewer than 4 bytes
/// are present.
#[must_use]
pub fn peek_size(data: &[u8]) -> Option<usize> {
    (data.len() >= 4).then(|| read_u32(data, 0) as usize)
}

/// Frame the record at `offset` of `chunk`.
pub fn parse_record(chunk: &[u8], offset: usize) -> Result<Record<'_>, SortError> {
    let framing = |message: String| SortError::Framing { offset, message };
    let rest = &chunk[offset..];
    if rest.len() < RECORD_HEADER_SIZE {
        return Err(framing(format!(
            "{} bytes left, record header needs {RECORD_HEADER_SIZE}",
            rest.len()
        )));
    }
    let size = read_u32(rest, 0) as usize;
    if size < RECORD_HEADER_SIZE {
        return Err(framing(format!("record size {size} is below the header size")));
    }
    if size > rest.len() {
        return Err(framing(format!(
            "record size {size} exceeds the {} bytes left in the chunk",
            rest.len()
        )));
    }
    let raw = &rest[..size];
    let record_type = RecordType::from_u32(read_u32(raw, 4));
    let header_size = read_u32(raw, 8) as usize;

    let (body_header, body_start) = match header_size {
        0 | 4 => (None, RECORD_HEADER_SIZE),
        n if n >= BODY_HEADER_SIZE && 8 + n <= size => (
            Some(BodyHeader {
                timestamp: read_u64(raw, 12),
                source_id: read_u32(raw, 20),
                barrier_type: read_u32(raw, 24),
            }),
            8 + n,
        ),
        n => {
            return Err(framing(format!(
                "body header size {n} invalid for record of {size} bytes"
            )))
        }
    };

    Ok(Record {
        offset,
        record_type,
        body_header,
        body: &raw[body_start..],
        raw,
    })
}

/// Iterator over the records of a chunk.
///
/// Stops after the first framing error.
#[derive(Debug, Clone)]
pub struct RecordIter<'a> {
    chunk: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RecordIter<'a> {
    /// Iterate over `chunk` from its start.
    #[must_use]
    pub fn new(chunk: &'a [u8]) -> Self {
        Self {
            chunk,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<Record<'a>, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.chunk.len() {
            return None;
        }
        match parse_record(self.chunk, self.offset) {
            Ok(record) => {
                self.offset += record.raw.len();
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Length of the longest prefix of `data` made of whole records and no
/// longer than `max_bytes`, except that a single oversized record is always
/// taken whole. Returns 0 when the first record is incomplete.
pub fn complete_prefix(data: &[u8], max_bytes: usize) -> Result<usize, SortError> {
    let mut end = 0;
    while let Some(size) = peek_size(&data[end..]) {
        if size < RECORD_HEADER_SIZE {
            return Err(SortError::Framing {
                offset: end,
                message: format!("record size {size} is below the header size"),
            });
        }
        if end + size > data.len() || (end > 0 && end + size > max_bytes) {
            break;
        }
        end += size;
    }
    Ok(end)
}

/// Append one record to `out`.
pub fn encode_record(
    out: &mut BytesMut,
    record_type: RecordType,
    body_header: Option<&BodyHeader>,
    body: &[u8],
) {
    let header_bytes = if body_header.is_some() {
        BODY_HEADER_SIZE
    } else {
        4
    };
    let size = 8 + header_bytes + body.len();
    out.reserve(size);
    out.put_u32_le(size as u32);
    out.put_u32_le(record_type.as_u32());
    match body_header {
        Some(header) => {
            out.put_u32_le(BODY_HEADER_SIZE as u32);
            out.put_u64_le(header.timestamp);
            out.put_u32_le(header.source_id);
            out.put_u32_le(header.barrier_type);
        }
        None => out.put_u32_le(NO_BODY_HEADER),
    }
    out.put_slice(body);
}

/// Append a single-hit output record: body header stamped with `timestamp`
/// and `source_id`, body in the legacy single-hit layout.
pub fn encode_single_hit_record(
    out: &mut BytesMut,
    timestamp: u64,
    source_id: u32,
    module_type: u32,
    hit_bytes: &[u8],
) {
    let size = 8 + BODY_HEADER_SIZE + 8 + hit_bytes.len();
    out.reserve(size);
    out.put_u32_le(size as u32);
    out.put_u32_le(RecordType::PHYSICS_EVENT);
    out.put_u32_le(BODY_HEADER_SIZE as u32);
    out.put_u64_le(timestamp);
    out.put_u32_le(source_id);
    out.put_u32_le(0);
    layout::encode_single_hit_body(out, module_type, hit_bytes);
}

/// Builds chunks of records. Used by simulated sources, tools and tests.
#[derive(Debug, Default)]
pub struct ChunkBuilder {
    buf: BytesMut,
}

impl ChunkBuilder {
    /// Empty chunk.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arbitrary record.
    #[must_use]
    pub fn record(
        mut self,
        record_type: RecordType,
        body_header: Option<BodyHeader>,
        body: &[u8],
    ) -> Self {
        encode_record(&mut self.buf, record_type, body_header.as_ref(), body);
        self
    }

    /// Append a hit-bearing record: preamble followed by `hit_words`.
    #[must_use]
    pub fn hits(
        mut self,
        preamble: HitPreamble,
        body_header: Option<BodyHeader>,
        hit_words: &[u32],
    ) -> Self {
        let mut body = BytesMut::with_capacity(layout::PREAMBLE_WORDS * 4 + hit_words.len() * 4);
        preamble.encode(&mut body);
        for word in hit_words {
            body.put_u32_le(*word);
        }
        encode_record(
            &mut self.buf,
            RecordType::PhysicsEvent,
            body_header.as_ref(),
            &body,
        );
        self
    }

    /// Append an end-of-run record.
    #[must_use]
    pub fn end_run(self) -> Self {
        self.record(RecordType::EndRun, None, &[])
    }

    /// Finish the chunk.
    #[must_use]
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_mapping() {
        assert_eq!(RecordType::from_u32(30), RecordType::PhysicsEvent);
        assert_eq!(RecordType::from_u32(2), RecordType::EndRun);
        assert_eq!(RecordType::from_u32(99), RecordType::Other(99));
        assert_eq!(RecordType::Other(99).as_u32(), 99);
    }

    #[test]
    fn test_parse_with_and_without_body_header() {
        let header = BodyHeader {
            timestamp: 0x1_0000_0002,
            source_id: 7,
            barrier_type: 0,
        };
        let chunk = ChunkBuilder::new()
            .record(RecordType::BeginRun, Some(header), b"abcd")
            .record(RecordType::Other(40), None, b"xy")
            .build();

        let records: Vec<_> = RecordIter::new(&chunk)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].record_type, RecordType::BeginRun);
        assert_eq!(records[0].body_header, Some(header));
        assert_eq!(records[0].body, b"abcd");
        assert_eq!(records[0].raw.len(), 8 + 20 + 4);

        assert_eq!(records[1].offset, 32);
        assert_eq!(records[1].body_header, None);
        assert_eq!(records[1].body, b"xy");
    }

    #[test]
    fn test_zero_body_header_word_is_absent() {
        let mut chunk = BytesMut::new();
        chunk.put_u32_le(16);
        chunk.put_u32_le(5);
        chunk.put_u32_le(0);
        chunk.put_u32_le(0xDEAD_BEEF);
        let record = parse_record(&chunk, 0).unwrap();
        assert_eq!(record.body_header, None);
        assert_eq!(record.body, &0xDEAD_BEEFu32.to_le_bytes());
    }

    #[test]
    fn test_truncated_record_is_framing_error() {
        let chunk = ChunkBuilder::new().end_run().build();
        let err = parse_record(&chunk[..chunk.len() - 1], 0).unwrap_err();
        assert!(matches!(err, SortError::Framing { offset: 0, .. }));

        let mut bad = BytesMut::new();
        bad.put_u32_le(8);
        bad.put_u32_le(2);
        bad.put_u32_le(4);
        assert!(parse_record(&bad, 0).is_err());
    }

    #[test]
    fn test_bad_body_header_size() {
        let mut chunk = BytesMut::new();
        chunk.put_u32_le(16);
        chunk.put_u32_le(1);
        chunk.put_u32_le(12);
        chunk.put_u32_le(0);
        assert!(parse_record(&chunk, 0).is_err());
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let good = ChunkBuilder::new().end_run().build();
        let mut chunk = BytesMut::from(&good[..]);
        chunk.put_u32_le(1000);
        chunk.put_u32_le(1);
        chunk.put_u32_le(4);
        let results: Vec<_> = RecordIter::new(&chunk).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_complete_prefix() {
        let chunk = ChunkBuilder::new()
            .record(RecordType::Other(9), None, &[0; 8])
            .record(RecordType::Other(9), None, &[0; 8])
            .record(RecordType::Other(9), None, &[0; 8])
            .build();
        assert_eq!(complete_prefix(&chunk, 1 << 20).unwrap(), 60);
        assert_eq!(complete_prefix(&chunk, 45).unwrap(), 40);
        // One record is always taken even when it exceeds the limit
        assert_eq!(complete_prefix(&chunk, 1).unwrap(), 20);
        assert_eq!(complete_prefix(&chunk[..59], 1 << 20).unwrap(), 40);
        assert_eq!(complete_prefix(&chunk[..3], 1 << 20).unwrap(), 0);
    }

    #[test]
    fn test_single_hit_record_layout() {
        let mut out = BytesMut::new();
        encode_single_hit_record(&mut out, 1234, 5, 0x00E0_00FA, &[1, 0, 0, 0, 2, 0, 0, 0]);
        let record = parse_record(&out, 0).unwrap();
        assert_eq!(record.record_type, RecordType::PhysicsEvent);
        let header = record.body_header.unwrap();
        assert_eq!(header.timestamp, 1234);
        assert_eq!(header.source_id, 5);
        assert_eq!(read_u32(record.body, 0), 8);
        assert_eq!(read_u32(record.body, 4), 0x00E0_00FA);
        assert_eq!(&record.body[8..], &[1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_hits_builder_writes_preamble() {
        let chunk = ChunkBuilder::new()
            .hits(
                HitPreamble {
                    module_type: 250,
                    calibration: 8.0,
                },
                None,
                &[1, 2, 3, 4],
            )
            .build();
        let record = parse_record(&chunk, 0).unwrap();
        let preamble = HitPreamble::decode(record.body).unwrap();
        assert_eq!(preamble.calibration, 8.0);
        assert_eq!(record.body.len(), 32);
    }
}
