//! Direct-hardware path: module FIFOs through readers into one sorter.

use std::collections::VecDeque;

use ddas_sort::config::SorterConfig;
use ddas_sort::io::VecSink;
use ddas_sort::layout::HitWords;
use ddas_sort::reader::{readers_from_settings, FifoReader, ModuleReader};
use ddas_sort::record::{parse_record, RecordType};
use ddas_sort::{Orchestrator, SortError};

/// FIFO preloaded with one module's hit words.
#[derive(Default)]
struct MockFifo {
    words: VecDeque<u32>,
}

impl FifoReader for MockFifo {
    fn read_fifo(&mut self, _module: u16, dest: &mut [u8]) -> std::io::Result<()> {
        if dest.len() / 4 > self.words.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "FIFO underrun",
            ));
        }
        for chunk in dest.chunks_exact_mut(4) {
            let word = self.words.pop_front().unwrap_or_default();
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }
}

const CONFIG: &str = r#"
[sorter]
window_ns = 100.0

[[readers]]
module = 2
expected_event_length = 4
calibration_ns = 1.0

# 250 MSPS, calibration from the module type (8 ns/tick)
[[readers]]
module = 3
expected_event_length = 4
module_type = 250
"#;

/// Module 2 ticks every 10 ns, module 3 every 8 ns; both span 400 ns.
fn fifo_for(module: u16) -> MockFifo {
    let ticks: Vec<u64> = match module {
        2 => (0..40).map(|i| i * 10).collect(),
        _ => (0..50).collect(),
    };
    let words = ticks
        .iter()
        .enumerate()
        .flat_map(|(i, &t)| HitWords::new(0, module as u8, (i % 16) as u8, t).build())
        .collect();
    MockFifo { words }
}

fn emitted_times(sink: &VecSink) -> Vec<u64> {
    sink.records()
        .iter()
        .filter_map(|raw| {
            let record = parse_record(raw, 0).ok()?;
            (record.record_type == RecordType::PhysicsEvent)
                .then(|| record.body_header.map(|h| h.timestamp))
                .flatten()
        })
        .collect()
}

/// Two readers built from `[[readers]]` feed one orchestrator in time order
#[test]
fn test_two_modules_merge_through_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ddas-sort.toml");
    std::fs::write(&path, CONFIG).unwrap();
    let config = SorterConfig::load_from(&path).unwrap();
    config.validate().unwrap();

    let mut sorter = Orchestrator::new(&config.sorter);
    let arena = sorter.arena().clone();
    let idle_before = sorter.idle_hits();
    let mut readers =
        readers_from_settings(&config.readers, &arena, |r| fifo_for(r.module)).unwrap();
    assert_eq!(readers[1].calibration(), 8.0);

    let mut sink = VecSink::new();
    // Each round covers 40 ns of both modules
    for _ in 0..10 {
        assert_eq!(sorter.read_module(&mut readers[0], 16, &mut sink).unwrap(), 16);
        assert_eq!(sorter.read_module(&mut readers[1], 20, &mut sink).unwrap(), 20);
    }
    assert!(!sink.is_empty());
    assert!(sorter.queued() > 0);

    // Empty FIFOs log and read nothing
    assert_eq!(sorter.read_module(&mut readers[0], 4, &mut sink).unwrap(), 0);
    sorter.flush(&mut sink).unwrap();

    let times = emitted_times(&sink);
    assert_eq!(times.len(), 90);
    assert!(times.windows(2).all(|w| w[0] <= w[1]), "{times:?}");
    assert_eq!(sorter.stats().hits_emitted, 90);
    assert_eq!(sorter.stats().late_hits, 0);
    for reader in &readers {
        assert_eq!(reader.discarded(), 0);
        assert_eq!(reader.out_of_order(), 0);
    }

    // Every hit is back in the pool and every buffer back in the arena
    assert_eq!(sorter.idle_hits(), idle_before);
    assert_eq!(sorter.queued(), 0);
    assert_eq!(arena.free_count() as u64, arena.buffers_created());
}

/// Repeated read/flush cycles neither grow the pool nor leak buffers
#[test]
fn test_reader_cycles_keep_pool_steady() {
    let mut sorter = Orchestrator::with_window(0.0);
    let idle_before = sorter.idle_hits();
    let settings = ddas_sort::config::ReaderSettings {
        calibration_ns: Some(1.0),
        ..ddas_sort::config::ReaderSettings::new(2, 4)
    };
    let words = (0..1000u64)
        .flat_map(|t| HitWords::new(0, 2, (t % 16) as u8, t).build())
        .collect();
    let mut reader =
        ModuleReader::new(MockFifo { words }, sorter.arena().clone(), &settings).unwrap();
    let mut sink = VecSink::new();

    for _ in 0..10 {
        assert_eq!(sorter.read_module(&mut reader, 400, &mut sink).unwrap(), 400);
        sorter.flush(&mut sink).unwrap();
        assert_eq!(sorter.idle_hits(), idle_before);
    }
    assert_eq!(sink.len(), 1000);
    assert_eq!(sorter.arena().free_count(), 1);
}

/// A strict length mismatch fails the read and returns its hits to the pool
#[test]
fn test_strict_mismatch_returns_hits() {
    let mut sorter = Orchestrator::with_window(0.0);
    let idle_before = sorter.idle_hits();
    let mut words: Vec<u32> = HitWords::new(0, 2, 0, 1).build();
    words.extend(HitWords::new(0, 2, 1, 2).with_trace(vec![0; 8]).build());
    let mut reader = ModuleReader::new(
        MockFifo {
            words: words.into_iter().collect(),
        },
        sorter.arena().clone(),
        &ddas_sort::config::ReaderSettings {
            calibration_ns: Some(1.0),
            ..ddas_sort::config::ReaderSettings::new(2, 4)
        },
    )
    .unwrap();
    let mut sink = VecSink::new();

    let err = sorter.read_module(&mut reader, 8, &mut sink).unwrap_err();
    assert!(matches!(err, SortError::LengthMismatch { module: 2, .. }));
    assert!(sink.is_empty());
    assert_eq!(sorter.queued(), 0);
    assert_eq!(sorter.idle_hits(), idle_before);
    assert_eq!(sorter.arena().free_count(), 1);
}
