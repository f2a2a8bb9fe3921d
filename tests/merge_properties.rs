//! Ordering properties of the windowed merge under adversarial batches.

use ddas_sort::{HitManager, Timed};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Hit {
    time: f64,
    seq: usize,
}

impl Timed for Hit {
    fn time(&self) -> f64 {
        self.time
    }
}

fn assert_sorted(manager: &HitManager<Hit>) {
    let hits: Vec<Hit> = manager.iter().copied().collect();
    for pair in hits.windows(2) {
        assert!(
            pair[0].time < pair[1].time
                || (pair[0].time == pair[1].time && pair[0].seq < pair[1].seq),
            "out of order: {pair:?}"
        );
    }
}

fn batch(rng: &mut StdRng, seq: &mut usize, len: usize, lo: f64, hi: f64) -> Vec<Hit> {
    (0..len)
        .map(|_| {
            *seq += 1;
            Hit {
                time: rng.gen_range(lo..hi).round(),
                seq: *seq,
            }
        })
        .collect()
}

/// Random overlapping batches keep the queue sorted, ties in arrival order
#[test]
fn test_random_batches_stay_sorted() {
    let mut rng = StdRng::seed_from_u64(0xDDA5);
    let mut manager = HitManager::new(1e12);
    let mut seq = 0;
    let mut total = 0;
    for _ in 0..200 {
        let len = rng.gen_range(0..20);
        let lo = rng.gen_range(0.0..1000.0);
        let new = batch(&mut rng, &mut seq, len, lo, lo + 100.0);
        total += new.len();
        manager.add_hits(new);
        assert_sorted(&manager);
    }
    assert_eq!(manager.len(), total);
}

/// Batches far before, far after, and straddling the queue
#[test]
fn test_far_out_of_range_batches() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut manager = HitManager::new(1e12);
    let mut seq = 0;

    manager.add_hits(batch(&mut rng, &mut seq, 50, 1000.0, 2000.0));
    manager.add_hits(batch(&mut rng, &mut seq, 50, 1e6, 2e6));
    manager.add_hits(batch(&mut rng, &mut seq, 50, -2e6, -1e6));
    manager.add_hits(batch(&mut rng, &mut seq, 50, -3e6, 3e6));
    manager.add_hits(Vec::new());
    assert_sorted(&manager);
    assert_eq!(manager.len(), 200);
}

/// Interleaved single-hit batches from two sources
#[test]
fn test_interleaved_single_hits() {
    let mut manager = HitManager::new(1e12);
    let mut seq = 0;
    for i in 0..100 {
        for offset in [0.5, 0.0] {
            seq += 1;
            manager.add_hits(vec![Hit {
                time: f64::from(i) + offset,
                seq,
            }]);
        }
    }
    assert_sorted(&manager);
    assert_eq!(manager.len(), 200);
}

/// Draining with the window never emits a hit out of order
#[test]
fn test_drained_output_is_ordered() {
    let mut rng = StdRng::seed_from_u64(42);
    let window = 50.0;
    let mut manager = HitManager::new(window);
    let mut seq = 0;
    let mut out = Vec::new();
    let mut newest = 0.0_f64;

    for _ in 0..500 {
        // Each batch lags the newest hit by less than the window
        let lo = (newest - window + 1.0).max(0.0);
        let len = rng.gen_range(1..5);
        let new = batch(&mut rng, &mut seq, len, lo, newest + 20.0);
        newest = new.iter().map(|h| h.time).fold(newest, f64::max);
        manager.add_hits(new);
        while let Some(hit) = manager.next_finalized() {
            out.push(hit.time);
        }
    }
    while let Some(hit) = manager.next_hit() {
        out.push(hit.time);
    }
    assert!(out.windows(2).all(|w| w[0] <= w[1]));
}

/// `have_hit` at and around the window boundary
#[test]
fn test_have_hit_boundary() {
    let mut manager = HitManager::new(50.0);
    manager.add_hits(vec![Hit { time: 0.0, seq: 0 }, Hit { time: 50.0, seq: 1 }]);
    assert!(!manager.have_hit());

    manager.add_hits(vec![Hit {
        time: 50.000_001,
        seq: 2,
    }]);
    assert!(manager.have_hit());

    let mut single = HitManager::new(0.0);
    single.add_hits(vec![Hit { time: 1.0, seq: 0 }]);
    assert!(!single.have_hit(), "a single hit is never finalized");
}
