//! Windowed merge of per-module hit streams.
//!
//! [`HitManager`] keeps every queued hit in one deque sorted by calibrated
//! time. A hit is finalized once the queue also holds a hit newer than it by
//! more than the window, so nothing that arrives later can still sort ahead
//! of it, provided no module lags the newest hit by more than the window.
//!
//! # Merge cost
//!
//! `add_hits` sorts the batch (`m` hits) and then merges only the queue
//! suffix that overlaps it: the `k` queued hits later than the batch's first
//! hit. Cost is `O(m log m + k + m)`. In steady state batches arrive roughly
//! in time order, so `k` stays near the batch size instead of the queue size.
//!
//! # Ties
//!
//! Sorting is stable and the merge takes the queued hit first on equal
//! times, so hits with identical times leave in arrival order.

use std::collections::VecDeque;

/// Anything with a calibrated time in nanoseconds.
pub trait Timed {
    /// Calibrated time in nanoseconds.
    fn time(&self) -> f64;
}

impl Timed for f64 {
    fn time(&self) -> f64 {
        *self
    }
}

/// Time-ordered queue with a finalization window.
#[derive(Debug, Clone)]
pub struct HitManager<H> {
    queue: VecDeque<H>,
    window: f64,
}

impl<H: Timed> HitManager<H> {
    /// Create an empty manager with a window in nanoseconds.
    #[must_use]
    pub fn new(window: f64) -> Self {
        Self {
            queue: VecDeque::new(),
            window,
        }
    }

    /// Finalization window in nanoseconds.
    #[must_use]
    pub fn window(&self) -> f64 {
        self.window
    }

    /// Number of queued hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Time of the oldest queued hit.
    #[must_use]
    pub fn oldest_time(&self) -> Option<f64> {
        self.queue.front().map(Timed::time)
    }

    /// Time of the newest queued hit.
    #[must_use]
    pub fn newest_time(&self) -> Option<f64> {
        self.queue.back().map(Timed::time)
    }

    /// Iterate over queued hits, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &H> {
        self.queue.iter()
    }

    /// Sort `batch` and merge it into the queue.
    pub fn add_hits(&mut self, mut batch: Vec<H>) {
        if batch.is_empty() {
            return;
        }
        batch.sort_by(|a, b| a.time().total_cmp(&b.time()));

        let (Some(front), Some(last)) = (self.queue.front(), batch.last()) else {
            self.queue = VecDeque::from(batch);
            return;
        };

        if last.time() < front.time() {
            for hit in batch.into_iter().rev() {
                self.queue.push_front(hit);
            }
            return;
        }

        // Affected suffix: queued hits strictly later than the batch's first
        // hit. Equal times stay ahead of the batch.
        let first_new = batch[0].time();
        let mut start = self.queue.len();
        while start > 0 && self.queue[start - 1].time() > first_new {
            start -= 1;
        }

        if start == self.queue.len() {
            self.queue.extend(batch);
            return;
        }

        let tail: Vec<H> = self.queue.drain(start..).collect();
        self.queue.reserve(tail.len() + batch.len());
        let mut older = tail.into_iter().peekable();
        let mut newer = batch.into_iter().peekable();
        loop {
            let take_older = match (older.peek(), newer.peek()) {
                (Some(a), Some(b)) => a.time() <= b.time(),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_older { older.next() } else { newer.next() };
            if let Some(hit) = next {
                self.queue.push_back(hit);
            }
        }
    }

    /// `true` when the oldest hit is finalized: at least two hits are queued
    /// and `newest - oldest > window`.
    #[must_use]
    pub fn have_hit(&self) -> bool {
        match (self.queue.front(), self.queue.back()) {
            (Some(oldest), Some(newest)) if self.queue.len() >= 2 => {
                newest.time() - oldest.time() > self.window
            }
            _ => false,
        }
    }

    /// Pop the oldest hit regardless of the window.
    pub fn next_hit(&mut self) -> Option<H> {
        self.queue.pop_front()
    }

    /// Pop the oldest hit only if it is finalized.
    pub fn next_finalized(&mut self) -> Option<H> {
        if self.have_hit() {
            self.queue.pop_front()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Tagged {
        time: f64,
        tag: u32,
    }

    impl Timed for Tagged {
        fn time(&self) -> f64 {
            self.time
        }
    }

    fn times(manager: &HitManager<f64>) -> Vec<f64> {
        manager.iter().copied().collect()
    }

    #[test]
    fn test_empty_queue_takes_sorted_batch() {
        let mut manager = HitManager::new(10.0);
        manager.add_hits(vec![3.0, 1.0, 2.0]);
        assert_eq!(times(&manager), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_earlier_batch_is_prepended() {
        let mut manager = HitManager::new(10.0);
        manager.add_hits(vec![10.0, 11.0]);
        manager.add_hits(vec![2.0, 1.0]);
        assert_eq!(times(&manager), vec![1.0, 2.0, 10.0, 11.0]);
    }

    #[test]
    fn test_later_batch_is_appended() {
        let mut manager = HitManager::new(10.0);
        manager.add_hits(vec![1.0, 2.0]);
        manager.add_hits(vec![4.0, 3.0]);
        assert_eq!(times(&manager), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_interleaved_batch_merges_suffix() {
        let mut manager = HitManager::new(10.0);
        manager.add_hits(vec![1.0, 3.0, 5.0, 7.0]);
        manager.add_hits(vec![6.0, 4.0, 8.0]);
        assert_eq!(times(&manager), vec![1.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut manager = HitManager::new(10.0);
        manager.add_hits(vec![1.0]);
        manager.add_hits(Vec::new());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let mut manager = HitManager::new(10.0);
        manager.add_hits(vec![
            Tagged { time: 5.0, tag: 0 },
            Tagged { time: 5.0, tag: 1 },
        ]);
        manager.add_hits(vec![
            Tagged { time: 5.0, tag: 2 },
            Tagged { time: 1.0, tag: 3 },
            Tagged { time: 5.0, tag: 4 },
        ]);
        let tags: Vec<u32> = manager.iter().map(|h| h.tag).collect();
        assert_eq!(tags, vec![3, 0, 1, 2, 4]);
    }

    #[test]
    fn test_have_hit_window_boundary() {
        let mut manager = HitManager::new(50.0);
        assert!(!manager.have_hit());

        manager.add_hits(vec![0.0]);
        assert!(!manager.have_hit());

        manager.add_hits(vec![50.0]);
        assert!(!manager.have_hit(), "gap equal to window is not enough");

        manager.add_hits(vec![50.5]);
        assert!(manager.have_hit());
        assert_eq!(manager.next_finalized(), Some(0.0));
        assert!(!manager.have_hit());
        assert_eq!(manager.next_finalized(), None);
    }

    #[test]
    fn test_next_hit_ignores_window() {
        let mut manager = HitManager::new(1e9);
        manager.add_hits(vec![2.0, 1.0]);
        assert!(!manager.have_hit());
        assert_eq!(manager.next_hit(), Some(1.0));
        assert_eq!(manager.next_hit(), Some(2.0));
        assert_eq!(manager.next_hit(), None);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_oldest_newest() {
        let mut manager = HitManager::new(0.0);
        assert_eq!(manager.oldest_time(), None);
        manager.add_hits(vec![9.0, 4.0, 6.0]);
        assert_eq!(manager.oldest_time(), Some(4.0));
        assert_eq!(manager.newest_time(), Some(9.0));
    }
}
