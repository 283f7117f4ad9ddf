//! Timestamp reorder buffer.
//!
//! When an input packet carries no PTS, the platform decoder may emit the
//! matching frame with a missing timestamp. The buffer remembers the DTS of
//! such packets in arrival order so the output side can substitute it. An
//! entry of `None` marks a packet that had a usable PTS of its own.

use std::collections::VecDeque;

use mb_common::Micros;
use tracing::trace;

/// Deepest reorder group of any realistic codec.
const REORDER_DEPTH: usize = 32;

/// Bounded FIFO of fallback timestamps.
#[derive(Debug)]
pub struct TimestampFifo {
    entries: VecDeque<Option<Micros>>,
    capacity: usize,
}

impl TimestampFifo {
    pub fn new() -> Self {
        Self::with_capacity(REORDER_DEPTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record the fallback timestamp for one queued packet.
    ///
    /// Overflow drops the oldest entry; the reorder depth of any codec the
    /// platform decodes fits well within the capacity.
    pub fn push(&mut self, fallback: Option<Micros>) {
        if self.entries.len() == self.capacity {
            let dropped = self.entries.pop_front();
            trace!(?dropped, "reorder buffer overflow, dropping oldest entry");
        }
        self.entries.push_back(fallback);
    }

    /// Take the fallback for the next output frame.
    ///
    /// `None` means the frame's own timestamp is authoritative (either the
    /// packet had a PTS, or the buffer ran dry).
    pub fn pop(&mut self) -> Option<Micros> {
        self.entries.pop_front().flatten()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimestampFifo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_only_missing_timestamps() {
        let mut fifo = TimestampFifo::new();
        // P1 has a PTS, P2 does not, P3 has one again.
        fifo.push(None);
        fifo.push(Some(Micros(1_010)));
        fifo.push(None);

        assert_eq!(fifo.pop(), None);
        assert_eq!(fifo.pop(), Some(Micros(1_010)));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn empty_pop_is_none() {
        let mut fifo = TimestampFifo::new();
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn never_grows_past_capacity() {
        let mut fifo = TimestampFifo::with_capacity(4);
        for i in 0..10 {
            fifo.push(Some(Micros(i)));
            assert!(fifo.len() <= 4);
        }
        // The six oldest entries were dropped.
        assert_eq!(fifo.pop(), Some(Micros(6)));
    }

    #[test]
    fn clear_empties() {
        let mut fifo = TimestampFifo::new();
        fifo.push(Some(Micros(1)));
        fifo.clear();
        assert!(fifo.is_empty());
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = TimestampFifo::with_capacity(0);
    }
}
