//! Filter push-down.
//!
//! Rows below a query's push-down boundary skip the full kernel: their
//! workers only evaluate the shipdate predicate on the compressed column and
//! publish a bitmap word per 32 rows. Each finished range is queued as a
//! [`FilterChunk`]; a consumer ([`Kernel::consume_pushdown`]) aggregates the
//! queued ranges from the bitmap.
//!
//! [`Kernel::consume_pushdown`]: crate::kernel::Kernel::consume_pushdown

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam::queue::SegQueue;

use qone_storage::Lineitem;

use crate::primitives::precompute_filter;

/// Rows per bitmap word.
pub const WORD_ROWS: usize = 32;

const BLOCK_WORDS: usize = 32;

/// A range whose bitmap words are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterChunk {
    /// First row, 32-aligned.
    pub offset: usize,
    /// Row count.
    pub num: usize,
}

/// Predicate bitmap over a whole table plus the queue of finished ranges.
#[derive(Debug)]
pub struct PushdownFilter {
    words: Box<[AtomicU32]>,
    queue: SegQueue<FilterChunk>,
    threshold: Option<u16>,
}

impl PushdownFilter {
    /// Bitmap for `cardinality` rows and an inclusive shipdate bound.
    pub fn new(cardinality: usize, shipdate_threshold: i16) -> Self {
        Self {
            words: (0..cardinality.div_ceil(WORD_ROWS)).map(|_| AtomicU32::new(0)).collect(),
            queue: SegQueue::new(),
            // Compressed shipdates are non-negative; a negative bound passes nothing.
            threshold: u16::try_from(shipdate_threshold).ok(),
        }
    }

    /// Evaluate the predicate for rows `offset..offset + num` and queue the range.
    ///
    /// # Panics
    ///
    /// If `offset` is not 32-aligned or the range is outside the table.
    pub fn precompute(&self, table: &Lineitem, offset: usize, num: usize) {
        assert!(offset % WORD_ROWS == 0, "push-down range must start on a bitmap word");
        let compressed = &table.compressed_shipdate()[offset..offset + num];
        let first = offset / WORD_ROWS;
        let mut block = [0u32; BLOCK_WORDS];
        for (b, rows) in compressed.chunks(BLOCK_WORDS * WORD_ROWS).enumerate() {
            let nw = rows.len().div_ceil(WORD_ROWS);
            match self.threshold {
                Some(t) => precompute_filter(rows, &mut block[..nw], t),
                None => block[..nw].fill(0),
            }
            let start = first + b * BLOCK_WORDS;
            for (slot, &w) in self.words[start..start + nw].iter().zip(&block[..nw]) {
                slot.store(w, Ordering::Relaxed);
            }
        }
        // The queue's push/pop pair orders the word stores before any consumer loads.
        self.queue.push(FilterChunk { offset, num });
    }

    /// Next published range, if any.
    pub fn pop(&self) -> Option<FilterChunk> {
        self.queue.pop()
    }

    /// Published ranges not yet consumed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Copy `out.len()` words starting at word `first`.
    pub fn load_words(&self, first: usize, out: &mut [u32]) {
        let n = out.len();
        for (dst, src) in out.iter_mut().zip(&self.words[first..first + n]) {
            *dst = src.load(Ordering::Relaxed);
        }
    }

    /// Drop pending ranges and zero the bitmap.
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
        for w in self.words.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qone_storage::gen::generate;

    #[test]
    fn bitmap_matches_predicate() {
        let table = generate(3_000, 11);
        let threshold = 2_000;
        let filter = PushdownFilter::new(table.cardinality(), threshold);
        filter.precompute(&table, 0, 1_024);
        filter.precompute(&table, 1_024, 3_000 - 1_024);
        assert_eq!(filter.pending(), 2);

        let mut words = vec![0u32; 3_000usize.div_ceil(32)];
        filter.load_words(0, &mut words);
        for (i, &d) in table.shipdate.values().iter().enumerate() {
            let bit = words[i / 32] >> (i % 32) & 1 == 1;
            assert_eq!(bit, d <= threshold, "row {i}");
        }

        assert_eq!(filter.pop(), Some(FilterChunk { offset: 0, num: 1_024 }));
        filter.clear();
        assert_eq!(filter.pending(), 0);
        filter.load_words(0, &mut words);
        assert!(words.iter().all(|&w| w == 0));
    }

    #[test]
    fn load_words_from_an_inner_word() {
        let table = generate(256, 5);
        let threshold = i16::MAX;
        let filter = PushdownFilter::new(table.cardinality(), threshold);
        filter.precompute(&table, 0, 256);

        let mut all = [0u32; 8];
        filter.load_words(0, &mut all);
        assert_eq!(all, [u32::MAX; 8]);

        let mut tail = [0u32; 3];
        filter.load_words(5, &mut tail);
        assert_eq!(tail, [u32::MAX; 3]);
    }

    #[test]
    fn negative_threshold_passes_nothing() {
        let table = generate(100, 3);
        let filter = PushdownFilter::new(100, -1);
        filter.precompute(&table, 0, 100);
        let mut words = [u32::MAX; 4];
        filter.load_words(0, &mut words);
        assert_eq!(words, [0; 4]);
    }
}
