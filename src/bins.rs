use crate::chunk::Chunk;
use crate::constants::NUM_BINS;
use crate::size_class::bin_index;

/// Segregated free lists, one per order-of-magnitude size class.
pub struct Bins {
    heads: [Option<Chunk>; NUM_BINS],
    largest: Option<usize>,
}

impl Default for Bins {
    fn default() -> Self {
        Self::new()
    }
}

impl Bins {
    pub const fn new() -> Self {
        Self {
            heads: [None; NUM_BINS],
            largest: None,
        }
    }

    /// Highest-indexed bin holding a chunk.
    pub fn largest_in_use(&self) -> Option<usize> {
        self.largest
    }

    pub fn head(&self, bin: usize) -> Option<Chunk> {
        self.heads[bin]
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.largest.is_none()
    }

    pub fn iter(&self, bin: usize) -> BinIter {
        BinIter {
            cursor: self.heads[bin],
        }
    }

    pub fn push(&mut self, chunk: Chunk) {
        let bin = bin_index(chunk.size());
        let head = self.heads[bin];

        chunk.set_last_free(None);
        chunk.set_next_free(head);

        if let Some(head) = head {
            head.set_last_free(Some(chunk));
        }

        self.heads[bin] = Some(chunk);

        if self.largest.map_or(true, |largest| bin > largest) {
            self.largest = Some(bin);
        }
    }

    pub fn remove(&mut self, chunk: Chunk) {
        let bin = bin_index(chunk.size());
        let last = chunk.last_free();
        let next = chunk.next_free();

        if self.heads[bin] == Some(chunk) {
            self.heads[bin] = next;
        }

        if let Some(next) = next {
            next.set_last_free(last);
        }

        if let Some(last) = last {
            last.set_next_free(next);
        }

        chunk.set_last_free(None);
        chunk.set_next_free(None);

        if self.largest == Some(bin) {
            self.largest = (0..=bin).rev().find(|&i| self.heads[i].is_some());
        }
    }
}

pub struct BinIter {
    cursor: Option<Chunk>,
}

impl Iterator for BinIter {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.cursor?;

        self.cursor = chunk.next_free();
        Some(chunk)
    }
}
