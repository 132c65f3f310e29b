//! Sparse gap tracking for received file segments.
//!
//! A [ChunkList] tracks the contiguous byte ranges a receive transaction has
//! seen so far, so that the class 2 state machine can enumerate the missing
//! ranges into NAK segment requests. Insertion merges adjacent and
//! overlapping ranges; the list is bounded, and under capacity pressure the
//! smallest tracked range is sacrificed, which keeps the coverage footprint
//! as large as possible (the dropped range is simply requested again).
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub type ChunkOffset = u64;
pub type ChunkSize = u64;

/// One contiguous received byte range `[offset, offset + size)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Chunk {
    pub offset: ChunkOffset,
    pub size: ChunkSize,
}

impl Chunk {
    #[inline]
    pub fn end(&self) -> ChunkOffset {
        self.offset + self.size
    }
}

/// Ordered set of non-overlapping chunks with a fixed maximum count.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChunkList {
    max_chunks: usize,
    chunks: Vec<Chunk>,
}

impl ChunkList {
    /// Panics if `max_chunks` is zero.
    pub fn new(max_chunks: usize) -> Self {
        assert!(max_chunks > 0, "chunk list needs a non-zero capacity");
        Self {
            max_chunks,
            chunks: Vec::with_capacity(max_chunks),
        }
    }

    pub fn reset(&mut self) {
        self.chunks.clear();
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn first(&self) -> Option<&Chunk> {
        self.chunks.first()
    }

    /// Sum of all tracked range sizes.
    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    /// True if a single chunk starting at offset zero covers at least `len`
    /// bytes.
    pub fn is_covered(&self, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        self.chunks.len() == 1 && self.chunks[0].offset == 0 && self.chunks[0].size >= len
    }

    /// Merge the given range into the set.
    ///
    /// If the range can not be combined with an existing chunk and the list
    /// is full, the smallest tracked range is evicted, but only if the new
    /// range is larger. Ties on size evict the earliest offset.
    pub fn add(&mut self, offset: ChunkOffset, size: ChunkSize) {
        if size == 0 {
            return;
        }
        let chunk = Chunk { offset, size };
        debug_assert!(chunk.end() > chunk.offset, "chunk range overflow");
        let index = self.find_insert_position(&chunk);
        self.insert(index, chunk);
    }

    /// Enumerate the gaps within `[start, total)` in ascending order.
    ///
    /// The callback is invoked for each gap until `max_gaps` gaps were
    /// reported or the scope is exhausted. Returns the number of reported
    /// gaps. An empty list reports one gap spanning the entire scope.
    pub fn compute_gaps<F: FnMut(&Chunk)>(
        &self,
        total: ChunkSize,
        start: ChunkOffset,
        max_gaps: usize,
        mut gap_fn: F,
    ) -> usize {
        if total == 0 || start >= total || max_gaps == 0 {
            return 0;
        }
        if self.chunks.is_empty() {
            gap_fn(&Chunk {
                offset: 0,
                size: total,
            });
            return 1;
        }
        let mut reported = 0;
        if start < self.chunks[0].offset {
            gap_fn(&Chunk {
                offset: start,
                size: self.chunks[0].offset - start,
            });
            reported = 1;
        }
        let mut i = 0;
        while reported < max_gaps && i < self.chunks.len() {
            let gap_start = self.chunks[i].end();
            if gap_start >= total {
                break;
            }
            let next_off = if i == self.chunks.len() - 1 {
                total
            } else {
                self.chunks[i + 1].offset
            };
            if start < next_off {
                let offset = gap_start.max(start);
                // Gaps which end before the requested start are skipped,
                // zero-size entries only arise between merged chunks.
                if next_off > offset {
                    gap_fn(&Chunk {
                        offset,
                        size: next_off - offset,
                    });
                    reported += 1;
                }
            }
            i += 1;
        }
        reported
    }

    /// Binary search for the first chunk whose offset is not smaller than
    /// the new chunk's offset.
    fn find_insert_position(&self, chunk: &Chunk) -> usize {
        self.chunks.partition_point(|c| c.offset < chunk.offset)
    }

    /// Try to combine the new chunk with the chunk in front of `index`.
    /// Returns true if the range was absorbed by the previous chunk.
    fn combine_previous(&mut self, index: usize, chunk: &Chunk) -> bool {
        if index == 0 {
            return false;
        }
        let chunk_end = chunk.end();
        let prev = &mut self.chunks[index - 1];
        if chunk.offset <= prev.end() {
            if prev.end() < chunk_end {
                prev.size = chunk_end - prev.offset;
            }
            return true;
        }
        false
    }

    /// Try to combine the new chunk with the chunks at and behind `index`.
    /// Returns true if any were combined, in which case the entry at `index`
    /// holds the combined range.
    fn combine_next(&mut self, index: usize, chunk: &Chunk) -> bool {
        let mut chunk_end = chunk.end();
        let mut combined_index = index;
        while combined_index < self.chunks.len() {
            if chunk_end < self.chunks[combined_index].offset {
                break;
            }
            combined_index += 1;
        }
        if combined_index == index {
            return false;
        }
        chunk_end = chunk_end.max(self.chunks[combined_index - 1].end());
        self.chunks[index] = Chunk {
            offset: chunk.offset,
            size: chunk_end - chunk.offset,
        };
        self.chunks.drain(index + 1..combined_index);
        true
    }

    fn find_smallest(&self) -> usize {
        let mut smallest = 0;
        for (i, chunk) in self.chunks.iter().enumerate().skip(1) {
            if chunk.size < self.chunks[smallest].size {
                smallest = i;
            }
        }
        smallest
    }

    fn insert(&mut self, index: usize, chunk: Chunk) {
        if self.combine_next(index, &chunk) {
            let combined = self.chunks[index];
            if self.combine_previous(index, &combined) {
                self.chunks.remove(index);
            }
            return;
        }
        if self.combine_previous(index, &chunk) {
            return;
        }
        if self.chunks.len() < self.max_chunks {
            self.chunks.insert(index, chunk);
            return;
        }
        // Full and not combinable: sacrifice the smallest tracked range if
        // the new one covers more.
        let smallest = self.find_smallest();
        if self.chunks[smallest].size < chunk.size {
            self.chunks.remove(smallest);
            let index = self.find_insert_position(&chunk);
            self.chunks.insert(index, chunk);
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert!(self.chunks.len() <= self.max_chunks);
        for (i, chunk) in self.chunks.iter().enumerate() {
            assert!(chunk.size > 0, "zero-size chunk at index {i}");
            if i > 0 {
                assert!(
                    self.chunks[i - 1].end() < chunk.offset,
                    "chunks {} and {} not disjoint and sorted",
                    i - 1,
                    i
                );
            }
        }
    }
}
