//! Chunked FIFO caches backing restart and backpressure.
//!
//! A [`ChunkCache`] is an ordered sequence of growable fixed chunks. The
//! producer borrows writable space from the tail chunk ([`ChunkCache::get_buffer`],
//! [`ChunkCache::commit`]); the consumer drains the head chunk
//! ([`ChunkCache::get_data`], [`ChunkCache::report_read`]). A chunk emptied at
//! the head is recycled onto a free list, so steady-state operation performs
//! no allocation.

use std::collections::VecDeque;

/// Minimum capacity of a freshly allocated chunk.
const MIN_CHUNK: usize = 2048;
/// Chunk capacities are rounded up to a multiple of this.
const CHUNK_ALIGN: usize = 1024;

struct CacheChunk<T> {
    buffer: Box<[T]>,
    /// Valid region is `[start, end)`.
    start: usize,
    end: usize,
}

impl<T: Copy + Default> CacheChunk<T> {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn free_at_tail(&self) -> usize {
        self.buffer.len() - self.end
    }
}

/// FIFO queue of recycled buffer chunks.
pub struct ChunkCache<T: Copy + Default> {
    chunks: VecDeque<CacheChunk<T>>,
    free: Vec<Box<[T]>>,
    total: usize,
}

/// Byte-element cache used by the byte-oriented stages.
pub type ByteCache = ChunkCache<u8>;
/// UTF-16-unit cache used by the character-oriented stages.
pub type TextCache = ChunkCache<u16>;

impl<T: Copy + Default> Default for ChunkCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default> ChunkCache<T> {
    pub fn new() -> Self {
        Self { chunks: VecDeque::new(), free: Vec::new(), total: 0 }
    }

    /// Total number of cached elements across all chunks.
    #[inline]
    pub fn len(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Returns a writable region of at least `size` elements at the tail.
    /// Follow with [`ChunkCache::commit`] for the prefix actually filled.
    pub fn get_buffer(&mut self, size: usize) -> &mut [T] {
        let needs_chunk = match self.chunks.back() {
            Some(tail) => {
                if tail.free_at_tail() >= size {
                    false
                } else if self.chunks.len() == 1
                    && tail.start > 0
                    && tail.buffer.len() - tail.len() >= size
                {
                    // The head chunk's consumed prefix is reclaimable; shift
                    // the valid region down instead of allocating.
                    let tail = self.chunks.back_mut().unwrap();
                    tail.buffer.copy_within(tail.start..tail.end, 0);
                    tail.end -= tail.start;
                    tail.start = 0;
                    false
                } else {
                    true
                }
            }
            None => true,
        };

        if needs_chunk {
            self.push_chunk(size);
        }
        let tail = self.chunks.back_mut().unwrap();
        let end = tail.end;
        &mut tail.buffer[end..]
    }

    /// Extends the tail chunk's valid region by `count` just-written
    /// elements.
    pub fn commit(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let tail = self.chunks.back_mut().expect("commit without get_buffer");
        debug_assert!(tail.free_at_tail() >= count);
        tail.end += count;
        self.total += count;
    }

    /// Appends a slice in one step.
    pub fn append(&mut self, data: &[T]) {
        if data.is_empty() {
            return;
        }
        self.get_buffer(data.len())[..data.len()].copy_from_slice(data);
        self.commit(data.len());
    }

    /// The head chunk's valid region; empty when the cache is empty.
    pub fn get_data(&self) -> &[T] {
        match self.chunks.front() {
            Some(head) => &head.buffer[head.start..head.end],
            None => &[],
        }
    }

    /// Consumes `count` elements from the head chunk, recycling it once
    /// emptied.
    pub fn report_read(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let head = self.chunks.front_mut().expect("report_read on empty cache");
        debug_assert!(count <= head.len());
        head.start += count;
        self.total -= count;
        if head.start == head.end {
            let spent = self.chunks.pop_front().unwrap();
            self.free.push(spent.buffer);
        }
    }

    /// Drains into `buf`, crossing as many head chunks as needed. Returns
    /// the number of elements copied.
    pub fn read(&mut self, buf: &mut [T]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let data = self.get_data();
            if data.is_empty() {
                break;
            }
            let n = data.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&data[..n]);
            self.report_read(n);
            copied += n;
        }
        copied
    }

    /// Discards all content, keeping the chunk allocations for reuse.
    pub fn reset(&mut self) {
        while let Some(chunk) = self.chunks.pop_front() {
            self.free.push(chunk.buffer);
        }
        self.total = 0;
    }

    fn push_chunk(&mut self, size: usize) {
        // Doubled versus the request, rounded up to 1 KiB, never under 2 KiB.
        let wanted = (size * 2).max(MIN_CHUNK).next_multiple_of(CHUNK_ALIGN);
        let buffer = match self.free.iter().position(|b| b.len() >= size) {
            Some(idx) => self.free.swap_remove(idx),
            None => vec![T::default(); wanted].into_boxed_slice(),
        };
        self.chunks.push_back(CacheChunk { buffer, start: 0, end: 0 });
    }
}
