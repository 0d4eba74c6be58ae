//! Growable sentinel-terminated parse buffer shared by the input stages.
//!
//! Content in `[start, end)` is valid, unconsumed output; a terminating
//! sentinel unit always follows `end`. The buffer grows by doubling, capped
//! at the configured maximum token size; compaction discards the consumed
//! prefix when tail space runs out.

use crate::common::{Error, Result};

pub(crate) struct ParseBuffer {
    /// Storage; the final slot is reserved for the sentinel.
    data: Vec<u16>,
    start: usize,
    end: usize,
    max_token: usize,
}

impl ParseBuffer {
    pub(crate) fn new(initial: usize, max_token: usize) -> Self {
        // The ceiling may be smaller than the usual 64-unit floor.
        let cap = max_token + 1;
        let initial = initial.clamp(cap.min(64), cap);
        Self { data: vec![0; initial], start: 0, end: 0, max_token }
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u16] {
        &self.data
    }

    #[inline]
    pub(crate) fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub(crate) fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub(crate) fn max_token(&self) -> usize {
        self.max_token
    }

    /// Free space at the tail, sentinel slot excluded.
    #[inline]
    pub(crate) fn free(&self) -> usize {
        self.data.len() - 1 - self.end
    }

    /// Writable tail region; commit what was filled with
    /// [`ParseBuffer::committed`].
    pub(crate) fn writable(&mut self) -> &mut [u16] {
        let cap = self.data.len() - 1;
        &mut self.data[self.end..cap]
    }

    pub(crate) fn committed(&mut self, count: usize) {
        self.end += count;
        debug_assert!(self.end < self.data.len());
        self.data[self.end] = 0;
    }

    /// Makes at least `min` units of tail space available, compacting first
    /// and doubling afterwards. Fails once growth would let a single token
    /// exceed the ceiling.
    pub(crate) fn ensure_space(&mut self, min: usize) -> Result<()> {
        loop {
            if self.free() >= min {
                return Ok(());
            }
            if self.start > 0 {
                self.data.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
                self.data[self.end] = 0;
                continue;
            }
            let capacity = self.data.len() - 1;
            if capacity >= self.max_token {
                return Err(Error::TooComplex { max: self.max_token });
            }
            let grown = (self.data.len() * 2).min(self.max_token + 1);
            self.data.resize(grown, 0);
        }
    }

    pub(crate) fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        self.start += count;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
            self.data[0] = 0;
        }
    }

    /// Shifts `[gap_end, end)` down over the consumed gap `[gap_begin,
    /// gap_end)`.
    pub(crate) fn remove_gap(&mut self, gap_begin: usize, gap_end: usize) {
        debug_assert!(self.start <= gap_begin && gap_begin <= gap_end && gap_end <= self.end);
        if gap_begin == gap_end {
            return;
        }
        self.data.copy_within(gap_end..self.end, gap_begin);
        self.end -= gap_end - gap_begin;
        self.data[self.end] = 0;
    }

    pub(crate) fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.data[0] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(buf: &mut ParseBuffer, text: &str) {
        let units: Vec<u16> = text.encode_utf16().collect();
        buf.ensure_space(units.len()).unwrap();
        buf.writable()[..units.len()].copy_from_slice(&units);
        buf.committed(units.len());
    }

    fn content(buf: &ParseBuffer) -> String {
        String::from_utf16(&buf.as_slice()[buf.start()..buf.end()]).unwrap()
    }

    #[test]
    fn sentinel_follows_valid_region() {
        let mut buf = ParseBuffer::new(64, 1024);
        fill(&mut buf, "token");
        assert_eq!(buf.as_slice()[buf.end()], 0);
        assert_eq!(content(&buf), "token");
    }

    #[test]
    fn compaction_reclaims_consumed_prefix() {
        let mut buf = ParseBuffer::new(64, 1024);
        fill(&mut buf, &"x".repeat(60));
        buf.consume(50);
        // 60 units in a 63-unit window: room only after compaction.
        buf.ensure_space(40).unwrap();
        assert_eq!(buf.start(), 0);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn growth_doubles_until_cap() {
        let mut buf = ParseBuffer::new(64, 256);
        fill(&mut buf, &"y".repeat(200));
        assert_eq!(content(&buf).len(), 200);
        let err = buf.ensure_space(100).unwrap_err();
        assert!(matches!(err, Error::TooComplex { max: 256 }));
    }

    #[test]
    fn tiny_token_ceiling_is_honored() {
        let mut buf = ParseBuffer::new(64, 8);
        fill(&mut buf, "12345678");
        assert_eq!(content(&buf), "12345678");
        let err = buf.ensure_space(1).unwrap_err();
        assert!(matches!(err, Error::TooComplex { max: 8 }));
    }

    #[test]
    fn remove_gap_shifts_tail_down() {
        let mut buf = ParseBuffer::new(64, 1024);
        fill(&mut buf, "abcdef");
        buf.remove_gap(2, 4);
        assert_eq!(content(&buf), "abef");
        assert_eq!(buf.as_slice()[buf.end()], 0);
    }

    #[test]
    fn consume_to_empty_rewinds_offsets() {
        let mut buf = ParseBuffer::new(64, 1024);
        fill(&mut buf, "ab");
        buf.consume(2);
        assert_eq!(buf.start(), 0);
        assert_eq!(buf.end(), 0);
    }
}
